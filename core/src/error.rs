//! Error kinds shared across FlightLedger's stages.
//!
//! These are deliberately narrow: a caller can match on the concrete
//! kind it expects (`ConflictError`, `NotFoundError`, …) rather than a
//! single catch-all error type, one error enum per component
//! (`EventStoreError`, `EventBusError`, …) instead of a crate-wide one.

use thiserror::Error;

use crate::ids::TicketNumber;

/// Two concurrent `append()` calls raced on the same ticket and produced
/// a duplicate `(ticket_number, event_sequence)` pair. The caller should
/// retry the append; retrying is safe because `append` is idempotent by
/// `event_id`.
#[derive(Debug, Clone, Error)]
#[error("conflicting event_sequence for ticket {ticket_number}: {event_sequence} already assigned")]
pub struct ConflictError {
    /// The ticket whose sequence assignment raced.
    pub ticket_number: TicketNumber,
    /// The sequence number both callers attempted to claim.
    pub event_sequence: u64,
}

/// A lookup by id found nothing. Never rolled back, since nothing was
/// mutated to produce it.
#[derive(Debug, Clone, Error)]
#[error("{kind} not found: {id}")]
pub struct NotFoundError {
    /// The kind of entity that was looked up (e.g. `"settlement"`, `"break"`, `"dag run"`).
    pub kind: &'static str,
    /// The id that was searched for.
    pub id: String,
}

impl NotFoundError {
    /// Builds a `NotFoundError` for the given entity kind and id.
    pub fn new(kind: &'static str, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// A remote repository backend failed. The in-memory backend never raises
/// this; only `flightledger-postgres`'s client does (connection failure,
/// timeout, constraint violation).
#[derive(Debug, Error)]
pub enum BackendError {
    /// The remote call timed out before completing. No partial write
    /// occurred; state is unchanged.
    #[error("backend call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The backend rejected the operation (connection failure, constraint
    /// violation, or any other backend-reported failure).
    #[error("backend error: {0}")]
    Backend(String),

    /// The remote backend was asked to perform an operation that would
    /// violate a data invariant (e.g. a duplicate `event_id` surfaced as
    /// a unique-constraint violation rather than silently upserted).
    #[error("backend rejected operation: would violate invariant {invariant}: {detail}")]
    InvariantViolation {
        /// Which invariant would have been violated, by short name
        /// (e.g. `"unique_event_id"`, `"dense_sequence"`).
        invariant: &'static str,
        /// Human-readable detail.
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_error_renders_kind_and_id() {
        let err = NotFoundError::new("settlement", "abc-123");
        assert_eq!(err.to_string(), "settlement not found: abc-123");
    }
}
