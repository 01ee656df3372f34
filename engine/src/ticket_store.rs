//! Event-sourced per-ticket history and the projected [`TicketState`].
//!
//! Grounded in `original_source/.../stores/ticket_lifecycle.py`: `append`
//! re-derives `TicketState` by a full replay of the ticket's history on
//! every insert rather than an incremental update, which is the
//! simplest implementation that trivially satisfies determinism
//! (determinism is then a property of the replay function alone, not of
//! incremental bookkeeping).

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use flightledger_core::clock::Clock;
use flightledger_core::error::{BackendError, ConflictError};
use flightledger_core::event::{CanonicalEvent, CanonicalEventType};
use flightledger_core::ids::TicketNumber;
use flightledger_core::repository::{RepoResult, TicketEventRepository, TicketStateRepository};
use flightledger_core::ticket::{TicketEventRow, TicketState};
use thiserror::Error;

/// Failure modes of [`TicketLifecycleStore::append`].
#[derive(Debug, Error)]
pub enum AppendError {
    /// Two concurrent callers raced on the same ticket's sequence
    /// assignment. Retrying is always safe: `append` is idempotent by
    /// `event_id`.
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Append-only event history plus the cached [`TicketState`] projection,
/// for one ticket at a time.
///
/// Concurrent `append` calls across *different* tickets may proceed in
/// parallel against the repository; calls for the *same* ticket are
/// serialized by one process-wide lock here rather than a per-ticket
/// one, since the in-memory backend behind this store already
/// serializes all of its own operations through a single mutex — a
/// finer-grained lock here would buy no real parallelism against that
/// backend, and the remote backend provides its own row-level
/// isolation.
pub struct TicketLifecycleStore {
    events: Arc<dyn TicketEventRepository>,
    state: Arc<dyn TicketStateRepository>,
    clock: Arc<dyn Clock>,
    append_lock: Mutex<()>,
}

impl TicketLifecycleStore {
    #[must_use]
    pub fn new(
        events: Arc<dyn TicketEventRepository>,
        state: Arc<dyn TicketStateRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            events,
            state,
            clock,
            append_lock: Mutex::new(()),
        }
    }

    /// # Errors
    /// Returns [`BackendError`] if the underlying repositories reject the reset.
    pub fn reset(&self) -> RepoResult<()> {
        self.events.reset()?;
        self.state.reset()
    }

    /// Idempotent by `event_id`: re-appending an event already on file is
    /// a silent no-op.
    ///
    /// # Errors
    /// Returns [`AppendError::Conflict`] if two callers raced on the same
    /// ticket's sequence assignment, or [`AppendError::Backend`] if the
    /// repository itself failed.
    pub fn append(&self, event: CanonicalEvent) -> Result<(), AppendError> {
        let _guard = self.append_lock.lock().unwrap_or_else(|p| p.into_inner());

        if self.events.find_by_event_id(&event.event_id)?.is_some() {
            return Ok(());
        }

        let sequence = self.events.next_sequence(&event.ticket_number)?;
        let row = TicketEventRow {
            event_sequence: sequence,
            event: event.clone(),
            ingested_at: self.clock.now(),
        };
        self.events.insert(row).map_err(|err| match err {
            BackendError::InvariantViolation { .. } => ConflictError {
                ticket_number: event.ticket_number.clone(),
                event_sequence: sequence.value(),
            }
            .into(),
            other => AppendError::Backend(other),
        })?;

        let history = self.events.get_by_ticket(&event.ticket_number)?;
        let projection = TicketState::replay(
            event.ticket_number.clone(),
            history.iter().map(|row| &row.event),
        );
        self.state.upsert(projection)?;
        Ok(())
    }

    /// # Errors
    /// Returns [`BackendError`] if the underlying repository rejects the read.
    pub fn get_history(&self, ticket_number: &TicketNumber) -> RepoResult<Vec<CanonicalEvent>> {
        Ok(self
            .events
            .get_by_ticket(ticket_number)?
            .into_iter()
            .map(|row| row.event)
            .collect())
    }

    /// Projects state using only events with `occurred_at <= as_of`.
    ///
    /// # Errors
    /// Returns [`BackendError`] if the underlying repository rejects the read.
    pub fn get_state_at(
        &self,
        ticket_number: &TicketNumber,
        as_of: DateTime<Utc>,
    ) -> RepoResult<TicketState> {
        let rows = self.events.get_by_ticket_at(ticket_number, as_of)?;
        Ok(TicketState::replay(
            ticket_number.clone(),
            rows.iter().map(|row| &row.event),
        ))
    }

    /// Returns the cached projection if present, falling back to a full
    /// replay otherwise.
    ///
    /// # Errors
    /// Returns [`BackendError`] if the underlying repository rejects the read.
    pub fn get_current_state(&self, ticket_number: &TicketNumber) -> RepoResult<TicketState> {
        if let Some(state) = self.state.get(ticket_number)? {
            return Ok(state);
        }
        let rows = self.events.get_by_ticket(ticket_number)?;
        Ok(TicketState::replay(
            ticket_number.clone(),
            rows.iter().map(|row| &row.event),
        ))
    }

    /// No ordering contract.
    ///
    /// # Errors
    /// Returns [`BackendError`] if the underlying repository rejects the read.
    pub fn get_events_by_type(
        &self,
        types: &[CanonicalEventType],
    ) -> RepoResult<Vec<CanonicalEvent>> {
        Ok(self
            .events
            .get_by_event_types(types)?
            .into_iter()
            .map(|row| row.event)
            .collect())
    }

    /// # Errors
    /// Returns [`BackendError`] if the underlying repository rejects the read.
    pub fn all_events(&self) -> RepoResult<Vec<CanonicalEvent>> {
        Ok(self
            .events
            .all_rows()?
            .into_iter()
            .map(|row| row.event)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use flightledger_core::clock::SystemClock;
    use flightledger_core::event::SourceSystem;
    use flightledger_core::ids::CouponNumber;
    use flightledger_memory::MemoryBackend;
    use rust_decimal_macros::dec;

    use super::*;

    fn store() -> TicketLifecycleStore {
        let backend = Arc::new(MemoryBackend::new());
        TicketLifecycleStore::new(backend.clone(), backend, Arc::new(SystemClock))
    }

    fn event(event_id: &str, ticket: &str, event_type: CanonicalEventType, at: i64) -> CanonicalEvent {
        CanonicalEvent {
            event_id: event_id.to_string(),
            occurred_at: Utc.timestamp_opt(at, 0).unwrap(),
            source_system: SourceSystem::Pss,
            event_type,
            ticket_number: TicketNumber::new(ticket).unwrap(),
            coupon_number: Some(CouponNumber::new(1).unwrap()),
            pnr: None,
            passenger_name: None,
            marketing_carrier: None,
            operating_carrier: None,
            flight_number: None,
            flight_date: None,
            origin: None,
            destination: None,
            currency: None,
            gross_amount: Some(dec!(100)),
            net_amount: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn appending_same_event_id_twice_is_a_no_op() {
        let store = store();
        let ticket = TicketNumber::new("T1").unwrap();
        let e = event("evt-1", "T1", CanonicalEventType::TicketIssued, 1);
        store.append(e.clone()).unwrap();
        store.append(e).unwrap();
        assert_eq!(store.get_history(&ticket).unwrap().len(), 1);
    }

    #[test]
    fn sequence_is_dense_from_one() {
        let store = store();
        let ticket = TicketNumber::new("T1").unwrap();
        store
            .append(event("evt-1", "T1", CanonicalEventType::TicketIssued, 1))
            .unwrap();
        store
            .append(event("evt-2", "T1", CanonicalEventType::CouponFlown, 2))
            .unwrap();
        let history = store.get_history(&ticket).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn get_state_at_respects_occurred_at_cutoff() {
        let store = store();
        let ticket = TicketNumber::new("T1").unwrap();
        store
            .append(event("evt-1", "T1", CanonicalEventType::TicketIssued, 1))
            .unwrap();
        store
            .append(event("evt-2", "T1", CanonicalEventType::CouponFlown, 100))
            .unwrap();

        let early = store
            .get_state_at(&ticket, Utc.timestamp_opt(50, 0).unwrap())
            .unwrap();
        assert_eq!(early.event_count, 1);

        let late = store
            .get_state_at(&ticket, Utc.timestamp_opt(200, 0).unwrap())
            .unwrap();
        assert_eq!(late.event_count, 2);
    }
}
