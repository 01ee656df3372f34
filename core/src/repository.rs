//! Repository traits: one narrow trait per persisted entity, each
//! with two implementations — `flightledger-memory` (authoritative for
//! tests and default runtime) and `flightledger-postgres` (remote,
//! implemented behind this same trait surface).
//!
//! All methods are synchronous. The engine's concurrency model is
//! fundamentally synchronous (one refresh at a time, serialized by a
//! mutex), so `flightledger-engine` never needs an async runtime of its
//! own; the remote backend bridges its async `sqlx` calls into this
//! synchronous surface at its own boundary (see `flightledger-postgres`).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::AuditRecord;
use crate::dag::{DagRunRow, TaskRunRow, TaskStatus};
use crate::error::BackendError;
use crate::event::CanonicalEventType;
use crate::ids::TicketNumber;
use crate::matcher::CouponMatchRow;
use crate::recon::ReconResultRow;
use crate::settlement::{Settlement, SettlementSagaStep};
use crate::ticket::{TicketEventRow, TicketState};

/// Shorthand result type for repository operations.
pub type RepoResult<T> = Result<T, BackendError>;

/// Append-only storage of per-ticket event history (component 6, event
/// side).
pub trait TicketEventRepository: Send + Sync {
    /// Clears all rows. Used by the top-level `reset()` cascade.
    fn reset(&self) -> RepoResult<()>;

    /// Finds an existing row by `event_id`, for the idempotent-append
    /// check.
    fn find_by_event_id(&self, event_id: &str) -> RepoResult<Option<TicketEventRow>>;

    /// The next `event_sequence` to assign for this ticket: one past
    /// the current max, or `EventSequence::INITIAL` if none exist yet.
    fn next_sequence(&self, ticket_number: &TicketNumber) -> RepoResult<crate::ids::EventSequence>;

    /// Inserts a new row. Callers are responsible for having already
    /// checked `find_by_event_id` and computed `next_sequence`;
    /// `ConflictError` (not part of this trait's `RepoResult`, raised by
    /// the in-memory implementation directly) signals a sequence race.
    fn insert(&self, row: TicketEventRow) -> RepoResult<()>;

    /// Full history for one ticket, ordered by `event_sequence` ascending.
    fn get_by_ticket(&self, ticket_number: &TicketNumber) -> RepoResult<Vec<TicketEventRow>>;

    /// History for one ticket restricted to `occurred_at <= as_of`.
    fn get_by_ticket_at(
        &self,
        ticket_number: &TicketNumber,
        as_of: DateTime<Utc>,
    ) -> RepoResult<Vec<TicketEventRow>>;

    /// All rows whose `event_type` is in `types`. No ordering contract.
    fn get_by_event_types(&self, types: &[CanonicalEventType]) -> RepoResult<Vec<TicketEventRow>>;

    /// Every row ever inserted, in no particular order.
    fn all_rows(&self) -> RepoResult<Vec<TicketEventRow>>;
}

/// Cached projected ticket state (component 6, state side). A cache —
/// always re-derivable from `TicketEventRepository`.
pub trait TicketStateRepository: Send + Sync {
    fn reset(&self) -> RepoResult<()>;
    fn upsert(&self, state: TicketState) -> RepoResult<()>;
    fn get(&self, ticket_number: &TicketNumber) -> RepoResult<Option<TicketState>>;
}

/// Append-only audit/lineage storage (component 5). No update/delete
/// method exists on this trait: a record can never be edited or
/// deleted once written.
pub trait AuditRepository: Send + Sync {
    fn reset(&self) -> RepoResult<()>;
    fn insert(&self, record: AuditRecord) -> RepoResult<()>;
    /// Timestamp-ascending.
    fn get_by_ticket(&self, ticket_number: &TicketNumber) -> RepoResult<Vec<AuditRecord>>;
    /// Timestamp-ascending.
    fn get_by_output_reference(&self, output_reference: &str) -> RepoResult<Vec<AuditRecord>>;
}

/// Coupon match storage (component 7).
pub trait CouponMatchRepository: Send + Sync {
    fn reset(&self) -> RepoResult<()>;
    fn upsert(&self, row: CouponMatchRow) -> RepoResult<()>;
    fn all_rows(&self) -> RepoResult<Vec<CouponMatchRow>>;
    /// Rows whose `days_in_suspense >= min_age_days` and whose status is
    /// suspense-eligible.
    fn get_suspense(&self, min_age_days: u32) -> RepoResult<Vec<CouponMatchRow>>;
}

/// Recon break storage (component 8).
pub trait ReconRepository: Send + Sync {
    fn reset(&self) -> RepoResult<()>;
    fn insert(&self, row: ReconResultRow) -> RepoResult<()>;
    fn all_rows(&self) -> RepoResult<Vec<ReconResultRow>>;
    fn get_by_id(&self, id: Uuid) -> RepoResult<Option<ReconResultRow>>;
    fn update(&self, row: ReconResultRow) -> RepoResult<()>;
}

/// Settlement and saga-log storage (component 9).
pub trait SettlementRepository: Send + Sync {
    fn reset(&self) -> RepoResult<()>;
    fn insert(&self, settlement: Settlement) -> RepoResult<()>;
    fn get(&self, id: Uuid) -> RepoResult<Option<Settlement>>;
    fn update(&self, settlement: Settlement) -> RepoResult<()>;
    /// Sorted by `created_at` descending; filtered by status if given.
    fn list_all(&self) -> RepoResult<Vec<Settlement>>;
    fn insert_saga_step(&self, step: SettlementSagaStep) -> RepoResult<()>;
    /// Timestamp-ascending.
    fn get_saga(&self, settlement_id: Uuid) -> RepoResult<Vec<SettlementSagaStep>>;
}

/// DAG run header storage (component 10).
pub trait DagRunRepository: Send + Sync {
    fn reset(&self) -> RepoResult<()>;
    fn insert(&self, run: DagRunRow) -> RepoResult<()>;
    fn get(&self, id: Uuid) -> RepoResult<Option<DagRunRow>>;
    fn update_status(
        &self,
        id: Uuid,
        status: crate::dag::DagRunStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> RepoResult<()>;
}

/// Per-task run row storage (component 10).
pub trait TaskRunRepository: Send + Sync {
    fn reset(&self) -> RepoResult<()>;
    fn insert(&self, row: TaskRunRow) -> RepoResult<()>;
    /// Sorted by `task_name`.
    fn get_by_run(&self, dag_run_id: Uuid) -> RepoResult<Vec<TaskRunRow>>;
    #[allow(clippy::too_many_arguments)]
    fn update(
        &self,
        id: Uuid,
        status: TaskStatus,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        error_message: Option<String>,
        result: Option<serde_json::Value>,
    ) -> RepoResult<()>;
}
