//! The append-only audit/lineage log. Every other stage in this crate
//! takes an `Option<Arc<AuditStore>>` and calls `log` after a successful
//! mutation; nothing here ever updates or deletes a record, directly
//! grounded in `original_source/.../audit/lineage.py`'s narrow surface
//! (`log`, `get_lineage`, `get_history`, nothing else).

use std::sync::Arc;

use flightledger_core::audit::{AuditEntry, AuditRecord};
use flightledger_core::clock::Clock;
use flightledger_core::ids::TicketNumber;
use flightledger_core::repository::{AuditRepository, RepoResult};
use uuid::Uuid;

/// Assigns `id` and `timestamp` to incoming [`AuditEntry`] values and
/// forwards them to the underlying repository.
pub struct AuditStore {
    repository: Arc<dyn AuditRepository>,
    clock: Arc<dyn Clock>,
}

impl AuditStore {
    #[must_use]
    pub fn new(repository: Arc<dyn AuditRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// # Errors
    /// Returns [`flightledger_core::error::BackendError`] if the underlying repository rejects the reset.
    pub fn reset(&self) -> RepoResult<()> {
        self.repository.reset()
    }

    /// # Errors
    /// Returns [`flightledger_core::error::BackendError`] if the underlying repository rejects the insert.
    pub fn log(&self, entry: AuditEntry) -> RepoResult<AuditRecord> {
        let record = AuditRecord {
            id: Uuid::new_v4(),
            timestamp: self.clock.now(),
            action: entry.action,
            component: entry.component,
            ticket_number: entry.ticket_number,
            input_event_ids: entry.input_event_ids,
            output_reference: entry.output_reference,
            detail: entry.detail,
            raw_source_hash: entry.raw_source_hash,
        };
        self.repository.insert(record.clone())?;
        Ok(record)
    }

    /// # Errors
    /// Returns [`flightledger_core::error::BackendError`] if the underlying repository rejects the read.
    pub fn get_history(&self, ticket_number: &TicketNumber) -> RepoResult<Vec<AuditRecord>> {
        self.repository.get_by_ticket(ticket_number)
    }

    /// # Errors
    /// Returns [`flightledger_core::error::BackendError`] if the underlying repository rejects the read.
    pub fn get_lineage(&self, output_reference: &str) -> RepoResult<Vec<AuditRecord>> {
        self.repository.get_by_output_reference(output_reference)
    }
}

#[cfg(test)]
mod tests {
    use flightledger_core::clock::SystemClock;
    use flightledger_memory::MemoryBackend;

    use super::*;

    #[test]
    fn log_assigns_id_and_returns_record() {
        let backend = Arc::new(MemoryBackend::new());
        let store = AuditStore::new(backend, Arc::new(SystemClock));
        let record = store
            .log(AuditEntry::new("task_succeeded", "dag_runner"))
            .unwrap();
        assert_eq!(record.action, "task_succeeded");
    }

    #[test]
    fn history_is_empty_for_unknown_ticket() {
        let backend = Arc::new(MemoryBackend::new());
        let store = AuditStore::new(backend, Arc::new(SystemClock));
        let ticket = TicketNumber::new("T1").unwrap();
        assert!(store.get_history(&ticket).unwrap().is_empty());
    }
}
