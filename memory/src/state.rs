//! The in-memory repository backend: one `Mutex`-guarded collection of
//! tables, behind every repository trait `flightledger-core` defines.
//!
//! Grounded in the original `_MemoryState` dataclass
//! (`original_source/.../runtime.py`): a set of collections protected by
//! one lock — global state, but encapsulated behind the repository
//! handle. A single `Mutex` rather than per-table locks: simpler, and
//! the whole point of this backend is to be the fast, deterministic
//! default for tests and the default runtime, not a high-throughput
//! production store (that's `flightledger-postgres`'s job).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use flightledger_core::audit::AuditRecord;
use flightledger_core::dag::{DagRunRow, DagRunStatus, TaskRunRow, TaskStatus};
use flightledger_core::error::BackendError;
use flightledger_core::event::CanonicalEventType;
use flightledger_core::ids::{CouponNumber, EventSequence, TicketNumber};
use flightledger_core::matcher::CouponMatchRow;
use flightledger_core::recon::ReconResultRow;
use flightledger_core::repository::{
    AuditRepository, CouponMatchRepository, DagRunRepository, RepoResult, ReconRepository,
    SettlementRepository, TaskRunRepository, TicketEventRepository, TicketStateRepository,
};
use flightledger_core::settlement::{Settlement, SettlementSagaStep};
use flightledger_core::ticket::{TicketEventRow, TicketState};
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryState {
    ticket_events: Vec<TicketEventRow>,
    ticket_events_by_ticket: BTreeMap<TicketNumber, Vec<usize>>,
    ticket_state: BTreeMap<TicketNumber, TicketState>,
    coupon_matches: BTreeMap<(TicketNumber, CouponNumber), CouponMatchRow>,
    recon_rows: Vec<ReconResultRow>,
    settlements: BTreeMap<Uuid, Settlement>,
    saga_steps: Vec<SettlementSagaStep>,
    audit_records: Vec<AuditRecord>,
    dag_runs: BTreeMap<Uuid, DagRunRow>,
    task_runs: Vec<TaskRunRow>,
}

/// A cloneable handle to the shared in-memory backend. Every repository
/// trait in `flightledger-core::repository` is implemented on this one
/// type; cloning shares the same underlying `Mutex`.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clears every table. Used by the top-level `reset()` cascade:
    /// settlements → recon → matches → ticket state → ticket events →
    /// audit, in that order.
    pub fn reset_all(&self) {
        let mut state = self.lock();
        *state = MemoryState::default();
    }
}

impl TicketEventRepository for MemoryBackend {
    fn reset(&self) -> RepoResult<()> {
        let mut state = self.lock();
        state.ticket_events.clear();
        state.ticket_events_by_ticket.clear();
        Ok(())
    }

    fn find_by_event_id(&self, event_id: &str) -> RepoResult<Option<TicketEventRow>> {
        let state = self.lock();
        Ok(state
            .ticket_events
            .iter()
            .find(|row| row.event.event_id == event_id)
            .cloned())
    }

    fn next_sequence(&self, ticket_number: &TicketNumber) -> RepoResult<EventSequence> {
        let state = self.lock();
        let max = state
            .ticket_events_by_ticket
            .get(ticket_number)
            .and_then(|indices| {
                indices
                    .iter()
                    .map(|&i| state.ticket_events[i].event_sequence.value())
                    .max()
            });
        Ok(max.map_or(EventSequence::INITIAL, |m| EventSequence::new(m + 1)))
    }

    fn insert(&self, row: TicketEventRow) -> RepoResult<()> {
        let mut state = self.lock();
        let ticket_number = row.event.ticket_number.clone();
        let duplicate = state
            .ticket_events_by_ticket
            .get(&ticket_number)
            .is_some_and(|indices| {
                indices
                    .iter()
                    .any(|&i| state.ticket_events[i].event_sequence == row.event_sequence)
            });
        if duplicate {
            return Err(BackendError::InvariantViolation {
                invariant: "dense_sequence",
                detail: format!(
                    "duplicate event_sequence {} for ticket {ticket_number}",
                    row.event_sequence
                ),
            });
        }
        let index = state.ticket_events.len();
        state.ticket_events.push(row);
        state
            .ticket_events_by_ticket
            .entry(ticket_number)
            .or_default()
            .push(index);
        Ok(())
    }

    fn get_by_ticket(&self, ticket_number: &TicketNumber) -> RepoResult<Vec<TicketEventRow>> {
        let state = self.lock();
        let mut rows: Vec<TicketEventRow> = state
            .ticket_events_by_ticket
            .get(ticket_number)
            .into_iter()
            .flatten()
            .map(|&i| state.ticket_events[i].clone())
            .collect();
        rows.sort_by_key(|r| r.event_sequence);
        Ok(rows)
    }

    fn get_by_ticket_at(
        &self,
        ticket_number: &TicketNumber,
        as_of: DateTime<Utc>,
    ) -> RepoResult<Vec<TicketEventRow>> {
        let mut rows = self.get_by_ticket(ticket_number)?;
        rows.retain(|r| r.event.occurred_at <= as_of);
        Ok(rows)
    }

    fn get_by_event_types(&self, types: &[CanonicalEventType]) -> RepoResult<Vec<TicketEventRow>> {
        let state = self.lock();
        Ok(state
            .ticket_events
            .iter()
            .filter(|row| types.contains(&row.event.event_type))
            .cloned()
            .collect())
    }

    fn all_rows(&self) -> RepoResult<Vec<TicketEventRow>> {
        Ok(self.lock().ticket_events.clone())
    }
}

impl TicketStateRepository for MemoryBackend {
    fn reset(&self) -> RepoResult<()> {
        self.lock().ticket_state.clear();
        Ok(())
    }

    fn upsert(&self, state: TicketState) -> RepoResult<()> {
        self.lock()
            .ticket_state
            .insert(state.ticket_number.clone(), state);
        Ok(())
    }

    fn get(&self, ticket_number: &TicketNumber) -> RepoResult<Option<TicketState>> {
        Ok(self.lock().ticket_state.get(ticket_number).cloned())
    }
}

impl AuditRepository for MemoryBackend {
    fn reset(&self) -> RepoResult<()> {
        self.lock().audit_records.clear();
        Ok(())
    }

    fn insert(&self, record: AuditRecord) -> RepoResult<()> {
        self.lock().audit_records.push(record);
        Ok(())
    }

    fn get_by_ticket(&self, ticket_number: &TicketNumber) -> RepoResult<Vec<AuditRecord>> {
        let state = self.lock();
        let mut rows: Vec<AuditRecord> = state
            .audit_records
            .iter()
            .filter(|r| r.ticket_number.as_ref() == Some(ticket_number))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }

    fn get_by_output_reference(&self, output_reference: &str) -> RepoResult<Vec<AuditRecord>> {
        let state = self.lock();
        let mut rows: Vec<AuditRecord> = state
            .audit_records
            .iter()
            .filter(|r| r.output_reference.as_deref() == Some(output_reference))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }
}

impl CouponMatchRepository for MemoryBackend {
    fn reset(&self) -> RepoResult<()> {
        self.lock().coupon_matches.clear();
        Ok(())
    }

    fn upsert(&self, row: CouponMatchRow) -> RepoResult<()> {
        self.lock()
            .coupon_matches
            .insert((row.ticket_number.clone(), row.coupon_number), row);
        Ok(())
    }

    fn all_rows(&self) -> RepoResult<Vec<CouponMatchRow>> {
        Ok(self.lock().coupon_matches.values().cloned().collect())
    }

    fn get_suspense(&self, min_age_days: u32) -> RepoResult<Vec<CouponMatchRow>> {
        let state = self.lock();
        Ok(state
            .coupon_matches
            .values()
            .filter(|row| row.status.is_suspense_eligible() && row.days_in_suspense >= min_age_days)
            .cloned()
            .collect())
    }
}

impl ReconRepository for MemoryBackend {
    fn reset(&self) -> RepoResult<()> {
        self.lock().recon_rows.clear();
        Ok(())
    }

    fn insert(&self, row: ReconResultRow) -> RepoResult<()> {
        self.lock().recon_rows.push(row);
        Ok(())
    }

    fn all_rows(&self) -> RepoResult<Vec<ReconResultRow>> {
        Ok(self.lock().recon_rows.clone())
    }

    fn get_by_id(&self, id: Uuid) -> RepoResult<Option<ReconResultRow>> {
        Ok(self.lock().recon_rows.iter().find(|r| r.id == id).cloned())
    }

    fn update(&self, row: ReconResultRow) -> RepoResult<()> {
        let mut state = self.lock();
        if let Some(existing) = state.recon_rows.iter_mut().find(|r| r.id == row.id) {
            *existing = row;
            Ok(())
        } else {
            Err(BackendError::Backend(format!(
                "recon row {} not found for update",
                row.id
            )))
        }
    }
}

impl SettlementRepository for MemoryBackend {
    fn reset(&self) -> RepoResult<()> {
        let mut state = self.lock();
        state.settlements.clear();
        state.saga_steps.clear();
        Ok(())
    }

    fn insert(&self, settlement: Settlement) -> RepoResult<()> {
        self.lock().settlements.insert(settlement.id, settlement);
        Ok(())
    }

    fn get(&self, id: Uuid) -> RepoResult<Option<Settlement>> {
        Ok(self.lock().settlements.get(&id).cloned())
    }

    fn update(&self, settlement: Settlement) -> RepoResult<()> {
        self.lock().settlements.insert(settlement.id, settlement);
        Ok(())
    }

    fn list_all(&self) -> RepoResult<Vec<Settlement>> {
        let state = self.lock();
        let mut rows: Vec<Settlement> = state.settlements.values().cloned().collect();
        rows.sort_by_key(|s| std::cmp::Reverse(s.created_at));
        Ok(rows)
    }

    fn insert_saga_step(&self, step: SettlementSagaStep) -> RepoResult<()> {
        self.lock().saga_steps.push(step);
        Ok(())
    }

    fn get_saga(&self, settlement_id: Uuid) -> RepoResult<Vec<SettlementSagaStep>> {
        let state = self.lock();
        let mut rows: Vec<SettlementSagaStep> = state
            .saga_steps
            .iter()
            .filter(|s| s.settlement_id == settlement_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.timestamp);
        Ok(rows)
    }
}

impl DagRunRepository for MemoryBackend {
    fn reset(&self) -> RepoResult<()> {
        self.lock().dag_runs.clear();
        Ok(())
    }

    fn insert(&self, run: DagRunRow) -> RepoResult<()> {
        self.lock().dag_runs.insert(run.id, run);
        Ok(())
    }

    fn get(&self, id: Uuid) -> RepoResult<Option<DagRunRow>> {
        Ok(self.lock().dag_runs.get(&id).cloned())
    }

    fn update_status(
        &self,
        id: Uuid,
        status: DagRunStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> RepoResult<()> {
        let mut state = self.lock();
        let Some(run) = state.dag_runs.get_mut(&id) else {
            return Err(BackendError::Backend(format!("dag run {id} not found")));
        };
        run.status = status;
        run.completed_at = completed_at;
        Ok(())
    }
}

impl TaskRunRepository for MemoryBackend {
    fn reset(&self) -> RepoResult<()> {
        self.lock().task_runs.clear();
        Ok(())
    }

    fn insert(&self, row: TaskRunRow) -> RepoResult<()> {
        self.lock().task_runs.push(row);
        Ok(())
    }

    fn get_by_run(&self, dag_run_id: Uuid) -> RepoResult<Vec<TaskRunRow>> {
        let state = self.lock();
        let mut rows: Vec<TaskRunRow> = state
            .task_runs
            .iter()
            .filter(|r| r.dag_run_id == dag_run_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.task_name.cmp(&b.task_name));
        Ok(rows)
    }

    fn update(
        &self,
        id: Uuid,
        status: TaskStatus,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        error_message: Option<String>,
        result: Option<serde_json::Value>,
    ) -> RepoResult<()> {
        let mut state = self.lock();
        let Some(row) = state.task_runs.iter_mut().find(|r| r.id == id) else {
            return Err(BackendError::Backend(format!("task run {id} not found")));
        };
        row.status = status;
        if started_at.is_some() {
            row.started_at = started_at;
        }
        if completed_at.is_some() {
            row.completed_at = completed_at;
        }
        if error_message.is_some() {
            row.error_message = error_message;
        }
        if result.is_some() {
            row.result = result;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_sequence_starts_at_one_and_is_dense() {
        let backend = MemoryBackend::new();
        let ticket = TicketNumber::new("T1").unwrap();
        assert_eq!(
            TicketEventRepository::next_sequence(&backend, &ticket).unwrap(),
            EventSequence::INITIAL
        );
    }

    #[test]
    fn reset_all_clears_every_table() {
        let backend = MemoryBackend::new();
        AuditRepository::insert(
            &backend,
            AuditRecord {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                action: "x".into(),
                component: "y".into(),
                ticket_number: None,
                input_event_ids: vec![],
                output_reference: None,
                detail: serde_json::Value::Null,
                raw_source_hash: None,
            },
        )
        .unwrap();
        backend.reset_all();
        assert!(
            AuditRepository::get_by_ticket(&backend, &TicketNumber::new("T1").unwrap())
                .unwrap()
                .is_empty()
        );
    }
}
