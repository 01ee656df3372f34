//! # FlightLedger Engine
//!
//! The stateful stages that turn canonical events into settled, audited
//! outcomes: the audit/lineage log, the event-sourced ticket lifecycle
//! store, the coupon matcher, the three-way reconciliation engine, the
//! settlement saga, and the DAG runner that chains them into a
//! month-end close cycle.
//!
//! [`FlightLedgerEngine`] wires one of each stage together over a
//! shared repository backend (in-memory or remote) and owns the
//! top-level `refresh()`/`reset()` cascade described in spec §5: a
//! reseed mutates every repository and must be serialized against any
//! other reseed, while read-only query paths (the stage accessors
//! returned by this struct) may run concurrently with each other.

pub mod audit;
pub mod dag;
pub mod matcher;
pub mod recon;
pub mod settlement;
pub mod ticket_store;

use std::sync::{Arc, Mutex, PoisonError};

use flightledger_core::bus::Bus;
use flightledger_core::clock::Clock;
use flightledger_core::error::BackendError;
use flightledger_core::event::CanonicalEvent;
use flightledger_core::repository::{
    AuditRepository, CouponMatchRepository, DagRunRepository, ReconRepository,
    SettlementRepository, TaskRunRepository, TicketEventRepository, TicketStateRepository,
};

pub use audit::AuditStore;
pub use dag::{DagError, DagRunner};
pub use matcher::{CouponMatcher, MatchResult};
pub use recon::{ReconError, ReconciliationEngine};
pub use settlement::{SettlementEngine, SettlementError};
pub use ticket_store::{AppendError, TicketLifecycleStore};

/// The complete set of repository trait objects one [`FlightLedgerEngine`]
/// is wired over. A single backend (`flightledger-memory::MemoryBackend`
/// or `flightledger-postgres::PostgresBackend`) typically implements
/// every trait here and is cloned into each field; the bundle exists so
/// `FlightLedgerEngine::new` doesn't need ten positional arguments.
#[derive(Clone)]
pub struct RepositoryBundle {
    pub ticket_events: Arc<dyn TicketEventRepository>,
    pub ticket_state: Arc<dyn TicketStateRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub coupon_matches: Arc<dyn CouponMatchRepository>,
    pub recon: Arc<dyn ReconRepository>,
    pub settlements: Arc<dyn SettlementRepository>,
    pub dag_runs: Arc<dyn DagRunRepository>,
    pub task_runs: Arc<dyn TaskRunRepository>,
}

/// Ingests events, runs matching/reconciliation/settlement, and
/// orchestrates the close-cycle DAG over one repository backend.
///
/// Holds an additional `refresh_lock` beyond whatever locking the
/// backend itself does, so that a reseed/refresh (clearing and
/// re-ingesting a batch) can never interleave with another reseed —
/// grounded in `original_source/.../runtime.py`'s `self._seed_lock`.
/// Read-only query paths (`ticket_store`, `matcher`, `recon`,
/// `settlement`, `audit` accessors) take no lock here.
pub struct FlightLedgerEngine {
    ticket_store: Arc<TicketLifecycleStore>,
    matcher: Arc<CouponMatcher>,
    recon: Arc<ReconciliationEngine>,
    settlement: Arc<SettlementEngine>,
    audit: Arc<AuditStore>,
    bus: Arc<dyn Bus>,
    dag_runs: Arc<dyn DagRunRepository>,
    task_runs: Arc<dyn TaskRunRepository>,
    clock: Arc<dyn Clock>,
    refresh_lock: Mutex<()>,
}

impl FlightLedgerEngine {
    #[must_use]
    pub fn new(repositories: RepositoryBundle, bus: Arc<dyn Bus>, clock: Arc<dyn Clock>) -> Self {
        let audit = Arc::new(AuditStore::new(repositories.audit, clock.clone()));
        let ticket_store = Arc::new(TicketLifecycleStore::new(
            repositories.ticket_events,
            repositories.ticket_state,
            clock.clone(),
        ));
        let matcher = Arc::new(CouponMatcher::new(
            ticket_store.clone(),
            repositories.coupon_matches,
            clock.clone(),
        ));
        let recon = Arc::new(ReconciliationEngine::new(
            ticket_store.clone(),
            matcher.clone(),
            repositories.recon,
            clock.clone(),
        ));
        let settlement = Arc::new(SettlementEngine::new(
            repositories.settlements,
            Some(audit.clone()),
            clock.clone(),
        ));
        Self {
            ticket_store,
            matcher,
            recon,
            settlement,
            audit,
            bus,
            dag_runs: repositories.dag_runs,
            task_runs: repositories.task_runs,
            clock,
            refresh_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn ticket_store(&self) -> &Arc<TicketLifecycleStore> {
        &self.ticket_store
    }

    #[must_use]
    pub fn matcher(&self) -> &Arc<CouponMatcher> {
        &self.matcher
    }

    #[must_use]
    pub fn recon(&self) -> &Arc<ReconciliationEngine> {
        &self.recon
    }

    #[must_use]
    pub fn settlement(&self) -> &Arc<SettlementEngine> {
        &self.settlement
    }

    #[must_use]
    pub fn audit(&self) -> &Arc<AuditStore> {
        &self.audit
    }

    /// Appends one canonical event to the ticket lifecycle store and
    /// publishes it on the bus. Held under the refresh lock so a batch
    /// ingest can't interleave with a concurrent `reset`.
    ///
    /// # Errors
    /// Returns [`IngestError::Append`] if the ticket store rejects the
    /// append, or [`IngestError::Bus`] if every bus sink rejected the
    /// publish (ingestion still completed; the event is already
    /// durable in the ticket store).
    pub fn ingest(&self, event: CanonicalEvent) -> Result<(), IngestError> {
        let _guard = self.refresh_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.ticket_store.append(event.clone())?;
        self.bus.publish(&event)?;
        Ok(())
    }

    /// Appends a batch of canonical events under one hold of the refresh
    /// lock. A single rejected event aborts the remainder of the batch —
    /// callers that need per-event isolation should catch adapter-level
    /// `ParseError`s before events ever reach `ingest_batch`.
    ///
    /// # Errors
    /// Returns the first [`IngestError`] encountered.
    pub fn ingest_batch(&self, events: Vec<CanonicalEvent>) -> Result<(), IngestError> {
        let _guard = self.refresh_lock.lock().unwrap_or_else(PoisonError::into_inner);
        for event in events {
            self.ticket_store.append(event.clone())?;
            self.bus.publish(&event)?;
        }
        Ok(())
    }

    /// Clears every repository in dependency order — settlements → recon
    /// → matches → ticket state and ticket events together (one call,
    /// since `TicketLifecycleStore::reset` owns both) → audit — matching
    /// spec §3's "Lifecycle" paragraph. Serialized against
    /// `ingest`/`ingest_batch` by the same refresh lock.
    ///
    /// # Errors
    /// Returns [`BackendError`] if any underlying repository rejects the
    /// reset; repositories earlier in the cascade are already cleared by
    /// the time a later one fails.
    pub fn reset(&self) -> Result<(), BackendError> {
        let _guard = self.refresh_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.settlement.reset()?;
        self.recon.reset()?;
        self.matcher.reset()?;
        self.ticket_store.reset()?;
        self.audit.reset()?;
        self.dag_runs.reset()?;
        self.task_runs.reset()?;
        Ok(())
    }

    /// Builds a close-cycle [`DagRunner`] with the standard three-task
    /// pipeline (`match_coupons` → `age_suspense` → `run_reconciliation`,
    /// the latter two both depending on the first), validates it, and
    /// persists its run/task rows — mirroring the month-end close
    /// pipeline spec §1 describes. Callers may build their own `Dag`
    /// instead and pass it to `DagRunner::new` directly for a custom
    /// pipeline shape.
    ///
    /// # Errors
    /// Returns [`DagError`] if the DAG fails to validate (it never
    /// should, being fixed at construction) or a run row fails to
    /// persist.
    pub fn build_close_cycle_dag(&self) -> Result<DagRunner, DagError> {
        let matcher_for_match = self.matcher.clone();
        let matcher_for_age = self.matcher.clone();
        let recon_for_run = self.recon.clone();

        let dag = flightledger_core::dag::Dag {
            name: "month_end_close".to_string(),
            tasks: vec![
                flightledger_core::dag::Task {
                    name: "match_coupons".to_string(),
                    depends_on: vec![],
                    run: Box::new(move || {
                        matcher_for_match
                            .run_matching()
                            .map(|r| {
                                serde_json::json!({
                                    "matched": r.matched,
                                    "unmatched_issued": r.unmatched_issued,
                                    "unmatched_flown": r.unmatched_flown,
                                })
                            })
                            .map_err(|e| e.to_string())
                    }),
                },
                flightledger_core::dag::Task {
                    name: "age_suspense".to_string(),
                    depends_on: vec!["match_coupons".to_string()],
                    run: Box::new(move || {
                        matcher_for_age
                            .age_suspense()
                            .map(|aged| serde_json::json!({ "aged": aged }))
                            .map_err(|e| e.to_string())
                    }),
                },
                flightledger_core::dag::Task {
                    name: "run_reconciliation".to_string(),
                    depends_on: vec!["match_coupons".to_string()],
                    run: Box::new(move || {
                        recon_for_run
                            .run_full_recon()
                            .map(|s| serde_json::json!(s))
                            .map_err(|e| e.to_string())
                    }),
                },
            ],
        };

        DagRunner::new(
            dag,
            self.dag_runs.clone(),
            self.task_runs.clone(),
            Some(self.audit.clone()),
            self.clock.clone(),
        )
    }
}

/// Failure modes of [`FlightLedgerEngine::ingest`] /
/// [`FlightLedgerEngine::ingest_batch`].
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Append(#[from] AppendError),
    #[error(transparent)]
    Bus(#[from] flightledger_core::bus::BusError),
}

#[cfg(test)]
mod tests {
    use flightledger_core::clock::SystemClock;
    use flightledger_core::event::{CanonicalEventType, SourceSystem};
    use flightledger_core::ids::{CouponNumber, TicketNumber};
    use flightledger_memory::{InMemoryBus, MemoryBackend};
    use rust_decimal_macros::dec;

    use super::*;

    fn bundle(backend: &Arc<MemoryBackend>) -> RepositoryBundle {
        RepositoryBundle {
            ticket_events: backend.clone(),
            ticket_state: backend.clone(),
            audit: backend.clone(),
            coupon_matches: backend.clone(),
            recon: backend.clone(),
            settlements: backend.clone(),
            dag_runs: backend.clone(),
            task_runs: backend.clone(),
        }
    }

    fn engine() -> FlightLedgerEngine {
        let backend = Arc::new(MemoryBackend::new());
        FlightLedgerEngine::new(bundle(&backend), Arc::new(InMemoryBus::new()), Arc::new(SystemClock))
    }

    fn event(event_id: &str, ticket: &str, coupon: u32, event_type: CanonicalEventType) -> CanonicalEvent {
        CanonicalEvent {
            event_id: event_id.to_string(),
            occurred_at: chrono::Utc::now(),
            source_system: SourceSystem::Pss,
            event_type,
            ticket_number: TicketNumber::new(ticket).unwrap(),
            coupon_number: Some(CouponNumber::new(coupon).unwrap()),
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
    fn ingest_appends_and_publishes() {
        let engine = engine();
        engine
            .ingest(event("e1", "T1", 1, CanonicalEventType::TicketIssued))
            .unwrap();
        let history = engine
            .ticket_store()
            .get_history(&TicketNumber::new("T1").unwrap())
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn reset_clears_every_stage() {
        let engine = engine();
        engine
            .ingest(event("e1", "T1", 1, CanonicalEventType::TicketIssued))
            .unwrap();
        engine.matcher().run_matching().unwrap();
        engine.reset().unwrap();

        let history = engine
            .ticket_store()
            .get_history(&TicketNumber::new("T1").unwrap())
            .unwrap();
        assert!(history.is_empty());
        assert!(engine.matcher().get_suspense_items(0).unwrap().is_empty());
    }

    #[test]
    fn close_cycle_dag_runs_matching_then_recon() {
        let engine = engine();
        engine
            .ingest(event("e1", "T1", 1, CanonicalEventType::TicketIssued))
            .unwrap();
        engine
            .ingest(event("e2", "T1", 1, CanonicalEventType::CouponFlown))
            .unwrap();

        let runner = engine.build_close_cycle_dag().unwrap();
        let status = runner.run().unwrap();
        assert_eq!(status, flightledger_core::dag::DagRunStatus::Succeeded);
    }
}
