//! Three-way reconciliation: issued vs. flown vs. settlement amounts.
//! Grounded in `original_source/.../recon/reconciliation.py`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flightledger_core::clock::Clock;
use flightledger_core::error::{BackendError, NotFoundError};
use flightledger_core::event::CanonicalEventType;
use flightledger_core::ids::{CouponNumber, TicketNumber};
use flightledger_core::recon::{classify_break, ReconResultRow, ReconSummary, Resolution};
use flightledger_core::repository::ReconRepository;
use thiserror::Error;
use uuid::Uuid;

use crate::matcher::CouponMatcher;
use crate::ticket_store::TicketLifecycleStore;

/// Failure modes of [`ReconciliationEngine::resolve_break`].
#[derive(Debug, Error)]
pub enum ReconError {
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Classifies issued/flown/settlement triples into matches and breaks,
/// persisting one row per `(ticket_number, coupon_number)` pair that has
/// an issued event.
pub struct ReconciliationEngine {
    ticket_store: Arc<TicketLifecycleStore>,
    matcher: Arc<CouponMatcher>,
    repository: Arc<dyn ReconRepository>,
    clock: Arc<dyn Clock>,
}

impl ReconciliationEngine {
    #[must_use]
    pub fn new(
        ticket_store: Arc<TicketLifecycleStore>,
        matcher: Arc<CouponMatcher>,
        repository: Arc<dyn ReconRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ticket_store,
            matcher,
            repository,
            clock,
        }
    }

    /// # Errors
    /// Returns [`BackendError`] if the underlying repository rejects the reset.
    pub fn reset(&self) -> Result<(), BackendError> {
        self.repository.reset()
    }

    /// Clears recon rows, re-runs coupon matching, then classifies every
    /// `(ticket, coupon)` pair that has an issued event.
    ///
    /// # Errors
    /// Returns [`BackendError`] if any underlying repository rejects an
    /// operation.
    pub fn run_full_recon(&self) -> Result<ReconSummary, BackendError> {
        self.repository.reset()?;
        self.matcher.run_matching()?;

        let issued_events = self.ticket_store.get_events_by_type(&[
            CanonicalEventType::TicketIssued,
            CanonicalEventType::TicketReissued,
        ])?;
        let flown_events = self
            .ticket_store
            .get_events_by_type(&[CanonicalEventType::CouponFlown])?;
        let settlement_events = self.ticket_store.get_events_by_type(&[
            CanonicalEventType::SettlementDue,
            CanonicalEventType::InterlineClaim,
        ])?;

        let mut flown_counts: BTreeMap<(TicketNumber, CouponNumber), u32> = BTreeMap::new();
        for event in &flown_events {
            if let Some(coupon) = event.coupon_number {
                *flown_counts.entry((event.ticket_number.clone(), coupon)).or_insert(0) += 1;
            }
        }
        let mut settlement_by_key: BTreeMap<(TicketNumber, CouponNumber), rust_decimal::Decimal> =
            BTreeMap::new();
        for event in &settlement_events {
            if let (Some(coupon), Some(gross)) = (event.coupon_number, event.gross_amount) {
                settlement_by_key.insert((event.ticket_number.clone(), coupon), gross);
            }
        }

        let now = self.clock.now();
        let mut summary = ReconSummary::default();

        for issued in &issued_events {
            let Some(coupon) = issued.coupon_number else {
                continue;
            };
            let key = (issued.ticket_number.clone(), coupon);
            let flown_count = flown_counts.get(&key).copied().unwrap_or(0);
            let their_amount = settlement_by_key.get(&key).copied();
            let settlement_exists = settlement_by_key.contains_key(&key);

            let classification = classify_break(
                issued.gross_amount,
                their_amount,
                flown_count > 0,
                flown_count > 1,
                settlement_exists,
            );
            let difference = match (issued.gross_amount, their_amount) {
                (Some(our), Some(their)) => Some(our - their),
                _ => None,
            };
            let resolved_at = (classification.resolution == Resolution::AutoResolved).then_some(now);
            let resolution_notes = (classification.resolution == Resolution::AutoResolved)
                .then(|| "Rounded below tolerance.".to_string());

            self.repository.insert(ReconResultRow {
                id: Uuid::new_v4(),
                ticket_number: issued.ticket_number.clone(),
                coupon_number: coupon,
                status: classification.status,
                break_type: classification.break_type,
                severity: classification.severity,
                our_amount: issued.gross_amount,
                their_amount,
                difference,
                resolution: classification.resolution,
                resolution_notes,
                created_at: now,
                resolved_at,
            })?;

            if classification.status == flightledger_core::recon::ReconStatus::Matched {
                summary.total_matched += 1;
            } else {
                summary.total_breaks += 1;
                if let Some(break_type) = classification.break_type {
                    *summary
                        .breaks_by_type
                        .entry(format!("{break_type:?}"))
                        .or_insert(0) += 1;
                }
                *summary
                    .breaks_by_severity
                    .entry(format!("{:?}", classification.severity))
                    .or_insert(0) += 1;
            }
        }

        Ok(summary)
    }

    /// # Errors
    /// Returns [`ReconError::NotFound`] if `break_id` doesn't resolve to a
    /// known row, or [`ReconError::Backend`] on a repository failure.
    pub fn resolve_break(
        &self,
        break_id: Uuid,
        resolution: Resolution,
        notes: String,
    ) -> Result<(), ReconError> {
        let mut row = self
            .repository
            .get_by_id(break_id)?
            .ok_or_else(|| NotFoundError::new("recon break", break_id.to_string()))?;
        row.resolution = resolution;
        row.resolution_notes = Some(notes);
        row.resolved_at = Some(self.resolve_timestamp());
        self.repository.update(row)?;
        Ok(())
    }

    fn resolve_timestamp(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use flightledger_core::clock::SystemClock;
    use flightledger_core::event::{CanonicalEvent, SourceSystem};
    use flightledger_core::ids::CouponNumber;
    use flightledger_core::recon::{BreakType, Severity};
    use flightledger_memory::MemoryBackend;
    use rust_decimal_macros::dec;

    use super::*;

    fn setup() -> (Arc<TicketLifecycleStore>, ReconciliationEngine, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let ticket_store = Arc::new(TicketLifecycleStore::new(
            backend.clone(),
            backend.clone(),
            Arc::new(SystemClock),
        ));
        let matcher = Arc::new(CouponMatcher::new(
            ticket_store.clone(),
            backend.clone(),
            Arc::new(SystemClock),
        ));
        let recon = ReconciliationEngine::new(
            ticket_store.clone(),
            matcher,
            backend.clone(),
            Arc::new(SystemClock),
        );
        (ticket_store, recon, backend)
    }

    fn event(
        event_id: &str,
        event_type: CanonicalEventType,
        gross: Option<rust_decimal::Decimal>,
    ) -> CanonicalEvent {
        CanonicalEvent {
            event_id: event_id.to_string(),
            occurred_at: Utc.timestamp_opt(1, 0).unwrap(),
            source_system: SourceSystem::Pss,
            event_type,
            ticket_number: TicketNumber::new("T1").unwrap(),
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
            gross_amount: gross,
            net_amount: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn fare_mismatch_is_classified_high_severity() {
        let (store, recon, backend) = setup();
        store
            .append(event("e1", CanonicalEventType::TicketIssued, Some(dec!(100))))
            .unwrap();
        store
            .append(event("e2", CanonicalEventType::CouponFlown, None))
            .unwrap();
        store
            .append(event("e3", CanonicalEventType::SettlementDue, Some(dec!(95))))
            .unwrap();
        let summary = recon.run_full_recon().unwrap();
        assert_eq!(summary.total_breaks, 1);
        assert_eq!(summary.total_matched, 0);

        let rows = ReconRepository::all_rows(backend.as_ref()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].break_type, Some(BreakType::FareMismatch));
        assert_eq!(rows[0].severity, Severity::High);
        assert_eq!(rows[0].difference, Some(dec!(5)));
    }

    #[test]
    fn rounding_tolerance_auto_resolves_to_matched() {
        let (store, recon, _backend) = setup();
        store
            .append(event("e1", CanonicalEventType::TicketIssued, Some(dec!(100))))
            .unwrap();
        store
            .append(event("e2", CanonicalEventType::CouponFlown, None))
            .unwrap();
        store
            .append(event("e3", CanonicalEventType::SettlementDue, Some(dec!(99.995))))
            .unwrap();
        let summary = recon.run_full_recon().unwrap();
        assert_eq!(summary.total_matched, 1);
        assert_eq!(summary.total_breaks, 0);
    }

    #[test]
    fn resolve_break_sets_resolution_and_timestamp() {
        let (store, recon, backend) = setup();
        store
            .append(event("e1", CanonicalEventType::TicketIssued, Some(dec!(100))))
            .unwrap();
        store
            .append(event("e2", CanonicalEventType::CouponFlown, None))
            .unwrap();
        store
            .append(event("e3", CanonicalEventType::SettlementDue, Some(dec!(95))))
            .unwrap();
        recon.run_full_recon().unwrap();

        let break_id = ReconRepository::all_rows(backend.as_ref()).unwrap()[0].id;
        recon
            .resolve_break(break_id, Resolution::ManuallyResolved, "reviewed".to_string())
            .unwrap();

        let row = ReconRepository::get_by_id(backend.as_ref(), break_id)
            .unwrap()
            .unwrap();
        assert_eq!(row.resolution, Resolution::ManuallyResolved);
        assert_eq!(row.resolution_notes.as_deref(), Some("reviewed"));
        assert!(row.resolved_at.is_some());
    }

    #[test]
    fn resolve_break_fails_for_unknown_id() {
        let (_store, recon, _backend) = setup();
        let result = recon.resolve_break(Uuid::new_v4(), Resolution::ManuallyResolved, "x".into());
        assert!(matches!(result, Err(ReconError::NotFound(_))));
    }
}
