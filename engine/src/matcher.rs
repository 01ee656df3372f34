//! Joins issued coupons against flown coupons and ages unmatched pairs
//! into suspense. Grounded in
//! `original_source/.../matching/coupon_matcher.py`.

use std::collections::BTreeMap;
use std::sync::Arc;

use flightledger_core::clock::Clock;
use flightledger_core::error::BackendError;
use flightledger_core::event::{CanonicalEvent, CanonicalEventType};
use flightledger_core::ids::{CouponNumber, TicketNumber};
use flightledger_core::matcher::{CouponMatchRow, MatchStatus, SUSPENSE_THRESHOLD_DAYS};
use flightledger_core::repository::CouponMatchRepository;

use crate::ticket_store::TicketLifecycleStore;

/// Outcome counters from one [`CouponMatcher::run_matching`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchResult {
    pub matched: u64,
    pub unmatched_issued: u64,
    pub unmatched_flown: u64,
}

/// Joins issued and flown coupon events by `(ticket_number,
/// coupon_number)` and tracks how long unmatched pairs have sat open.
pub struct CouponMatcher {
    ticket_store: Arc<TicketLifecycleStore>,
    repository: Arc<dyn CouponMatchRepository>,
    clock: Arc<dyn Clock>,
}

impl CouponMatcher {
    #[must_use]
    pub fn new(
        ticket_store: Arc<TicketLifecycleStore>,
        repository: Arc<dyn CouponMatchRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ticket_store,
            repository,
            clock,
        }
    }

    /// # Errors
    /// Returns [`BackendError`] if the underlying repository rejects the reset.
    pub fn reset(&self) -> Result<(), BackendError> {
        self.repository.reset()
    }

    /// Clears existing match rows, re-derives every `(ticket, coupon)`
    /// pair from the ticket store's issued/flown events, and reclassifies
    /// any row already older than [`SUSPENSE_THRESHOLD_DAYS`] as
    /// `suspense`.
    ///
    /// # Errors
    /// Returns [`BackendError`] if the underlying repositories reject an operation.
    pub fn run_matching(&self) -> Result<MatchResult, BackendError> {
        self.repository.reset()?;

        let issued_events = self.ticket_store.get_events_by_type(&[
            CanonicalEventType::TicketIssued,
            CanonicalEventType::TicketReissued,
        ])?;
        let flown_events = self
            .ticket_store
            .get_events_by_type(&[CanonicalEventType::CouponFlown])?;

        let issued_by_key = index_latest_by_key(&issued_events);
        let flown_by_key = index_latest_by_key(&flown_events);

        let mut keys: Vec<(TicketNumber, CouponNumber)> = issued_by_key
            .keys()
            .chain(flown_by_key.keys())
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();

        let mut result = MatchResult::default();
        for (ticket_number, coupon_number) in keys {
            let issued = issued_by_key.get(&(ticket_number.clone(), coupon_number));
            let flown = flown_by_key.get(&(ticket_number.clone(), coupon_number));

            let status = match (issued, flown) {
                (Some(_), Some(_)) => {
                    result.matched += 1;
                    MatchStatus::Matched
                }
                (Some(_), None) => {
                    result.unmatched_issued += 1;
                    MatchStatus::UnmatchedIssued
                }
                (None, Some(_)) => {
                    result.unmatched_flown += 1;
                    MatchStatus::UnmatchedFlown
                }
                (None, None) => unreachable!("key only exists if one side produced it"),
            };

            let row = CouponMatchRow::new(
                ticket_number,
                coupon_number,
                status,
                issued.map(|e| e.event_id.clone()),
                flown.map(|e| e.event_id.clone()),
                (status == MatchStatus::Matched).then(|| self.clock.now()),
            );
            self.repository.upsert(row)?;
        }

        for mut row in self.repository.all_rows()? {
            if row.status.is_suspense_eligible() && row.days_in_suspense > SUSPENSE_THRESHOLD_DAYS {
                row.status = MatchStatus::Suspense;
                self.repository.upsert(row)?;
            }
        }

        Ok(result)
    }

    /// Increments `days_in_suspense` on every still-open row, reclassifies
    /// past the suspense threshold, and attaches an escalation note past
    /// the escalation threshold. Returns how many rows were aged.
    ///
    /// # Errors
    /// Returns [`BackendError`] if the underlying repository rejects an operation.
    pub fn age_suspense(&self) -> Result<u64, BackendError> {
        let mut aged = 0u64;
        for mut row in self.repository.all_rows()? {
            if !row.status.is_suspense_eligible() {
                continue;
            }
            row.days_in_suspense += 1;
            if row.days_in_suspense > SUSPENSE_THRESHOLD_DAYS {
                row.status = MatchStatus::Suspense;
            }
            if row.days_in_suspense > flightledger_core::matcher::ESCALATION_THRESHOLD_DAYS {
                row.notes = Some("Escalation required (>90 days).".to_string());
            }
            self.repository.upsert(row)?;
            aged += 1;
        }
        Ok(aged)
    }

    /// Rows whose status is suspense-eligible and whose `days_in_suspense
    /// >= min_age_days`, sorted by `days_in_suspense` descending.
    ///
    /// # Errors
    /// Returns [`BackendError`] if the underlying repository rejects the read.
    pub fn get_suspense_items(
        &self,
        min_age_days: u32,
    ) -> Result<Vec<CouponMatchRow>, BackendError> {
        let mut rows = self.repository.get_suspense(min_age_days)?;
        rows.sort_by_key(|row| std::cmp::Reverse(row.days_in_suspense));
        Ok(rows)
    }
}

fn index_latest_by_key(
    events: &[CanonicalEvent],
) -> BTreeMap<(TicketNumber, CouponNumber), &CanonicalEvent> {
    let mut index = BTreeMap::new();
    for event in events {
        if let Some(coupon) = event.coupon_number {
            index.insert((event.ticket_number.clone(), coupon), event);
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use flightledger_core::clock::SystemClock;
    use flightledger_core::event::SourceSystem;
    use flightledger_core::ids::CouponNumber;
    use flightledger_core::matcher::ESCALATION_THRESHOLD_DAYS;
    use flightledger_memory::MemoryBackend;

    use super::*;

    fn setup() -> (Arc<TicketLifecycleStore>, CouponMatcher) {
        let backend = Arc::new(MemoryBackend::new());
        let ticket_store = Arc::new(TicketLifecycleStore::new(
            backend.clone(),
            backend.clone(),
            Arc::new(SystemClock),
        ));
        let matcher = CouponMatcher::new(ticket_store.clone(), backend, Arc::new(SystemClock));
        (ticket_store, matcher)
    }

    fn event(event_id: &str, ticket: &str, coupon: u32, event_type: CanonicalEventType) -> CanonicalEvent {
        CanonicalEvent {
            event_id: event_id.to_string(),
            occurred_at: Utc.timestamp_opt(1, 0).unwrap(),
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
            gross_amount: None,
            net_amount: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn coupon_match_happy_path() {
        let (store, matcher) = setup();
        store
            .append(event("e1", "T1", 1, CanonicalEventType::TicketIssued))
            .unwrap();
        store
            .append(event("e2", "T1", 1, CanonicalEventType::CouponFlown))
            .unwrap();
        let result = matcher.run_matching().unwrap();
        assert_eq!(result.matched, 1);
        assert_eq!(result.unmatched_issued, 0);
        assert_eq!(result.unmatched_flown, 0);
    }

    #[test]
    fn five_tickets_three_flown() {
        let (store, matcher) = setup();
        for i in 1..=5 {
            let ticket = format!("T{i}");
            store
                .append(event(&format!("issued-{i}"), &ticket, 1, CanonicalEventType::TicketIssued))
                .unwrap();
            if i <= 3 {
                store
                    .append(event(&format!("flown-{i}"), &ticket, 1, CanonicalEventType::CouponFlown))
                    .unwrap();
            }
        }
        let result = matcher.run_matching().unwrap();
        assert_eq!(result.matched, 3);
        assert_eq!(result.unmatched_issued, 2);
        assert_eq!(result.unmatched_flown, 0);
    }

    #[test]
    fn aging_past_threshold_reaches_suspense() {
        let (store, matcher) = setup();
        store
            .append(event("e1", "TS1", 1, CanonicalEventType::TicketIssued))
            .unwrap();
        matcher.run_matching().unwrap();
        for _ in 0..31 {
            matcher.age_suspense().unwrap();
        }
        let items = matcher.get_suspense_items(0).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, MatchStatus::Suspense);
        assert_eq!(items[0].days_in_suspense, 31);
    }

    #[test]
    fn escalation_note_attached_past_ninety_days() {
        let (store, matcher) = setup();
        store
            .append(event("e1", "TS1", 1, CanonicalEventType::TicketIssued))
            .unwrap();
        matcher.run_matching().unwrap();
        for _ in 0..(ESCALATION_THRESHOLD_DAYS + 1) {
            matcher.age_suspense().unwrap();
        }
        let items = matcher.get_suspense_items(0).unwrap();
        assert!(items[0].notes.as_deref() == Some("Escalation required (>90 days)."));
    }
}
