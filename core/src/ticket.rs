//! Per-ticket event history and the projected `TicketState`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::event::{CanonicalEvent, CanonicalEventType};
use crate::ids::{CouponNumber, EventSequence, TicketNumber};

/// The persisted form of a `CanonicalEvent`, carrying the per-ticket
/// sequence assigned on append. Append-only; never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketEventRow {
    /// Dense, per-ticket monotonic sequence starting at 1.
    pub event_sequence: EventSequence,
    /// The canonical event this row persists.
    pub event: CanonicalEvent,
    /// When the store accepted this row (distinct from `occurred_at`).
    pub ingested_at: DateTime<Utc>,
}

/// A coupon's status as tracked on the ticket projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponStatus {
    /// Issued but not (yet) observed as flown.
    Issued,
    /// Observed as flown.
    Flown,
}

/// A ticket's lifecycle status, derived from the most recent
/// lifecycle-defining event observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// No lifecycle event has been observed yet.
    #[default]
    Unknown,
    /// `ticket_issued` observed.
    Issued,
    /// `ticket_reissued` observed.
    Reissued,
    /// `ticket_voided` observed.
    Voided,
    /// `coupon_flown` observed.
    Flown,
    /// `refund_requested` observed.
    Refunded,
    /// `booking_modified` observed while status was still `unknown`.
    Modified,
}

/// The projected current-state view of one ticket, derived by
/// replaying its event history. A cache, never authoritative —
/// always re-derivable from the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketState {
    /// The ticket this projection is for.
    pub ticket_number: TicketNumber,
    /// Current lifecycle status.
    pub status: TicketStatus,
    /// Latest non-null `gross_amount` observed across the history.
    pub current_amount: Option<Decimal>,
    /// Per-coupon status, keyed by coupon number.
    pub coupon_statuses: BTreeMap<CouponNumber, CouponStatus>,
    /// `occurred_at` of the most recently replayed event.
    pub last_modified: Option<DateTime<Utc>>,
    /// Total number of events replayed.
    pub event_count: u64,
    /// `event_type` of the most recently replayed event.
    pub last_event_type: Option<CanonicalEventType>,
    /// Last-seen descriptive fields, last-wins on non-null values.
    /// Carries every optional descriptor `CanonicalEvent` exposes.
    pub pnr: Option<String>,
    pub passenger_name: Option<String>,
    pub marketing_carrier: Option<String>,
    pub operating_carrier: Option<String>,
    pub flight_number: Option<String>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub currency: Option<String>,
}

impl TicketState {
    /// An empty projection for a ticket that has no events yet.
    #[must_use]
    pub fn empty(ticket_number: TicketNumber) -> Self {
        Self {
            ticket_number,
            status: TicketStatus::Unknown,
            current_amount: None,
            coupon_statuses: BTreeMap::new(),
            last_modified: None,
            event_count: 0,
            last_event_type: None,
            pnr: None,
            passenger_name: None,
            marketing_carrier: None,
            operating_carrier: None,
            flight_number: None,
            origin: None,
            destination: None,
            currency: None,
        }
    }

    /// Replays an ordered prefix of a ticket's history into a
    /// `TicketState`, applying the projection rules below in order.
    ///
    /// This is the single event-sourcing rule the whole store rests on:
    /// calling this twice on the same `events` slice always yields a
    /// byte-for-byte identical result. Callers pass events already
    /// sorted by `event_sequence` ascending.
    #[must_use]
    pub fn replay<'a>(
        ticket_number: TicketNumber,
        events: impl IntoIterator<Item = &'a CanonicalEvent>,
    ) -> Self {
        let mut state = Self::empty(ticket_number);
        for event in events {
            state.apply(event);
        }
        state
    }

    fn apply(&mut self, event: &CanonicalEvent) {
        // Rule 1: event_count, last_event_type, last_modified.
        self.event_count += 1;
        self.last_event_type = Some(event.event_type);
        self.last_modified = Some(event.occurred_at);

        // Rule 2: last-wins on descriptive fields, only if non-null.
        if event.pnr.is_some() {
            self.pnr.clone_from(&event.pnr);
        }
        if event.passenger_name.is_some() {
            self.passenger_name.clone_from(&event.passenger_name);
        }
        if event.marketing_carrier.is_some() {
            self.marketing_carrier.clone_from(&event.marketing_carrier);
        }
        if event.operating_carrier.is_some() {
            self.operating_carrier.clone_from(&event.operating_carrier);
        }
        if event.flight_number.is_some() {
            self.flight_number.clone_from(&event.flight_number);
        }
        if event.origin.is_some() {
            self.origin.clone_from(&event.origin);
        }
        if event.destination.is_some() {
            self.destination.clone_from(&event.destination);
        }
        if event.currency.is_some() {
            self.currency.clone_from(&event.currency);
        }

        // Rule 3: current_amount tracks the latest non-null gross_amount.
        if let Some(gross) = event.gross_amount {
            self.current_amount = Some(gross);
        }

        // Rule 4: coupon_statuses.
        if let Some(coupon) = event.coupon_number {
            if event.event_type.is_issued_kind() {
                self.coupon_statuses.insert(coupon, CouponStatus::Issued);
            } else if event.event_type == CanonicalEventType::CouponFlown {
                self.coupon_statuses.insert(coupon, CouponStatus::Flown);
            }
        }

        // Rule 5: status transitions.
        match event.event_type {
            CanonicalEventType::TicketIssued => self.status = TicketStatus::Issued,
            CanonicalEventType::TicketReissued => self.status = TicketStatus::Reissued,
            CanonicalEventType::TicketVoided => self.status = TicketStatus::Voided,
            CanonicalEventType::CouponFlown => self.status = TicketStatus::Flown,
            CanonicalEventType::RefundRequested => self.status = TicketStatus::Refunded,
            CanonicalEventType::BookingModified => {
                if self.status == TicketStatus::Unknown {
                    self.status = TicketStatus::Modified;
                }
            }
            CanonicalEventType::SettlementDue | CanonicalEventType::InterlineClaim => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::event::SourceSystem;

    fn event(
        event_type: CanonicalEventType,
        coupon: Option<u32>,
        gross: Option<Decimal>,
        at: i64,
    ) -> CanonicalEvent {
        CanonicalEvent {
            event_id: format!("evt-{at}"),
            occurred_at: Utc.timestamp_opt(at, 0).unwrap(),
            source_system: SourceSystem::Pss,
            event_type,
            ticket_number: TicketNumber::new("T1").unwrap(),
            coupon_number: coupon.map(|c| CouponNumber::new(c).unwrap()),
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
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn replay_is_deterministic_given_same_prefix() {
        let events = vec![
            event(CanonicalEventType::TicketIssued, Some(1), Some(dec!(100)), 1),
            event(CanonicalEventType::CouponFlown, Some(1), None, 2),
        ];
        let a = TicketState::replay(TicketNumber::new("T1").unwrap(), &events);
        let b = TicketState::replay(TicketNumber::new("T1").unwrap(), &events);
        assert_eq!(a, b);
        assert_eq!(a.status, TicketStatus::Flown);
        assert_eq!(a.event_count, 2);
        assert_eq!(
            a.coupon_statuses[&CouponNumber::new(1).unwrap()],
            CouponStatus::Flown
        );
    }

    #[test]
    fn booking_modified_only_sets_status_from_unknown() {
        let events = vec![
            event(CanonicalEventType::TicketIssued, None, None, 1),
            event(CanonicalEventType::BookingModified, None, None, 2),
        ];
        let state = TicketState::replay(TicketNumber::new("T1").unwrap(), &events);
        // Status stays `issued`: booking_modified never overwrites a real
        // lifecycle status once one has been set.
        assert_eq!(state.status, TicketStatus::Issued);

        let modified_first = vec![event(CanonicalEventType::BookingModified, None, None, 1)];
        let state2 = TicketState::replay(TicketNumber::new("T1").unwrap(), &modified_first);
        assert_eq!(state2.status, TicketStatus::Modified);
    }

    #[test]
    fn current_amount_tracks_latest_non_null_gross() {
        let events = vec![
            event(CanonicalEventType::TicketIssued, None, Some(dec!(100)), 1),
            event(CanonicalEventType::TicketReissued, None, None, 2),
        ];
        let state = TicketState::replay(TicketNumber::new("T1").unwrap(), &events);
        assert_eq!(state.current_amount, Some(dec!(100)));
    }
}

#[cfg(test)]
mod proptests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;
    use crate::event::SourceSystem;

    fn event_type() -> impl Strategy<Value = CanonicalEventType> {
        prop_oneof![
            Just(CanonicalEventType::TicketIssued),
            Just(CanonicalEventType::TicketReissued),
            Just(CanonicalEventType::TicketVoided),
            Just(CanonicalEventType::CouponFlown),
            Just(CanonicalEventType::RefundRequested),
            Just(CanonicalEventType::SettlementDue),
            Just(CanonicalEventType::BookingModified),
            Just(CanonicalEventType::InterlineClaim),
        ]
    }

    fn event_fields() -> impl Strategy<Value = (CanonicalEventType, Option<u32>, Option<i64>)> {
        (
            event_type(),
            proptest::option::of(1_u32..5),
            proptest::option::of(1_i64..10_000),
        )
    }

    fn random_history() -> impl Strategy<Value = Vec<CanonicalEvent>> {
        proptest::collection::vec(event_fields(), 1..20).prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(seq, (event_type, coupon, gross))| CanonicalEvent {
                    event_id: format!("evt-{seq}"),
                    occurred_at: Utc.timestamp_opt(i64::try_from(seq).unwrap(), 0).unwrap(),
                    source_system: SourceSystem::Pss,
                    event_type,
                    ticket_number: TicketNumber::new("T1").unwrap(),
                    coupon_number: coupon.map(|c| CouponNumber::new(c).unwrap()),
                    pnr: None,
                    passenger_name: None,
                    marketing_carrier: None,
                    operating_carrier: None,
                    flight_number: None,
                    flight_date: None,
                    origin: None,
                    destination: None,
                    currency: None,
                    gross_amount: gross.map(Decimal::from),
                    net_amount: None,
                    metadata: BTreeMap::new(),
                })
                .collect()
        })
    }

    proptest! {
        /// I3: replaying the same ordered event history twice always
        /// produces a byte-for-byte (here: `PartialEq`) identical
        /// `TicketState`, regardless of which event types or amounts
        /// appear in it.
        #[test]
        fn replay_is_deterministic_for_any_history(history in random_history()) {
            let ticket = TicketNumber::new("T1").unwrap();
            let a = TicketState::replay(ticket.clone(), &history);
            let b = TicketState::replay(ticket, &history);
            prop_assert_eq!(a, b);
        }
    }
}
