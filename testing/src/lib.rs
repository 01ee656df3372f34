//! # FlightLedger Testing
//!
//! Shared test fixtures used across the workspace:
//!
//! - [`mocks::FixedClock`] / [`mocks::test_clock`] — a deterministic
//!   [`flightledger_core::clock::Clock`] parameterized on a literal
//!   instant, for tests that need reproducible `occurred_at` values or
//!   several distinct fixed times (e.g. aging scenarios).
//! - [`fixtures`] — `CanonicalEvent` builders per source system and a
//!   small library of ready-made PSS CSV / DCS JSON / GDS XML / OTA
//!   JSON / INTERLINE JSON sample payloads for adapter tests.
//!
//! ## Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use flightledger_core::clock::Clock;
//! use flightledger_testing::mocks::test_clock;
//!
//! let clock = test_clock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
//! assert_eq!(clock.now(), clock.now());
//! ```

/// Deterministic clock for tests.
pub mod mocks {
    use chrono::{DateTime, Utc};
    use flightledger_core::clock::Clock;

    /// A clock that always returns the instant it was built with.
    #[derive(Debug, Clone, Copy)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Builds a clock fixed at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// A `FixedClock` at the given instant. Tests that need several
    /// distinct fixed times (e.g. "30 days later") call this more than
    /// once with different literals rather than sharing one constant.
    #[must_use]
    pub const fn test_clock(at: DateTime<Utc>) -> FixedClock {
        FixedClock::new(at)
    }
}

pub use mocks::{test_clock, FixedClock};

/// Sample `CanonicalEvent`s and raw counterparty payloads, for adapter
/// and engine tests.
pub mod fixtures {
    use chrono::{DateTime, Utc};
    use flightledger_core::event::{CanonicalEvent, CanonicalEventType, Metadata, SourceSystem};
    use flightledger_core::ids::{CouponNumber, TicketNumber};
    use rust_decimal::Decimal;

    /// Builds a minimal, valid `CanonicalEvent`, overridable by the
    /// caller via the returned value's public fields.
    #[must_use]
    pub fn canonical_event(
        source_system: SourceSystem,
        event_type: CanonicalEventType,
        ticket_number: &str,
        occurred_at: DateTime<Utc>,
    ) -> CanonicalEvent {
        CanonicalEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            occurred_at,
            source_system,
            event_type,
            ticket_number: TicketNumber::new(ticket_number)
                .expect("fixture ticket numbers are always non-empty"),
            coupon_number: None,
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
            metadata: Metadata::new(),
        }
    }

    /// A `ticket_issued` event from PSS with a gross amount set.
    #[must_use]
    pub fn pss_ticket_issued(
        ticket_number: &str,
        coupon_number: u32,
        gross_amount: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> CanonicalEvent {
        let mut event = canonical_event(
            SourceSystem::Pss,
            CanonicalEventType::TicketIssued,
            ticket_number,
            occurred_at,
        );
        event.coupon_number = Some(CouponNumber::new(coupon_number).expect("fixture coupons are >= 1"));
        event.gross_amount = Some(gross_amount);
        event.currency = Some("USD".to_string());
        event
    }

    /// A `coupon_flown` event from DCS.
    #[must_use]
    pub fn dcs_coupon_flown(
        ticket_number: &str,
        coupon_number: u32,
        occurred_at: DateTime<Utc>,
    ) -> CanonicalEvent {
        let mut event = canonical_event(
            SourceSystem::Dcs,
            CanonicalEventType::CouponFlown,
            ticket_number,
            occurred_at,
        );
        event.coupon_number = Some(CouponNumber::new(coupon_number).expect("fixture coupons are >= 1"));
        event
    }

    /// A `settlement_due` event from GDS.
    #[must_use]
    pub fn gds_settlement_due(
        ticket_number: &str,
        coupon_number: u32,
        amount: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> CanonicalEvent {
        let mut event = canonical_event(
            SourceSystem::Gds,
            CanonicalEventType::SettlementDue,
            ticket_number,
            occurred_at,
        );
        event.coupon_number = Some(CouponNumber::new(coupon_number).expect("fixture coupons are >= 1"));
        event.gross_amount = Some(amount);
        event.currency = Some("USD".to_string());
        event
    }

    /// A sample PSS reservation CSV export: one header row, one data row.
    #[must_use]
    pub fn pss_csv_sample(ticket_number: &str) -> String {
        format!(
            "event_type,ticket_number,coupon_number,pnr,passenger_name,marketing_carrier,\
operating_carrier,flight_number,flight_date,origin,destination,currency,gross_amount,\
net_amount,sales_channel\n\
ticket_issued,{ticket_number},1,ABCDEF,JANE DOE,AA,AA,100,2026-01-15,JFK,LAX,USD,450.00,410.00,direct\n"
        )
    }

    /// A sample DCS boarding-record JSON payload (single object).
    #[must_use]
    pub fn dcs_json_sample(ticket_number: &str) -> String {
        format!(
            r#"{{"ticket_number": "{ticket_number}", "coupon_number": 1, "gate": "A1", "boarded_at": "2026-01-15T10:00:00Z"}}"#
        )
    }

    /// A sample GDS settlement-week XML payload (one `<record>`).
    #[must_use]
    pub fn gds_xml_sample(ticket_number: &str) -> String {
        format!(
            r"<settlement><week><record>
    <ticket_number>{ticket_number}</ticket_number>
    <coupon_number>1</coupon_number>
    <currency>USD</currency>
    <gross_amount>450.00</gross_amount>
    <net_amount>410.00</net_amount>
    <gds>SABRE</gds>
    <settlement_week>2026-W03</settlement_week>
</record></week></settlement>"
        )
    }

    /// A sample OTA booking webhook JSON payload.
    #[must_use]
    pub fn ota_json_sample(ticket_number: &str) -> String {
        format!(
            r#"{{"ticket_number": "{ticket_number}", "ota": "expedia", "status": "confirmed", "pnr": "ABCDEF"}}"#
        )
    }

    /// A sample interline partner claim JSON payload (`claims` wrapper).
    #[must_use]
    pub fn interline_json_sample(ticket_number: &str) -> String {
        format!(
            r#"{{"claims": [{{"ticket_number": "{ticket_number}", "coupon_number": 1, "claim_amount": "450.00", "currency": "USD", "partner_carrier": "BA", "claim_id": "CLM-001"}}]}}"#
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use flightledger_core::clock::Clock;

    use super::*;

    #[test]
    fn fixed_clock_is_deterministic() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = test_clock(at);
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now(), at);
    }

    #[test]
    fn distinct_instants_produce_distinct_clocks() {
        let first = test_clock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let later = test_clock(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
        assert_ne!(first.now(), later.now());
    }

    #[test]
    fn pss_csv_sample_parses_as_one_row() {
        let csv = fixtures::pss_csv_sample("0012345678901");
        assert!(csv.contains("ticket_issued"));
        assert_eq!(csv.lines().count(), 2);
    }
}
