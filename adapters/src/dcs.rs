//! DCS (departure control) adapter: JSON object or array.

use std::sync::Arc;

use flightledger_core::clock::Clock;
use flightledger_core::ids::TicketNumber;
use flightledger_core::{CanonicalEvent, CanonicalEventType, Metadata, SourceSystem};

use crate::{Adapter, ParseError, optional_coupon, optional_date, optional_str, records_from_json, require_str};

const ADAPTER: &str = "dcs_json";

/// Parses departure-control boarding records, defaulting every record to
/// `coupon_flown` since DCS only ever reports boardings.
pub struct DcsJsonAdapter {
    clock: Arc<dyn Clock>,
}

impl DcsJsonAdapter {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Adapter for DcsJsonAdapter {
    fn parse(&self, payload: &[u8]) -> Result<Vec<CanonicalEvent>, ParseError> {
        records_from_json(ADAPTER, payload)?
            .into_iter()
            .map(|record| parse_record(&record, self.clock.as_ref()))
            .collect()
    }
}

fn parse_record(
    record: &serde_json::Value,
    clock: &dyn Clock,
) -> Result<CanonicalEvent, ParseError> {
    let ticket_number = TicketNumber::new(require_str(ADAPTER, record, "ticket_number")?)
        .map_err(|e| ParseError::new(ADAPTER, e.to_string()))?;

    let mut metadata = Metadata::new();
    metadata.insert("source_record_type".to_string(), ADAPTER.to_string());
    if let Some(boarded_at) = optional_str(record, "boarded_at") {
        metadata.insert("boarded_at".to_string(), boarded_at);
    }
    if let Some(gate) = optional_str(record, "gate") {
        metadata.insert("gate".to_string(), gate);
    }

    Ok(CanonicalEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        occurred_at: clock.now(),
        source_system: SourceSystem::Dcs,
        event_type: CanonicalEventType::CouponFlown,
        ticket_number,
        coupon_number: optional_coupon(ADAPTER, record, "coupon_number")?,
        pnr: optional_str(record, "pnr"),
        passenger_name: None,
        marketing_carrier: None,
        operating_carrier: None,
        flight_number: optional_str(record, "flight_number"),
        flight_date: optional_date(ADAPTER, record, "flight_date")?,
        origin: optional_str(record, "origin"),
        destination: optional_str(record, "destination"),
        currency: None,
        gross_amount: None,
        net_amount: None,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    struct FixedClock(chrono::DateTime<Utc>);
    impl Clock for FixedClock {
        fn now(&self) -> chrono::DateTime<Utc> {
            self.0
        }
    }

    fn adapter() -> DcsJsonAdapter {
        DcsJsonAdapter::new(Arc::new(FixedClock(Utc.timestamp_opt(0, 0).unwrap())))
    }

    #[test]
    fn wraps_single_object_into_list() {
        let json = r#"{"ticket_number": "0012345678901", "coupon_number": 1, "gate": "A1"}"#;
        let events = adapter().parse(json.as_bytes()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, CanonicalEventType::CouponFlown);
        assert_eq!(events[0].metadata.get("gate").map(String::as_str), Some("A1"));
    }

    #[test]
    fn parses_array_of_records() {
        let json = r#"[{"ticket_number": "T1", "coupon_number": 1}, {"ticket_number": "T2", "coupon_number": 2}]"#;
        let events = adapter().parse(json.as_bytes()).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn missing_ticket_number_is_parse_error() {
        let json = r#"{"coupon_number": 1}"#;
        assert!(adapter().parse(json.as_bytes()).is_err());
    }
}
