//! OTA (online travel agent) adapter: JSON booking webhook.

use std::sync::Arc;

use flightledger_core::clock::Clock;
use flightledger_core::ids::TicketNumber;
use flightledger_core::{CanonicalEvent, CanonicalEventType, Metadata, SourceSystem};

use crate::{
    Adapter, ParseError, optional_date, optional_decimal, optional_str, records_from_json,
    require_str,
};

const ADAPTER: &str = "ota_webhook_json";

/// Parses OTA booking webhook payloads. `event_type` is read from the
/// payload if present; otherwise defaults to `booking_modified`.
/// An explicit `event_type` that doesn't match the canonical enum is a
/// [`ParseError`] — OTA payloads are the one JSON source where the
/// event type itself is attacker/partner controlled free text, so it is
/// validated the same way the CSV adapter validates its column.
pub struct OtaJsonAdapter {
    clock: Arc<dyn Clock>,
}

impl OtaJsonAdapter {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Adapter for OtaJsonAdapter {
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
    let event_type = match optional_str(record, "event_type") {
        Some(raw) => CanonicalEventType::parse(&raw)
            .ok_or_else(|| ParseError::new(ADAPTER, format!("unknown event_type '{raw}'")))?,
        None => CanonicalEventType::BookingModified,
    };

    let ticket_number = TicketNumber::new(require_str(ADAPTER, record, "ticket_number")?)
        .map_err(|e| ParseError::new(ADAPTER, e.to_string()))?;

    let mut metadata = Metadata::new();
    metadata.insert("source_record_type".to_string(), ADAPTER.to_string());
    if let Some(ota) = optional_str(record, "ota") {
        metadata.insert("ota".to_string(), ota);
    }
    if let Some(status) = optional_str(record, "status") {
        metadata.insert("status".to_string(), status);
    }

    Ok(CanonicalEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        occurred_at: clock.now(),
        source_system: SourceSystem::Ota,
        event_type,
        ticket_number,
        coupon_number: None,
        pnr: optional_str(record, "pnr"),
        passenger_name: optional_str(record, "passenger_name"),
        marketing_carrier: None,
        operating_carrier: None,
        flight_number: optional_str(record, "flight_number"),
        flight_date: optional_date(ADAPTER, record, "flight_date")?,
        origin: optional_str(record, "origin"),
        destination: optional_str(record, "destination"),
        currency: optional_str(record, "currency"),
        gross_amount: optional_decimal(ADAPTER, record, "gross_amount")?,
        net_amount: optional_decimal(ADAPTER, record, "net_amount")?,
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

    fn adapter() -> OtaJsonAdapter {
        OtaJsonAdapter::new(Arc::new(FixedClock(Utc.timestamp_opt(0, 0).unwrap())))
    }

    #[test]
    fn defaults_to_booking_modified_when_event_type_absent() {
        let json = r#"{"ticket_number": "T1", "ota": "expedia"}"#;
        let events = adapter().parse(json.as_bytes()).unwrap();
        assert_eq!(events[0].event_type, CanonicalEventType::BookingModified);
    }

    #[test]
    fn explicit_event_type_is_honored() {
        let json = r#"{"ticket_number": "T1", "event_type": "refund_requested"}"#;
        let events = adapter().parse(json.as_bytes()).unwrap();
        assert_eq!(events[0].event_type, CanonicalEventType::RefundRequested);
    }

    #[test]
    fn invalid_event_type_is_parse_error() {
        let json = r#"{"ticket_number": "T1", "event_type": "bogus"}"#;
        assert!(adapter().parse(json.as_bytes()).is_err());
    }
}
