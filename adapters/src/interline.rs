//! Interline partner adapter: JSON `{claims: [...]}` or a bare list.

use std::sync::Arc;

use flightledger_core::clock::Clock;
use flightledger_core::ids::TicketNumber;
use flightledger_core::{CanonicalEvent, CanonicalEventType, Metadata, SourceSystem};

use crate::{Adapter, ParseError, optional_coupon, optional_decimal, optional_str, require_str};

const ADAPTER: &str = "interline_rest_json";

/// Parses interline-partner claim payloads. `claim_amount` maps to
/// `gross_amount` — interline claims carry no separate net figure.
pub struct InterlineJsonAdapter {
    clock: Arc<dyn Clock>,
}

impl InterlineJsonAdapter {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Adapter for InterlineJsonAdapter {
    fn parse(&self, payload: &[u8]) -> Result<Vec<CanonicalEvent>, ParseError> {
        let value: serde_json::Value =
            serde_json::from_slice(payload).map_err(|e| ParseError::new(ADAPTER, e.to_string()))?;
        let claims = match value {
            serde_json::Value::Object(ref map) => map
                .get("claims")
                .and_then(serde_json::Value::as_array)
                .cloned()
                .ok_or_else(|| ParseError::new(ADAPTER, "missing 'claims' array"))?,
            serde_json::Value::Array(items) => items,
            _ => return Err(ParseError::new(ADAPTER, "expected an object or array")),
        };

        claims
            .iter()
            .map(|claim| parse_claim(claim, self.clock.as_ref()))
            .collect()
    }
}

fn parse_claim(
    claim: &serde_json::Value,
    clock: &dyn Clock,
) -> Result<CanonicalEvent, ParseError> {
    let ticket_number = TicketNumber::new(require_str(ADAPTER, claim, "ticket_number")?)
        .map_err(|e| ParseError::new(ADAPTER, e.to_string()))?;

    let mut metadata = Metadata::new();
    metadata.insert("source_record_type".to_string(), ADAPTER.to_string());
    if let Some(partner) = optional_str(claim, "partner_carrier") {
        metadata.insert("partner_carrier".to_string(), partner);
    }
    if let Some(claim_id) = optional_str(claim, "claim_id") {
        metadata.insert("claim_id".to_string(), claim_id);
    }
    if let Some(claim_status) = optional_str(claim, "claim_status") {
        metadata.insert("claim_status".to_string(), claim_status);
    }

    Ok(CanonicalEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        occurred_at: clock.now(),
        source_system: SourceSystem::Interline,
        event_type: CanonicalEventType::InterlineClaim,
        ticket_number,
        coupon_number: optional_coupon(ADAPTER, claim, "coupon_number")?,
        pnr: None,
        passenger_name: None,
        marketing_carrier: None,
        operating_carrier: None,
        flight_number: None,
        flight_date: None,
        origin: None,
        destination: None,
        currency: optional_str(claim, "currency"),
        gross_amount: optional_decimal(ADAPTER, claim, "claim_amount")?,
        net_amount: None,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    use super::*;

    struct FixedClock(chrono::DateTime<Utc>);
    impl Clock for FixedClock {
        fn now(&self) -> chrono::DateTime<Utc> {
            self.0
        }
    }

    fn adapter() -> InterlineJsonAdapter {
        InterlineJsonAdapter::new(Arc::new(FixedClock(Utc.timestamp_opt(0, 0).unwrap())))
    }

    #[test]
    fn parses_claims_wrapper_object() {
        let json = r#"{"claims": [{"ticket_number": "T1", "coupon_number": 1, "claim_amount": "120.50", "partner_carrier": "BA"}]}"#;
        let events = adapter().parse(json.as_bytes()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].gross_amount, Some(dec!(120.50)));
        assert_eq!(events[0].event_type, CanonicalEventType::InterlineClaim);
    }

    #[test]
    fn parses_bare_list_of_claims() {
        let json = r#"[{"ticket_number": "T1"}, {"ticket_number": "T2"}]"#;
        let events = adapter().parse(json.as_bytes()).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn missing_claims_key_on_object_is_parse_error() {
        let json = r"{}";
        assert!(adapter().parse(json.as_bytes()).is_err());
    }
}
