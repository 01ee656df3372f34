//! PSS (reservation) adapter: CSV with header row.

use std::collections::BTreeMap as Map;
use std::sync::Arc;

use flightledger_core::clock::Clock;
use flightledger_core::ids::{CouponNumber, TicketNumber};
use flightledger_core::{CanonicalEvent, CanonicalEventType, SourceSystem};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::{Adapter, ParseError, non_empty};

const ADAPTER: &str = "pss_csv";

/// Parses reservation-system CSV exports into canonical events.
///
/// Every row's `event_type` column drives the event's type directly,
/// rather than a fixed default — unlike every other source adapter.
pub struct PssCsvAdapter {
    clock: Arc<dyn Clock>,
}

impl PssCsvAdapter {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Adapter for PssCsvAdapter {
    fn parse(&self, payload: &[u8]) -> Result<Vec<CanonicalEvent>, ParseError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(payload);

        let mut events = Vec::new();
        for result in reader.deserialize::<Map<String, String>>() {
            let row = result.map_err(|e| ParseError::new(ADAPTER, e.to_string()))?;
            events.push(parse_row(&row, self.clock.as_ref())?);
        }
        Ok(events)
    }
}

fn get<'a>(row: &'a Map<String, String>, key: &str) -> Option<&'a str> {
    row.get(key).map(String::as_str)
}

fn parse_row(
    row: &Map<String, String>,
    clock: &dyn Clock,
) -> Result<CanonicalEvent, ParseError> {
    let event_type_raw = non_empty(get(row, "event_type"))
        .ok_or_else(|| ParseError::new(ADAPTER, "missing event_type"))?;
    let event_type = CanonicalEventType::parse(&event_type_raw)
        .ok_or_else(|| ParseError::new(ADAPTER, format!("unknown event_type '{event_type_raw}'")))?;

    let ticket_number_raw = non_empty(get(row, "ticket_number"))
        .ok_or_else(|| ParseError::new(ADAPTER, "missing ticket_number"))?;
    let ticket_number = TicketNumber::new(ticket_number_raw)
        .map_err(|e| ParseError::new(ADAPTER, e.to_string()))?;

    let coupon_number = non_empty(get(row, "coupon_number"))
        .map(|v| {
            v.parse::<u32>()
                .map_err(|_| ParseError::new(ADAPTER, format!("invalid coupon_number '{v}'")))
                .and_then(|n| {
                    CouponNumber::new(n).map_err(|e| ParseError::new(ADAPTER, e.to_string()))
                })
        })
        .transpose()?;

    let gross_amount = parse_decimal(non_empty(get(row, "gross_amount")))?;
    let net_amount = parse_decimal(non_empty(get(row, "net_amount")))?;

    let flight_date = non_empty(get(row, "flight_date"))
        .map(|v| {
            chrono::NaiveDate::parse_from_str(&v, "%Y-%m-%d")
                .map_err(|_| ParseError::new(ADAPTER, format!("invalid flight_date '{v}'")))
        })
        .transpose()?;

    let mut metadata = flightledger_core::Metadata::new();
    metadata.insert("source_record_type".to_string(), ADAPTER.to_string());
    if let Some(channel) = non_empty(get(row, "sales_channel")) {
        metadata.insert("sales_channel".to_string(), channel);
    }

    Ok(CanonicalEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        occurred_at: clock.now(),
        source_system: SourceSystem::Pss,
        event_type,
        ticket_number,
        coupon_number,
        pnr: non_empty(get(row, "pnr")),
        passenger_name: non_empty(get(row, "passenger_name")),
        marketing_carrier: non_empty(get(row, "marketing_carrier")),
        operating_carrier: non_empty(get(row, "operating_carrier")),
        flight_number: non_empty(get(row, "flight_number")),
        flight_date,
        origin: non_empty(get(row, "origin")),
        destination: non_empty(get(row, "destination")),
        currency: non_empty(get(row, "currency")),
        gross_amount,
        net_amount,
        metadata,
    })
}

fn parse_decimal(value: Option<String>) -> Result<Option<Decimal>, ParseError> {
    value
        .map(|v| Decimal::from_str(&v).map_err(|_| ParseError::new(ADAPTER, format!("invalid decimal '{v}'"))))
        .transpose()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use flightledger_core::clock::Clock;
    use rust_decimal_macros::dec;

    use super::*;

    struct FixedClock(chrono::DateTime<Utc>);
    impl Clock for FixedClock {
        fn now(&self) -> chrono::DateTime<Utc> {
            self.0
        }
    }

    fn adapter() -> PssCsvAdapter {
        PssCsvAdapter::new(Arc::new(FixedClock(Utc.timestamp_opt(0, 0).unwrap())))
    }

    #[test]
    fn parses_full_row() {
        let csv = "event_type,ticket_number,coupon_number,pnr,passenger_name,marketing_carrier,operating_carrier,flight_number,flight_date,origin,destination,currency,gross_amount,net_amount,sales_channel\n\
ticket_issued,0012345678901,1,ABCDEF,JANE DOE,AA,AA,100,2026-01-15,JFK,LAX,USD,450.00,410.00,direct\n";
        let events = adapter().parse(csv.as_bytes()).unwrap();
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.event_type, CanonicalEventType::TicketIssued);
        assert_eq!(e.ticket_number.as_str(), "0012345678901");
        assert_eq!(e.gross_amount, Some(dec!(450.00)));
        assert_eq!(e.metadata.get("sales_channel").map(String::as_str), Some("direct"));
    }

    #[test]
    fn empty_optional_cells_coerce_to_null_not_zero() {
        let csv = "event_type,ticket_number,coupon_number,pnr,passenger_name,marketing_carrier,operating_carrier,flight_number,flight_date,origin,destination,currency,gross_amount,net_amount,sales_channel\n\
ticket_voided,0012345678902,,,,,,,,,,,,,\n";
        let events = adapter().parse(csv.as_bytes()).unwrap();
        assert_eq!(events[0].coupon_number, None);
        assert_eq!(events[0].gross_amount, None);
    }

    #[test]
    fn unknown_event_type_is_parse_error() {
        let csv = "event_type,ticket_number,coupon_number,pnr,passenger_name,marketing_carrier,operating_carrier,flight_number,flight_date,origin,destination,currency,gross_amount,net_amount,sales_channel\n\
not_a_type,0012345678903,,,,,,,,,,,,,\n";
        assert!(adapter().parse(csv.as_bytes()).is_err());
    }
}
