//! GDS (settlement feed) adapter: XML, `.//record` elements.

use std::collections::BTreeMap as Map;
use std::str::FromStr;
use std::sync::Arc;

use flightledger_core::clock::Clock;
use flightledger_core::ids::{CouponNumber, TicketNumber};
use flightledger_core::{CanonicalEvent, CanonicalEventType, Metadata, SourceSystem};
use quick_xml::Reader;
use quick_xml::events::Event;
use rust_decimal::Decimal;

use crate::{Adapter, ParseError};

const ADAPTER: &str = "gds_xml";

/// Parses GDS settlement-week XML exports. Every `record` element,
/// regardless of nesting depth (`.//record`), becomes one
/// `settlement_due` event.
pub struct GdsXmlAdapter {
    clock: Arc<dyn Clock>,
}

impl GdsXmlAdapter {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Adapter for GdsXmlAdapter {
    fn parse(&self, payload: &[u8]) -> Result<Vec<CanonicalEvent>, ParseError> {
        let mut reader = Reader::from_reader(payload);
        reader.config_mut().trim_text(true);

        let mut events = Vec::new();
        let mut buf = Vec::new();
        loop {
            match reader
                .read_event_into(&mut buf)
                .map_err(|e| ParseError::new(ADAPTER, e.to_string()))?
            {
                Event::Eof => break,
                Event::Start(tag) if tag.name().as_ref() == b"record" => {
                    let fields = read_record_fields(&mut reader)?;
                    events.push(build_event(&fields, self.clock.as_ref())?);
                }
                _ => {}
            }
            buf.clear();
        }
        Ok(events)
    }
}

/// Reads the flat child tags of one `<record>…</record>` element into a
/// tag → text map, consuming up to its matching end tag.
fn read_record_fields(reader: &mut Reader<&[u8]>) -> Result<Map<String, String>, ParseError> {
    let mut fields = Map::new();
    let mut current_tag: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| ParseError::new(ADAPTER, e.to_string()))?
        {
            Event::Start(tag) => {
                current_tag = Some(String::from_utf8_lossy(tag.name().as_ref()).into_owned());
            }
            Event::Text(text) => {
                if let Some(tag) = current_tag.take() {
                    let value = text
                        .unescape()
                        .map_err(|e| ParseError::new(ADAPTER, e.to_string()))?
                        .into_owned();
                    fields.insert(tag, value);
                }
            }
            Event::End(tag) if tag.name().as_ref() == b"record" => break,
            Event::End(_) => current_tag = None,
            Event::Eof => {
                return Err(ParseError::new(ADAPTER, "unexpected EOF inside <record>"));
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(fields)
}

fn build_event(
    fields: &Map<String, String>,
    clock: &dyn Clock,
) -> Result<CanonicalEvent, ParseError> {
    let ticket_number_raw = fields
        .get("ticket_number")
        .cloned()
        .unwrap_or_default();
    let ticket_number = TicketNumber::new(ticket_number_raw)
        .map_err(|e| ParseError::new(ADAPTER, e.to_string()))?;

    let coupon_number = fields
        .get("coupon_number")
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<u32>()
                .map_err(|_| ParseError::new(ADAPTER, format!("invalid coupon_number '{v}'")))
                .and_then(|n| CouponNumber::new(n).map_err(|e| ParseError::new(ADAPTER, e.to_string())))
        })
        .transpose()?;

    let gross_amount = parse_decimal(fields.get("gross_amount"))?;
    let net_amount = parse_decimal(fields.get("net_amount"))?;

    let mut metadata = Metadata::new();
    metadata.insert("source_record_type".to_string(), ADAPTER.to_string());
    if let Some(gds) = fields.get("gds") {
        metadata.insert("gds".to_string(), gds.clone());
    }
    if let Some(week) = fields.get("settlement_week") {
        metadata.insert("settlement_week".to_string(), week.clone());
    }

    Ok(CanonicalEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        occurred_at: clock.now(),
        source_system: SourceSystem::Gds,
        event_type: CanonicalEventType::SettlementDue,
        ticket_number,
        coupon_number,
        pnr: None,
        passenger_name: None,
        marketing_carrier: None,
        operating_carrier: None,
        flight_number: None,
        flight_date: None,
        origin: None,
        destination: None,
        currency: fields.get("currency").cloned(),
        gross_amount,
        net_amount,
        metadata,
    })
}

fn parse_decimal(value: Option<&String>) -> Result<Option<Decimal>, ParseError> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| Decimal::from_str(v).map_err(|_| ParseError::new(ADAPTER, format!("invalid decimal '{v}'"))))
        .transpose()
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

    fn adapter() -> GdsXmlAdapter {
        GdsXmlAdapter::new(Arc::new(FixedClock(Utc.timestamp_opt(0, 0).unwrap())))
    }

    #[test]
    fn parses_nested_record_elements() {
        let xml = r"<settlement><week><record>
            <ticket_number>0012345678901</ticket_number>
            <coupon_number>1</coupon_number>
            <currency>USD</currency>
            <gross_amount>95.00</gross_amount>
            <net_amount>90.00</net_amount>
            <gds>SABRE</gds>
            <settlement_week>2026-W04</settlement_week>
        </record></week></settlement>";
        let events = adapter().parse(xml.as_bytes()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, CanonicalEventType::SettlementDue);
        assert_eq!(events[0].gross_amount, Some(dec!(95.00)));
        assert_eq!(events[0].metadata.get("gds").map(String::as_str), Some("SABRE"));
    }

    #[test]
    fn multiple_records_parsed_in_document_order() {
        let xml = "<root><record><ticket_number>A</ticket_number></record><record><ticket_number>B</ticket_number></record></root>";
        let events = adapter().parse(xml.as_bytes()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].ticket_number.as_str(), "A");
        assert_eq!(events[1].ticket_number.as_str(), "B");
    }
}
