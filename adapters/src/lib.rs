//! # FlightLedger Adapters
//!
//! Source adapters: one module per counterparty feed, each parsing a
//! raw payload into canonical events. Parsing is pure and
//! deterministic — every adapter is injected a [`flightledger_core::clock::Clock`]
//! rather than reading the system clock directly, so that `occurred_at`
//! defaults (payloads never carry their own timestamp) stay reproducible
//! in tests.

pub mod dcs;
pub mod gds;
pub mod interline;
pub mod ota;
pub mod pss;

use flightledger_core::CanonicalEvent;
use thiserror::Error;

/// A payload was malformed, referenced an unknown `event_type`, or was
/// missing a required field. Fatal for the one payload that produced
/// it; never aborts the surrounding ingest batch.
#[derive(Debug, Error)]
#[error("{adapter}: {message}")]
pub struct ParseError {
    /// Which adapter rejected the payload.
    pub adapter: &'static str,
    /// Human-readable detail.
    pub message: String,
}

impl ParseError {
    #[must_use]
    pub fn new(adapter: &'static str, message: impl Into<String>) -> Self {
        Self {
            adapter,
            message: message.into(),
        }
    }
}

/// The contract every source adapter satisfies.
pub trait Adapter {
    /// Normalizes a raw source payload into zero or more canonical
    /// events.
    ///
    /// # Errors
    /// Returns [`ParseError`] if the payload is malformed, references an
    /// unknown `event_type`, or omits a required field.
    fn parse(&self, payload: &[u8]) -> Result<Vec<CanonicalEvent>, ParseError>;
}

/// Parses a JSON payload that may be either a single object or an array
/// of objects, wrapping a lone object into a one-element list — the
/// "wraps single object into list" behavior every JSON-based adapter
/// shares.
///
/// # Errors
/// Returns [`ParseError`] if the payload is not valid JSON or is neither
/// an object nor an array.
pub(crate) fn records_from_json(
    adapter: &'static str,
    payload: &[u8],
) -> Result<Vec<serde_json::Value>, ParseError> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| ParseError::new(adapter, e.to_string()))?;
    match value {
        serde_json::Value::Array(items) => Ok(items),
        serde_json::Value::Object(_) => Ok(vec![value]),
        _ => Err(ParseError::new(adapter, "expected a JSON object or array")),
    }
}

/// Reads a required string field from a JSON object, erroring with
/// adapter context if it is absent or not a string.
pub(crate) fn require_str<'a>(
    adapter: &'static str,
    record: &'a serde_json::Value,
    field: &str,
) -> Result<&'a str, ParseError> {
    record
        .get(field)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ParseError::new(adapter, format!("missing required field '{field}'")))
}

/// Reads an optional string field, treating JSON `null` or absence as
/// `None` (never an empty string sentinel).
pub(crate) fn optional_str(record: &serde_json::Value, field: &str) -> Option<String> {
    record
        .get(field)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

/// Reads an optional decimal amount field, accepting either a JSON
/// number or a JSON string (so a strict string-encoded wire form and
/// loose webhook JSON both work).
pub(crate) fn optional_decimal(
    adapter: &'static str,
    record: &serde_json::Value,
    field: &str,
) -> Result<Option<rust_decimal::Decimal>, ParseError> {
    use std::str::FromStr;
    match record.get(field) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => rust_decimal::Decimal::from_str(s)
            .map(Some)
            .map_err(|_| ParseError::new(adapter, format!("invalid decimal for '{field}': {s}"))),
        Some(other) => rust_decimal::Decimal::from_str(&other.to_string())
            .map(Some)
            .map_err(|_| ParseError::new(adapter, format!("invalid decimal for '{field}': {other}"))),
    }
}

/// Reads an optional coupon-number field, validating `>= 1`.
pub(crate) fn optional_coupon(
    adapter: &'static str,
    record: &serde_json::Value,
    field: &str,
) -> Result<Option<flightledger_core::ids::CouponNumber>, ParseError> {
    match record.get(field) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => {
            let n = v
                .as_u64()
                .ok_or_else(|| ParseError::new(adapter, format!("invalid coupon_number '{v}'")))?;
            flightledger_core::ids::CouponNumber::new(
                u32::try_from(n).map_err(|_| ParseError::new(adapter, format!("coupon_number out of range '{v}'")))?,
            )
            .map(Some)
            .map_err(|e| ParseError::new(adapter, e.to_string()))
        }
    }
}

/// Reads an optional flight-date field (`YYYY-MM-DD`).
pub(crate) fn optional_date(
    adapter: &'static str,
    record: &serde_json::Value,
    field: &str,
) -> Result<Option<chrono::NaiveDate>, ParseError> {
    match optional_str(record, field) {
        None => Ok(None),
        Some(v) => chrono::NaiveDate::parse_from_str(&v, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| ParseError::new(adapter, format!("invalid flight_date '{v}'"))),
    }
}

/// Shared helper: coerces an empty optional string cell to `None`
/// rather than `Some("")` — empty strings coerce to null, never zero.
pub(crate) fn non_empty(value: Option<&str>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
