//! The canonical event model: the single typed record every adapter
//! normalizes into and every downstream stage consumes.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{CouponNumber, TicketNumber};

/// The counterparty system an event originated from.
///
/// Wire representation is the short tag (`"PSS"`, `"DCS"`, …), not a
/// longer descriptive name (`"reservation_pss"`, …): these strings are
/// wire-stable and must not be renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceSystem {
    /// Passenger service system (reservations).
    #[serde(rename = "PSS")]
    Pss,
    /// Departure control system.
    #[serde(rename = "DCS")]
    Dcs,
    /// Global distribution system settlement feed.
    #[serde(rename = "GDS")]
    Gds,
    /// Online travel agent.
    #[serde(rename = "OTA")]
    Ota,
    /// Interline partner claims.
    #[serde(rename = "INTERLINE")]
    Interline,
}

impl SourceSystem {
    /// The wire-stable short tag for this source system.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pss => "PSS",
            Self::Dcs => "DCS",
            Self::Gds => "GDS",
            Self::Ota => "OTA",
            Self::Interline => "INTERLINE",
        }
    }
}

impl std::fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of fact a `CanonicalEvent` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalEventType {
    /// A ticket was issued.
    TicketIssued,
    /// A ticket was reissued (e.g. reroute, fare change).
    TicketReissued,
    /// A ticket was voided.
    TicketVoided,
    /// A coupon (flight segment) was flown.
    CouponFlown,
    /// A refund was requested against a ticket.
    RefundRequested,
    /// A counterparty settlement amount is due.
    SettlementDue,
    /// A booking (PNR) was modified.
    BookingModified,
    /// An interline partner filed a claim.
    InterlineClaim,
}

impl CanonicalEventType {
    /// The wire-stable snake_case tag for this event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TicketIssued => "ticket_issued",
            Self::TicketReissued => "ticket_reissued",
            Self::TicketVoided => "ticket_voided",
            Self::CouponFlown => "coupon_flown",
            Self::RefundRequested => "refund_requested",
            Self::SettlementDue => "settlement_due",
            Self::BookingModified => "booking_modified",
            Self::InterlineClaim => "interline_claim",
        }
    }

    /// Parses the wire tag, returning `None` for anything unrecognized.
    ///
    /// Adapters use this (rather than relying on serde alone) so that an
    /// unknown `event_type` string from a payload can be turned into a
    /// `ParseError` with adapter-specific context.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        Some(match tag {
            "ticket_issued" => Self::TicketIssued,
            "ticket_reissued" => Self::TicketReissued,
            "ticket_voided" => Self::TicketVoided,
            "coupon_flown" => Self::CouponFlown,
            "refund_requested" => Self::RefundRequested,
            "settlement_due" => Self::SettlementDue,
            "booking_modified" => Self::BookingModified,
            "interline_claim" => Self::InterlineClaim,
            _ => return None,
        })
    }

    /// Whether this event type counts as an "issued" side for coupon
    /// matching.
    #[must_use]
    pub const fn is_issued_kind(self) -> bool {
        matches!(self, Self::TicketIssued | Self::TicketReissued)
    }

    /// Whether this event type counts as a settlement-bearing side for
    /// three-way reconciliation.
    #[must_use]
    pub const fn is_settlement_kind(self) -> bool {
        matches!(self, Self::SettlementDue | Self::InterlineClaim)
    }
}

impl std::fmt::Display for CanonicalEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A key/value bag carrying source-specific annotations (e.g.
/// `sales_channel`, `partner_carrier`, `source_record_type`). A
/// `BTreeMap` rather than a `HashMap` so that `TicketState` replay
/// remains byte-for-byte deterministic when metadata is compared or
/// serialized.
pub type Metadata = BTreeMap<String, String>;

/// The canonical, immutable event record normalized from every
/// counterparty feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// Globally unique identifier. Appending the same `event_id` twice
    /// must yield exactly one persisted row.
    pub event_id: String,
    /// When the underlying fact occurred (not when it was ingested).
    pub occurred_at: DateTime<Utc>,
    /// The counterparty system this event was normalized from.
    pub source_system: SourceSystem,
    /// The kind of fact this event records.
    pub event_type: CanonicalEventType,
    /// The ticket this event pertains to. Always required.
    pub ticket_number: TicketNumber,
    /// The coupon (flight segment) this event pertains to, if any.
    pub coupon_number: Option<CouponNumber>,
    /// Passenger name record / booking identifier.
    pub pnr: Option<String>,
    /// Passenger name as it appears on the ticket.
    pub passenger_name: Option<String>,
    /// Marketing carrier code.
    pub marketing_carrier: Option<String>,
    /// Operating carrier code.
    pub operating_carrier: Option<String>,
    /// Flight number.
    pub flight_number: Option<String>,
    /// Flight date.
    pub flight_date: Option<NaiveDate>,
    /// Origin airport code.
    pub origin: Option<String>,
    /// Destination airport code.
    pub destination: Option<String>,
    /// ISO currency code as declared by the source; no cross-currency
    /// conversion is performed anywhere downstream.
    pub currency: Option<String>,
    /// Gross amount, exact decimal. Never a binary float in
    /// arithmetic; floats are only acceptable at a JSON transport
    /// boundary that this type does not expose.
    pub gross_amount: Option<Decimal>,
    /// Net amount, exact decimal.
    pub net_amount: Option<Decimal>,
    /// Source-specific annotations.
    #[serde(default)]
    pub metadata: Metadata,
}

impl CanonicalEvent {
    /// Looks up a metadata value by key.
    #[must_use]
    pub fn metadata_get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips_through_wire_tag() {
        for ty in [
            CanonicalEventType::TicketIssued,
            CanonicalEventType::TicketReissued,
            CanonicalEventType::TicketVoided,
            CanonicalEventType::CouponFlown,
            CanonicalEventType::RefundRequested,
            CanonicalEventType::SettlementDue,
            CanonicalEventType::BookingModified,
            CanonicalEventType::InterlineClaim,
        ] {
            assert_eq!(CanonicalEventType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(CanonicalEventType::parse("not_a_real_type"), None);
    }

    #[test]
    fn source_system_serializes_to_short_tag() {
        let json = serde_json::to_string(&SourceSystem::Interline).unwrap();
        assert_eq!(json, "\"INTERLINE\"");
    }
}
