//! Topic routing for the event bus. The bus implementations
//! themselves (in-memory, fan-out) live in `flightledger-memory`, since
//! they are stateful collections rather than shared types; this module
//! owns only the wire-stable routing table and the narrow `Bus` trait
//! every implementation satisfies.

use thiserror::Error;

use crate::event::{CanonicalEvent, CanonicalEventType};

/// Maps an event type to its topic string. Topic strings are wire-stable.
#[must_use]
pub const fn topic_for(event_type: CanonicalEventType) -> &'static str {
    match event_type {
        CanonicalEventType::TicketIssued
        | CanonicalEventType::TicketReissued
        | CanonicalEventType::TicketVoided => "ticket.issued",
        CanonicalEventType::CouponFlown => "coupon.flown",
        CanonicalEventType::RefundRequested => "refund.requested",
        CanonicalEventType::SettlementDue | CanonicalEventType::InterlineClaim => {
            "settlement.due"
        }
        CanonicalEventType::BookingModified => "booking.modified",
    }
}

/// A sink a `CanonicalEvent` can be published to.
#[derive(Debug, Error)]
pub enum BusError {
    /// The sink's own backend rejected the publish (e.g. remote message
    /// bus send failure). Isolated per-sink by `FanoutBus`.
    #[error("bus sink error: {0}")]
    Sink(String),
}

/// The narrow contract every bus implementation (in-memory, fan-out,
/// remote) satisfies.
pub trait Bus: Send + Sync {
    /// Publishes one event to its routed topic.
    ///
    /// # Errors
    /// Returns [`BusError`] if the sink rejects the publish.
    fn publish(&self, event: &CanonicalEvent) -> Result<(), BusError>;

    /// Publishes a batch of events in order.
    ///
    /// # Errors
    /// Returns [`BusError`] on the first rejected publish; implementations
    /// that need partial-failure isolation across a batch should call
    /// `publish` directly per event instead.
    fn publish_many(&self, events: &[CanonicalEvent]) -> Result<(), BusError> {
        for event in events {
            self.publish(event)?;
        }
        Ok(())
    }

    /// Releases any resources the sink holds (connections, file handles).
    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_map_groups_related_event_types() {
        assert_eq!(topic_for(CanonicalEventType::TicketIssued), "ticket.issued");
        assert_eq!(topic_for(CanonicalEventType::TicketReissued), "ticket.issued");
        assert_eq!(topic_for(CanonicalEventType::TicketVoided), "ticket.issued");
        assert_eq!(topic_for(CanonicalEventType::CouponFlown), "coupon.flown");
        assert_eq!(
            topic_for(CanonicalEventType::RefundRequested),
            "refund.requested"
        );
        assert_eq!(
            topic_for(CanonicalEventType::SettlementDue),
            "settlement.due"
        );
        assert_eq!(
            topic_for(CanonicalEventType::InterlineClaim),
            "settlement.due"
        );
        assert_eq!(
            topic_for(CanonicalEventType::BookingModified),
            "booking.modified"
        );
    }
}
