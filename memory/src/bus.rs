//! In-memory and fan-out `Bus` implementations.
//!
//! Grounded in the original `InMemoryBus`/`FanoutBus` pair
//! (`original_source/.../bus/in_memory.py`, `.../bus/fanout.py`). The
//! fan-out here fixes a real isolation gap in that original: its
//! `FanoutBus.publish` aborted the whole batch on the first sink that
//! raised, leaving every sink after it never called. This one always
//! calls every sink and only reports failure once all of them have run.

use std::sync::{Arc, Mutex, PoisonError};

use flightledger_core::bus::{Bus, BusError};
use flightledger_core::event::CanonicalEvent;
use flightledger_core::{CanonicalEventType, Metadata, SourceSystem};

/// Records every published event, grouped by topic, in publish order.
/// Used by tests to assert on what was routed where, and as the default
/// runtime bus when no remote backend is configured.
#[derive(Debug, Default)]
pub struct InMemoryBus {
    topics: Mutex<std::collections::BTreeMap<&'static str, Vec<CanonicalEvent>>>,
}

impl InMemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, std::collections::BTreeMap<&'static str, Vec<CanonicalEvent>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every event ever published to the given topic, in publish order.
    #[must_use]
    pub fn events_on_topic(&self, topic: &str) -> Vec<CanonicalEvent> {
        self.lock().get(topic).cloned().unwrap_or_default()
    }

    /// All events published so far across every topic, grouped by topic.
    #[must_use]
    pub fn snapshot(&self) -> std::collections::BTreeMap<&'static str, Vec<CanonicalEvent>> {
        self.lock().clone()
    }
}

impl Bus for InMemoryBus {
    fn publish(&self, event: &CanonicalEvent) -> Result<(), BusError> {
        let topic = flightledger_core::bus::topic_for(event.event_type);
        self.lock().entry(topic).or_default().push(event.clone());
        Ok(())
    }
}

/// Publishes every event to a fixed set of sinks, isolating each sink's
/// failure from the others.
pub struct FanoutBus {
    sinks: Vec<Arc<dyn Bus>>,
}

impl FanoutBus {
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn Bus>>) -> Self {
        Self { sinks }
    }
}

impl Bus for FanoutBus {
    fn publish(&self, event: &CanonicalEvent) -> Result<(), BusError> {
        let failures: Vec<String> = self
            .sinks
            .iter()
            .filter_map(|sink| sink.publish(event).err())
            .map(|e| e.to_string())
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(BusError::Sink(failures.join("; ")))
        }
    }

    fn close(&self) {
        for sink in &self.sinks {
            sink.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> CanonicalEvent {
        CanonicalEvent {
            event_id: "evt-1".to_string(),
            occurred_at: chrono::Utc::now(),
            source_system: SourceSystem::Pss,
            event_type: CanonicalEventType::TicketIssued,
            ticket_number: flightledger_core::ids::TicketNumber::new("T1")
                .unwrap_or_else(|_| unreachable!("literal ticket number is always non-empty")),
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

    struct FailingSink;
    impl Bus for FailingSink {
        fn publish(&self, _event: &CanonicalEvent) -> Result<(), BusError> {
            Err(BusError::Sink("nope".to_string()))
        }
    }

    #[test]
    fn in_memory_bus_groups_by_topic() {
        let bus = InMemoryBus::new();
        bus.publish(&sample_event()).unwrap();
        assert_eq!(bus.events_on_topic("ticket.issued").len(), 1);
        assert!(bus.events_on_topic("coupon.flown").is_empty());
    }

    #[test]
    fn fanout_delivers_to_every_sink_even_if_one_fails() {
        let healthy = Arc::new(InMemoryBus::new());
        let fanout = FanoutBus::new(vec![healthy.clone(), Arc::new(FailingSink)]);
        let result = fanout.publish(&sample_event());
        assert!(result.is_err());
        assert_eq!(healthy.events_on_topic("ticket.issued").len(), 1);
    }

    #[test]
    fn fanout_succeeds_when_all_sinks_succeed() {
        let a = Arc::new(InMemoryBus::new());
        let b = Arc::new(InMemoryBus::new());
        let fanout = FanoutBus::new(vec![a.clone(), b.clone()]);
        assert!(fanout.publish(&sample_event()).is_ok());
        assert_eq!(a.events_on_topic("ticket.issued").len(), 1);
        assert_eq!(b.events_on_topic("ticket.issued").len(), 1);
    }
}
