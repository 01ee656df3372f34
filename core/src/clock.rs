//! Clock abstraction, injected wherever a component needs "now" (adapter
//! `occurred_at` defaults, audit/saga timestamps, DAG run timing) so
//! that call sites stay deterministic and testable.

use chrono::{DateTime, Utc};

/// Abstracts time so that adapters and engines stay pure and
/// deterministic in tests.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock, backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
