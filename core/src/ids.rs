//! Newtype identifiers shared across the canonical event model.
//!
//! Mirrors the validated-newtype pattern used for stream and version
//! identifiers elsewhere in the workspace: a thin wrapper over a primitive,
//! with construction that rejects invalid values rather than trusting
//! callers to pass well-formed data.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A ticket number as it appears on every counterparty feed.
///
/// Never empty. `ticket_number` is required on every `CanonicalEvent`,
/// so construction fails loudly rather than silently accepting a blank
/// identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketNumber(String);

/// A ticket number was empty or otherwise malformed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("ticket number must not be empty")]
pub struct InvalidTicketNumber;

impl TicketNumber {
    /// Builds a `TicketNumber`, rejecting empty strings.
    ///
    /// # Errors
    /// Returns [`InvalidTicketNumber`] if `value` is empty.
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidTicketNumber> {
        let value = value.into();
        if value.is_empty() {
            return Err(InvalidTicketNumber);
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TicketNumber {
    type Err = InvalidTicketNumber;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for TicketNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<TicketNumber> for String {
    fn from(value: TicketNumber) -> Self {
        value.0
    }
}

/// A coupon (flight segment) number within a ticket. Always `>= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CouponNumber(u32);

/// A coupon number of zero was supplied; coupons are numbered from 1.
#[derive(Debug, Clone, thiserror::Error)]
#[error("coupon number must be >= 1")]
pub struct InvalidCouponNumber;

impl CouponNumber {
    /// # Errors
    /// Returns [`InvalidCouponNumber`] if `value` is zero.
    pub fn new(value: u32) -> Result<Self, InvalidCouponNumber> {
        if value == 0 {
            return Err(InvalidCouponNumber);
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CouponNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A dense, per-ticket monotonic sequence number, starting at 1 (I2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventSequence(u64);

impl EventSequence {
    /// The first sequence number ever assigned to a ticket.
    pub const INITIAL: Self = Self(1);

    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }

    /// The next sequence number after this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for EventSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EventSequence {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_number_rejects_empty() {
        assert!(TicketNumber::new("").is_err());
        assert!(TicketNumber::new("T1").is_ok());
    }

    #[test]
    fn coupon_number_rejects_zero() {
        assert!(CouponNumber::new(0).is_err());
        assert_eq!(CouponNumber::new(1).unwrap().value(), 1);
    }

    #[test]
    fn event_sequence_starts_at_one_and_increments() {
        assert_eq!(EventSequence::INITIAL.value(), 1);
        assert_eq!(EventSequence::INITIAL.next().value(), 2);
    }
}
