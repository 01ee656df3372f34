//! Three-way reconciliation rows and break classification.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{CouponNumber, TicketNumber};

/// Tolerance below which a fare difference is treated as rounding noise
/// and auto-resolved.
pub const ROUNDING_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01

/// Threshold at or above which a fare difference is classified `high`
/// severity rather than `medium`.
pub const HIGH_SEVERITY_THRESHOLD: Decimal = Decimal::from_parts(10, 0, 0, false, 0); // 10

/// Overall outcome of one recon row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconStatus {
    /// The issued, flown and settlement amounts agree within tolerance.
    Matched,
    /// A discrepancy was found; see `break_type`.
    Break,
}

/// The kind of discrepancy a break represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakType {
    /// Our recorded amount and the counterparty's settlement amount
    /// diverge by more than the rounding tolerance.
    FareMismatch,
    /// No settlement record exists for an issued/flown coupon.
    MissingSettlement,
    /// More than one `coupon_flown` event was observed for the same key.
    DuplicateLift,
    /// No flown event exists yet; too early to call this a break.
    Timing,
}

/// Severity of a break, used to prioritize manual review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Low priority.
    Low,
    /// Medium priority.
    Medium,
    /// High priority.
    High,
}

/// How a break (or non-break) row was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Resolved automatically by the classification rules (rounding
    /// tolerance).
    AutoResolved,
    /// Not yet resolved; awaiting manual or rule-based action.
    Unresolved,
    /// Resolved by a human via `resolve_break`.
    ManuallyResolved,
}

/// The result of classifying one `(ticket_number, coupon_number)` pair
/// against the ordered decision table below, before it's turned into a
/// persisted `ReconResultRow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakClassification {
    /// `None` only when `status == Matched`.
    pub break_type: Option<BreakType>,
    pub severity: Severity,
    pub status: ReconStatus,
    pub resolution: Resolution,
}

/// Classifies a single `(ticket, coupon)` recon outcome using an
/// ordered decision table. Order matters: the first matching rule wins.
#[must_use]
pub fn classify_break(
    our_amount: Option<Decimal>,
    their_amount: Option<Decimal>,
    flown_exists: bool,
    duplicate_lift: bool,
    settlement_exists: bool,
) -> BreakClassification {
    if duplicate_lift {
        return BreakClassification {
            break_type: Some(BreakType::DuplicateLift),
            severity: Severity::High,
            status: ReconStatus::Break,
            resolution: Resolution::Unresolved,
        };
    }
    if !flown_exists {
        return BreakClassification {
            break_type: Some(BreakType::Timing),
            severity: Severity::Low,
            status: ReconStatus::Break,
            resolution: Resolution::Unresolved,
        };
    }
    if !settlement_exists {
        return BreakClassification {
            break_type: Some(BreakType::MissingSettlement),
            severity: Severity::High,
            status: ReconStatus::Break,
            resolution: Resolution::Unresolved,
        };
    }
    let (Some(our), Some(their)) = (our_amount, their_amount) else {
        return BreakClassification {
            break_type: Some(BreakType::MissingSettlement),
            severity: Severity::High,
            status: ReconStatus::Break,
            resolution: Resolution::Unresolved,
        };
    };

    let difference = (our - their).abs();
    if difference < ROUNDING_TOLERANCE {
        return BreakClassification {
            break_type: None,
            severity: Severity::Low,
            status: ReconStatus::Matched,
            resolution: Resolution::AutoResolved,
        };
    }
    let severity = if difference >= HIGH_SEVERITY_THRESHOLD {
        Severity::High
    } else {
        Severity::Medium
    };
    BreakClassification {
        break_type: Some(BreakType::FareMismatch),
        severity,
        status: ReconStatus::Break,
        resolution: Resolution::Unresolved,
    }
}

/// A persisted per-`(ticket_number, coupon_number)` reconciliation
/// outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconResultRow {
    /// Opaque row id.
    pub id: Uuid,
    pub ticket_number: TicketNumber,
    pub coupon_number: CouponNumber,
    pub status: ReconStatus,
    pub break_type: Option<BreakType>,
    pub severity: Severity,
    pub our_amount: Option<Decimal>,
    pub their_amount: Option<Decimal>,
    pub difference: Option<Decimal>,
    pub resolution: Resolution,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Aggregate counters returned by `run_full_recon()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconSummary {
    pub total_matched: u64,
    pub total_breaks: u64,
    pub breaks_by_type: std::collections::BTreeMap<String, u64>,
    pub breaks_by_severity: std::collections::BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn duplicate_lift_wins_over_everything_else() {
        let c = classify_break(Some(dec!(100)), Some(dec!(100)), true, true, true);
        assert_eq!(c.break_type, Some(BreakType::DuplicateLift));
        assert_eq!(c.severity, Severity::High);
    }

    #[test]
    fn fare_mismatch_high_severity_at_exactly_ten() {
        let c = classify_break(Some(dec!(100)), Some(dec!(90)), true, false, true);
        assert_eq!(c.break_type, Some(BreakType::FareMismatch));
        assert_eq!(c.severity, Severity::High);
    }

    #[test]
    fn rounding_tolerance_auto_resolves() {
        let c = classify_break(Some(dec!(100)), Some(dec!(99.995)), true, false, true);
        assert_eq!(c.status, ReconStatus::Matched);
        assert_eq!(c.resolution, Resolution::AutoResolved);
    }

    #[test]
    fn missing_settlement_beats_null_amount_check() {
        let c = classify_break(Some(dec!(100)), None, true, false, false);
        assert_eq!(c.break_type, Some(BreakType::MissingSettlement));
    }
}
