//! Coupon match rows: the join of issued and flown coupons.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CouponNumber, TicketNumber};

/// Rows aged past this many days are reclassified to `suspense`.
/// Measured in units of `age_suspense()` calls, not wall-clock days.
pub const SUSPENSE_THRESHOLD_DAYS: u32 = 30;

/// Beyond this many days in suspense, `age_suspense()` attaches an
/// escalation note.
pub const ESCALATION_THRESHOLD_DAYS: u32 = 90;

/// The match state of one `(ticket_number, coupon_number)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Both an issued and a flown event exist for this coupon.
    Matched,
    /// Only an issued event exists.
    UnmatchedIssued,
    /// Only a flown event exists.
    UnmatchedFlown,
    /// An unmatched pair that has aged past [`SUSPENSE_THRESHOLD_DAYS`].
    Suspense,
}

impl MatchStatus {
    /// Whether this status counts as still-open for suspense aging
    /// (`unmatched_issued`, `unmatched_flown`, or `suspense`).
    #[must_use]
    pub const fn is_suspense_eligible(self) -> bool {
        matches!(
            self,
            Self::UnmatchedIssued | Self::UnmatchedFlown | Self::Suspense
        )
    }
}

/// A row keyed by `(ticket_number, coupon_number)` recording the current
/// match state between an issued coupon and a flown coupon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouponMatchRow {
    /// The ticket this match pertains to.
    pub ticket_number: TicketNumber,
    /// The coupon this match pertains to.
    pub coupon_number: CouponNumber,
    /// Current match status.
    pub status: MatchStatus,
    /// `event_id` of the issued-side event, if present.
    pub issued_event_ref: Option<String>,
    /// `event_id` of the flown-side event, if present.
    pub flown_event_ref: Option<String>,
    /// When this row became `matched`. Set if and only if
    /// `status == matched`.
    pub matched_at: Option<DateTime<Utc>>,
    /// Number of `age_suspense()` cycles this row has aged through while
    /// unmatched.
    pub days_in_suspense: u32,
    /// Free-text annotation (e.g. the escalation note).
    pub notes: Option<String>,
}

impl CouponMatchRow {
    /// Builds a freshly matched/unmatched row with zeroed aging state,
    /// as produced by one pass of `run_matching()`.
    #[must_use]
    pub fn new(
        ticket_number: TicketNumber,
        coupon_number: CouponNumber,
        status: MatchStatus,
        issued_event_ref: Option<String>,
        flown_event_ref: Option<String>,
        matched_at: Option<DateTime<Utc>>,
    ) -> Self {
        debug_assert_eq!(status == MatchStatus::Matched, matched_at.is_some());
        Self {
            ticket_number,
            coupon_number,
            status,
            issued_event_ref,
            flown_event_ref,
            matched_at,
            days_in_suspense: 0,
            notes: None,
        }
    }
}
