//! Settlement rows and the saga state machine's data model.
//!
//! The state machine's transition logic lives in
//! `flightledger-engine::settlement` (it needs the audit store and the
//! repository to run); this module only owns the shapes the engine reads
//! and writes, plus the status enum the transition table is defined over.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::TicketNumber;

/// A settlement's position in the saga state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    /// `calculate()` has run; obligation amount recorded.
    Calculated,
    /// `validate()` has run against a positive amount.
    Validated,
    /// `submit()` has run.
    Submitted,
    /// `confirm()` found the counterparty amount within tolerance.
    Confirmed,
    /// `confirm()` found the counterparty amount outside tolerance.
    Disputed,
    /// `reconcile()` has run; terminal success state.
    Reconciled,
    /// `compensate()` has run; terminal rollback state, reachable from
    /// any non-terminal status.
    Compensated,
}

impl SettlementStatus {
    /// The wire/log tag for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Calculated => "calculated",
            Self::Validated => "validated",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Disputed => "disputed",
            Self::Reconciled => "reconciled",
            Self::Compensated => "compensated",
        }
    }
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A settlement obligation owed to (or by) a counterparty for one ticket.
/// Identified by an opaque id; updated in place by the saga engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: Uuid,
    pub ticket_number: TicketNumber,
    pub counterparty: String,
    /// Hard-coded to `"interline_partner"` at calculation time — this
    /// is not re-derived from the event's own `source_system`.
    pub counterparty_type: String,
    pub our_amount: Decimal,
    pub their_amount: Option<Decimal>,
    /// Hard-coded to `"USD"` at calculation time regardless of the
    /// originating event's currency. A known discrepancy, deliberately
    /// not "fixed" here; see DESIGN.md.
    pub currency: String,
    pub status: SettlementStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One append-only entry in a settlement's saga log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementSagaStep {
    pub id: Uuid,
    pub settlement_id: Uuid,
    /// `None` only for the very first step (`calculate`), which has no
    /// prior settlement row to read a status from.
    pub from_status: Option<SettlementStatus>,
    pub to_status: SettlementStatus,
    pub action: String,
    /// Free-form detail captured at the transition (amounts compared,
    /// compensation reason, …), rendered as a small JSON object.
    pub detail: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}
