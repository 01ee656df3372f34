//! The settlement saga state machine. Grounded in
//! `original_source/.../settlement/engine.py`.
//!
//! Two behaviors are confirmed exactly against that original rather than
//! left to spec.md's terser wording: `validate()` on a non-positive
//! `our_amount` is a true no-op (no saga step, no audit record, row
//! returned unchanged), and `compensate(reason)` on an already
//! `compensated` settlement is likewise a no-op, while from any other
//! status it records a step from whatever that status actually is.

use std::sync::Arc;

use chrono::Utc;
use flightledger_core::audit::AuditEntry;
use flightledger_core::clock::Clock;
use flightledger_core::error::{BackendError, NotFoundError};
use flightledger_core::ids::TicketNumber;
use flightledger_core::repository::SettlementRepository;
use flightledger_core::settlement::{Settlement, SettlementSagaStep, SettlementStatus};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;
use uuid::Uuid;

use crate::audit::AuditStore;

/// The tolerance below which `confirm()` treats the counterparty's
/// reported amount as agreeing with ours.
const CONFIRM_TOLERANCE: Decimal = dec!(0.01);

/// Failure modes of the settlement saga's transition methods.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error("invalid transition: only '{expected}' can {action}, settlement is '{actual}'")]
    InvalidTransition {
        action: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Drives one settlement through `calculate -> validate -> submit ->
/// confirm -> {confirmed|disputed} -> reconcile`, with `compensate`
/// reachable from any non-terminal status.
pub struct SettlementEngine {
    repository: Arc<dyn SettlementRepository>,
    audit: Option<Arc<AuditStore>>,
    clock: Arc<dyn Clock>,
}

impl SettlementEngine {
    #[must_use]
    pub fn new(
        repository: Arc<dyn SettlementRepository>,
        audit: Option<Arc<AuditStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            audit,
            clock,
        }
    }

    /// # Errors
    /// Returns [`BackendError`] if the underlying repository rejects the reset.
    pub fn reset(&self) -> Result<(), BackendError> {
        self.repository.reset()
    }

    /// Creates a settlement row in `calculated` status. `currency` is
    /// fixed to `"USD"` and `counterparty_type` to `"interline_partner"`
    /// regardless of the originating event, per the saga's own design.
    ///
    /// # Errors
    /// Returns [`BackendError`] if the underlying repository rejects the insert.
    pub fn calculate(
        &self,
        ticket_number: TicketNumber,
        counterparty: String,
        our_amount: Decimal,
    ) -> Result<Settlement, SettlementError> {
        let now = self.clock.now();
        let settlement = Settlement {
            id: Uuid::new_v4(),
            ticket_number,
            counterparty,
            counterparty_type: "interline_partner".to_string(),
            our_amount,
            their_amount: None,
            currency: "USD".to_string(),
            status: SettlementStatus::Calculated,
            created_at: now,
            updated_at: now,
        };
        self.repository.insert(settlement.clone())?;
        self.log_transition(
            settlement.id,
            None,
            SettlementStatus::Calculated,
            "calculate",
            serde_json::json!({ "our_amount": our_amount.to_string() }),
        )?;
        Ok(settlement)
    }

    /// A true no-op (no saga step, no audit record) when `our_amount <=
    /// 0`: the row is returned unchanged.
    ///
    /// # Errors
    /// Returns [`SettlementError::InvalidTransition`] unless the
    /// settlement is currently `calculated`.
    pub fn validate(&self, id: Uuid) -> Result<Settlement, SettlementError> {
        let settlement = self.require(id)?;
        self.expect_status(&settlement, SettlementStatus::Calculated, "validate")?;
        if settlement.our_amount <= Decimal::ZERO {
            return Ok(settlement);
        }
        let updated = self.transition(settlement, SettlementStatus::Validated)?;
        self.log_transition(
            id,
            Some(SettlementStatus::Calculated),
            SettlementStatus::Validated,
            "validate",
            serde_json::json!({}),
        )?;
        Ok(updated)
    }

    /// # Errors
    /// Returns [`SettlementError::InvalidTransition`] unless the
    /// settlement is currently `validated`.
    pub fn submit(&self, id: Uuid) -> Result<Settlement, SettlementError> {
        let settlement = self.require(id)?;
        self.expect_status(&settlement, SettlementStatus::Validated, "submit")?;
        let updated = self.transition(settlement, SettlementStatus::Submitted)?;
        self.log_transition(
            id,
            Some(SettlementStatus::Validated),
            SettlementStatus::Submitted,
            "submit",
            serde_json::json!({}),
        )?;
        Ok(updated)
    }

    /// Compares `their_amount` against the settlement's `our_amount`;
    /// `confirmed` if they agree within [`CONFIRM_TOLERANCE`], `disputed`
    /// otherwise.
    ///
    /// # Errors
    /// Returns [`SettlementError::InvalidTransition`] unless the
    /// settlement is currently `submitted`.
    pub fn confirm(&self, id: Uuid, their_amount: Decimal) -> Result<Settlement, SettlementError> {
        let settlement = self.require(id)?;
        self.expect_status(&settlement, SettlementStatus::Submitted, "confirm")?;
        let agrees = (settlement.our_amount - their_amount).abs() < CONFIRM_TOLERANCE;
        let next_status = if agrees {
            SettlementStatus::Confirmed
        } else {
            SettlementStatus::Disputed
        };
        let mut updated = settlement.clone();
        updated.their_amount = Some(their_amount);
        updated.status = next_status;
        updated.updated_at = self.clock.now();
        self.repository.update(updated.clone())?;
        self.log_transition(
            id,
            Some(SettlementStatus::Submitted),
            next_status,
            "confirm",
            serde_json::json!({
                "our_amount": settlement.our_amount.to_string(),
                "their_amount": their_amount.to_string(),
            }),
        )?;
        Ok(updated)
    }

    /// # Errors
    /// Returns [`SettlementError::InvalidTransition`] unless the
    /// settlement is currently `confirmed`.
    pub fn reconcile(&self, id: Uuid) -> Result<Settlement, SettlementError> {
        let settlement = self.require(id)?;
        self.expect_status(&settlement, SettlementStatus::Confirmed, "reconcile")?;
        let updated = self.transition(settlement, SettlementStatus::Reconciled)?;
        self.log_transition(
            id,
            Some(SettlementStatus::Confirmed),
            SettlementStatus::Reconciled,
            "reconcile",
            serde_json::json!({}),
        )?;
        Ok(updated)
    }

    /// Rolls a settlement back to `compensated` from any non-terminal
    /// status. Idempotent: calling this on an already `compensated`
    /// settlement returns the row unchanged, with no new saga step or
    /// audit record.
    ///
    /// # Errors
    /// Returns [`SettlementError::NotFound`] if `id` is unknown, or
    /// [`SettlementError::Backend`] on a repository failure.
    pub fn compensate(&self, id: Uuid, reason: String) -> Result<Settlement, SettlementError> {
        let settlement = self.require(id)?;
        if settlement.status == SettlementStatus::Compensated {
            return Ok(settlement);
        }
        let from_status = settlement.status;
        let updated = self.transition(settlement, SettlementStatus::Compensated)?;
        self.log_transition(
            id,
            Some(from_status),
            SettlementStatus::Compensated,
            "compensate",
            serde_json::json!({ "reason": reason }),
        )?;
        Ok(updated)
    }

    /// Sorted by `created_at` descending, filtered by `status` if given.
    ///
    /// # Errors
    /// Returns [`BackendError`] if the underlying repository rejects the read.
    pub fn list_settlements(
        &self,
        status: Option<SettlementStatus>,
    ) -> Result<Vec<Settlement>, BackendError> {
        let rows = self.repository.list_all()?;
        Ok(match status {
            Some(status) => rows.into_iter().filter(|s| s.status == status).collect(),
            None => rows,
        })
    }

    /// Timestamp-ascending.
    ///
    /// # Errors
    /// Returns [`BackendError`] if the underlying repository rejects the read.
    pub fn get_saga(&self, id: Uuid) -> Result<Vec<SettlementSagaStep>, BackendError> {
        self.repository.get_saga(id)
    }

    fn require(&self, id: Uuid) -> Result<Settlement, SettlementError> {
        self.repository
            .get(id)?
            .ok_or_else(|| NotFoundError::new("settlement", id.to_string()).into())
    }

    fn expect_status(
        &self,
        settlement: &Settlement,
        expected: SettlementStatus,
        action: &'static str,
    ) -> Result<(), SettlementError> {
        if settlement.status == expected {
            Ok(())
        } else {
            Err(SettlementError::InvalidTransition {
                action,
                expected: expected.as_str(),
                actual: settlement.status.as_str(),
            })
        }
    }

    fn transition(
        &self,
        mut settlement: Settlement,
        to: SettlementStatus,
    ) -> Result<Settlement, SettlementError> {
        settlement.status = to;
        settlement.updated_at = self.clock.now();
        self.repository.update(settlement.clone())?;
        Ok(settlement)
    }

    fn log_transition(
        &self,
        settlement_id: Uuid,
        from_status: Option<SettlementStatus>,
        to_status: SettlementStatus,
        action: &str,
        detail: serde_json::Value,
    ) -> Result<(), SettlementError> {
        self.repository.insert_saga_step(SettlementSagaStep {
            id: Uuid::new_v4(),
            settlement_id,
            from_status,
            to_status,
            action: action.to_string(),
            detail: detail.clone(),
            timestamp: self.clock.now(),
        })?;
        if let Some(audit) = &self.audit {
            let mut merged = match detail {
                serde_json::Value::Object(map) => map,
                other => {
                    let mut map = serde_json::Map::new();
                    map.insert("detail".to_string(), other);
                    map
                }
            };
            merged.insert(
                "from_status".to_string(),
                serde_json::Value::String(
                    from_status.map_or_else(|| "none".to_string(), |s| s.as_str().to_string()),
                ),
            );
            merged.insert(
                "to_status".to_string(),
                serde_json::Value::String(to_status.as_str().to_string()),
            );
            audit.log(
                AuditEntry::new(format!("settlement_{action}"), "settlement_engine")
                    .with_output_reference(settlement_id.to_string())
                    .with_detail(serde_json::Value::Object(merged)),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use flightledger_core::clock::SystemClock;
    use flightledger_memory::MemoryBackend;
    use rust_decimal_macros::dec;

    use super::*;

    fn engine() -> SettlementEngine {
        let backend = Arc::new(MemoryBackend::new());
        SettlementEngine::new(backend, None, Arc::new(SystemClock))
    }

    #[test]
    fn dispute_then_compensate_matches_literal_scenario() {
        let engine = engine();
        let settlement = engine
            .calculate(TicketNumber::new("T1").unwrap(), "AA".to_string(), dec!(200))
            .unwrap();
        engine.validate(settlement.id).unwrap();
        engine.submit(settlement.id).unwrap();
        let confirmed = engine.confirm(settlement.id, dec!(195)).unwrap();
        assert_eq!(confirmed.status, SettlementStatus::Disputed);

        let compensated = engine
            .compensate(settlement.id, "dispute unresolved".to_string())
            .unwrap();
        assert_eq!(compensated.status, SettlementStatus::Compensated);

        let saga = engine.get_saga(settlement.id).unwrap();
        let last = saga.last().unwrap();
        assert_eq!(last.to_status, SettlementStatus::Compensated);
        assert_eq!(last.from_status, Some(SettlementStatus::Disputed));
    }

    #[test]
    fn validate_is_a_true_no_op_for_non_positive_amount() {
        let engine = engine();
        let settlement = engine
            .calculate(TicketNumber::new("T1").unwrap(), "AA".to_string(), dec!(0))
            .unwrap();
        let saga_before = engine.get_saga(settlement.id).unwrap().len();
        let result = engine.validate(settlement.id).unwrap();
        assert_eq!(result.status, SettlementStatus::Calculated);
        assert_eq!(engine.get_saga(settlement.id).unwrap().len(), saga_before);
    }

    #[test]
    fn compensate_is_idempotent_from_compensated() {
        let engine = engine();
        let settlement = engine
            .calculate(TicketNumber::new("T1").unwrap(), "AA".to_string(), dec!(100))
            .unwrap();
        engine.compensate(settlement.id, "first".to_string()).unwrap();
        let steps_after_first = engine.get_saga(settlement.id).unwrap().len();
        engine.compensate(settlement.id, "second".to_string()).unwrap();
        assert_eq!(engine.get_saga(settlement.id).unwrap().len(), steps_after_first);
    }

    #[test]
    fn confirm_before_submit_is_invalid_transition() {
        let engine = engine();
        let settlement = engine
            .calculate(TicketNumber::new("T1").unwrap(), "AA".to_string(), dec!(100))
            .unwrap();
        let result = engine.confirm(settlement.id, dec!(100));
        assert!(matches!(
            result,
            Err(SettlementError::InvalidTransition { .. })
        ));
    }
}
