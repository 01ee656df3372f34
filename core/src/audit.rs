//! The append-only audit/lineage record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::TicketNumber;

/// One append-only entry tying a stage's output back to the inputs that
/// produced it. There is deliberately no setter surface anywhere in
/// this crate for this type — only `log`, `get_by_ticket`, and
/// `get_by_output_reference` exist on [`crate::repository::AuditRepository`],
/// so a record can never be edited or deleted once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub component: String,
    pub ticket_number: Option<TicketNumber>,
    pub input_event_ids: Vec<String>,
    pub output_reference: Option<String>,
    pub detail: serde_json::Value,
    pub raw_source_hash: Option<String>,
}

/// The fields a caller supplies to `log()`; the store fills in `id` and
/// `timestamp`.
#[derive(Debug, Clone, Default)]
pub struct AuditEntry {
    pub action: String,
    pub component: String,
    pub ticket_number: Option<TicketNumber>,
    pub input_event_ids: Vec<String>,
    pub output_reference: Option<String>,
    pub detail: serde_json::Value,
    pub raw_source_hash: Option<String>,
}

impl AuditEntry {
    /// Starts building an entry for the given action/component pair —
    /// the two fields every call site must supply.
    #[must_use]
    pub fn new(action: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            component: component.into(),
            detail: serde_json::Value::Object(serde_json::Map::new()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_ticket(mut self, ticket_number: TicketNumber) -> Self {
        self.ticket_number = Some(ticket_number);
        self
    }

    #[must_use]
    pub fn with_output_reference(mut self, output_reference: impl Into<String>) -> Self {
        self.output_reference = Some(output_reference.into());
        self
    }

    #[must_use]
    pub fn with_input_event_ids(mut self, ids: Vec<String>) -> Self {
        self.input_event_ids = ids;
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}
