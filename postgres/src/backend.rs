//! `PostgresBackend`: one `sqlx::PgPool`-backed implementation per
//! `flightledger-core::repository` trait.
//!
//! Every method bridges its async `sqlx` call onto the synchronous
//! trait surface with `tokio::task::block_in_place` +
//! `Handle::block_on`. This only works when called from within a
//! multi-threaded Tokio runtime (the `flightledger-cli` binary always
//! runs one); calling it from a current-thread runtime panics in
//! `block_in_place` itself, which is the correct failure mode — it
//! means the binary was misconfigured, not that the backend is broken.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use flightledger_core::audit::AuditRecord;
use flightledger_core::dag::{DagRunRow, DagRunStatus, TaskRunRow, TaskStatus};
use flightledger_core::error::BackendError;
use flightledger_core::event::CanonicalEventType;
use flightledger_core::ids::{EventSequence, TicketNumber};
use flightledger_core::matcher::CouponMatchRow;
use flightledger_core::recon::ReconResultRow;
use flightledger_core::repository::{
    AuditRepository, CouponMatchRepository, DagRunRepository, RepoResult, ReconRepository,
    SettlementRepository, TaskRunRepository, TicketEventRepository, TicketStateRepository,
};
use flightledger_core::settlement::{Settlement, SettlementSagaStep};
use flightledger_core::ticket::{TicketEventRow, TicketState};

use crate::schema;

/// A `sqlx`-backed implementation of every repository trait
/// `flightledger-core` defines, talking to a single Postgres database.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Opens a connection pool against `database_url`. Does not run
    /// migrations; call [`PostgresBackend::run_migrations`] once at
    /// startup.
    ///
    /// # Errors
    /// Returns the underlying `sqlx::Error` if the pool cannot be
    /// established.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Builds a backend directly from an already-open pool (used by
    /// tests that construct the pool via `testcontainers`).
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the `CREATE TABLE IF NOT EXISTS` schema.
    ///
    /// # Errors
    /// Returns the underlying `sqlx::Error` if any statement fails.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        schema::run_migrations(&self.pool).await
    }

    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
    }
}

fn backend_err(e: sqlx::Error) -> BackendError {
    BackendError::Backend(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(sqlx::error::DatabaseError::code)
        .is_some_and(|code| code == "23505")
}

fn sequence_to_i64(sequence: EventSequence) -> RepoResult<i64> {
    i64::try_from(sequence.value())
        .map_err(|_| BackendError::Backend("event_sequence exceeds i64 range".to_string()))
}

impl TicketEventRepository for PostgresBackend {
    fn reset(&self) -> RepoResult<()> {
        self.block_on(async {
            sqlx::query("DELETE FROM ticket_events")
                .execute(&self.pool)
                .await
                .map_err(backend_err)?;
            Ok(())
        })
    }

    fn find_by_event_id(&self, event_id: &str) -> RepoResult<Option<TicketEventRow>> {
        self.block_on(async {
            let row = sqlx::query_as::<_, (Json<TicketEventRow>,)>(
                "SELECT payload FROM ticket_events WHERE event_id = $1",
            )
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(row.map(|(Json(r),)| r))
        })
    }

    fn next_sequence(&self, ticket_number: &TicketNumber) -> RepoResult<EventSequence> {
        self.block_on(async {
            let (max,): (i64,) = sqlx::query_as(
                "SELECT COALESCE(MAX(event_sequence), 0) FROM ticket_events WHERE ticket_number = $1",
            )
            .bind(ticket_number.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(EventSequence::new(u64::try_from(max).unwrap_or(0) + 1))
        })
    }

    fn insert(&self, row: TicketEventRow) -> RepoResult<()> {
        self.block_on(async {
            let sequence = sequence_to_i64(row.event_sequence)?;
            let result = sqlx::query(
                "INSERT INTO ticket_events \
                 (ticket_number, event_sequence, event_id, event_type, occurred_at, ingested_at, payload) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(row.event.ticket_number.as_str())
            .bind(sequence)
            .bind(&row.event.event_id)
            .bind(row.event.event_type.as_str())
            .bind(row.event.occurred_at)
            .bind(row.ingested_at)
            .bind(Json(&row))
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(BackendError::InvariantViolation {
                    invariant: "dense_sequence",
                    detail: e.to_string(),
                }),
                Err(e) => Err(backend_err(e)),
            }
        })
    }

    fn get_by_ticket(&self, ticket_number: &TicketNumber) -> RepoResult<Vec<TicketEventRow>> {
        self.block_on(async {
            let rows = sqlx::query_as::<_, (Json<TicketEventRow>,)>(
                "SELECT payload FROM ticket_events WHERE ticket_number = $1 ORDER BY event_sequence ASC",
            )
            .bind(ticket_number.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(rows.into_iter().map(|(Json(r),)| r).collect())
        })
    }

    fn get_by_ticket_at(
        &self,
        ticket_number: &TicketNumber,
        as_of: DateTime<Utc>,
    ) -> RepoResult<Vec<TicketEventRow>> {
        self.block_on(async {
            let rows = sqlx::query_as::<_, (Json<TicketEventRow>,)>(
                "SELECT payload FROM ticket_events \
                 WHERE ticket_number = $1 AND occurred_at <= $2 \
                 ORDER BY event_sequence ASC",
            )
            .bind(ticket_number.as_str())
            .bind(as_of)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(rows.into_iter().map(|(Json(r),)| r).collect())
        })
    }

    fn get_by_event_types(&self, types: &[CanonicalEventType]) -> RepoResult<Vec<TicketEventRow>> {
        self.block_on(async {
            let tags: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
            let rows = sqlx::query_as::<_, (Json<TicketEventRow>,)>(
                "SELECT payload FROM ticket_events WHERE event_type = ANY($1)",
            )
            .bind(&tags)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(rows.into_iter().map(|(Json(r),)| r).collect())
        })
    }

    fn all_rows(&self) -> RepoResult<Vec<TicketEventRow>> {
        self.block_on(async {
            let rows = sqlx::query_as::<_, (Json<TicketEventRow>,)>("SELECT payload FROM ticket_events")
                .fetch_all(&self.pool)
                .await
                .map_err(backend_err)?;
            Ok(rows.into_iter().map(|(Json(r),)| r).collect())
        })
    }
}

impl TicketStateRepository for PostgresBackend {
    fn reset(&self) -> RepoResult<()> {
        self.block_on(async {
            sqlx::query("DELETE FROM ticket_state")
                .execute(&self.pool)
                .await
                .map_err(backend_err)?;
            Ok(())
        })
    }

    fn upsert(&self, state: TicketState) -> RepoResult<()> {
        self.block_on(async {
            sqlx::query(
                "INSERT INTO ticket_state (ticket_number, payload) VALUES ($1, $2) \
                 ON CONFLICT (ticket_number) DO UPDATE SET payload = EXCLUDED.payload",
            )
            .bind(state.ticket_number.as_str())
            .bind(Json(&state))
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(())
        })
    }

    fn get(&self, ticket_number: &TicketNumber) -> RepoResult<Option<TicketState>> {
        self.block_on(async {
            let row = sqlx::query_as::<_, (Json<TicketState>,)>(
                "SELECT payload FROM ticket_state WHERE ticket_number = $1",
            )
            .bind(ticket_number.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(row.map(|(Json(s),)| s))
        })
    }
}

impl AuditRepository for PostgresBackend {
    fn reset(&self) -> RepoResult<()> {
        self.block_on(async {
            sqlx::query("DELETE FROM audit_records")
                .execute(&self.pool)
                .await
                .map_err(backend_err)?;
            Ok(())
        })
    }

    fn insert(&self, record: AuditRecord) -> RepoResult<()> {
        self.block_on(async {
            sqlx::query(
                "INSERT INTO audit_records (id, timestamp, ticket_number, output_reference, payload) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(record.id)
            .bind(record.timestamp)
            .bind(record.ticket_number.as_ref().map(TicketNumber::as_str))
            .bind(record.output_reference.as_deref())
            .bind(Json(&record))
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(())
        })
    }

    fn get_by_ticket(&self, ticket_number: &TicketNumber) -> RepoResult<Vec<AuditRecord>> {
        self.block_on(async {
            let rows = sqlx::query_as::<_, (Json<AuditRecord>,)>(
                "SELECT payload FROM audit_records WHERE ticket_number = $1 ORDER BY timestamp ASC",
            )
            .bind(ticket_number.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(rows.into_iter().map(|(Json(r),)| r).collect())
        })
    }

    fn get_by_output_reference(&self, output_reference: &str) -> RepoResult<Vec<AuditRecord>> {
        self.block_on(async {
            let rows = sqlx::query_as::<_, (Json<AuditRecord>,)>(
                "SELECT payload FROM audit_records WHERE output_reference = $1 ORDER BY timestamp ASC",
            )
            .bind(output_reference)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(rows.into_iter().map(|(Json(r),)| r).collect())
        })
    }
}

impl CouponMatchRepository for PostgresBackend {
    fn reset(&self) -> RepoResult<()> {
        self.block_on(async {
            sqlx::query("DELETE FROM coupon_matches")
                .execute(&self.pool)
                .await
                .map_err(backend_err)?;
            Ok(())
        })
    }

    fn upsert(&self, row: CouponMatchRow) -> RepoResult<()> {
        self.block_on(async {
            let status = serde_json::to_value(row.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            let days = i32::try_from(row.days_in_suspense).unwrap_or(i32::MAX);
            sqlx::query(
                "INSERT INTO coupon_matches \
                 (ticket_number, coupon_number, status, days_in_suspense, payload) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (ticket_number, coupon_number) DO UPDATE SET \
                   status = EXCLUDED.status, \
                   days_in_suspense = EXCLUDED.days_in_suspense, \
                   payload = EXCLUDED.payload",
            )
            .bind(row.ticket_number.as_str())
            .bind(i32::try_from(row.coupon_number.value()).unwrap_or(i32::MAX))
            .bind(status)
            .bind(days)
            .bind(Json(&row))
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(())
        })
    }

    fn all_rows(&self) -> RepoResult<Vec<CouponMatchRow>> {
        self.block_on(async {
            let rows = sqlx::query_as::<_, (Json<CouponMatchRow>,)>("SELECT payload FROM coupon_matches")
                .fetch_all(&self.pool)
                .await
                .map_err(backend_err)?;
            Ok(rows.into_iter().map(|(Json(r),)| r).collect())
        })
    }

    fn get_suspense(&self, min_age_days: u32) -> RepoResult<Vec<CouponMatchRow>> {
        self.block_on(async {
            let min_age = i32::try_from(min_age_days).unwrap_or(i32::MAX);
            let rows = sqlx::query_as::<_, (Json<CouponMatchRow>,)>(
                "SELECT payload FROM coupon_matches \
                 WHERE days_in_suspense >= $1 \
                   AND status = ANY(ARRAY['unmatched_issued', 'unmatched_flown', 'suspense'])",
            )
            .bind(min_age)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(rows.into_iter().map(|(Json(r),)| r).collect())
        })
    }
}

impl ReconRepository for PostgresBackend {
    fn reset(&self) -> RepoResult<()> {
        self.block_on(async {
            sqlx::query("DELETE FROM recon_results")
                .execute(&self.pool)
                .await
                .map_err(backend_err)?;
            Ok(())
        })
    }

    fn insert(&self, row: ReconResultRow) -> RepoResult<()> {
        self.block_on(async {
            sqlx::query("INSERT INTO recon_results (id, payload) VALUES ($1, $2)")
                .bind(row.id)
                .bind(Json(&row))
                .execute(&self.pool)
                .await
                .map_err(backend_err)?;
            Ok(())
        })
    }

    fn all_rows(&self) -> RepoResult<Vec<ReconResultRow>> {
        self.block_on(async {
            let rows = sqlx::query_as::<_, (Json<ReconResultRow>,)>("SELECT payload FROM recon_results")
                .fetch_all(&self.pool)
                .await
                .map_err(backend_err)?;
            Ok(rows.into_iter().map(|(Json(r),)| r).collect())
        })
    }

    fn get_by_id(&self, id: Uuid) -> RepoResult<Option<ReconResultRow>> {
        self.block_on(async {
            let row = sqlx::query_as::<_, (Json<ReconResultRow>,)>(
                "SELECT payload FROM recon_results WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(row.map(|(Json(r),)| r))
        })
    }

    fn update(&self, row: ReconResultRow) -> RepoResult<()> {
        self.block_on(async {
            sqlx::query("UPDATE recon_results SET payload = $2 WHERE id = $1")
                .bind(row.id)
                .bind(Json(&row))
                .execute(&self.pool)
                .await
                .map_err(backend_err)?;
            Ok(())
        })
    }
}

impl SettlementRepository for PostgresBackend {
    fn reset(&self) -> RepoResult<()> {
        self.block_on(async {
            sqlx::query("DELETE FROM settlement_saga_steps")
                .execute(&self.pool)
                .await
                .map_err(backend_err)?;
            sqlx::query("DELETE FROM settlements")
                .execute(&self.pool)
                .await
                .map_err(backend_err)?;
            Ok(())
        })
    }

    fn insert(&self, settlement: Settlement) -> RepoResult<()> {
        self.block_on(async {
            sqlx::query(
                "INSERT INTO settlements (id, status, created_at, payload) VALUES ($1, $2, $3, $4)",
            )
            .bind(settlement.id)
            .bind(settlement.status.as_str())
            .bind(settlement.created_at)
            .bind(Json(&settlement))
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(())
        })
    }

    fn get(&self, id: Uuid) -> RepoResult<Option<Settlement>> {
        self.block_on(async {
            let row = sqlx::query_as::<_, (Json<Settlement>,)>(
                "SELECT payload FROM settlements WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(row.map(|(Json(s),)| s))
        })
    }

    fn update(&self, settlement: Settlement) -> RepoResult<()> {
        self.block_on(async {
            sqlx::query("UPDATE settlements SET status = $2, payload = $3 WHERE id = $1")
                .bind(settlement.id)
                .bind(settlement.status.as_str())
                .bind(Json(&settlement))
                .execute(&self.pool)
                .await
                .map_err(backend_err)?;
            Ok(())
        })
    }

    fn list_all(&self) -> RepoResult<Vec<Settlement>> {
        self.block_on(async {
            let rows = sqlx::query_as::<_, (Json<Settlement>,)>(
                "SELECT payload FROM settlements ORDER BY created_at DESC",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(rows.into_iter().map(|(Json(r),)| r).collect())
        })
    }

    fn insert_saga_step(&self, step: SettlementSagaStep) -> RepoResult<()> {
        self.block_on(async {
            sqlx::query(
                "INSERT INTO settlement_saga_steps (id, settlement_id, timestamp, payload) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(step.id)
            .bind(step.settlement_id)
            .bind(step.timestamp)
            .bind(Json(&step))
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(())
        })
    }

    fn get_saga(&self, settlement_id: Uuid) -> RepoResult<Vec<SettlementSagaStep>> {
        self.block_on(async {
            let rows = sqlx::query_as::<_, (Json<SettlementSagaStep>,)>(
                "SELECT payload FROM settlement_saga_steps \
                 WHERE settlement_id = $1 ORDER BY timestamp ASC",
            )
            .bind(settlement_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(rows.into_iter().map(|(Json(r),)| r).collect())
        })
    }
}

impl DagRunRepository for PostgresBackend {
    fn reset(&self) -> RepoResult<()> {
        self.block_on(async {
            sqlx::query("DELETE FROM dag_runs")
                .execute(&self.pool)
                .await
                .map_err(backend_err)?;
            Ok(())
        })
    }

    fn insert(&self, run: DagRunRow) -> RepoResult<()> {
        self.block_on(async {
            sqlx::query("INSERT INTO dag_runs (id, payload) VALUES ($1, $2)")
                .bind(run.id)
                .bind(Json(&run))
                .execute(&self.pool)
                .await
                .map_err(backend_err)?;
            Ok(())
        })
    }

    fn get(&self, id: Uuid) -> RepoResult<Option<DagRunRow>> {
        self.block_on(async {
            let row = sqlx::query_as::<_, (Json<DagRunRow>,)>(
                "SELECT payload FROM dag_runs WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(row.map(|(Json(r),)| r))
        })
    }

    fn update_status(
        &self,
        id: Uuid,
        status: DagRunStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> RepoResult<()> {
        self.block_on(async {
            let mut tx = self.pool.begin().await.map_err(backend_err)?;
            let (Json(mut run),): (Json<DagRunRow>,) = sqlx::query_as(
                "SELECT payload FROM dag_runs WHERE id = $1 FOR UPDATE",
            )
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(backend_err)?;

            run.status = status;
            run.completed_at = completed_at;

            sqlx::query("UPDATE dag_runs SET payload = $2 WHERE id = $1")
                .bind(id)
                .bind(Json(&run))
                .execute(&mut *tx)
                .await
                .map_err(backend_err)?;
            tx.commit().await.map_err(backend_err)?;
            Ok(())
        })
    }
}

impl TaskRunRepository for PostgresBackend {
    fn reset(&self) -> RepoResult<()> {
        self.block_on(async {
            sqlx::query("DELETE FROM task_runs")
                .execute(&self.pool)
                .await
                .map_err(backend_err)?;
            Ok(())
        })
    }

    fn insert(&self, row: TaskRunRow) -> RepoResult<()> {
        self.block_on(async {
            sqlx::query(
                "INSERT INTO task_runs (id, dag_run_id, task_name, payload) VALUES ($1, $2, $3, $4)",
            )
            .bind(row.id)
            .bind(row.dag_run_id)
            .bind(&row.task_name)
            .bind(Json(&row))
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(())
        })
    }

    fn get_by_run(&self, dag_run_id: Uuid) -> RepoResult<Vec<TaskRunRow>> {
        self.block_on(async {
            let rows = sqlx::query_as::<_, (Json<TaskRunRow>,)>(
                "SELECT payload FROM task_runs WHERE dag_run_id = $1 ORDER BY task_name ASC",
            )
            .bind(dag_run_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
            Ok(rows.into_iter().map(|(Json(r),)| r).collect())
        })
    }

    fn update(
        &self,
        id: Uuid,
        status: TaskStatus,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        error_message: Option<String>,
        result: Option<serde_json::Value>,
    ) -> RepoResult<()> {
        self.block_on(async {
            let mut tx = self.pool.begin().await.map_err(backend_err)?;
            let (Json(mut row),): (Json<TaskRunRow>,) = sqlx::query_as(
                "SELECT payload FROM task_runs WHERE id = $1 FOR UPDATE",
            )
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(backend_err)?;

            row.status = status;
            row.started_at = started_at;
            row.completed_at = completed_at;
            row.error_message = error_message;
            row.result = result;

            sqlx::query("UPDATE task_runs SET payload = $2 WHERE id = $1")
                .bind(id)
                .bind(Json(&row))
                .execute(&mut *tx)
                .await
                .map_err(backend_err)?;
            tx.commit().await.map_err(backend_err)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_detection_ignores_non_database_errors() {
        let protocol_err = sqlx::Error::Protocol("boom".to_string());
        assert!(!is_unique_violation(&protocol_err));
    }
}
