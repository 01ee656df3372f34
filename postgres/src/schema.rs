//! DDL for the remote table store. Run once at startup; every statement
//! is `IF NOT EXISTS` so repeated calls (e.g. in tests) are harmless.

use sqlx::PgPool;

const MIGRATIONS: &str = r"
CREATE TABLE IF NOT EXISTS ticket_events (
    ticket_number  TEXT NOT NULL,
    event_sequence BIGINT NOT NULL,
    event_id       TEXT NOT NULL UNIQUE,
    event_type     TEXT NOT NULL,
    occurred_at    TIMESTAMPTZ NOT NULL,
    ingested_at    TIMESTAMPTZ NOT NULL,
    payload        JSONB NOT NULL,
    PRIMARY KEY (ticket_number, event_sequence)
);
CREATE INDEX IF NOT EXISTS ticket_events_event_type_idx ON ticket_events (event_type);

CREATE TABLE IF NOT EXISTS ticket_state (
    ticket_number TEXT PRIMARY KEY,
    payload       JSONB NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_records (
    id                UUID PRIMARY KEY,
    timestamp         TIMESTAMPTZ NOT NULL,
    ticket_number     TEXT,
    output_reference  TEXT,
    payload           JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS audit_records_ticket_idx ON audit_records (ticket_number);
CREATE INDEX IF NOT EXISTS audit_records_output_ref_idx ON audit_records (output_reference);

CREATE TABLE IF NOT EXISTS coupon_matches (
    ticket_number    TEXT NOT NULL,
    coupon_number    INTEGER NOT NULL,
    status           TEXT NOT NULL,
    days_in_suspense INTEGER NOT NULL,
    payload          JSONB NOT NULL,
    PRIMARY KEY (ticket_number, coupon_number)
);

CREATE TABLE IF NOT EXISTS recon_results (
    id      UUID PRIMARY KEY,
    payload JSONB NOT NULL
);

CREATE TABLE IF NOT EXISTS settlements (
    id         UUID PRIMARY KEY,
    status     TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    payload    JSONB NOT NULL
);

CREATE TABLE IF NOT EXISTS settlement_saga_steps (
    id             UUID PRIMARY KEY,
    settlement_id  UUID NOT NULL,
    timestamp      TIMESTAMPTZ NOT NULL,
    payload        JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS settlement_saga_steps_settlement_idx ON settlement_saga_steps (settlement_id, timestamp);

CREATE TABLE IF NOT EXISTS dag_runs (
    id      UUID PRIMARY KEY,
    payload JSONB NOT NULL
);

CREATE TABLE IF NOT EXISTS task_runs (
    id          UUID PRIMARY KEY,
    dag_run_id  UUID NOT NULL,
    task_name   TEXT NOT NULL,
    payload     JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS task_runs_dag_run_idx ON task_runs (dag_run_id, task_name);
";

/// Applies every `CREATE TABLE IF NOT EXISTS` statement the backend
/// needs. Safe to call repeatedly (e.g. once per test process).
///
/// # Errors
/// Returns the underlying `sqlx::Error` if any statement fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(MIGRATIONS).execute(pool).await?;
    Ok(())
}
