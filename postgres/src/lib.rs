//! Remote table-store backend for FlightLedger.
//!
//! Every table mirrors one `flightledger-core::repository` trait and
//! stores its row as a `JSONB` payload alongside a handful of native
//! columns used for querying and ordering — the same shape-preserving
//! approach the in-memory backend uses, just durable. `sqlx`'s async
//! `PgPool` calls are bridged into the workspace's synchronous
//! repository trait surface via `tokio::task::block_in_place` +
//! `Handle::block_on`, so `flightledger-engine` never needs to know
//! whether it's talking to memory or Postgres.
//!
//! # Example
//!
//! ```ignore
//! use flightledger_postgres::PostgresBackend;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = PostgresBackend::connect("postgres://localhost/flightledger").await?;
//!     backend.run_migrations().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod schema;

pub use backend::PostgresBackend;
pub use schema::run_migrations;
