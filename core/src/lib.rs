//! # FlightLedger Core
//!
//! The canonical event model, repository traits and shared error kinds
//! for every FlightLedger stage.
//!
//! This crate has no business logic beyond types and traits — it defines
//! *what* a `CanonicalEvent`, a `TicketState`, a `Settlement` look like,
//! and *how* a stage talks to its storage, never *when* those types
//! change. The algorithms that drive those changes (coupon matching,
//! reconciliation, the settlement saga, the DAG runner) live in
//! `flightledger-engine`, which depends on this crate.
//!
//! ## Module map
//!
//! - [`ids`] — validated newtype identifiers (`TicketNumber`, `CouponNumber`, `EventSequence`)
//! - [`event`] — the canonical event model
//! - [`ticket`] — per-ticket history rows and the `TicketState` projection
//! - [`matcher`] — coupon match rows
//! - [`recon`] — reconciliation rows and break classification
//! - [`settlement`] — settlement rows and saga steps
//! - [`dag`] — DAG task graph and the pure topological-sort algorithm
//! - [`audit`] — the append-only audit record
//! - [`bus`] — topic routing and the `Bus` trait
//! - [`repository`] — one trait per persisted entity
//! - [`error`] / [`config`] — shared error kinds

pub mod audit;
pub mod bus;
pub mod clock;
pub mod config;
pub mod dag;
pub mod error;
pub mod event;
pub mod ids;
pub mod matcher;
pub mod recon;
pub mod repository;
pub mod settlement;
pub mod ticket;

pub use event::{CanonicalEvent, CanonicalEventType, Metadata, SourceSystem};
pub use ids::{CouponNumber, EventSequence, TicketNumber};
