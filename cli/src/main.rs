//! FlightLedger binary entry point: loads configuration from the
//! environment, installs a `tracing` subscriber, wires one of each
//! stage over the selected repository/bus backend, and runs a demo
//! month-end close cycle over a small embedded sample of all five
//! counterparty feeds — the raw sample payloads and any HTTP façade
//! exposing this as a service are external collaborators (spec §1)
//! this binary does not attempt to be.

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use config::{BusBackendConfig, Config, StorageBackendConfig};
use flightledger_adapters::dcs::DcsJsonAdapter;
use flightledger_adapters::gds::GdsXmlAdapter;
use flightledger_adapters::interline::InterlineJsonAdapter;
use flightledger_adapters::ota::OtaJsonAdapter;
use flightledger_adapters::pss::PssCsvAdapter;
use flightledger_adapters::Adapter;
use flightledger_core::clock::{Clock, SystemClock};
use flightledger_core::event::CanonicalEvent;
use flightledger_core::ids::TicketNumber;
use flightledger_engine::{FlightLedgerEngine, RepositoryBundle};
use flightledger_memory::{InMemoryBus, MemoryBackend};
use rust_decimal_macros::dec;
use tracing::{error, info, warn};

fn install_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

fn main() -> ExitCode {
    install_tracing();

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration, aborting startup");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "close cycle run failed");
            ExitCode::FAILURE
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error("ingest failed: {0}")]
    Ingest(#[from] flightledger_engine::IngestError),
    #[error("backend error: {0}")]
    Backend(#[from] flightledger_core::error::BackendError),
    #[error("dag error: {0}")]
    Dag(#[from] flightledger_engine::DagError),
    #[error("settlement error: {0}")]
    Settlement(#[from] flightledger_engine::settlement::SettlementError),
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),
}

async fn run(config: Config) -> Result<(), RunError> {
    if matches!(config.bus_backend, BusBackendConfig::Remote { .. }) {
        warn!(
            "FLIGHTLEDGER_BUS_BACKEND=remote validated, but the remote message-bus \
             publisher is an external collaborator not shipped by this crate (spec §1); \
             falling back to the in-memory bus for this run"
        );
    }
    let bus = Arc::new(InMemoryBus::new());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let engine = match config.storage_backend {
        StorageBackendConfig::Memory => {
            info!("using in-memory repository backend");
            let backend = Arc::new(MemoryBackend::new());
            build_engine(memory_bundle(&backend), bus, clock)
        }
        StorageBackendConfig::Remote { database_url } => {
            info!("connecting to remote Postgres repository backend");
            let backend = Arc::new(flightledger_postgres::PostgresBackend::connect(&database_url).await?);
            backend.run_migrations().await?;
            build_engine(postgres_bundle(&backend), bus, clock)
        }
    };

    engine.reset()?;
    ingest_demo_events(&engine)?;

    let dag = engine.build_close_cycle_dag()?;
    let status = dag.run()?;
    info!(?status, "month-end close cycle finished");

    run_demo_settlement(&engine)?;
    print_dashboard(&engine)?;

    Ok(())
}

fn build_engine(
    repositories: RepositoryBundle,
    bus: Arc<InMemoryBus>,
    clock: Arc<dyn Clock>,
) -> FlightLedgerEngine {
    FlightLedgerEngine::new(repositories, bus, clock)
}

fn memory_bundle(backend: &Arc<MemoryBackend>) -> RepositoryBundle {
    RepositoryBundle {
        ticket_events: backend.clone(),
        ticket_state: backend.clone(),
        audit: backend.clone(),
        coupon_matches: backend.clone(),
        recon: backend.clone(),
        settlements: backend.clone(),
        dag_runs: backend.clone(),
        task_runs: backend.clone(),
    }
}

fn postgres_bundle(backend: &Arc<flightledger_postgres::PostgresBackend>) -> RepositoryBundle {
    RepositoryBundle {
        ticket_events: backend.clone(),
        ticket_state: backend.clone(),
        audit: backend.clone(),
        coupon_matches: backend.clone(),
        recon: backend.clone(),
        settlements: backend.clone(),
        dag_runs: backend.clone(),
        task_runs: backend.clone(),
    }
}

/// Parses one small embedded sample payload per counterparty feed (the
/// five adapters of spec §4.1) and ingests the resulting canonical
/// events. Per-payload parse failures are logged and skip only that
/// payload, never the rest of the batch (spec §7's propagation policy).
fn ingest_demo_events(engine: &FlightLedgerEngine) -> Result<(), RunError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let parsed: Vec<(&str, Result<Vec<CanonicalEvent>, flightledger_adapters::ParseError>)> = vec![
        ("pss", PssCsvAdapter::new(clock.clone()).parse(DEMO_PSS_CSV.as_bytes())),
        ("dcs", DcsJsonAdapter::new(clock.clone()).parse(DEMO_DCS_JSON.as_bytes())),
        ("gds", GdsXmlAdapter::new(clock.clone()).parse(DEMO_GDS_XML.as_bytes())),
        ("ota", OtaJsonAdapter::new(clock.clone()).parse(DEMO_OTA_JSON.as_bytes())),
        (
            "interline",
            InterlineJsonAdapter::new(clock).parse(DEMO_INTERLINE_JSON.as_bytes()),
        ),
    ];

    let mut events: Vec<CanonicalEvent> = Vec::new();
    for (adapter, result) in parsed {
        match result {
            Ok(mut parsed_events) => events.append(&mut parsed_events),
            Err(err) => warn!(adapter, error = %err, "dropping unparseable demo payload"),
        }
    }

    info!(count = events.len(), "ingesting demo events");
    engine.ingest_batch(events)?;
    Ok(())
}

/// Walks one settlement through calculate → validate → submit →
/// confirm, demonstrating the saga engine end to end on the demo
/// ticket (spec §4.7, end-to-end scenario 6).
fn run_demo_settlement(engine: &FlightLedgerEngine) -> Result<(), RunError> {
    let ticket = TicketNumber::new("TDEMO001").map_err(|e| {
        flightledger_core::error::BackendError::Backend(e.to_string())
    })?;
    let settlement = engine
        .settlement()
        .calculate(ticket, "interline-partner-ba".to_string(), dec!(450.00))?;
    let settlement = engine.settlement().validate(settlement.id)?;
    let settlement = engine.settlement().submit(settlement.id)?;
    let settlement = engine.settlement().confirm(settlement.id, dec!(450.00))?;
    info!(settlement_id = %settlement.id, status = ?settlement.status, "demo settlement confirmed");
    Ok(())
}

/// Prints a plain-text summary of the close cycle's outputs, standing
/// in for the dashboard endpoint the out-of-scope HTTP façade would
/// otherwise expose.
fn print_dashboard(engine: &FlightLedgerEngine) -> Result<(), RunError> {
    let recon_summary = engine.recon().run_full_recon()?;
    println!("=== FlightLedger close-cycle summary ===");
    println!(
        "recon: {} matched, {} breaks",
        recon_summary.total_matched, recon_summary.total_breaks
    );
    for (break_type, count) in &recon_summary.breaks_by_type {
        println!("  break type {break_type}: {count}");
    }
    let settlements = engine.settlement().list_settlements(None)?;
    println!("settlements: {}", settlements.len());
    Ok(())
}

const DEMO_PSS_CSV: &str = "event_type,ticket_number,coupon_number,pnr,passenger_name,marketing_carrier,\
operating_carrier,flight_number,flight_date,origin,destination,currency,gross_amount,\
net_amount,sales_channel\n\
ticket_issued,TDEMO001,1,ABCDEF,JANE DOE,AA,AA,100,2026-01-15,JFK,LAX,USD,450.00,410.00,direct\n";

const DEMO_DCS_JSON: &str =
    r#"{"ticket_number": "TDEMO001", "coupon_number": 1, "gate": "A1", "boarded_at": "2026-01-15T10:00:00Z"}"#;

const DEMO_GDS_XML: &str = r"<settlement><week><record>
    <ticket_number>TDEMO001</ticket_number>
    <coupon_number>1</coupon_number>
    <currency>USD</currency>
    <gross_amount>450.00</gross_amount>
    <net_amount>410.00</net_amount>
    <gds>SABRE</gds>
    <settlement_week>2026-W03</settlement_week>
</record></week></settlement>";

const DEMO_OTA_JSON: &str =
    r#"{"ticket_number": "TDEMO002", "ota": "expedia", "status": "confirmed", "pnr": "GHIJKL"}"#;

const DEMO_INTERLINE_JSON: &str = r#"{"claims": [{"ticket_number": "TDEMO003", "coupon_number": 1, "claim_amount": "300.00", "currency": "USD", "partner_carrier": "BA", "claim_id": "CLM-001"}]}"#;
