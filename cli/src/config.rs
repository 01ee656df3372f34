//! Startup configuration, parsed from environment variables via
//! `clap`'s `env` feature per spec §6. Every invalid combination is
//! rejected here, before any repository or bus is constructed — never a
//! panic, always a [`flightledger_core::config::ConfigError`].

use clap::Parser;
use flightledger_core::config::ConfigError;

fn parse_backend_value(variable: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw {
        "memory" => Ok(false),
        "remote" => Ok(true),
        other => Err(ConfigError::InvalidBackendValue {
            variable,
            value: other.to_string(),
        }),
    }
}

/// Raw `clap` argument surface: every field doubles as an environment
/// variable via `#[arg(env = "...")]`, per spec §6's configuration
/// table. Values are validated (not just parsed) in [`Config::load`].
#[derive(Debug, Parser)]
#[command(name = "flightledger", about = "FlightLedger revenue-accounting back office")]
struct Cli {
    #[arg(long, env = "FLIGHTLEDGER_BUS_BACKEND", default_value = "memory")]
    bus_backend: String,

    #[arg(long, env = "FLIGHTLEDGER_BUS_BOOTSTRAP")]
    bus_bootstrap: Option<String>,

    #[arg(long, env = "FLIGHTLEDGER_BUS_CLIENT_ID")]
    bus_client_id: Option<String>,

    #[arg(long, env = "FLIGHTLEDGER_STORAGE_BACKEND", default_value = "memory")]
    storage_backend: String,

    #[arg(long, env = "FLIGHTLEDGER_DATABASE_URL")]
    database_url: Option<String>,
}

/// Validated startup configuration. Constructed only by [`Config::load`],
/// which is the single point every invalid environment is rejected at.
#[derive(Debug, Clone)]
pub struct Config {
    pub bus_backend: BusBackendConfig,
    pub storage_backend: StorageBackendConfig,
}

#[derive(Debug, Clone)]
pub enum BusBackendConfig {
    Memory,
    Remote { bootstrap: String, client_id: String },
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    Memory,
    Remote { database_url: String },
}

impl Config {
    /// Parses `clap`-bound environment variables and validates every
    /// combination spec §6 requires: an unrecognized backend value is
    /// fatal, and a `remote` backend selected without its required
    /// companion variable(s) is fatal.
    ///
    /// # Errors
    /// Returns [`ConfigError`] for any invalid value or missing
    /// companion variable. Never panics.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(Cli::parse())
    }

    fn from_args(cli: Cli) -> Result<Self, ConfigError> {
        let bus_remote = parse_backend_value("FLIGHTLEDGER_BUS_BACKEND", &cli.bus_backend)?;
        let bus_backend = if bus_remote {
            let bootstrap = cli.bus_bootstrap.ok_or(ConfigError::MissingRequiredVariable {
                variable: "FLIGHTLEDGER_BUS_BOOTSTRAP",
                backend_variable: "FLIGHTLEDGER_BUS_BACKEND",
            })?;
            let client_id = cli.bus_client_id.ok_or(ConfigError::MissingRequiredVariable {
                variable: "FLIGHTLEDGER_BUS_CLIENT_ID",
                backend_variable: "FLIGHTLEDGER_BUS_BACKEND",
            })?;
            BusBackendConfig::Remote { bootstrap, client_id }
        } else {
            BusBackendConfig::Memory
        };

        let storage_remote = parse_backend_value("FLIGHTLEDGER_STORAGE_BACKEND", &cli.storage_backend)?;
        let storage_backend = if storage_remote {
            let database_url = cli.database_url.ok_or(ConfigError::MissingRequiredVariable {
                variable: "FLIGHTLEDGER_DATABASE_URL",
                backend_variable: "FLIGHTLEDGER_STORAGE_BACKEND",
            })?;
            StorageBackendConfig::Remote { database_url }
        } else {
            StorageBackendConfig::Memory
        };

        Ok(Self {
            bus_backend,
            storage_backend,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(bus: &str, storage: &str) -> Cli {
        Cli {
            bus_backend: bus.to_string(),
            bus_bootstrap: None,
            bus_client_id: None,
            storage_backend: storage.to_string(),
            database_url: None,
        }
    }

    #[test]
    fn defaults_to_memory_backends() {
        let config = Config::from_args(cli("memory", "memory")).unwrap();
        assert!(matches!(config.bus_backend, BusBackendConfig::Memory));
        assert!(matches!(config.storage_backend, StorageBackendConfig::Memory));
    }

    #[test]
    fn unknown_bus_backend_value_is_fatal() {
        let err = Config::from_args(cli("kafka", "memory")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBackendValue { .. }));
    }

    #[test]
    fn unknown_storage_backend_value_is_fatal_not_silently_defaulted() {
        // Spec §6 / SPEC_FULL.md §6: unlike the original Python
        // implementation's silent fallback, any value outside
        // {memory, remote} is a fatal startup error here.
        let err = Config::from_args(cli("memory", "sqlite")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBackendValue { .. }));
    }

    #[test]
    fn remote_bus_without_bootstrap_is_fatal() {
        let mut c = cli("remote", "memory");
        c.bus_client_id = Some("client-1".to_string());
        let err = Config::from_args(c).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequiredVariable { .. }));
    }

    #[test]
    fn remote_storage_without_database_url_is_fatal() {
        let err = Config::from_args(cli("memory", "remote")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequiredVariable { .. }));
    }

    #[test]
    fn remote_backends_with_required_variables_load() {
        let mut c = cli("remote", "remote");
        c.bus_bootstrap = Some("broker:9092".to_string());
        c.bus_client_id = Some("client-1".to_string());
        c.database_url = Some("postgres://localhost/flightledger".to_string());
        let config = Config::from_args(c).unwrap();
        assert!(matches!(
            config.bus_backend,
            BusBackendConfig::Remote { .. }
        ));
        assert!(matches!(
            config.storage_backend,
            StorageBackendConfig::Remote { .. }
        ));
    }
}
