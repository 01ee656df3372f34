//! Configuration error kinds. `flightledger-cli::config` is
//! where these are actually parsed from environment variables; this
//! module only owns the error type so that `flightledger-core`'s backend
//! enums can validate their own wire values without depending on `clap`.

use thiserror::Error;

/// A fatal startup configuration error. Never recovered from;
/// `flightledger-cli::main` converts this into a non-zero exit after
/// logging it.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value outside its enumerated set.
    #[error("{variable} must be one of memory|remote, got '{value}'")]
    InvalidBackendValue {
        variable: &'static str,
        value: String,
    },

    /// A backend was selected as `remote` but a variable it requires was
    /// not set.
    #[error("{variable} is required when {backend_variable} is 'remote'")]
    MissingRequiredVariable {
        variable: &'static str,
        backend_variable: &'static str,
    },
}
