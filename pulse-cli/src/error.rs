//! Error types for the `pulsegen` binary and their exit codes.

use std::io;
use std::path::PathBuf;

use pulse_core::controller::{OutputConfigError, RunError};
use pulse_core::timing::{RequestError, SolveError, UnrepresentableTiming};

/// Exit status for a run stopped by the operator (128 + SIGINT).
pub const EXIT_INTERRUPTED: u8 = 130;

/// Device communication failures.
#[derive(Debug, thiserror::Error)]
pub enum CommError {
    #[error("cannot connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("device returned Modbus exception {code:#04x} for function {function:#04x}")]
    Exception { function: u8, code: u8 },

    #[error("malformed response: {0}")]
    Protocol(&'static str),

    #[error("simulated fault after {writes} writes")]
    InjectedFault { writes: usize },
}

/// Configuration loading and validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{name}={value:?} is not valid: {reason}")]
    Environment {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid output configuration: {0}")]
    Output(#[from] OutputConfigError),

    #[error("cannot open transcript {path}: {source}")]
    Transcript {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid device address {0:?} (expected host[:port])")]
    DeviceAddress(String),

    #[error("cannot render configuration: {0}")]
    Render(#[source] serde_yaml::Error),
}

/// Top-level failure of a `pulsegen` invocation.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid request: {0}")]
    InvalidRequest(RequestError),

    #[error("unrepresentable timing: {0}")]
    Unrepresentable(UnrepresentableTiming),

    #[error("communication failed: {0}")]
    Comm(#[from] CommError),

    #[error("{0}")]
    Run(RunError<CommError>),
}

impl From<RunError<CommError>> for CliError {
    fn from(error: RunError<CommError>) -> Self {
        match error {
            RunError::InvalidRequest(cause) => CliError::InvalidRequest(cause),
            RunError::UnrepresentableTiming(detail) => CliError::Unrepresentable(detail),
            other => CliError::Run(other),
        }
    }
}

impl From<SolveError> for CliError {
    fn from(error: SolveError) -> Self {
        match error {
            SolveError::InvalidRequest(cause) => CliError::InvalidRequest(cause),
            SolveError::Unrepresentable(detail) => CliError::Unrepresentable(detail),
        }
    }
}

impl CliError {
    /// Process exit status for this failure.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Usage(_)
            | CliError::Config(_)
            | CliError::InvalidRequest(_)
            | CliError::Run(RunError::InvalidRequest(_)) => 2,
            CliError::Unrepresentable(_) | CliError::Run(RunError::UnrepresentableTiming(_)) => 3,
            CliError::Comm(_) | CliError::Run(RunError::Comm { .. }) => 4,
            CliError::Run(RunError::Teardown(_) | RunError::Interrupted { teardown: Some(_) }) => 5,
            CliError::Run(RunError::Interrupted { teardown: None }) => EXIT_INTERRUPTED,
        }
    }
}
