//! Custom error types for the dispatcher.
//!
//! `DispatcherError` is the single error type of the crate. Only construction
//! paths return it to callers: loading and validating the configuration, and
//! building a [`DaqController`](crate::controller::DaqController). Once the
//! engine is running, collaborator failures are logged or reported as
//! anomalies and never escape a reconciliation cycle.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, i.e. TOML parsing or type
//!   mismatches between the file/environment and the configuration structs.
//! - **`Configuration`**: Semantic errors that pass parsing but are logically
//!   wrong (duplicate detector names, a goal naming an unknown mode, ...).
//! - **`Io`**: Wraps `std::io::Error`.
//! - **`Json`**: A goal document that is not valid JSON for a goal snapshot.
//! - **`Store`**: A failure reported by the command-transport/persistence
//!   collaborator.
//! - **`RunNotFound`**: A run bookkeeping lookup that found nothing.
//! - **`UnknownMode`** / **`UnknownDetector`**: Node resolution asked about a
//!   name the store has no entry for.

use thiserror::Error;

/// Convenience alias for results using the dispatcher error type.
pub type AppResult<T> = std::result::Result<T, DispatcherError>;

/// Every failure the crate reports to its callers.
#[derive(Error, Debug)]
pub enum DispatcherError {
    /// Configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but is inconsistent.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Goal document is not a valid goal snapshot.
    #[error("Goal document error: {0}")]
    Json(#[from] serde_json::Error),

    /// Control store failure.
    #[error("Control store error: {0}")]
    Store(String),

    /// No run with this number.
    #[error("Run {0} not found")]
    RunNotFound(u64),

    /// No node table for this mode.
    #[error("Unknown run mode '{0}'")]
    UnknownMode(String),

    /// No node table for this detector.
    #[error("Unknown detector '{0}'")]
    UnknownDetector(String),
}
