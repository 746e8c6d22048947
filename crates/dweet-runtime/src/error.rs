//! Runtime error type.

use smol_str::SmolStr;
use thiserror::Error;

/// Errors surfaced to callers of the data plane.
///
/// Per-message and per-row faults never reach this type; they are logged and
/// dropped where they occur.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// `runtime.toml` or the channel catalog is malformed.
    #[error("invalid config: {0}")]
    InvalidConfig(SmolStr),
    /// A settings commit was rejected.
    #[error("validation failed: {0}")]
    Validation(SmolStr),
    /// The replay file is missing or could not be parsed.
    #[error("replay file: {0}")]
    ReplayFile(SmolStr),
    /// Broker client failure (connect, publish, subscribe).
    #[error("broker: {0}")]
    Broker(SmolStr),
    /// The catalog could not be written back to disk.
    #[error("persist failed: {0}")]
    Persist(SmolStr),
}

impl RuntimeError {
    #[must_use]
    pub fn validation(message: impl Into<SmolStr>) -> Self {
        Self::Validation(message.into())
    }
}
