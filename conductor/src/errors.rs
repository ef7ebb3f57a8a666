//! Error types for the conductor engine.
//!
//! Only configuration errors propagate to callers; stage failures travel
//! inside [`crate::report::ExecutionResult`] and infrastructure failures
//! (checkpoint I/O, notifier dispatch) are logged and absorbed at the point
//! of occurrence.

use thiserror::Error;

/// The main error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An unknown strategy name was requested from the registry.
    #[error("Unknown strategy '{name}'. Valid strategies: {}", valid.join(", "))]
    UnknownStrategy {
        /// The requested name.
        name: String,
        /// The names the registry knows about.
        valid: Vec<String>,
    },

    /// A strategy name was registered twice.
    #[error("Strategy '{0}' is already registered")]
    DuplicateStrategy(String),

    /// The configured skip list is malformed.
    #[error("Invalid skip list: {0}")]
    InvalidSkipList(String),

    /// A checkpoint could not be read or written.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Returns true if the error is a caller-input configuration error.
    ///
    /// Configuration errors fail loudly; everything else is infrastructure
    /// and gets absorbed by the component that hit it.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownStrategy { .. } | Self::DuplicateStrategy(_) | Self::InvalidSkipList(_)
        )
    }
}
