//! Stage result types with a required success discriminator.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Tokens that the lenient parser accepts as a success indicator.
const SUCCESS_TOKENS: &[&str] = &["success", "ok", "completed", "complete", "done", "passed"];

/// The outcome discriminator of a stage execution.
///
/// A result lacking an explicit success indicator is failure: the lenient
/// [`StageStatus::from_token`] parser maps unknown tokens to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage completed successfully.
    Success,
    /// Stage failed.
    Failed,
}

impl Default for StageStatus {
    fn default() -> Self {
        Self::Failed
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StageStatus {
    /// Parses a status token leniently.
    ///
    /// Any of `success`, `ok`, `completed`, `complete`, `done`, `passed`
    /// (case-insensitive) counts as success; everything else is failure.
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        let normalized = token.trim().to_ascii_lowercase();
        if SUCCESS_TOKENS.contains(&normalized.as_str()) {
            Self::Success
        } else {
            Self::Failed
        }
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// The result produced by one stage execution.
///
/// Carries a required status discriminator, an optional error description
/// and an open-ended map of named outputs that later stages can read from
/// the shared execution context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// The status of the stage execution.
    pub status: StageStatus,

    /// Error message (for failed executions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Named outputs produced by the stage.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub outputs: HashMap<String, serde_json::Value>,
}

impl Default for StageResult {
    fn default() -> Self {
        Self::fail("no result produced")
    }
}

impl StageResult {
    /// Creates a successful result with outputs.
    #[must_use]
    pub fn ok(outputs: HashMap<String, serde_json::Value>) -> Self {
        Self {
            status: StageStatus::Success,
            error: None,
            outputs,
        }
    }

    /// Creates a successful result with no outputs.
    #[must_use]
    pub fn ok_empty() -> Self {
        Self::ok(HashMap::new())
    }

    /// Creates a successful result with a single output value.
    #[must_use]
    pub fn ok_value(key: impl Into<String>, value: serde_json::Value) -> Self {
        let mut outputs = HashMap::new();
        outputs.insert(key.into(), value);
        Self::ok(outputs)
    }

    /// Creates a failure result with an error message.
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Failed,
            error: Some(error.into()),
            outputs: HashMap::new(),
        }
    }

    /// Adds a single output entry.
    #[must_use]
    pub fn with_output(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.outputs.insert(key.into(), value);
        self
    }

    /// Merges additional outputs into the result.
    #[must_use]
    pub fn with_outputs(mut self, outputs: HashMap<String, serde_json::Value>) -> Self {
        self.outputs.extend(outputs);
        self
    }

    /// Returns true if the result indicates success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if the result indicates failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        self.status.is_failure()
    }

    /// Gets a single output value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.outputs.get(key)
    }
}
