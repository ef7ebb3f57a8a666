//! Execution result envelope returned by every strategy.

use crate::result::StageResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The overall outcome of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Every attempted stage succeeded.
    Success,
    /// Some stage failed or errored.
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The envelope a strategy returns from `execute`.
///
/// Invariants: `status == Success` iff every attempted stage returned
/// success, and `stages_completed` always equals the number of entries in
/// `results` (only individually-successful stages enter the map).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Overall run status.
    pub status: ExecutionStatus,

    /// Number of stages that individually succeeded.
    pub stages_completed: usize,

    /// Name of the failed stage, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,

    /// Error text from the failed stage, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Per-stage results, keyed by stage name.
    pub results: HashMap<String, StageResult>,

    /// Wall-clock duration of the run.
    pub duration_seconds: f64,

    /// Name of the strategy that produced this envelope.
    pub strategy: String,

    /// Strategy-specific extra fields (`stages_skipped`, `resumed`,
    /// `execution_groups`, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ExecutionResult {
    /// Creates a success envelope.
    #[must_use]
    pub fn success(
        strategy: impl Into<String>,
        results: HashMap<String, StageResult>,
        duration_seconds: f64,
    ) -> Self {
        Self {
            status: ExecutionStatus::Success,
            stages_completed: results.len(),
            failed_stage: None,
            error: None,
            results,
            duration_seconds,
            strategy: strategy.into(),
            metadata: HashMap::new(),
        }
    }

    /// Creates a failure envelope naming the failed stage.
    #[must_use]
    pub fn failure(
        strategy: impl Into<String>,
        failed_stage: impl Into<String>,
        error: impl Into<String>,
        results: HashMap<String, StageResult>,
        duration_seconds: f64,
    ) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            stages_completed: results.len(),
            failed_stage: Some(failed_stage.into()),
            error: Some(error.into()),
            results,
            duration_seconds,
            strategy: strategy.into(),
            metadata: HashMap::new(),
        }
    }

    /// Adds a single metadata entry.
    #[must_use]
    pub fn add_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns true if the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_success_envelope() {
        let mut results = HashMap::new();
        results.insert("analyze".to_string(), StageResult::ok_empty());
        results.insert("build".to_string(), StageResult::ok_empty());

        let result = ExecutionResult::success("standard", results, 1.5);

        assert!(result.is_success());
        assert_eq!(result.stages_completed, 2);
        assert!(result.failed_stage.is_none());
        assert_eq!(result.strategy, "standard");
    }

    #[test]
    fn test_failure_envelope() {
        let mut results = HashMap::new();
        results.insert("analyze".to_string(), StageResult::ok_empty());

        let result =
            ExecutionResult::failure("standard", "build", "compiler exploded", results, 0.2);

        assert!(!result.is_success());
        assert_eq!(result.stages_completed, 1);
        assert_eq!(result.failed_stage.as_deref(), Some("build"));
        assert_eq!(result.error.as_deref(), Some("compiler exploded"));
    }

    #[test]
    fn test_completed_matches_results_len() {
        let result = ExecutionResult::success("fast", HashMap::new(), 0.0);
        assert_eq!(result.stages_completed, result.results.len());
    }

    #[test]
    fn test_metadata() {
        let result = ExecutionResult::success("parallel", HashMap::new(), 0.0)
            .add_metadata("execution_groups", serde_json::json!(3));

        assert_eq!(
            result.metadata.get("execution_groups"),
            Some(&serde_json::json!(3))
        );
    }

    #[test]
    fn test_serialization() {
        let result = ExecutionResult::failure("checkpoint", "verify", "boom", HashMap::new(), 0.1)
            .add_metadata("resumed", serde_json::json!(true));

        let json = serde_json::to_string(&result).unwrap();
        let deserialized: ExecutionResult = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.status, ExecutionStatus::Failed);
        assert_eq!(deserialized.metadata.get("resumed"), Some(&serde_json::json!(true)));
    }
}
