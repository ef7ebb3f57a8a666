//! Shared execution context and the helpers every strategy consumes.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::report::ExecutionResult;
use crate::result::StageResult;
use crate::utils::{generate_run_id, iso_timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;
use uuid::Uuid;

/// The job descriptor handed to every stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCard {
    /// Job/card identifier, used for checkpoint keying.
    pub id: String,
    /// Arbitrary job fields (title, requirements, priority, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, serde_json::Value>,
}

impl JobCard {
    /// Creates a new job card.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: HashMap::new(),
        }
    }

    /// Adds a single field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Gets a field value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }
}

/// The single mutable mapping shared by all stages within one run.
///
/// Exclusively owned (`&mut`) by the invoking strategy for the duration of
/// one `execute` call. Stages receive it read-only and extend it only
/// through their returned outputs, which the strategy merges back in.
/// Clone-able so the parallel strategy can hand snapshots to concurrent
/// stages.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    run_id: Uuid,
    job: JobCard,
    /// Accumulated outputs of every completed stage, by output key.
    pub data: HashMap<String, serde_json::Value>,
    completed_stages: Vec<String>,
}

impl ExecutionContext {
    /// Creates a fresh context for a job.
    #[must_use]
    pub fn new(job: JobCard) -> Self {
        Self {
            run_id: generate_run_id(),
            job,
            data: HashMap::new(),
            completed_stages: Vec::new(),
        }
    }

    /// Returns the run identifier.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the job descriptor.
    #[must_use]
    pub const fn job(&self) -> &JobCard {
        &self.job
    }

    /// Returns the job/card identifier.
    #[must_use]
    pub fn card_id(&self) -> &str {
        &self.job.id
    }

    /// Gets an accumulated value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Returns the names of stages whose results were merged so far.
    #[must_use]
    pub fn completed_stages(&self) -> &[String] {
        &self.completed_stages
    }
}

/// Shared helpers consumed by all execution strategies.
///
/// The manager owns the "is this success?" predicate, the merge step that
/// makes earlier outputs visible to later stages, and the standardized
/// envelope builders. It optionally carries a checkpoint store for the
/// best-effort progress hook used by the standard strategy.
#[derive(Clone, Default)]
pub struct ContextManager {
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("has_checkpoint_store", &self.checkpoint_store.is_some())
            .finish()
    }
}

impl ContextManager {
    /// Creates a manager with no checkpoint store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a checkpoint store for the progress hook.
    #[must_use]
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    /// Determines stage success from a result.
    #[must_use]
    pub fn is_successful(&self, result: &StageResult) -> bool {
        result.status.is_success()
    }

    /// Merges a stage's outputs into the shared context.
    ///
    /// Called for every attempted stage, so later stages observe earlier
    /// outputs even when the run is about to stop on a failure.
    pub fn merge_result(&self, ctx: &mut ExecutionContext, stage_name: &str, result: &StageResult) {
        for (key, value) in &result.outputs {
            ctx.data.insert(key.clone(), value.clone());
        }
        if self.is_successful(result) {
            ctx.completed_stages.push(stage_name.to_string());
        }
    }

    /// Builds a standardized success envelope.
    #[must_use]
    pub fn success_envelope(
        &self,
        strategy: &str,
        results: HashMap<String, StageResult>,
        started: Instant,
    ) -> ExecutionResult {
        ExecutionResult::success(strategy, results, started.elapsed().as_secs_f64())
    }

    /// Builds a standardized failure envelope.
    #[must_use]
    pub fn failure_envelope(
        &self,
        strategy: &str,
        failed_stage: &str,
        error: &str,
        results: HashMap<String, StageResult>,
        started: Instant,
    ) -> ExecutionResult {
        ExecutionResult::failure(
            strategy,
            failed_stage,
            error,
            results,
            started.elapsed().as_secs_f64(),
        )
    }

    /// Best-effort checkpoint save hook.
    ///
    /// Persists `(index, accumulated results)` for the job when a store is
    /// attached. A persistence failure never fails the stage; it is logged
    /// and swallowed.
    pub async fn record_progress(
        &self,
        job_id: &str,
        last_completed_index: i64,
        results: &HashMap<String, StageResult>,
    ) {
        let Some(store) = &self.checkpoint_store else {
            return;
        };

        let checkpoint = Checkpoint {
            last_completed_stage_index: last_completed_index,
            timestamp: iso_timestamp(),
            results: results.clone(),
        };

        if let Err(err) = store.save(job_id, &checkpoint).await {
            warn!(job_id = %job_id, error = %err, "Failed to record progress checkpoint");
        }
    }
}
