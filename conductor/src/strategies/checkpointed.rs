//! Resumable sequential execution backed by a checkpoint store.
//!
//! Before running, the strategy loads any persisted checkpoint for the job
//! and skips every stage at or before the recorded index, seeding the
//! result map from the checkpoint. After each successful stage it writes a
//! new checkpoint; on failure it leaves the last checkpoint in place so a
//! rerun picks up where this one stopped. A fully successful run removes
//! the checkpoint so the next run of the same job starts fresh.
//!
//! Persistence is infrastructure, not business logic: any store error is
//! logged and swallowed, and the run continues without durability rather
//! than failing the pipeline.

use super::{run_stage, ExecutionStrategy, StepOutcome};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::context::{ContextManager, ExecutionContext};
use crate::events::{types, EventSink, NoOpEventSink};
use crate::report::ExecutionResult;
use crate::result::StageResult;
use crate::stages::Stage;
use crate::utils::iso_timestamp;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Sequential execution that persists progress and resumes interrupted runs.
pub struct CheckpointedStrategy {
    manager: ContextManager,
    sink: Arc<dyn EventSink>,
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointedStrategy {
    /// Creates a checkpointed strategy over the given store.
    #[must_use]
    pub fn new(manager: ContextManager, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            manager,
            sink: Arc::new(NoOpEventSink),
            store,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Loads the persisted checkpoint for a job, treating store errors as
    /// a cold start.
    async fn load_checkpoint(&self, job_id: &str) -> Option<Checkpoint> {
        match self.store.load(job_id).await {
            Ok(checkpoint) => checkpoint,
            Err(err) => {
                warn!(job_id, error = %err, "Failed to load checkpoint; starting from scratch");
                None
            }
        }
    }

    /// Persists progress through `index`. Errors are logged and swallowed.
    async fn save_checkpoint(
        &self,
        job_id: &str,
        index: i64,
        results: &HashMap<String, StageResult>,
    ) {
        let checkpoint = Checkpoint {
            last_completed_stage_index: index,
            timestamp: iso_timestamp(),
            results: results.clone(),
        };
        if let Err(err) = self.store.save(job_id, &checkpoint).await {
            warn!(job_id, index, error = %err, "Failed to save checkpoint");
        }
    }

    /// Removes the checkpoint after a fully successful run.
    async fn clear_checkpoint(&self, job_id: &str) {
        if let Err(err) = self.store.delete(job_id).await {
            warn!(job_id, error = %err, "Failed to delete checkpoint after success");
        }
    }
}

impl std::fmt::Debug for CheckpointedStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointedStrategy").finish_non_exhaustive()
    }
}

#[async_trait]
impl ExecutionStrategy for CheckpointedStrategy {
    fn name(&self) -> &str {
        "checkpoint"
    }

    async fn execute(
        &self,
        stages: &[Arc<dyn Stage>],
        ctx: &mut ExecutionContext,
    ) -> ExecutionResult {
        let started = Instant::now();
        let job_id = ctx.card_id().to_string();

        let mut results: HashMap<String, StageResult> = HashMap::new();
        let mut resume_after: i64 = -1;
        let mut resumed = false;

        if let Some(checkpoint) = self.load_checkpoint(&job_id).await {
            resume_after = checkpoint.last_completed_stage_index;
            resumed = true;
            info!(
                job_id,
                last_completed_stage_index = resume_after,
                "Resuming pipeline from checkpoint"
            );

            // Replay the persisted results so resumed stages see the same
            // context a fresh run would have built.
            for (stage_name, result) in &checkpoint.results {
                self.manager.merge_result(ctx, stage_name, result);
            }
            results = checkpoint.results;
        }

        for (index, stage) in stages.iter().enumerate() {
            if (index as i64) <= resume_after {
                self.sink.try_emit(
                    types::STAGE_SKIPPED,
                    Some(serde_json::json!({
                        "stage": stage.name(),
                        "reason": "restored from checkpoint",
                    })),
                );
                continue;
            }

            let stage_name = stage.name().to_string();
            match run_stage(stage, ctx, &self.manager, &self.sink).await {
                StepOutcome::Success(result) => {
                    results.insert(stage_name, result);
                    self.save_checkpoint(&job_id, index as i64, &results).await;
                }
                StepOutcome::Failure(error) => {
                    self.sink.try_emit(
                        types::PIPELINE_FAILED,
                        Some(serde_json::json!({"card_id": job_id, "stage": stage_name})),
                    );
                    return self
                        .manager
                        .failure_envelope(self.name(), &stage_name, &error, results, started)
                        .add_metadata("resumed", serde_json::json!(resumed));
                }
            }
        }

        self.clear_checkpoint(&job_id).await;
        self.sink.try_emit(
            types::PIPELINE_COMPLETED,
            Some(serde_json::json!({"card_id": job_id})),
        );
        self.manager
            .success_envelope(self.name(), results, started)
            .add_metadata("resumed", serde_json::json!(resumed))
    }
}
