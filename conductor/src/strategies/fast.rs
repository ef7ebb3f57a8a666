//! Sequential execution with a configurable skip-set.

use super::{run_stage, ExecutionStrategy, StepOutcome};
use crate::context::{ContextManager, ExecutionContext};
use crate::errors::EngineError;
use crate::events::{types, EventSink, NoOpEventSink};
use crate::report::ExecutionResult;
use crate::result::StageResult;
use crate::stages::Stage;
use crate::utils::normalize_stage_name;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Standard's loop over a skip-filtered stage list.
///
/// Skip-set entries are matched against each stage's normalized name
/// (lowercased, `Stage` suffix stripped). Order is never changed; entries
/// are only removed. Skipped names are reported as `stages_skipped`
/// metadata.
pub struct FastStrategy {
    manager: ContextManager,
    sink: Arc<dyn EventSink>,
    skip_set: HashSet<String>,
}

impl FastStrategy {
    /// Creates a fast strategy with the given skip list.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidSkipList`] when an entry is empty or
    /// normalizes to the empty string.
    pub fn new(
        manager: ContextManager,
        skip_stages: &[String],
    ) -> Result<Self, EngineError> {
        let mut skip_set = HashSet::new();
        for entry in skip_stages {
            let normalized = normalize_stage_name(entry);
            if normalized.is_empty() {
                return Err(EngineError::InvalidSkipList(format!(
                    "skip entry '{entry}' normalizes to an empty name"
                )));
            }
            skip_set.insert(normalized);
        }

        Ok(Self {
            manager,
            sink: Arc::new(NoOpEventSink),
            skip_set,
        })
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }
}

impl std::fmt::Debug for FastStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastStrategy")
            .field("skip_set", &self.skip_set)
            .finish()
    }
}

#[async_trait]
impl ExecutionStrategy for FastStrategy {
    fn name(&self) -> &str {
        "fast"
    }

    async fn execute(
        &self,
        stages: &[Arc<dyn Stage>],
        ctx: &mut ExecutionContext,
    ) -> ExecutionResult {
        let started = Instant::now();

        let mut skipped: Vec<String> = Vec::new();
        let mut selected: Vec<&Arc<dyn Stage>> = Vec::new();
        for stage in stages {
            if self.skip_set.contains(&normalize_stage_name(stage.name())) {
                debug!(stage = %stage.name(), "Skipping stage");
                self.sink.try_emit(
                    types::STAGE_SKIPPED,
                    Some(serde_json::json!({"stage": stage.name()})),
                );
                skipped.push(stage.name().to_string());
            } else {
                selected.push(stage);
            }
        }

        let skipped_value = serde_json::json!(skipped);
        let mut results: HashMap<String, StageResult> = HashMap::new();

        for (index, stage) in selected.into_iter().enumerate() {
            let stage_name = stage.name().to_string();
            match run_stage(stage, ctx, &self.manager, &self.sink).await {
                StepOutcome::Success(result) => {
                    results.insert(stage_name, result);
                    self.manager
                        .record_progress(ctx.card_id(), index as i64, &results)
                        .await;
                }
                StepOutcome::Failure(error) => {
                    self.sink.try_emit(
                        types::PIPELINE_FAILED,
                        Some(serde_json::json!({"card_id": ctx.card_id(), "stage": stage_name})),
                    );
                    return self
                        .manager
                        .failure_envelope(self.name(), &stage_name, &error, results, started)
                        .add_metadata("stages_skipped", skipped_value);
                }
            }
        }

        self.sink.try_emit(
            types::PIPELINE_COMPLETED,
            Some(serde_json::json!({"card_id": ctx.card_id()})),
        );
        self.manager
            .success_envelope(self.name(), results, started)
            .add_metadata("stages_skipped", skipped_value)
    }
}
