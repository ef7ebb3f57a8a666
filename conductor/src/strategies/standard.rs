//! Sequential execution of the full stage list.

use super::{run_stage, ExecutionStrategy, StepOutcome};
use crate::context::{ContextManager, ExecutionContext};
use crate::events::{types, EventSink, NoOpEventSink};
use crate::report::ExecutionResult;
use crate::result::StageResult;
use crate::stages::Stage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Runs stages strictly in order, stopping at the first failure.
///
/// Each successful stage triggers a best-effort progress checkpoint through
/// the context manager's save hook; a failed save never fails the stage.
pub struct StandardStrategy {
    manager: ContextManager,
    sink: Arc<dyn EventSink>,
}

impl StandardStrategy {
    /// Creates a standard strategy.
    #[must_use]
    pub fn new(manager: ContextManager) -> Self {
        Self {
            manager,
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }
}

impl std::fmt::Debug for StandardStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardStrategy").finish()
    }
}

#[async_trait]
impl ExecutionStrategy for StandardStrategy {
    fn name(&self) -> &str {
        "standard"
    }

    async fn execute(
        &self,
        stages: &[Arc<dyn Stage>],
        ctx: &mut ExecutionContext,
    ) -> ExecutionResult {
        let started = Instant::now();
        let mut results: HashMap<String, StageResult> = HashMap::new();

        for (index, stage) in stages.iter().enumerate() {
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
                        Some(serde_json::json!({"stage": stage_name, "card_id": ctx.card_id()})),
                    );
                    return self.manager.failure_envelope(
                        self.name(),
                        &stage_name,
                        &error,
                        results,
                        started,
                    );
                }
            }
        }

        info!(
            card_id = %ctx.card_id(),
            stages = stages.len(),
            "Pipeline completed"
        );
        self.sink.try_emit(
            types::PIPELINE_COMPLETED,
            Some(serde_json::json!({"card_id": ctx.card_id(), "stages": stages.len()})),
        );
        self.manager.success_envelope(self.name(), results, started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::JobCard;
    use crate::stages::{FnStage, NoOpStage};
    use pretty_assertions::assert_eq;

    fn stages_abc() -> Vec<Arc<dyn Stage>> {
        vec![
            Arc::new(FnStage::new("A", |_job, _ctx| {
                Ok(StageResult::ok_value("a_out", serde_json::json!(1)))
            })),
            Arc::new(FnStage::new("B", |_job, ctx| {
                // B observes A's merged output.
                let seen = ctx.get("a_out").cloned().unwrap_or_default();
                Ok(StageResult::ok_value("b_saw", seen))
            })),
            Arc::new(NoOpStage::new("C")),
        ]
    }

    #[tokio::test]
    async fn test_all_stages_succeed() {
        let strategy = StandardStrategy::new(ContextManager::new());
        let mut ctx = ExecutionContext::new(JobCard::new("card-1"));

        let result = strategy.execute(&stages_abc(), &mut ctx).await;

        assert!(result.is_success());
        assert_eq!(result.stages_completed, 3);
        assert_eq!(result.results.len(), 3);
        assert!(result.results.contains_key("A"));
        assert!(result.results.contains_key("C"));
        assert_eq!(result.strategy, "standard");
    }

    #[tokio::test]
    async fn test_later_stage_observes_earlier_outputs() {
        let strategy = StandardStrategy::new(ContextManager::new());
        let mut ctx = ExecutionContext::new(JobCard::new("card-1"));

        let result = strategy.execute(&stages_abc(), &mut ctx).await;

        assert_eq!(
            result.results["B"].get("b_saw"),
            Some(&serde_json::json!(1))
        );
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(NoOpStage::new("A")),
            Arc::new(FnStage::new("B", |_job, _ctx| anyhow::bail!("stage blew up"))),
            Arc::new(NoOpStage::new("C")),
        ];

        let strategy = StandardStrategy::new(ContextManager::new());
        let mut ctx = ExecutionContext::new(JobCard::new("card-1"));

        let result = strategy.execute(&stages, &mut ctx).await;

        assert!(!result.is_success());
        assert_eq!(result.stages_completed, 1);
        assert_eq!(result.failed_stage.as_deref(), Some("B"));
        assert_eq!(result.error.as_deref(), Some("stage blew up"));
        assert!(result.results.contains_key("A"));
        assert!(!result.results.contains_key("B"));
        assert!(!result.results.contains_key("C"));
    }

    #[tokio::test]
    async fn test_empty_stage_list() {
        let strategy = StandardStrategy::new(ContextManager::new());
        let mut ctx = ExecutionContext::new(JobCard::new("card-1"));

        let result = strategy.execute(&[], &mut ctx).await;

        assert!(result.is_success());
        assert_eq!(result.stages_completed, 0);
    }

    #[tokio::test]
    async fn test_progress_hook_writes_checkpoints() {
        use crate::checkpoint::{CheckpointStore, InMemoryCheckpointStore};

        let store = Arc::new(InMemoryCheckpointStore::new());
        let manager = ContextManager::new().with_checkpoint_store(store.clone());
        let strategy = StandardStrategy::new(manager);
        let mut ctx = ExecutionContext::new(JobCard::new("card-1"));

        strategy.execute(&stages_abc(), &mut ctx).await;

        let checkpoint = store.load("card-1").await.unwrap().unwrap();
        assert_eq!(checkpoint.last_completed_stage_index, 2);
        assert_eq!(checkpoint.results.len(), 3);
    }
}
