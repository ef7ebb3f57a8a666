//! Interchangeable execution strategies for running a stage list.
//!
//! Every strategy consumes the same [`ContextManager`] contract: merge each
//! attempted stage's result into the shared context, stop launching new
//! stages at the first failure, and always return a complete
//! [`ExecutionResult`] envelope.

mod checkpointed;
mod fast;
mod parallel;
mod registry;
mod standard;

pub use checkpointed::CheckpointedStrategy;
pub use fast::FastStrategy;
pub use parallel::{named_groups, singleton_groups, GroupingFn, ParallelStrategy};
pub use registry::{StrategyFactory, StrategyRegistry};
pub use standard::StandardStrategy;

use crate::context::{ContextManager, ExecutionContext};
use crate::events::{types, EventSink};
use crate::report::ExecutionResult;
use crate::result::StageResult;
use crate::stages::Stage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// The variation point: an interchangeable algorithm for running an ordered
/// stage list against a shared context.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// Returns the strategy's name as stamped into result envelopes.
    fn name(&self) -> &str;

    /// Runs the stage list to completion or first failure.
    ///
    /// Never mutates the input stage list and never panics out: a failed
    /// pipeline run still returns a complete envelope describing which
    /// stage failed and why.
    async fn execute(
        &self,
        stages: &[Arc<dyn Stage>],
        ctx: &mut ExecutionContext,
    ) -> ExecutionResult;
}

fn default_max_parallelism() -> usize {
    4
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(crate::checkpoint::DEFAULT_CHECKPOINT_DIR)
}

fn default_group_join_timeout() -> u64 {
    600
}

/// Runtime configuration consumed by the strategy factories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyOptions {
    /// Stage names (normalized or not) the fast strategy skips.
    #[serde(default)]
    pub skip_stages: Vec<String>,

    /// Bounded worker pool size for parallel groups.
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,

    /// Directory for file-backed checkpoints.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// Upper bound, in seconds, for waiting on a parallel group to finish.
    #[serde(default = "default_group_join_timeout")]
    pub group_join_timeout_seconds: u64,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            skip_stages: Vec::new(),
            max_parallelism: default_max_parallelism(),
            checkpoint_dir: default_checkpoint_dir(),
            group_join_timeout_seconds: default_group_join_timeout(),
        }
    }
}

/// Outcome of one stage attempt, shared by the sequential strategies.
pub(crate) enum StepOutcome {
    /// The stage succeeded; its result belongs in the envelope map.
    Success(StageResult),
    /// The stage failed or errored; the run stops here.
    Failure(String),
}

/// Runs a single stage: emit started, execute, merge, emit the terminal
/// event.
///
/// A stage returning `Err` is treated like an explicit failure (error text
/// from the error's Display), except no partial outputs are merged.
pub(crate) async fn run_stage(
    stage: &Arc<dyn Stage>,
    ctx: &mut ExecutionContext,
    manager: &ContextManager,
    sink: &Arc<dyn EventSink>,
) -> StepOutcome {
    let stage_name = stage.name().to_string();
    sink.try_emit(
        types::STAGE_STARTED,
        Some(serde_json::json!({"stage": stage_name, "card_id": ctx.card_id()})),
    );

    match stage.execute(ctx.job(), ctx).await {
        Ok(result) => {
            manager.merge_result(ctx, &stage_name, &result);
            if manager.is_successful(&result) {
                sink.try_emit(
                    types::STAGE_COMPLETED,
                    Some(serde_json::json!({"stage": stage_name})),
                );
                StepOutcome::Success(result)
            } else {
                let error = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "stage reported failure".to_string());
                sink.try_emit(
                    types::STAGE_FAILED,
                    Some(serde_json::json!({"stage": stage_name, "error": error})),
                );
                StepOutcome::Failure(error)
            }
        }
        Err(err) => {
            let error = err.to_string();
            sink.try_emit(
                types::STAGE_FAILED,
                Some(serde_json::json!({"stage": stage_name, "error": error})),
            );
            StepOutcome::Failure(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::JobCard;
    use crate::events::CollectingEventSink;
    use crate::stages::{FailStage, FnStage, NoOpStage};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_options_defaults() {
        let options = StrategyOptions::default();
        assert_eq!(options.max_parallelism, 4);
        assert_eq!(options.group_join_timeout_seconds, 600);
        assert!(options.skip_stages.is_empty());
        assert_eq!(options.checkpoint_dir, PathBuf::from("checkpoints"));
    }

    #[test]
    fn test_options_deserialize_partial() {
        let options: StrategyOptions =
            serde_json::from_str(r#"{"skip_stages": ["verify"]}"#).unwrap();
        assert_eq!(options.skip_stages, vec!["verify".to_string()]);
        assert_eq!(options.max_parallelism, 4);
    }

    #[tokio::test]
    async fn test_run_stage_success_merges_and_emits() {
        let manager = ContextManager::new();
        let sink: Arc<dyn EventSink> = Arc::new(CollectingEventSink::new());
        let mut ctx = ExecutionContext::new(JobCard::new("card-1"));

        let stage: Arc<dyn Stage> = Arc::new(FnStage::new("analyze", |_job, _ctx| {
            Ok(StageResult::ok_value("score", serde_json::json!(8)))
        }));

        let outcome = run_stage(&stage, &mut ctx, &manager, &sink).await;
        assert!(matches!(outcome, StepOutcome::Success(_)));
        assert_eq!(ctx.get("score"), Some(&serde_json::json!(8)));
    }

    #[tokio::test]
    async fn test_run_stage_failure_merges_outputs() {
        let manager = ContextManager::new();
        let sink: Arc<dyn EventSink> = Arc::new(NoOpEventSinkWrapper);
        let mut ctx = ExecutionContext::new(JobCard::new("card-1"));

        let stage: Arc<dyn Stage> = Arc::new(FnStage::new("build", |_job, _ctx| {
            Ok(StageResult::fail("link error").with_output("log", serde_json::json!("...")))
        }));

        let outcome = run_stage(&stage, &mut ctx, &manager, &sink).await;
        match outcome {
            StepOutcome::Failure(error) => assert_eq!(error, "link error"),
            StepOutcome::Success(_) => panic!("expected failure"),
        }
        // Attempted stage outputs are visible in the context.
        assert_eq!(ctx.get("log"), Some(&serde_json::json!("...")));
    }

    #[tokio::test]
    async fn test_run_stage_error_does_not_merge() {
        let manager = ContextManager::new();
        let sink: Arc<dyn EventSink> = Arc::new(NoOpEventSinkWrapper);
        let mut ctx = ExecutionContext::new(JobCard::new("card-1"));

        let stage: Arc<dyn Stage> =
            Arc::new(FnStage::new("explode", |_job, _ctx| anyhow::bail!("kaboom")));

        let outcome = run_stage(&stage, &mut ctx, &manager, &sink).await;
        match outcome {
            StepOutcome::Failure(error) => assert_eq!(error, "kaboom"),
            StepOutcome::Success(_) => panic!("expected failure"),
        }
        assert!(ctx.data.is_empty());
    }

    #[tokio::test]
    async fn test_run_stage_events() {
        let sink_impl = Arc::new(CollectingEventSink::new());
        let sink: Arc<dyn EventSink> = sink_impl.clone();
        let manager = ContextManager::new();
        let mut ctx = ExecutionContext::new(JobCard::new("card-1"));

        let ok: Arc<dyn Stage> = Arc::new(NoOpStage::new("a"));
        let bad: Arc<dyn Stage> = Arc::new(FailStage::new("b", "nope"));

        run_stage(&ok, &mut ctx, &manager, &sink).await;
        run_stage(&bad, &mut ctx, &manager, &sink).await;

        let counts = sink_impl.counts();
        assert_eq!(counts.get(types::STAGE_STARTED), Some(&2));
        assert_eq!(counts.get(types::STAGE_COMPLETED), Some(&1));
        assert_eq!(counts.get(types::STAGE_FAILED), Some(&1));
    }

    struct NoOpEventSinkWrapper;
    impl EventSink for NoOpEventSinkWrapper {
        fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
    }
}
