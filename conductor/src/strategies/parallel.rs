//! Dependency-grouped concurrent execution.
//!
//! Stages are partitioned into ordered groups by an injected grouping
//! function. Groups run in strict list order; a later group never starts
//! before every stage of the previous group has reported. Within a group,
//! stages run concurrently on a bounded worker pool, each against a
//! read-only snapshot of the shared context. Results accumulate in a
//! group-local map and are merged into the shared context only after the
//! whole group finishes, so later groups observe earlier groups' outputs
//! without concurrent writers.

use super::{run_stage, ExecutionStrategy, StepOutcome};
use crate::context::{ContextManager, ExecutionContext};
use crate::events::{types, EventSink, NoOpEventSink};
use crate::report::ExecutionResult;
use crate::result::StageResult;
use crate::stages::Stage;
use crate::utils::normalize_stage_name;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::warn;

/// Partitions a stage list into ordered groups of indices.
pub type GroupingFn = Arc<dyn Fn(&[Arc<dyn Stage>]) -> Vec<Vec<usize>> + Send + Sync>;

/// Default grouping: every stage in its own group, in list order.
#[must_use]
pub fn singleton_groups() -> GroupingFn {
    Arc::new(|stages| (0..stages.len()).map(|index| vec![index]).collect())
}

/// Builds a grouping function from named stage sets.
///
/// Walks the stage list in order and merges *consecutive* stages whose
/// normalized names share a configured set; everything else stays in its
/// own group. Order is never changed.
#[must_use]
pub fn named_groups(sets: &[&[&str]]) -> GroupingFn {
    let sets: Vec<HashSet<String>> = sets
        .iter()
        .map(|set| set.iter().map(|name| normalize_stage_name(name)).collect())
        .collect();

    Arc::new(move |stages| {
        let set_of = |stage: &Arc<dyn Stage>| -> Option<usize> {
            let normalized = normalize_stage_name(stage.name());
            sets.iter().position(|set| set.contains(&normalized))
        };

        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut current_set: Option<usize> = None;
        for (index, stage) in stages.iter().enumerate() {
            let set = set_of(stage);
            match (set, current_set) {
                (Some(a), Some(b)) if a == b => {
                    if let Some(last) = groups.last_mut() {
                        last.push(index);
                    }
                }
                _ => {
                    groups.push(vec![index]);
                    current_set = set;
                }
            }
        }
        groups
    })
}

/// Drops out-of-range and duplicate indices, then appends any index the
/// grouping function forgot as a trailing singleton group.
fn sanitize_groups(groups: Vec<Vec<usize>>, len: usize) -> Vec<Vec<usize>> {
    let mut seen = HashSet::new();
    let mut sanitized: Vec<Vec<usize>> = Vec::new();

    for group in groups {
        let filtered: Vec<usize> = group
            .into_iter()
            .filter(|&index| index < len && seen.insert(index))
            .collect();
        if !filtered.is_empty() {
            sanitized.push(filtered);
        }
    }

    for index in 0..len {
        if !seen.contains(&index) {
            sanitized.push(vec![index]);
        }
    }

    sanitized
}

enum TaskOutcome {
    Success(StageResult),
    Failed {
        error: String,
        result: Option<StageResult>,
    },
    Cancelled,
}

/// Runs groups of stages concurrently on a bounded pool.
pub struct ParallelStrategy {
    manager: ContextManager,
    sink: Arc<dyn EventSink>,
    grouping: GroupingFn,
    max_parallelism: usize,
    group_join_timeout: Duration,
}

impl ParallelStrategy {
    /// Creates a parallel strategy with singleton grouping.
    #[must_use]
    pub fn new(manager: ContextManager) -> Self {
        Self {
            manager,
            sink: Arc::new(NoOpEventSink),
            grouping: singleton_groups(),
            max_parallelism: 4,
            group_join_timeout: Duration::from_secs(600),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the grouping function.
    #[must_use]
    pub fn with_grouping(mut self, grouping: GroupingFn) -> Self {
        self.grouping = grouping;
        self
    }

    /// Sets the bounded worker pool size (minimum 1).
    #[must_use]
    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism.max(1);
        self
    }

    /// Sets the upper bound for waiting on one group to finish.
    #[must_use]
    pub const fn with_group_join_timeout(mut self, timeout: Duration) -> Self {
        self.group_join_timeout = timeout;
        self
    }

    /// Runs one multi-stage group concurrently. Returns the group-local
    /// outcomes keyed by stage index.
    async fn run_group(
        &self,
        stages: &[Arc<dyn Stage>],
        group: &[usize],
        ctx: &ExecutionContext,
    ) -> HashMap<usize, TaskOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallelism));
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut in_flight = FuturesUnordered::new();
        let mut abort_handles = Vec::with_capacity(group.len());

        for &index in group {
            let stage = Arc::clone(&stages[index]);
            let snapshot = ctx.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancelled = Arc::clone(&cancelled);
            let sink = Arc::clone(&self.sink);

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, TaskOutcome::Cancelled),
                };

                // Best-effort sibling cancellation: not-yet-started work is
                // skipped, in-flight work is allowed to finish.
                if cancelled.load(Ordering::SeqCst) {
                    return (index, TaskOutcome::Cancelled);
                }

                let stage_name = stage.name().to_string();
                sink.try_emit(
                    types::STAGE_STARTED,
                    Some(serde_json::json!({"stage": stage_name})),
                );

                match stage.execute(snapshot.job(), &snapshot).await {
                    Ok(result) if result.is_success() => {
                        sink.try_emit(
                            types::STAGE_COMPLETED,
                            Some(serde_json::json!({"stage": stage_name})),
                        );
                        (index, TaskOutcome::Success(result))
                    }
                    Ok(result) => {
                        cancelled.store(true, Ordering::SeqCst);
                        let error = result
                            .error
                            .clone()
                            .unwrap_or_else(|| "stage reported failure".to_string());
                        sink.try_emit(
                            types::STAGE_FAILED,
                            Some(serde_json::json!({"stage": stage_name, "error": error})),
                        );
                        (index, TaskOutcome::Failed { error, result: Some(result) })
                    }
                    Err(err) => {
                        cancelled.store(true, Ordering::SeqCst);
                        let error = err.to_string();
                        sink.try_emit(
                            types::STAGE_FAILED,
                            Some(serde_json::json!({"stage": stage_name, "error": error})),
                        );
                        (index, TaskOutcome::Failed { error, result: None })
                    }
                }
            });
            abort_handles.push(handle.abort_handle());
            in_flight.push(handle);
        }

        let deadline = tokio::time::Instant::now() + self.group_join_timeout;
        let mut outcomes: HashMap<usize, TaskOutcome> = HashMap::new();

        loop {
            let joined = match tokio::time::timeout_at(deadline, in_flight.next()).await {
                Ok(joined) => joined,
                Err(_) => {
                    // The engine must not block indefinitely on a
                    // misbehaving stage; abort what is left.
                    warn!(
                        timeout_secs = self.group_join_timeout.as_secs(),
                        "Parallel group join timed out; aborting remaining tasks"
                    );
                    for handle in &abort_handles {
                        handle.abort();
                    }
                    for &index in group {
                        outcomes.entry(index).or_insert(TaskOutcome::Failed {
                            error: format!(
                                "stage did not finish within the {}s group join timeout",
                                self.group_join_timeout.as_secs()
                            ),
                            result: None,
                        });
                    }
                    break;
                }
            };

            match joined {
                Some(Ok((index, outcome))) => {
                    outcomes.insert(index, outcome);
                }
                Some(Err(join_err)) => {
                    warn!(error = %join_err, "Parallel stage task aborted");
                }
                None => break,
            }
        }

        outcomes
    }
}

impl std::fmt::Debug for ParallelStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelStrategy")
            .field("max_parallelism", &self.max_parallelism)
            .field("group_join_timeout", &self.group_join_timeout)
            .finish()
    }
}

#[async_trait]
impl ExecutionStrategy for ParallelStrategy {
    fn name(&self) -> &str {
        "parallel"
    }

    async fn execute(
        &self,
        stages: &[Arc<dyn Stage>],
        ctx: &mut ExecutionContext,
    ) -> ExecutionResult {
        let started = Instant::now();
        let groups = sanitize_groups((self.grouping)(stages), stages.len());

        let mut results: HashMap<String, StageResult> = HashMap::new();
        let mut groups_evaluated: usize = 0;

        for group in &groups {
            groups_evaluated += 1;

            if let [index] = group.as_slice() {
                // Singleton group: synchronous, identical to the standard
                // per-stage step.
                let stage = &stages[*index];
                let stage_name = stage.name().to_string();
                match run_stage(stage, ctx, &self.manager, &self.sink).await {
                    StepOutcome::Success(result) => {
                        results.insert(stage_name, result);
                    }
                    StepOutcome::Failure(error) => {
                        self.sink.try_emit(
                            types::PIPELINE_FAILED,
                            Some(serde_json::json!({"card_id": ctx.card_id(), "stage": stage_name})),
                        );
                        return self
                            .manager
                            .failure_envelope(self.name(), &stage_name, &error, results, started)
                            .add_metadata("execution_groups", serde_json::json!(groups_evaluated));
                    }
                }
                continue;
            }

            let outcomes = self.run_group(stages, group, ctx).await;

            // Single-threaded merge after the whole group finished, lowest
            // index first for determinism.
            let mut indices: Vec<usize> = outcomes.keys().copied().collect();
            indices.sort_unstable();

            let mut first_failure: Option<(usize, String)> = None;
            for index in indices {
                let stage_name = stages[index].name().to_string();
                match &outcomes[&index] {
                    TaskOutcome::Success(result) => {
                        self.manager.merge_result(ctx, &stage_name, result);
                        results.insert(stage_name, result.clone());
                    }
                    TaskOutcome::Failed { error, result } => {
                        if let Some(result) = result {
                            self.manager.merge_result(ctx, &stage_name, result);
                        }
                        if first_failure.is_none() {
                            first_failure = Some((index, error.clone()));
                        }
                    }
                    TaskOutcome::Cancelled => {}
                }
            }

            if let Some((index, error)) = first_failure {
                self.sink.try_emit(
                    types::PIPELINE_FAILED,
                    Some(serde_json::json!({
                        "card_id": ctx.card_id(),
                        "stage": stages[index].name(),
                    })),
                );
                return self
                    .manager
                    .failure_envelope(
                        self.name(),
                        stages[index].name(),
                        &error,
                        results,
                        started,
                    )
                    .add_metadata("execution_groups", serde_json::json!(groups_evaluated));
            }
        }

        self.sink.try_emit(
            types::PIPELINE_COMPLETED,
            Some(serde_json::json!({"card_id": ctx.card_id(), "groups": groups_evaluated})),
        );
        self.manager
            .success_envelope(self.name(), results, started)
            .add_metadata("execution_groups", serde_json::json!(groups_evaluated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::JobCard;
    use crate::stages::{FnStage, NoOpStage};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    fn tracked_stage(name: &str, order: Arc<Mutex<Vec<String>>>) -> Arc<dyn Stage> {
        let stage_name = name.to_string();
        Arc::new(FnStage::new(name, move |_job, _ctx| {
            order.lock().push(stage_name.clone());
            Ok(StageResult::ok_empty())
        }))
    }

    #[test]
    fn test_singleton_groups() {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(NoOpStage::new("A")),
            Arc::new(NoOpStage::new("B")),
        ];
        let groups = singleton_groups()(&stages);
        assert_eq!(groups, vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_named_groups_merges_consecutive_members() {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(NoOpStage::new("LintStage")),
            Arc::new(NoOpStage::new("AuditStage")),
            Arc::new(NoOpStage::new("BuildStage")),
            Arc::new(NoOpStage::new("DocsStage")),
            Arc::new(NoOpStage::new("PackageStage")),
        ];

        let grouping = named_groups(&[&["lint", "audit"], &["docs", "package"]]);
        let groups = grouping(&stages);

        assert_eq!(groups, vec![vec![0, 1], vec![2], vec![3, 4]]);
    }

    #[test]
    fn test_sanitize_groups_repairs_bad_partitions() {
        // Duplicate 0, out-of-range 9, missing 2.
        let groups = sanitize_groups(vec![vec![0, 1, 0], vec![9]], 3);
        assert_eq!(groups, vec![vec![0, 1], vec![2]]);
    }

    #[tokio::test]
    async fn test_all_groups_succeed() {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(FnStage::new("A", |_job, _ctx| {
                Ok(StageResult::ok_value("a", serde_json::json!(1)))
            })),
            Arc::new(FnStage::new("B", |_job, _ctx| {
                Ok(StageResult::ok_value("b", serde_json::json!(2)))
            })),
            Arc::new(FnStage::new("C", |_job, ctx| {
                // C runs in a later group and observes both A and B.
                let a = ctx.get("a").cloned().unwrap_or_default();
                let b = ctx.get("b").cloned().unwrap_or_default();
                Ok(StageResult::ok_value("sum", serde_json::json!([a, b])))
            })),
        ];

        let grouping: GroupingFn = Arc::new(|_| vec![vec![0, 1], vec![2]]);
        let strategy = ParallelStrategy::new(ContextManager::new()).with_grouping(grouping);
        let mut ctx = ExecutionContext::new(JobCard::new("card-1"));

        let result = strategy.execute(&stages, &mut ctx).await;

        assert!(result.is_success());
        assert_eq!(result.stages_completed, 3);
        assert_eq!(
            result.metadata.get("execution_groups"),
            Some(&serde_json::json!(2))
        );
        assert_eq!(
            result.results["C"].get("sum"),
            Some(&serde_json::json!([1, 2]))
        );
    }

    #[tokio::test]
    async fn test_failure_in_group_stops_later_groups() {
        let ran_c = Arc::new(Mutex::new(Vec::new()));

        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(NoOpStage::new("A")),
            Arc::new(FnStage::new("B", |_job, _ctx| Ok(StageResult::fail("b broke")))),
            tracked_stage("C", ran_c.clone()),
        ];

        let grouping: GroupingFn = Arc::new(|_| vec![vec![0, 1], vec![2]]);
        let strategy = ParallelStrategy::new(ContextManager::new()).with_grouping(grouping);
        let mut ctx = ExecutionContext::new(JobCard::new("card-1"));

        let result = strategy.execute(&stages, &mut ctx).await;

        assert!(!result.is_success());
        assert_eq!(result.failed_stage.as_deref(), Some("B"));
        // C never starts.
        assert!(ran_c.lock().is_empty());
        // A's success still counts.
        assert_eq!(result.stages_completed, 1);
        assert!(result.results.contains_key("A"));
    }

    #[tokio::test]
    async fn test_sibling_cancellation_is_best_effort() {
        // Pool of 1 serializes the group: B fails first, so C (same group,
        // not yet started) is skipped.
        let ran = Arc::new(Mutex::new(Vec::new()));
        let ran_c = ran.clone();

        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(FnStage::new("B", |_job, _ctx| Ok(StageResult::fail("boom")))),
            Arc::new(FnStage::new("C", move |_job, _ctx| {
                ran_c.lock().push("C");
                Ok(StageResult::ok_empty())
            })),
        ];

        let grouping: GroupingFn = Arc::new(|_| vec![vec![0, 1]]);
        let strategy = ParallelStrategy::new(ContextManager::new())
            .with_grouping(grouping)
            .with_max_parallelism(1);
        let mut ctx = ExecutionContext::new(JobCard::new("card-1"));

        let result = strategy.execute(&stages, &mut ctx).await;

        assert!(!result.is_success());
        assert_eq!(result.failed_stage.as_deref(), Some("B"));
        assert_eq!(result.stages_completed, 0);
        assert!(ran.lock().is_empty());
    }

    #[tokio::test]
    async fn test_group_join_timeout_aborts_hung_stage() {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(NoOpStage::new("A")),
            Arc::new(HangingStage),
        ];

        let grouping: GroupingFn = Arc::new(|_| vec![vec![0, 1]]);
        let strategy = ParallelStrategy::new(ContextManager::new())
            .with_grouping(grouping)
            .with_group_join_timeout(Duration::from_millis(50));
        let mut ctx = ExecutionContext::new(JobCard::new("card-1"));

        let result = strategy.execute(&stages, &mut ctx).await;

        assert!(!result.is_success());
        assert_eq!(result.failed_stage.as_deref(), Some("hang"));
        assert!(result.error.as_deref().unwrap_or_default().contains("timeout"));
    }

    #[derive(Debug)]
    struct HangingStage;

    #[async_trait]
    impl Stage for HangingStage {
        fn name(&self) -> &str {
            "hang"
        }

        async fn execute(
            &self,
            _job: &JobCard,
            _ctx: &ExecutionContext,
        ) -> anyhow::Result<StageResult> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(StageResult::ok_empty())
        }
    }

    #[tokio::test]
    async fn test_default_grouping_is_sequential() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let stages: Vec<Arc<dyn Stage>> = vec![
            tracked_stage("A", order.clone()),
            tracked_stage("B", order.clone()),
            tracked_stage("C", order.clone()),
        ];

        let strategy = ParallelStrategy::new(ContextManager::new());
        let mut ctx = ExecutionContext::new(JobCard::new("card-1"));

        let result = strategy.execute(&stages, &mut ctx).await;

        assert!(result.is_success());
        assert_eq!(*order.lock(), vec!["A", "B", "C"]);
        assert_eq!(
            result.metadata.get("execution_groups"),
            Some(&serde_json::json!(3))
        );
    }
}
