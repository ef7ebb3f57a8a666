//! Stage trait and simple implementations.
//!
//! Stages are the named units of pipeline work. A stage reads the job
//! descriptor and the shared context and returns a [`StageResult`]; an
//! `Err` models a stage that blew up rather than reporting failure, and the
//! engine treats it like an explicit failure without merging any outputs.

use crate::context::{ExecutionContext, JobCard};
use crate::result::StageResult;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage, used for result, checkpoint and
    /// skip-list keying.
    fn name(&self) -> &str;

    /// Executes the stage against the job and the shared context.
    async fn execute(
        &self,
        job: &JobCard,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<StageResult>;
}

/// A closure-backed stage.
pub struct FnStage<F>
where
    F: Fn(&JobCard, &ExecutionContext) -> anyhow::Result<StageResult> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&JobCard, &ExecutionContext) -> anyhow::Result<StageResult> + Send + Sync,
{
    /// Creates a new closure-backed stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&JobCard, &ExecutionContext) -> anyhow::Result<StageResult> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&JobCard, &ExecutionContext) -> anyhow::Result<StageResult> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        job: &JobCard,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<StageResult> {
        (self.func)(job, ctx)
    }
}

/// A stage that always succeeds with no outputs.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    name: String,
}

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _job: &JobCard,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<StageResult> {
        Ok(StageResult::ok_empty())
    }
}

/// A stage that always reports failure. Useful in tests and as a guard
/// placeholder for not-yet-implemented pipeline slots.
#[derive(Debug, Clone)]
pub struct FailStage {
    name: String,
    error: String,
}

impl FailStage {
    /// Creates a new always-failing stage.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
        }
    }
}

#[async_trait]
impl Stage for FailStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _job: &JobCard,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<StageResult> {
        Ok(StageResult::fail(self.error.clone()))
    }
}
