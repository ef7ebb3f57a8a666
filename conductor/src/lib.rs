//! # Conductor
//!
//! A resilient multi-stage pipeline execution engine.
//!
//! Conductor runs an ordered list of stages against a shared execution
//! context and supports:
//!
//! - **Interchangeable strategies**: sequential, skip-list, dependency-grouped
//!   parallel, and checkpoint-resumable execution behind one trait
//! - **Context accumulation**: every attempted stage's outputs merge into a
//!   shared context visible to later stages
//! - **Failure containment**: stage failures land in the result envelope,
//!   infrastructure failures are logged and absorbed
//! - **Circuit breaking**: per-stage failure state with timed auto-recovery
//! - **Liveness tracking**: heartbeat registration with adaptive intervals
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use conductor::prelude::*;
//!
//! let registry = StrategyRegistry::with_defaults();
//! let strategy = registry.get("standard", ContextManager::new(), &StrategyOptions::default())?;
//!
//! let mut ctx = ExecutionContext::new(JobCard::new("card-42"));
//! let result = strategy.execute(&stages, &mut ctx).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod breaker;
pub mod checkpoint;
pub mod context;
pub mod errors;
pub mod events;
pub mod heartbeat;
pub mod observability;
pub mod recovery;
pub mod report;
pub mod result;
pub mod stages;
pub mod strategies;
pub mod utils;


/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::breaker::{AlertNotifier, CircuitBreakerManager, CircuitBreakerState};
    pub use crate::checkpoint::{
        Checkpoint, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore,
    };
    pub use crate::context::{ContextManager, ExecutionContext, JobCard};
    pub use crate::errors::EngineError;
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::heartbeat::{AgentEvent, HeartbeatManager, HeartbeatObserver};
    pub use crate::recovery::RecoveryStrategy;
    pub use crate::report::{ExecutionResult, ExecutionStatus};
    pub use crate::result::{StageResult, StageStatus};
    pub use crate::stages::{FnStage, Stage};
    pub use crate::strategies::{
        CheckpointedStrategy, ExecutionStrategy, FastStrategy, ParallelStrategy,
        StandardStrategy, StrategyOptions, StrategyRegistry,
    };
    pub use crate::utils::{generate_run_id, iso_timestamp, normalize_stage_name};
}
