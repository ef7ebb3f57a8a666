//! Event sinks used by strategies to report stage lifecycle transitions.

use std::collections::HashMap;
use tracing::info;

/// Event types emitted by the execution strategies.
pub mod types {
    /// A stage is about to execute.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage finished successfully.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A stage failed or errored.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A stage was skipped by the fast strategy.
    pub const STAGE_SKIPPED: &str = "stage.skipped";
    /// The whole pipeline finished successfully.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// The pipeline stopped on a failing stage.
    pub const PIPELINE_FAILED: &str = "pipeline.failed";
}

/// Trait for sinks that receive pipeline lifecycle events.
///
/// `try_emit` must never propagate an error to the caller; sinks log their
/// own failures and swallow them.
pub trait EventSink: Send + Sync {
    /// Emits an event without blocking and without failing the caller.
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// A no-op sink that discards all events. Used as the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// A sink that logs events through the tracing framework.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        info!(event_type = %event_type, event_data = ?data, "Pipeline event");
    }
}

/// A collecting sink for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<(String, Option<serde_json::Value>)>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<serde_json::Value>)> {
        self.events.read().clone()
    }

    /// Returns events matching an event-type prefix.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<(String, Option<serde_json::Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Counts events per event type.
    #[must_use]
    pub fn counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for (event_type, _) in self.events.read().iter() {
            *counts.entry(event_type.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for CollectingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}
