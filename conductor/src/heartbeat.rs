//! Per-worker liveness tracking with adaptive interval tuning.
//!
//! Workers register themselves, send periodic heartbeats, and can have
//! their expected heartbeat interval adjusted manually or by heuristics.
//! Observers receive lifecycle events; a broken observer never blocks the
//! others or the caller.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Minimum allowed heartbeat interval in seconds.
pub const MIN_INTERVAL_SECONDS: u64 = 5;
/// Maximum allowed heartbeat interval in seconds.
pub const MAX_INTERVAL_SECONDS: u64 = 60;
/// Default heartbeat interval for new registrations.
pub const DEFAULT_INTERVAL_SECONDS: u64 = 15;

/// Lifecycle events emitted to heartbeat observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEvent {
    /// The agent registered.
    Started,
    /// The agent sent a heartbeat.
    Progress,
    /// The agent unregistered.
    Completed,
    /// The agent was reported failed.
    Failed,
    /// The agent recovered after a failure.
    Recovered,
}

impl fmt::Display for AgentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Progress => write!(f, "progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Recovered => write!(f, "recovered"),
        }
    }
}

/// Registration record for one worker/agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    /// Agent type tag (e.g., "builder", "reviewer").
    pub agent_type: String,
    /// When the agent registered.
    pub registered_at: DateTime<Utc>,
    /// Arbitrary metadata supplied at registration.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Current expected heartbeat interval in seconds.
    pub interval_seconds: u64,
    /// When the last heartbeat arrived.
    pub last_heartbeat_at: DateTime<Utc>,
    /// Why the interval was last adjusted.
    pub last_adjustment_reason: Option<String>,
}

/// Observer hook for agent liveness events.
pub trait HeartbeatObserver: Send + Sync {
    /// Receives one agent lifecycle event.
    fn on_agent_event(&self, agent_name: &str, event: AgentEvent, data: &serde_json::Value);
}

/// Tracks worker liveness and tunes heartbeat intervals.
#[derive(Default)]
pub struct HeartbeatManager {
    agents: Mutex<HashMap<String, AgentRegistration>>,
    observers: RwLock<Vec<Arc<dyn HeartbeatObserver>>>,
    /// Externally supplied failure rates, keyed by agent name.
    failure_rates: RwLock<HashMap<String, f64>>,
}

impl fmt::Debug for HeartbeatManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeartbeatManager")
            .field("agents", &self.agents.lock().len())
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

impl HeartbeatManager {
    /// Creates a new manager with no observers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer.
    pub fn add_observer(&self, observer: Arc<dyn HeartbeatObserver>) {
        self.observers.write().push(observer);
    }

    /// Supplies the failure rate for an agent, used by `auto_adjust`.
    pub fn set_failure_rate(&self, agent_name: &str, rate: f64) {
        self.failure_rates.write().insert(agent_name.to_string(), rate);
    }

    /// Registers an agent and emits a `Started` event.
    ///
    /// The initial interval is clamped to the allowed range.
    pub fn register_agent(
        &self,
        agent_name: &str,
        agent_type: &str,
        metadata: HashMap<String, serde_json::Value>,
        interval_seconds: u64,
    ) {
        let now = Utc::now();
        let registration = AgentRegistration {
            agent_type: agent_type.to_string(),
            registered_at: now,
            metadata,
            interval_seconds: interval_seconds.clamp(MIN_INTERVAL_SECONDS, MAX_INTERVAL_SECONDS),
            last_heartbeat_at: now,
            last_adjustment_reason: None,
        };

        self.agents.lock().insert(agent_name.to_string(), registration);
        self.notify(agent_name, AgentEvent::Started, &serde_json::json!({"type": agent_type}));
    }

    /// Records a heartbeat and emits a `Progress` event.
    ///
    /// Heartbeats from unregistered names are logged and dropped, not
    /// errors; returns false in that case.
    pub fn heartbeat(&self, agent_name: &str, progress: serde_json::Value) -> bool {
        {
            let mut agents = self.agents.lock();
            let Some(registration) = agents.get_mut(agent_name) else {
                warn!(agent = %agent_name, "Heartbeat from unregistered agent; dropping");
                return false;
            };
            registration.last_heartbeat_at = Utc::now();
        }

        self.notify(agent_name, AgentEvent::Progress, &progress);
        true
    }

    /// Adjusts an agent's heartbeat interval, clamped to [5, 60] seconds.
    ///
    /// Returns false for unknown agents.
    pub fn adjust_interval(&self, agent_name: &str, interval_seconds: u64, reason: &str) -> bool {
        let mut agents = self.agents.lock();
        let Some(registration) = agents.get_mut(agent_name) else {
            warn!(agent = %agent_name, "Interval adjustment for unknown agent");
            return false;
        };

        registration.interval_seconds =
            interval_seconds.clamp(MIN_INTERVAL_SECONDS, MAX_INTERVAL_SECONDS);
        registration.last_adjustment_reason = Some(reason.to_string());
        true
    }

    /// Applies the interval heuristics to an agent.
    ///
    /// Priority order: LLM-heavy metadata raises short intervals to 20s,
    /// evaluation-heavy metadata raises to 25s, and a failure rate above
    /// 30% lowers long intervals to 10s. Returns the new interval, or None
    /// when nothing changed (including unknown agents).
    pub fn auto_adjust(&self, agent_name: &str) -> Option<u64> {
        let (interval, llm_heavy, evaluation_heavy) = {
            let agents = self.agents.lock();
            let registration = agents.get(agent_name)?;
            (
                registration.interval_seconds,
                is_truthy(registration.metadata.get("llm_heavy")),
                is_truthy(registration.metadata.get("evaluation_heavy")),
            )
        };

        let failure_rate = self
            .failure_rates
            .read()
            .get(agent_name)
            .copied()
            .unwrap_or(0.0);

        let adjustment = if llm_heavy && interval < 20 {
            Some((20, "llm-heavy workload"))
        } else if evaluation_heavy && interval < 25 {
            Some((25, "evaluation-heavy workload"))
        } else if failure_rate > 0.3 && interval > 10 {
            Some((10, "high failure rate"))
        } else {
            None
        };

        let (new_interval, reason) = adjustment?;
        self.adjust_interval(agent_name, new_interval, reason);
        Some(new_interval)
    }

    /// Reports an agent as failed and emits a `Failed` event.
    ///
    /// The registration is kept so the agent can recover under the same
    /// name. Returns false for unknown agents.
    pub fn report_failure(&self, agent_name: &str, detail: serde_json::Value) -> bool {
        if !self.agents.lock().contains_key(agent_name) {
            warn!(agent = %agent_name, "Failure reported for unknown agent");
            return false;
        }
        self.notify(agent_name, AgentEvent::Failed, &detail);
        true
    }

    /// Reports a previously failed agent as healthy again and emits a
    /// `Recovered` event. Returns false for unknown agents.
    pub fn report_recovery(&self, agent_name: &str, detail: serde_json::Value) -> bool {
        {
            let mut agents = self.agents.lock();
            let Some(registration) = agents.get_mut(agent_name) else {
                warn!(agent = %agent_name, "Recovery reported for unknown agent");
                return false;
            };
            registration.last_heartbeat_at = Utc::now();
        }
        self.notify(agent_name, AgentEvent::Recovered, &detail);
        true
    }

    /// Removes an agent and emits a `Completed` event.
    ///
    /// Returns false if the agent was not registered.
    pub fn unregister_agent(&self, agent_name: &str) -> bool {
        let removed = self.agents.lock().remove(agent_name);
        if removed.is_none() {
            return false;
        }
        self.failure_rates.write().remove(agent_name);

        self.notify(agent_name, AgentEvent::Completed, &serde_json::json!({}));
        true
    }

    /// Returns a copy of an agent's registration.
    #[must_use]
    pub fn registration(&self, agent_name: &str) -> Option<AgentRegistration> {
        self.agents.lock().get(agent_name).cloned()
    }

    /// Returns the names of all registered agents.
    #[must_use]
    pub fn agent_names(&self) -> Vec<String> {
        self.agents.lock().keys().cloned().collect()
    }

    /// Notify-all dispatch: each observer is called in turn, and a
    /// panicking observer is logged without blocking the others.
    fn notify(&self, agent_name: &str, event: AgentEvent, data: &serde_json::Value) {
        let observers = self.observers.read().clone();
        for observer in observers {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                observer.on_agent_event(agent_name, event, data);
            }))
            .is_err()
            {
                warn!(agent = %agent_name, event = %event, "Heartbeat observer panicked");
            }
        }
    }
}

fn is_truthy(value: Option<&serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(serde_json::Value::String(s)) => !s.is_empty() && s != "false",
        _ => false,
    }
}
