//! Per-stage circuit breaker state tracking.
//!
//! The manager holds and transitions state; it never decides *when* to open
//! a circuit. Callers increment failure counters via [`CircuitBreakerManager::record_failure`]
//! and call [`CircuitBreakerManager::open`] once their
//! [`RecoveryStrategy::circuit_breaker_threshold`] is exceeded. This keeps
//! the breaker reusable under any retry policy.

use crate::recovery::RecoveryStrategy;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Mutable breaker state for one registered stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    /// Number of recorded failures.
    pub failure_count: u32,
    /// When the last failure was recorded.
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Cumulative execution duration in seconds.
    pub total_duration_seconds: f64,
    /// Number of recorded executions.
    pub execution_count: u64,
    /// Whether the circuit is currently open.
    pub circuit_open: bool,
    /// When an open circuit auto-recovers.
    pub circuit_open_until: Option<DateTime<Utc>>,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            failure_count: 0,
            last_failure_at: None,
            total_duration_seconds: 0.0,
            execution_count: 0,
            circuit_open: false,
            circuit_open_until: None,
        }
    }
}

/// Sink for circuit-open alerts. The transport (chat, log, page) is an
/// external collaborator.
pub trait AlertNotifier: Send + Sync {
    /// Delivers a human-readable alert message.
    fn notify(&self, message: &str);
}

/// A notifier that logs alerts through tracing. Used as the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAlertNotifier;

impl AlertNotifier for LoggingAlertNotifier {
    fn notify(&self, message: &str) {
        warn!(alert = %message, "Circuit breaker alert");
    }
}

struct BreakerEntry {
    state: CircuitBreakerState,
    recovery: RecoveryStrategy,
}

/// Tracks per-stage failure and open-circuit state, independent of any
/// particular execution strategy.
pub struct CircuitBreakerManager {
    entries: Mutex<HashMap<String, BreakerEntry>>,
    notifier: Arc<dyn AlertNotifier>,
}

impl std::fmt::Debug for CircuitBreakerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerManager")
            .field("registered", &self.entries.lock().len())
            .finish()
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new(Arc::new(LoggingAlertNotifier))
    }
}

impl CircuitBreakerManager {
    /// Creates a manager with the given alert notifier.
    #[must_use]
    pub fn new(notifier: Arc<dyn AlertNotifier>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            notifier,
        }
    }

    /// Registers a stage with zeroed state and a closed circuit.
    ///
    /// Idempotent: registering an already-known stage is a no-op and does
    /// not reset its counters.
    pub fn register(&self, stage_name: &str, recovery: Option<RecoveryStrategy>) {
        let mut entries = self.entries.lock();
        entries.entry(stage_name.to_string()).or_insert_with(|| BreakerEntry {
            state: CircuitBreakerState::new(),
            recovery: recovery.unwrap_or_default(),
        });
    }

    /// Returns whether the circuit for a stage is open.
    ///
    /// Unregistered and closed stages report false. An open circuit whose
    /// `circuit_open_until` has passed atomically transitions to closed
    /// (auto-recovery) and reports false.
    pub fn is_open(&self, stage_name: &str) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(stage_name) else {
            return false;
        };

        if !entry.state.circuit_open {
            return false;
        }

        let expired = entry
            .state
            .circuit_open_until
            .map_or(true, |until| Utc::now() >= until);

        if expired {
            entry.state.circuit_open = false;
            entry.state.circuit_open_until = None;
            info!(stage = %stage_name, "Circuit auto-recovered to closed");
            return false;
        }

        true
    }

    /// Opens the circuit for a stage and alerts the notifier.
    ///
    /// The open window is `recovery.timeout_seconds` from now. Opening an
    /// unregistered stage registers it first with the default policy.
    pub fn open(&self, stage_name: &str) {
        let message = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(stage_name.to_string()).or_insert_with(|| BreakerEntry {
                state: CircuitBreakerState::new(),
                recovery: RecoveryStrategy::default(),
            });

            let timeout = entry.recovery.timeout_seconds;
            entry.state.circuit_open = true;
            entry.state.circuit_open_until = Some(
                Utc::now()
                    + ChronoDuration::milliseconds((timeout * 1000.0) as i64),
            );

            format!(
                "Circuit opened for stage '{}' after {} failures; retrying in {}s",
                stage_name, entry.state.failure_count, timeout
            )
        };

        // Notifier dispatch outside the lock; a broken notifier must not
        // poison the manager.
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.notifier.notify(&message);
        }))
        .is_err()
        {
            warn!(stage = %stage_name, "Alert notifier panicked");
        }
    }

    /// Increments the failure counter for a stage.
    ///
    /// Counting only; whether the threshold warrants opening the circuit is
    /// the caller's decision.
    pub fn record_failure(&self, stage_name: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(stage_name) {
            entry.state.failure_count += 1;
            entry.state.last_failure_at = Some(Utc::now());
        } else {
            warn!(stage = %stage_name, "Failure recorded for unregistered stage; ignoring");
        }
    }

    /// Records one execution and its duration.
    pub fn record_execution(&self, stage_name: &str, duration: Duration) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(stage_name) {
            entry.state.execution_count += 1;
            entry.state.total_duration_seconds += duration.as_secs_f64();
        }
    }

    /// Returns the failure count for a stage (0 if unregistered).
    #[must_use]
    pub fn failure_count(&self, stage_name: &str) -> u32 {
        self.entries
            .lock()
            .get(stage_name)
            .map_or(0, |entry| entry.state.failure_count)
    }

    /// Returns a copy of the breaker state for a stage.
    #[must_use]
    pub fn state(&self, stage_name: &str) -> Option<CircuitBreakerState> {
        self.entries.lock().get(stage_name).map(|entry| entry.state.clone())
    }

    /// Returns a copy of the recovery strategy for a stage.
    #[must_use]
    pub fn recovery_strategy(&self, stage_name: &str) -> Option<RecoveryStrategy> {
        self.entries.lock().get(stage_name).map(|entry| entry.recovery.clone())
    }
}
