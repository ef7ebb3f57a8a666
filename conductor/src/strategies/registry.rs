//! Name-based strategy lookup.
//!
//! Callers select a strategy by string (usually from configuration); the
//! registry maps each name to a factory that builds a fresh strategy
//! instance from a [`ContextManager`] and [`StrategyOptions`]. Unknown
//! names fail loudly with the full list of valid names so a typo in a
//! config file surfaces immediately.

use super::{
    CheckpointedStrategy, ExecutionStrategy, FastStrategy, ParallelStrategy, StandardStrategy,
    StrategyOptions,
};
use crate::checkpoint::FileCheckpointStore;
use crate::context::ContextManager;
use crate::errors::EngineError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Builds a strategy instance from runtime inputs.
pub type StrategyFactory = Arc<
    dyn Fn(ContextManager, &StrategyOptions) -> Result<Arc<dyn ExecutionStrategy>, EngineError>
        + Send
        + Sync,
>;

/// Maps strategy names to factories.
pub struct StrategyRegistry {
    factories: RwLock<HashMap<String, StrategyFactory>>,
}

impl StrategyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a registry with the four built-in strategies registered
    /// under "standard", "fast", "parallel" and "checkpoint".
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();

        // Infallible registrations: the registry starts empty.
        let _ = registry.register(
            "standard",
            Arc::new(|manager, _options| {
                Ok(Arc::new(StandardStrategy::new(manager)) as Arc<dyn ExecutionStrategy>)
            }),
        );
        let _ = registry.register(
            "fast",
            Arc::new(|manager, options: &StrategyOptions| {
                let strategy = FastStrategy::new(manager, &options.skip_stages)?;
                Ok(Arc::new(strategy) as Arc<dyn ExecutionStrategy>)
            }),
        );
        let _ = registry.register(
            "parallel",
            Arc::new(|manager, options: &StrategyOptions| {
                let strategy = ParallelStrategy::new(manager)
                    .with_max_parallelism(options.max_parallelism)
                    .with_group_join_timeout(Duration::from_secs(
                        options.group_join_timeout_seconds,
                    ));
                Ok(Arc::new(strategy) as Arc<dyn ExecutionStrategy>)
            }),
        );
        let _ = registry.register(
            "checkpoint",
            Arc::new(|manager, options: &StrategyOptions| {
                let store = Arc::new(FileCheckpointStore::new(options.checkpoint_dir.clone()));
                Ok(Arc::new(CheckpointedStrategy::new(manager, store))
                    as Arc<dyn ExecutionStrategy>)
            }),
        );

        registry
    }

    /// Registers a factory under a name. Registering an already-taken name
    /// is rejected rather than silently replacing the existing factory.
    pub fn register(
        &self,
        name: impl Into<String>,
        factory: StrategyFactory,
    ) -> Result<(), EngineError> {
        let name = name.into();
        let mut factories = self.factories.write();
        if factories.contains_key(&name) {
            return Err(EngineError::DuplicateStrategy(name));
        }
        debug!(strategy = %name, "Registered execution strategy");
        factories.insert(name, factory);
        Ok(())
    }

    /// Builds the strategy registered under `name`.
    pub fn get(
        &self,
        name: &str,
        manager: ContextManager,
        options: &StrategyOptions,
    ) -> Result<Arc<dyn ExecutionStrategy>, EngineError> {
        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownStrategy {
                name: name.to_string(),
                valid: self.names(),
            })?;
        factory(manager, options)
    }

    /// Returns true if a factory is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// Returns the registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of registered factories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    /// Returns true if no factories are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_register_all_builtins() {
        let registry = StrategyRegistry::with_defaults();
        assert_eq!(
            registry.names(),
            vec!["checkpoint", "fast", "parallel", "standard"]
        );
    }

    #[test]
    fn test_get_builds_named_strategy() {
        let registry = StrategyRegistry::with_defaults();
        let options = StrategyOptions::default();

        for name in ["standard", "fast", "parallel", "checkpoint"] {
            let strategy = registry
                .get(name, ContextManager::new(), &options)
                .unwrap();
            assert_eq!(strategy.name(), name);
        }
    }

    #[test]
    fn test_unknown_name_lists_valid_names() {
        let registry = StrategyRegistry::with_defaults();
        let err = match registry.get("turbo", ContextManager::new(), &StrategyOptions::default())
        {
            Err(err) => err,
            Ok(_) => panic!("expected an unknown-strategy error"),
        };

        assert!(err.is_configuration());
        match err {
            EngineError::UnknownStrategy { name, valid } => {
                assert_eq!(name, "turbo");
                assert_eq!(valid, vec!["checkpoint", "fast", "parallel", "standard"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let registry = StrategyRegistry::with_defaults();
        let result = registry.register(
            "standard",
            Arc::new(|manager, _options| {
                Ok(Arc::new(StandardStrategy::new(manager)) as Arc<dyn ExecutionStrategy>)
            }),
        );

        assert!(matches!(result, Err(EngineError::DuplicateStrategy(_))));
        // The original factory is untouched.
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_custom_registration() {
        let registry = StrategyRegistry::new();
        assert!(registry.is_empty());

        registry
            .register(
                "custom",
                Arc::new(|manager, _options| {
                    Ok(Arc::new(StandardStrategy::new(manager)) as Arc<dyn ExecutionStrategy>)
                }),
            )
            .unwrap();

        assert!(registry.contains("custom"));
        assert!(!registry.contains("standard"));
    }

    #[test]
    fn test_fast_factory_propagates_bad_skip_list() {
        let registry = StrategyRegistry::with_defaults();
        let options = StrategyOptions {
            skip_stages: vec!["   ".to_string()],
            ..StrategyOptions::default()
        };

        let result = registry.get("fast", ContextManager::new(), &options);
        assert!(matches!(result, Err(EngineError::InvalidSkipList(_))));
    }
}
