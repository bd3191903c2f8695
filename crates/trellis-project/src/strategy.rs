//! Pluggable per-key strategies.
//!
//! Behaviour that differs per language or per build server (module transformers, module naming)
//! is looked up in a [`StrategyTable`] populated when the sync engine is built, with a default
//! for unknown keys.

use std::{collections::HashMap, sync::Arc};

use trellis_bsp::BuildTargetIdentifier;

pub struct StrategyTable<T: ?Sized> {
    entries: HashMap<String, Arc<T>>,
    default: Arc<T>,
}

impl<T: ?Sized> StrategyTable<T> {
    pub fn new(default: Arc<T>) -> Self {
        Self {
            entries: HashMap::new(),
            default,
        }
    }

    pub fn register(&mut self, key: impl Into<String>, strategy: Arc<T>) -> &mut Self {
        self.entries.insert(key.into(), strategy);
        self
    }

    pub fn with(mut self, key: impl Into<String>, strategy: Arc<T>) -> Self {
        self.register(key, strategy);
        self
    }

    /// The strategy registered for `key`, if any.
    pub fn lookup(&self, key: &str) -> Option<&Arc<T>> {
        self.entries.get(key)
    }

    /// The strategy registered for `key`, falling back to the default.
    pub fn get(&self, key: &str) -> &Arc<T> {
        self.lookup(key).unwrap_or(&self.default)
    }

    pub fn default_strategy(&self) -> &Arc<T> {
        &self.default
    }
}

impl<T: ?Sized> Clone for StrategyTable<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            default: Arc::clone(&self.default),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for StrategyTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        f.debug_struct("StrategyTable").field("keys", &keys).finish()
    }
}

/// Names the module created for a build target.
pub trait ModuleNameProvider: Send + Sync {
    fn module_name(&self, target: &BuildTargetIdentifier) -> String;
}

/// Uses the target URI verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct UriModuleNames;

impl ModuleNameProvider for UriModuleNames {
    fn module_name(&self, target: &BuildTargetIdentifier) -> String {
        target.uri.clone()
    }
}

/// Turns Bazel labels into dotted names: `@repo//pkg/sub:name` becomes `repo.pkg.sub.name`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BazelModuleNames;

impl ModuleNameProvider for BazelModuleNames {
    fn module_name(&self, target: &BuildTargetIdentifier) -> String {
        let label = target.uri.trim_start_matches('@');
        label
            .split(['/', ':'])
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Module naming keyed by the build server's display name.
pub fn default_module_names() -> StrategyTable<dyn ModuleNameProvider> {
    StrategyTable::new(Arc::new(UriModuleNames) as Arc<dyn ModuleNameProvider>)
        .with("bazelbsp", Arc::new(BazelModuleNames))
        .with("bazel", Arc::new(BazelModuleNames))
}
