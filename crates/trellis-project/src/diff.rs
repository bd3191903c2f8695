use crate::module::{Library, Module};

/// The host's project model, as seen by the sync engine.
///
/// The sink is mutated only through [`MagicMetaModelDiff::apply_on_workspace_model`], which the
/// caller runs inside the sink's own write transaction.
pub trait WorkspaceSink {
    fn remove_modules(&mut self, names: &[String]);
    fn load_libraries(&mut self, libraries: &[Library]);
    fn load_modules(&mut self, modules: &[Module]);
}

/// Module and library changes produced by loading or unloading targets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use = "a diff does nothing until it is applied to a workspace"]
pub struct MagicMetaModelDiff {
    pub modules_to_remove: Vec<String>,
    pub libraries_to_load: Vec<Library>,
    pub modules_to_load: Vec<Module>,
}

impl MagicMetaModelDiff {
    pub fn is_empty(&self) -> bool {
        self.modules_to_remove.is_empty()
            && self.libraries_to_load.is_empty()
            && self.modules_to_load.is_empty()
    }

    /// Appends `other`, which was produced after `self`.
    pub fn merge(&mut self, other: MagicMetaModelDiff) {
        self.modules_to_remove.extend(other.modules_to_remove);
        self.libraries_to_load.extend(other.libraries_to_load);
        self.modules_to_load.extend(other.modules_to_load);
    }

    /// Removals first, then libraries, then modules, so modules never reference a library the
    /// sink has not seen yet.
    pub fn apply_on_workspace_model(self, sink: &mut dyn WorkspaceSink) {
        if !self.modules_to_remove.is_empty() {
            sink.remove_modules(&self.modules_to_remove);
        }
        if !self.libraries_to_load.is_empty() {
            sink.load_libraries(&self.libraries_to_load);
        }
        if !self.modules_to_load.is_empty() {
            sink.load_modules(&self.modules_to_load);
        }
        tracing::debug!(
            target: "trellis.project",
            removed = self.modules_to_remove.len(),
            libraries = self.libraries_to_load.len(),
            loaded = self.modules_to_load.len(),
            "applied project model diff"
        );
    }
}

/// A [`WorkspaceSink`] that keeps everything in memory, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkspace {
    pub modules: std::collections::BTreeMap<String, Module>,
    pub libraries: std::collections::BTreeMap<String, Library>,
    /// Every call received, e.g. `remove_modules`, in order.
    pub operations: Vec<&'static str>,
}

impl WorkspaceSink for InMemoryWorkspace {
    fn remove_modules(&mut self, names: &[String]) {
        self.operations.push("remove_modules");
        for name in names {
            self.modules.remove(name);
        }
    }

    fn load_libraries(&mut self, libraries: &[Library]) {
        self.operations.push("load_libraries");
        for library in libraries {
            self.libraries.insert(library.name.clone(), library.clone());
        }
    }

    fn load_modules(&mut self, modules: &[Module]) {
        self.operations.push("load_modules");
        for module in modules {
            self.modules.insert(module.name().to_string(), module.clone());
        }
    }
}
