//! The queryable project state built from a [`ProjectDetails`] snapshot.
//!
//! Every known target is in exactly one partition: loaded (materialized as a module in the
//! workspace), not loaded, or invalid (its module could not be built). Loading and unloading
//! targets produces a [`MagicMetaModelDiff`] that the caller applies to the workspace.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use trellis_bsp::{
    protocol::{BuildTarget, SourceItemKind},
    BuildTargetIdentifier,
};

use crate::{
    diff::MagicMetaModelDiff,
    module::{Library, Module},
    module_details::ModuleDetailsTransformer,
    strategy::{ModuleNameProvider, StrategyTable, UriModuleNames},
    transform::{
        default_transformers, libraries::library_from_item, roots::all_source_dirs,
        transformer_for, ModuleTransformer, TransformContext,
    },
    ProjectDetails, SyncError,
};

/// Targets that claim the same source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlapGraph {
    edges: BTreeMap<BuildTargetIdentifier, BTreeSet<BuildTargetIdentifier>>,
}

impl OverlapGraph {
    pub fn build(details: &ProjectDetails) -> Self {
        let mut owners: BTreeMap<&str, BTreeSet<&BuildTargetIdentifier>> = BTreeMap::new();
        for item in &details.sources {
            for source in &item.sources {
                owners
                    .entry(source.uri.as_str())
                    .or_default()
                    .insert(&item.target);
            }
        }

        let mut edges: BTreeMap<BuildTargetIdentifier, BTreeSet<BuildTargetIdentifier>> =
            BTreeMap::new();
        for targets in owners.values().filter(|targets| targets.len() > 1) {
            for &a in targets {
                for &b in targets {
                    if a != b {
                        edges.entry(a.clone()).or_default().insert(b.clone());
                    }
                }
            }
        }
        Self { edges }
    }

    pub fn overlaps(&self, a: &BuildTargetIdentifier, b: &BuildTargetIdentifier) -> bool {
        self.edges.get(a).is_some_and(|set| set.contains(b))
    }

    pub fn overlapping(
        &self,
        id: &BuildTargetIdentifier,
    ) -> impl Iterator<Item = &BuildTargetIdentifier> {
        self.edges.get(id).into_iter().flatten()
    }
}

/// Picks the targets [`MagicMetaModel::load_default_targets`] loads.
pub trait DefaultTargetsPolicy: Send + Sync {
    /// Not-loaded targets to load, in load order.
    fn select(&self, model: &MagicMetaModel) -> Vec<BuildTargetIdentifier>;
}

/// Loads every compilable target that does not share a source file with a target that is
/// already loaded or chosen earlier.
///
/// Candidates with more source items go first; ties are broken by id.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompilableNonOverlapping;

impl DefaultTargetsPolicy for CompilableNonOverlapping {
    fn select(&self, model: &MagicMetaModel) -> Vec<BuildTargetIdentifier> {
        let details = model.details();
        let mut targets: HashMap<&BuildTargetIdentifier, &BuildTarget> = HashMap::new();
        for target in &details.targets {
            targets.entry(&target.id).or_insert(target);
        }
        let mut source_counts: HashMap<&BuildTargetIdentifier, usize> = HashMap::new();
        for item in &details.sources {
            source_counts
                .entry(&item.target)
                .or_insert(item.sources.len());
        }

        let mut candidates: Vec<(&BuildTargetIdentifier, usize)> = model
            .not_loaded_targets()
            .filter(|id| targets.get(id).is_some_and(|t| t.capabilities.can_compile))
            .map(|id| (id, source_counts.get(id).copied().unwrap_or(0)))
            .collect();
        candidates.sort_by(|(a, a_sources), (b, b_sources)| {
            b_sources.cmp(a_sources).then_with(|| a.cmp(b))
        });

        let mut chosen: HashSet<&BuildTargetIdentifier> = model.loaded_targets().collect();
        let mut selected = Vec::new();
        for (id, _) in candidates {
            if model
                .overlaps()
                .overlapping(id)
                .any(|other| chosen.contains(other))
            {
                continue;
            }
            chosen.insert(id);
            selected.push(id.clone());
        }
        selected
    }
}

/// Notified after every change to the set of loaded targets.
pub trait LoadedTargetsListener: Send + Sync {
    fn on_loaded_targets_changed(&self);
}

impl<F> LoadedTargetsListener for F
where
    F: Fn() + Send + Sync,
{
    fn on_loaded_targets_changed(&self) {
        self()
    }
}

/// Which targets own a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentTargetsDetails {
    pub loaded_target: Option<BuildTargetIdentifier>,
    pub not_loaded_targets: Vec<BuildTargetIdentifier>,
}

pub struct MagicMetaModelOptions {
    pub project_root: PathBuf,
    /// Used to name synthesized SDKs; defaults to the root directory name.
    pub project_name: String,
    pub module_names: Arc<dyn ModuleNameProvider>,
    pub transformers: StrategyTable<dyn ModuleTransformer>,
    pub default_targets_policy: Arc<dyn DefaultTargetsPolicy>,
}

impl MagicMetaModelOptions {
    pub fn new(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            project_name: project_root
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "project".to_string()),
            module_names: Arc::new(UriModuleNames),
            transformers: default_transformers(),
            default_targets_policy: Arc::new(CompilableNonOverlapping),
        }
    }

    pub fn with_module_names(mut self, module_names: Arc<dyn ModuleNameProvider>) -> Self {
        self.module_names = module_names;
        self
    }

    pub fn with_default_targets_policy(mut self, policy: Arc<dyn DefaultTargetsPolicy>) -> Self {
        self.default_targets_policy = policy;
        self
    }
}

/// Load state of the targets of one snapshot.
///
/// Not internally synchronized: the owner serializes load/unload calls.
pub struct MagicMetaModel {
    options: MagicMetaModelOptions,
    details: ProjectDetails,
    all_source_dirs: BTreeSet<PathBuf>,
    overlaps: OverlapGraph,
    /// Loaded targets and the name of their module.
    loaded: BTreeMap<BuildTargetIdentifier, String>,
    not_loaded: BTreeSet<BuildTargetIdentifier>,
    invalid: BTreeSet<BuildTargetIdentifier>,
    loaded_libraries: BTreeSet<String>,
    listeners: Vec<Arc<dyn LoadedTargetsListener>>,
    generation: u64,
}

/// A module built from the snapshot together with every library it references.
struct BuiltModule {
    module: Module,
    libraries: Vec<Library>,
}

impl MagicMetaModel {
    pub fn new(details: ProjectDetails, options: MagicMetaModelOptions) -> Self {
        let mut model = Self {
            options,
            details: ProjectDetails::default(),
            all_source_dirs: BTreeSet::new(),
            overlaps: OverlapGraph::default(),
            loaded: BTreeMap::new(),
            not_loaded: BTreeSet::new(),
            invalid: BTreeSet::new(),
            loaded_libraries: BTreeSet::new(),
            listeners: Vec::new(),
            generation: 0,
        };
        model.reset(details);
        model
    }

    fn reset(&mut self, details: ProjectDetails) {
        let described: HashSet<&BuildTargetIdentifier> =
            details.targets.iter().map(|target| &target.id).collect();
        let (known, invalid): (BTreeSet<_>, BTreeSet<_>) = details
            .target_ids
            .iter()
            .cloned()
            .partition(|id| described.contains(id));
        for id in &invalid {
            tracing::warn!(
                target: "trellis.project",
                build_target = %id,
                "build target listed without details"
            );
        }

        self.all_source_dirs = all_source_dirs(&details);
        self.overlaps = OverlapGraph::build(&details);
        self.details = details;
        self.loaded.clear();
        self.not_loaded = known;
        self.invalid = invalid;
        self.loaded_libraries.clear();
    }

    pub fn details(&self) -> &ProjectDetails {
        &self.details
    }

    pub fn project_root(&self) -> &Path {
        &self.options.project_root
    }

    pub fn overlaps(&self) -> &OverlapGraph {
        &self.overlaps
    }

    pub fn loaded_targets(&self) -> impl Iterator<Item = &BuildTargetIdentifier> {
        self.loaded.keys()
    }

    pub fn not_loaded_targets(&self) -> impl Iterator<Item = &BuildTargetIdentifier> {
        self.not_loaded.iter()
    }

    pub fn invalid_targets(&self) -> impl Iterator<Item = &BuildTargetIdentifier> {
        self.invalid.iter()
    }

    pub fn is_loaded(&self, id: &BuildTargetIdentifier) -> bool {
        self.loaded.contains_key(id)
    }

    /// Name of the module a loaded target was materialized as.
    pub fn module_name(&self, id: &BuildTargetIdentifier) -> Option<&str> {
        self.loaded.get(id).map(String::as_str)
    }

    pub fn add_listener(&mut self, listener: Arc<dyn LoadedTargetsListener>) {
        self.listeners.push(listener);
    }

    /// Incremented on every change to the set of loaded targets.
    ///
    /// Owners that keep the model behind a lock compare generations to notify their own
    /// listeners once the lock is released.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn loaded_targets_changed(&mut self) {
        self.generation += 1;
        for listener in &self.listeners {
            listener.on_loaded_targets_changed();
        }
    }

    /// Builds the module for `id` without changing any state.
    pub fn build_module(&self, id: &BuildTargetIdentifier) -> Result<Module, SyncError> {
        let transformer = ModuleDetailsTransformer::new(&self.details, &self.options.project_root);
        self.module_from(&transformer, id)
    }

    fn module_from(
        &self,
        transformer: &ModuleDetailsTransformer<'_>,
        id: &BuildTargetIdentifier,
    ) -> Result<Module, SyncError> {
        let details = transformer.module_details_for_target_id(id)?;
        let ctx = TransformContext {
            project_root: &self.options.project_root,
            project_name: &self.options.project_name,
            module_names: &*self.options.module_names,
            all_source_dirs: &self.all_source_dirs,
        };
        transformer_for(&self.options.transformers, &details.target).transform(&details, &ctx)
    }

    fn build(
        &self,
        transformer: &ModuleDetailsTransformer<'_>,
        id: &BuildTargetIdentifier,
    ) -> Result<BuiltModule, SyncError> {
        let module = self.module_from(transformer, id)?;
        let libraries = module
            .generic()
            .library_dependencies
            .iter()
            .filter_map(|name| transformer.library(&BuildTargetIdentifier::new(name.as_str())))
            .map(library_from_item)
            .collect();
        Ok(BuiltModule { module, libraries })
    }

    /// Builds the modules of `ids` against one indexed view of the snapshot.
    fn build_modules(
        &self,
        ids: Vec<BuildTargetIdentifier>,
    ) -> Vec<(BuildTargetIdentifier, Result<BuiltModule, SyncError>)> {
        let transformer = ModuleDetailsTransformer::new(&self.details, &self.options.project_root);
        ids.into_iter()
            .map(|id| {
                let built = self.build(&transformer, &id);
                (id, built)
            })
            .collect()
    }

    /// Loads the targets picked by the configured [`DefaultTargetsPolicy`].
    ///
    /// Targets whose module cannot be built become invalid and are skipped.
    pub fn load_default_targets(&mut self) -> MagicMetaModelDiff {
        let selected: Vec<BuildTargetIdentifier> = self
            .options
            .default_targets_policy
            .select(self)
            .into_iter()
            .filter(|id| self.not_loaded.contains(id))
            .collect();

        let mut diff = MagicMetaModelDiff::default();
        for (id, built) in self.build_modules(selected) {
            if !self.not_loaded.contains(&id) {
                continue;
            }
            match self.commit(&id, built) {
                Ok(loaded) => diff.merge(loaded),
                Err(err) => tracing::warn!(
                    target: "trellis.project",
                    build_target = %id,
                    error = %err,
                    "skipping build target"
                ),
            }
        }
        if !diff.is_empty() {
            self.loaded_targets_changed();
        }
        diff
    }

    /// Loads a single target.
    ///
    /// Overlaps with loaded targets are not checked here; the caller decides whether loading a
    /// target that shares files with a loaded one is acceptable.
    pub fn load_target(
        &mut self,
        id: &BuildTargetIdentifier,
    ) -> Result<MagicMetaModelDiff, SyncError> {
        if self.loaded.contains_key(id) {
            return Ok(MagicMetaModelDiff::default());
        }
        if self.invalid.contains(id) {
            return Err(SyncError::InvalidTarget(id.clone()));
        }
        if !self.not_loaded.contains(id) {
            return Err(SyncError::UnknownTarget(id.clone()));
        }

        let transformer = ModuleDetailsTransformer::new(&self.details, &self.options.project_root);
        let built = self.build(&transformer, id);
        let diff = self.commit(id, built)?;
        self.loaded_targets_changed();
        Ok(diff)
    }

    /// Moves a not-loaded target to the loaded partition, or to the invalid one when its module
    /// could not be built.
    fn commit(
        &mut self,
        id: &BuildTargetIdentifier,
        built: Result<BuiltModule, SyncError>,
    ) -> Result<MagicMetaModelDiff, SyncError> {
        let BuiltModule { module, libraries } = match built {
            Ok(built) => built,
            Err(err) => {
                tracing::warn!(
                    target: "trellis.project",
                    build_target = %id,
                    error = %err,
                    "build target cannot be loaded"
                );
                self.not_loaded.remove(id);
                self.invalid.insert(id.clone());
                return Err(SyncError::InvalidTarget(id.clone()));
            }
        };

        let libraries: Vec<Library> = libraries
            .into_iter()
            .filter(|library| self.loaded_libraries.insert(library.name.clone()))
            .collect();

        self.not_loaded.remove(id);
        self.loaded.insert(id.clone(), module.name().to_string());
        tracing::debug!(
            target: "trellis.project",
            build_target = %id,
            module = module.name(),
            "loaded build target"
        );

        Ok(MagicMetaModelDiff {
            modules_to_remove: Vec::new(),
            libraries_to_load: libraries,
            modules_to_load: vec![module],
        })
    }

    pub fn unload_target(
        &mut self,
        id: &BuildTargetIdentifier,
    ) -> Result<MagicMetaModelDiff, SyncError> {
        let Some(module_name) = self.loaded.remove(id) else {
            if self.not_loaded.contains(id) || self.invalid.contains(id) {
                return Ok(MagicMetaModelDiff::default());
            }
            return Err(SyncError::UnknownTarget(id.clone()));
        };
        self.not_loaded.insert(id.clone());
        tracing::debug!(target: "trellis.project", build_target = %id, "unloaded build target");
        self.loaded_targets_changed();

        Ok(MagicMetaModelDiff {
            modules_to_remove: vec![module_name],
            ..MagicMetaModelDiff::default()
        })
    }

    /// Replaces the snapshot after a resync.
    ///
    /// Every current module is removed; targets that were loaded and still exist are loaded
    /// again from the new snapshot.
    pub fn replace_details(&mut self, details: ProjectDetails) -> MagicMetaModelDiff {
        let previously_loaded: Vec<BuildTargetIdentifier> = self.loaded.keys().cloned().collect();
        let mut diff = MagicMetaModelDiff {
            modules_to_remove: self.loaded.values().cloned().collect(),
            ..MagicMetaModelDiff::default()
        };

        self.reset(details);
        let reloaded: Vec<BuildTargetIdentifier> = previously_loaded
            .into_iter()
            .filter(|id| self.not_loaded.contains(id))
            .collect();
        for (id, built) in self.build_modules(reloaded) {
            if let Ok(loaded) = self.commit(&id, built) {
                diff.merge(loaded);
            }
        }
        self.loaded_targets_changed();
        diff
    }

    /// The loaded target that owns `document_uri`, and the not-loaded targets that also claim it.
    pub fn targets_details_for_document(&self, document_uri: &str) -> DocumentTargetsDetails {
        let mut owners: BTreeSet<&BuildTargetIdentifier> = BTreeSet::new();
        for item in &self.details.sources {
            let claims = item.sources.iter().any(|source| match source.kind {
                SourceItemKind::File => source.uri == document_uri,
                SourceItemKind::Directory => {
                    let dir = source.uri.trim_end_matches('/');
                    document_uri
                        .strip_prefix(dir)
                        .is_some_and(|rest| rest.starts_with('/'))
                }
            });
            if claims {
                owners.insert(&item.target);
            }
        }

        DocumentTargetsDetails {
            loaded_target: owners
                .iter()
                .find(|id| self.loaded.contains_key(**id))
                .map(|id| (*id).clone()),
            not_loaded_targets: owners
                .iter()
                .filter(|id| self.not_loaded.contains(**id))
                .map(|id| (*id).clone())
                .collect(),
        }
    }
}
