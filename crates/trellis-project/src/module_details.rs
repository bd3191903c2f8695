use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use trellis_bsp::{
    protocol::{
        BuildTarget, DependencySourcesItem, JavacOptionsItem, LibraryItem, PythonOptionsItem,
        ResourcesItem, SourcesItem,
    },
    uri, BuildTargetIdentifier,
};

use crate::{resolver::DependencyGraph, ModuleDetails, ProjectDetails, SyncError};

/// Everything a snapshot reports about one target.
#[derive(Default)]
struct TargetItems<'a> {
    target: Option<&'a BuildTarget>,
    sources: Vec<&'a SourcesItem>,
    resources: Vec<&'a ResourcesItem>,
    dependencies_sources: Vec<&'a DependencySourcesItem>,
    javac_options: Option<&'a JavacOptionsItem>,
    python_options: Option<&'a PythonOptionsItem>,
}

/// Narrows a [`ProjectDetails`] snapshot to the data of a single target.
///
/// The snapshot is indexed by target id once, so building the details of every target is linear
/// in the size of the snapshot.
pub struct ModuleDetailsTransformer<'a> {
    details: &'a ProjectDetails,
    project_root: PathBuf,
    graph: DependencyGraph<'a>,
    target_ids: HashSet<&'a BuildTargetIdentifier>,
    items: HashMap<&'a BuildTargetIdentifier, TargetItems<'a>>,
}

impl<'a> ModuleDetailsTransformer<'a> {
    pub fn new(details: &'a ProjectDetails, project_root: &Path) -> Self {
        let mut items: HashMap<&BuildTargetIdentifier, TargetItems<'a>> = HashMap::new();
        for target in &details.targets {
            let slot = items.entry(&target.id).or_default();
            slot.target = slot.target.or(Some(target));
        }
        for item in &details.sources {
            items.entry(&item.target).or_default().sources.push(item);
        }
        for item in &details.resources {
            items.entry(&item.target).or_default().resources.push(item);
        }
        for item in &details.dependencies_sources {
            items
                .entry(&item.target)
                .or_default()
                .dependencies_sources
                .push(item);
        }
        for item in &details.javac_options {
            let slot = items.entry(&item.target).or_default();
            slot.javac_options = slot.javac_options.or(Some(item));
        }
        for item in &details.python_options {
            let slot = items.entry(&item.target).or_default();
            slot.python_options = slot.python_options.or(Some(item));
        }

        Self {
            details,
            project_root: project_root.to_path_buf(),
            graph: DependencyGraph::new(details.libraries.as_deref().unwrap_or_default()),
            target_ids: details.target_ids.iter().collect(),
            items,
        }
    }

    /// The library index entry for `id`.
    pub fn library(&self, id: &BuildTargetIdentifier) -> Option<&'a LibraryItem> {
        self.graph.library(id)
    }

    /// Whether `target` is the project root pseudo-target, i.e. its base directory is the
    /// project root itself.
    pub fn is_root_target(&self, target: &BuildTarget) -> bool {
        target
            .base_directory
            .as_deref()
            .and_then(uri::file_uri_to_path)
            .is_some_and(|base| base == self.project_root)
    }

    pub fn module_details_for_target_id(
        &self,
        id: &BuildTargetIdentifier,
    ) -> Result<ModuleDetails, SyncError> {
        let items = self
            .items
            .get(id)
            .ok_or_else(|| SyncError::UnknownTarget(id.clone()))?;
        let target = items
            .target
            .ok_or_else(|| SyncError::UnknownTarget(id.clone()))?;

        let details = self.details;
        let dependencies_sources = items.dependencies_sources.iter().copied().cloned().collect();
        let javac_options = items.javac_options.cloned();
        let python_options = items.python_options.cloned();

        if self.is_root_target(target) {
            return Ok(ModuleDetails {
                target: target.clone(),
                sources: Vec::new(),
                resources: Vec::new(),
                dependencies_sources,
                javac_options,
                python_options,
                output_path_uris: details.output_path_uris.clone(),
                library_dependencies: Some(Vec::new()),
                module_dependencies: Vec::new(),
            });
        }

        let closure = self.graph.all_dependencies(target);
        let library_dependencies = details.libraries.as_ref().map(|_| {
            closure
                .iter()
                .filter(|dep| self.graph.is_library(dep))
                .cloned()
                .collect()
        });
        let module_dependencies = closure
            .iter()
            .filter(|dep| *dep != id && self.target_ids.contains(dep))
            .cloned()
            .collect();

        Ok(ModuleDetails {
            target: target.clone(),
            sources: items.sources.iter().copied().cloned().collect(),
            resources: items.resources.iter().copied().cloned().collect(),
            dependencies_sources,
            javac_options,
            python_options,
            output_path_uris: Vec::new(),
            library_dependencies,
            module_dependencies,
        })
    }
}
