//! Snapshots collected from a build server.

use std::collections::BTreeSet;

use serde::Serialize;
use trellis_bsp::{
    protocol::{
        BuildTarget, DependencySourcesItem, JavacOptionsItem, LibraryItem, PythonOptionsItem,
        ResourcesItem, SourcesItem,
    },
    BuildTargetIdentifier,
};

/// One consistent view of a project, as reported by the build server.
///
/// Every per-target item refers to a target in `target_ids`, and there is at most one item of
/// each kind per target. A snapshot is never mutated; a resync produces a new one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetails {
    pub target_ids: Vec<BuildTargetIdentifier>,
    pub targets: Vec<BuildTarget>,
    pub sources: Vec<SourcesItem>,
    pub resources: Vec<ResourcesItem>,
    pub dependencies_sources: Vec<DependencySourcesItem>,
    pub javac_options: Vec<JavacOptionsItem>,
    pub python_options: Vec<PythonOptionsItem>,
    pub output_path_uris: Vec<String>,
    /// `None` when the server could not list libraries.
    pub libraries: Option<Vec<LibraryItem>>,
}

impl ProjectDetails {
    /// Drops per-target items whose target is not part of the snapshot and keeps only the first
    /// item of each kind per target.
    pub(crate) fn normalize(&mut self) {
        let known: BTreeSet<BuildTargetIdentifier> = self.target_ids.iter().cloned().collect();
        retain_first_per_target(&mut self.sources, &known, |item| &item.target);
        retain_first_per_target(&mut self.resources, &known, |item| &item.target);
        retain_first_per_target(&mut self.dependencies_sources, &known, |item| &item.target);
        retain_first_per_target(&mut self.javac_options, &known, |item| &item.target);
        retain_first_per_target(&mut self.python_options, &known, |item| &item.target);

        let mut seen = BTreeSet::new();
        self.output_path_uris.retain(|uri| seen.insert(uri.clone()));
    }
}

fn retain_first_per_target<T>(
    items: &mut Vec<T>,
    known: &BTreeSet<BuildTargetIdentifier>,
    target_of: impl Fn(&T) -> &BuildTargetIdentifier,
) {
    let mut seen = BTreeSet::new();
    items.retain(|item| {
        let target = target_of(item);
        if !known.contains(target) {
            tracing::debug!(
                target: "trellis.project",
                build_target = %target,
                "dropping item for a target outside the snapshot"
            );
            return false;
        }
        seen.insert(target.clone())
    });
}

/// The slice of a [`ProjectDetails`] snapshot needed to build the module of one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDetails {
    pub target: BuildTarget,
    pub sources: Vec<SourcesItem>,
    pub resources: Vec<ResourcesItem>,
    pub dependencies_sources: Vec<DependencySourcesItem>,
    pub javac_options: Option<JavacOptionsItem>,
    pub python_options: Option<PythonOptionsItem>,
    pub output_path_uris: Vec<String>,
    /// Libraries from the library index the target depends on, directly or transitively.
    ///
    /// `None` means no library index was available; modules then derive libraries from
    /// `dependencies_sources`. `Some(vec![])` means the target has no library dependencies.
    pub library_dependencies: Option<Vec<BuildTargetIdentifier>>,
    pub module_dependencies: Vec<BuildTargetIdentifier>,
}
