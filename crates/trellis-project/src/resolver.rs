//! Transitive dependencies over the combined target/library graph.

use std::collections::{BTreeSet, HashMap};

use trellis_bsp::{
    protocol::{BuildTarget, LibraryItem},
    BuildTargetIdentifier,
};

/// Dependency edges of the library index.
///
/// Targets contribute their own direct dependencies; only libraries are expanded further, so the
/// closure of a target stops at the first module it reaches.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph<'a> {
    libraries: HashMap<&'a BuildTargetIdentifier, &'a LibraryItem>,
}

impl<'a> DependencyGraph<'a> {
    pub fn new(libraries: &'a [LibraryItem]) -> Self {
        Self {
            libraries: libraries
                .iter()
                .map(|library| (&library.id, library))
                .collect(),
        }
    }

    pub fn is_library(&self, id: &BuildTargetIdentifier) -> bool {
        self.libraries.contains_key(id)
    }

    pub fn library(&self, id: &BuildTargetIdentifier) -> Option<&'a LibraryItem> {
        self.libraries.get(id).copied()
    }

    pub fn all_dependencies(&self, target: &BuildTarget) -> BTreeSet<BuildTargetIdentifier> {
        self.closure(&target.dependencies)
    }

    /// Everything reachable from `direct`, expanding library entries until nothing new turns up.
    pub fn closure(&self, direct: &[BuildTargetIdentifier]) -> BTreeSet<BuildTargetIdentifier> {
        let mut visited: BTreeSet<BuildTargetIdentifier> = BTreeSet::new();
        let mut worklist: Vec<&BuildTargetIdentifier> = direct.iter().collect();

        while let Some(id) = worklist.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            if let Some(library) = self.libraries.get(id) {
                worklist.extend(
                    library
                        .dependencies
                        .iter()
                        .filter(|dep| !visited.contains(*dep)),
                );
            }
        }

        visited
    }
}
