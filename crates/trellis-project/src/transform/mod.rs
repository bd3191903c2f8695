//! Language-specific module construction.

mod java;
pub mod libraries;
mod python;
pub mod roots;

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use trellis_bsp::{protocol::BuildTarget, uri};

use crate::{
    module::{GenericModuleInfo, Module, SourceRootKind},
    strategy::{ModuleNameProvider, StrategyTable},
    ModuleDetails, SyncError,
};

pub use java::JavaModuleTransformer;
pub use python::PythonModuleTransformer;

/// Project-wide inputs shared by every module transformation of one snapshot.
pub struct TransformContext<'a> {
    pub project_root: &'a Path,
    pub project_name: &'a str,
    pub module_names: &'a dyn ModuleNameProvider,
    /// Source directories of every target, see [`roots::all_source_dirs`].
    pub all_source_dirs: &'a BTreeSet<PathBuf>,
}

pub trait ModuleTransformer: Send + Sync {
    fn transform(
        &self,
        details: &ModuleDetails,
        ctx: &TransformContext<'_>,
    ) -> Result<Module, SyncError>;
}

/// Module transformers keyed by language id. Targets in languages without a registered
/// transformer become Java modules.
pub fn default_transformers() -> StrategyTable<dyn ModuleTransformer> {
    let java: Arc<dyn ModuleTransformer> = Arc::new(JavaModuleTransformer);
    StrategyTable::new(java.clone())
        .with("java", java.clone())
        .with("kotlin", java.clone())
        .with("scala", java)
        .with("python", Arc::new(PythonModuleTransformer))
}

/// The transformer for `target`: the first of its languages with a registered transformer.
pub fn transformer_for<'t>(
    table: &'t StrategyTable<dyn ModuleTransformer>,
    target: &BuildTarget,
) -> &'t Arc<dyn ModuleTransformer> {
    target
        .language_ids
        .iter()
        .find_map(|language| table.lookup(language))
        .unwrap_or_else(|| table.default_strategy())
}

pub(crate) fn root_kind(target: &BuildTarget) -> SourceRootKind {
    if target.tags.iter().any(|tag| tag == "test") {
        SourceRootKind::Test
    } else {
        SourceRootKind::Main
    }
}

pub(crate) fn base_directory(target: &BuildTarget) -> Result<Option<PathBuf>, SyncError> {
    target
        .base_directory
        .as_deref()
        .map(|base| {
            uri::file_uri_to_path(base).ok_or_else(|| SyncError::InvalidUri {
                uri: base.to_string(),
            })
        })
        .transpose()
}

pub(crate) fn generic_info(
    details: &ModuleDetails,
    ctx: &TransformContext<'_>,
    library_dependencies: Vec<String>,
) -> GenericModuleInfo {
    GenericModuleInfo {
        name: ctx.module_names.module_name(&details.target.id),
        module_dependencies: details
            .module_dependencies
            .iter()
            .map(|dep| ctx.module_names.module_name(dep))
            .collect(),
        library_dependencies,
    }
}
