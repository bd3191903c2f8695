//! IDE-side module descriptions built from [`ModuleDetails`](crate::ModuleDetails).

use std::path::PathBuf;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceRootKind {
    Main,
    Test,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericModuleInfo {
    pub name: String,
    /// Names of the modules this module depends on.
    pub module_dependencies: Vec<String>,
    /// Names of the libraries this module depends on.
    pub library_dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaSourceRoot {
    pub path: PathBuf,
    pub kind: SourceRootKind,
    pub generated: bool,
    /// Dotted package of the directory, e.g. `com.example.app`. Empty for the default package.
    pub package_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PythonSourceRoot {
    pub path: PathBuf,
    pub kind: SourceRootKind,
    pub generated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRoot {
    pub path: PathBuf,
    pub kind: SourceRootKind,
}

/// A binary dependency, either shared through the library index or private to one module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Library {
    pub name: String,
    pub classes: Vec<String>,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JvmJdkInfo {
    /// Synthesized as `<project>-<java version>`.
    pub name: String,
    pub java_home: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KotlinAddendum {
    pub language_version: Option<String>,
    pub api_version: Option<String>,
    pub kotlinc_options: Vec<String>,
    /// Module names of the targets whose internals this module may see.
    pub associates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaModule {
    pub generic: GenericModuleInfo,
    pub base_directory: Option<PathBuf>,
    pub source_roots: Vec<JavaSourceRoot>,
    pub resource_roots: Vec<ResourceRoot>,
    /// Libraries only this module uses; empty when the module references shared libraries.
    pub module_level_libraries: Vec<Library>,
    pub compiler_output: Option<PathBuf>,
    /// Output directories to exclude from indexing.
    pub output_paths: Vec<PathBuf>,
    pub javac_options: Vec<String>,
    pub jdk: Option<JvmJdkInfo>,
    pub kotlin: Option<KotlinAddendum>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PythonSdkInfo {
    pub version: String,
    pub interpreter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PythonModule {
    pub generic: GenericModuleInfo,
    pub base_directory: Option<PathBuf>,
    pub source_roots: Vec<PythonSourceRoot>,
    pub resource_roots: Vec<ResourceRoot>,
    pub libraries: Vec<Library>,
    pub sdk: Option<PythonSdkInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Module {
    Java(JavaModule),
    Python(PythonModule),
}

impl Module {
    pub fn generic(&self) -> &GenericModuleInfo {
        match self {
            Module::Java(module) => &module.generic,
            Module::Python(module) => &module.generic,
        }
    }

    pub fn name(&self) -> &str {
        &self.generic().name
    }
}
