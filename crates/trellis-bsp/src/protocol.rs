//! Build Server Protocol message types.
//!
//! Only the subset of BSP 2.x that project synchronization and task execution need is modeled.
//! Unknown fields are ignored on decode; optional fields are omitted on encode.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const BSP_VERSION: &str = "2.1.0";

/// JSON-RPC method names.
pub mod method {
    pub const BUILD_INITIALIZE: &str = "build/initialize";
    pub const BUILD_INITIALIZED: &str = "build/initialized";
    pub const BUILD_SHUTDOWN: &str = "build/shutdown";
    pub const BUILD_EXIT: &str = "build/exit";
    pub const WORKSPACE_BUILD_TARGETS: &str = "workspace/buildTargets";
    pub const WORKSPACE_LIBRARIES: &str = "workspace/libraries";
    pub const SOURCES: &str = "buildTarget/sources";
    pub const RESOURCES: &str = "buildTarget/resources";
    pub const DEPENDENCY_SOURCES: &str = "buildTarget/dependencySources";
    pub const JAVAC_OPTIONS: &str = "buildTarget/javacOptions";
    pub const PYTHON_OPTIONS: &str = "buildTarget/pythonOptions";
    pub const OUTPUT_PATHS: &str = "buildTarget/outputPaths";
    pub const COMPILE: &str = "buildTarget/compile";
    pub const RUN: &str = "buildTarget/run";
    pub const TEST: &str = "buildTarget/test";
    pub const CLEAN_CACHE: &str = "buildTarget/cleanCache";
    pub const CANCEL_REQUEST: &str = "$/cancelRequest";

    pub const SHOW_MESSAGE: &str = "build/showMessage";
    pub const LOG_MESSAGE: &str = "build/logMessage";
    pub const PUBLISH_DIAGNOSTICS: &str = "build/publishDiagnostics";
    pub const TASK_START: &str = "build/taskStart";
    pub const TASK_PROGRESS: &str = "build/taskProgress";
    pub const TASK_FINISH: &str = "build/taskFinish";
    pub const DID_CHANGE_BUILD_TARGET: &str = "buildTarget/didChange";
}

/// Well-known `dataKind` values for [`BuildTarget`].
pub mod data_kind {
    pub const JVM: &str = "jvm";
    pub const KOTLIN: &str = "kotlin";
    pub const PYTHON: &str = "python";
    pub const SCALA: &str = "scala";
}

/// Integer-coded protocol enums.
macro_rules! int_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "i64", into = "i64")]
        pub enum $name {
            $($variant = $value),+
        }

        impl TryFrom<i64> for $name {
            type Error = String;

            fn try_from(value: i64) -> Result<Self, String> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(format!("invalid {} value {other}", stringify!($name))),
                }
            }
        }

        impl From<$name> for i64 {
            fn from(value: $name) -> i64 {
                value as i64
            }
        }
    };
}

int_enum!(
    /// Outcome of compile/run/test requests and of tasks.
    StatusCode { Ok = 1, Error = 2, Cancelled = 3 }
);

int_enum!(
    SourceItemKind { File = 1, Directory = 2 }
);

int_enum!(
    MessageType { Error = 1, Warning = 2, Info = 3, Log = 4 }
);

int_enum!(
    BuildTargetEventKind { Created = 1, Changed = 2, Deleted = 3 }
);

/// Output paths use the same file/directory coding as sources.
pub type OutputPathItemKind = SourceItemKind;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildTargetIdentifier {
    pub uri: String,
}

impl BuildTargetIdentifier {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

impl fmt::Display for BuildTargetIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildTargetCapabilities {
    pub can_compile: bool,
    pub can_test: bool,
    pub can_run: bool,
    pub can_debug: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JvmBuildTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub java_home: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub java_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KotlinBuildTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default)]
    pub kotlinc_opts: Vec<String>,
    #[serde(default)]
    pub associates: Vec<BuildTargetIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jvm_build_target: Option<JvmBuildTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PythonBuildTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
}

/// Language-specific payload of a build target, decoded once from `dataKind` + `data`.
///
/// Payloads with an unrecognized kind (or that fail to decode) are kept verbatim as `Unknown`.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildTargetData {
    Jvm(JvmBuildTarget),
    Kotlin(KotlinBuildTarget),
    Python(PythonBuildTarget),
    Unknown {
        kind: Option<String>,
        data: Option<Value>,
    },
}

impl Default for BuildTargetData {
    fn default() -> Self {
        BuildTargetData::Unknown {
            kind: None,
            data: None,
        }
    }
}

impl BuildTargetData {
    fn decode(kind: Option<String>, data: Option<Value>) -> Self {
        fn typed<T: serde::de::DeserializeOwned>(
            kind: &str,
            data: &Option<Value>,
        ) -> Option<T> {
            let value = data
                .clone()
                .unwrap_or_else(|| Value::Object(Default::default()));
            match serde_json::from_value(value) {
                Ok(decoded) => Some(decoded),
                Err(err) => {
                    tracing::warn!(
                        target: "trellis.bsp",
                        data_kind = kind,
                        error = %err,
                        "ignoring malformed build target data"
                    );
                    None
                }
            }
        }

        let decoded = match kind.as_deref() {
            Some(data_kind::JVM) => typed(data_kind::JVM, &data).map(BuildTargetData::Jvm),
            Some(data_kind::KOTLIN) => {
                typed(data_kind::KOTLIN, &data).map(BuildTargetData::Kotlin)
            }
            Some(data_kind::PYTHON) => {
                typed(data_kind::PYTHON, &data).map(BuildTargetData::Python)
            }
            _ => None,
        };
        decoded.unwrap_or(BuildTargetData::Unknown { kind, data })
    }

    fn encode(self) -> (Option<String>, Option<Value>) {
        match self {
            BuildTargetData::Jvm(jvm) => (
                Some(data_kind::JVM.to_string()),
                serde_json::to_value(jvm).ok(),
            ),
            BuildTargetData::Kotlin(kotlin) => (
                Some(data_kind::KOTLIN.to_string()),
                serde_json::to_value(kotlin).ok(),
            ),
            BuildTargetData::Python(python) => (
                Some(data_kind::PYTHON.to_string()),
                serde_json::to_value(python).ok(),
            ),
            BuildTargetData::Unknown { kind, data } => (kind, data),
        }
    }

    /// JVM settings, including the JVM target embedded in Kotlin payloads.
    pub fn jvm(&self) -> Option<&JvmBuildTarget> {
        match self {
            BuildTargetData::Jvm(jvm) => Some(jvm),
            BuildTargetData::Kotlin(kotlin) => kotlin.jvm_build_target.as_ref(),
            _ => None,
        }
    }

    pub fn kotlin(&self) -> Option<&KotlinBuildTarget> {
        match self {
            BuildTargetData::Kotlin(kotlin) => Some(kotlin),
            _ => None,
        }
    }

    pub fn python(&self) -> Option<&PythonBuildTarget> {
        match self {
            BuildTargetData::Python(python) => Some(python),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawBuildTarget", into = "RawBuildTarget")]
pub struct BuildTarget {
    pub id: BuildTargetIdentifier,
    pub display_name: Option<String>,
    pub base_directory: Option<String>,
    pub tags: Vec<String>,
    pub language_ids: Vec<String>,
    pub dependencies: Vec<BuildTargetIdentifier>,
    pub capabilities: BuildTargetCapabilities,
    pub data: BuildTargetData,
}

impl BuildTarget {
    /// A bare target with no metadata; mostly useful for tests and synthetic targets.
    pub fn new(id: BuildTargetIdentifier) -> Self {
        Self {
            id,
            display_name: None,
            base_directory: None,
            tags: Vec::new(),
            language_ids: Vec::new(),
            dependencies: Vec::new(),
            capabilities: BuildTargetCapabilities::default(),
            data: BuildTargetData::default(),
        }
    }

    pub fn has_language(&self, language_id: &str) -> bool {
        self.language_ids.iter().any(|id| id == language_id)
    }
}

/// Wire shape of [`BuildTarget`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBuildTarget {
    id: BuildTargetIdentifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base_directory: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    language_ids: Vec<String>,
    #[serde(default)]
    dependencies: Vec<BuildTargetIdentifier>,
    #[serde(default)]
    capabilities: BuildTargetCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl From<RawBuildTarget> for BuildTarget {
    fn from(raw: RawBuildTarget) -> Self {
        Self {
            data: BuildTargetData::decode(raw.data_kind, raw.data),
            id: raw.id,
            display_name: raw.display_name,
            base_directory: raw.base_directory,
            tags: raw.tags,
            language_ids: raw.language_ids,
            dependencies: raw.dependencies,
            capabilities: raw.capabilities,
        }
    }
}

impl From<BuildTarget> for RawBuildTarget {
    fn from(target: BuildTarget) -> Self {
        let (data_kind, data) = target.data.encode();
        Self {
            id: target.id,
            display_name: target.display_name,
            base_directory: target.base_directory,
            tags: target.tags,
            language_ids: target.language_ids,
            dependencies: target.dependencies,
            capabilities: target.capabilities,
            data_kind,
            data,
        }
    }
}

// -----------------------------------------------------------------------------
// Initialization
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildClientCapabilities {
    pub language_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeBuildParams {
    pub display_name: String,
    pub version: String,
    pub bsp_version: String,
    pub root_uri: String,
    pub capabilities: BuildClientCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageProvider {
    #[serde(default)]
    pub language_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile_provider: Option<LanguageProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_provider: Option<LanguageProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_provider: Option<LanguageProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_provider: Option<LanguageProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inverse_sources_provider: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency_sources_provider: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources_provider: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_paths_provider: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_target_changed_provider: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_reload: Option<bool>,
}

impl BuildServerCapabilities {
    pub fn supports_resources(&self) -> bool {
        self.resources_provider.unwrap_or(false)
    }

    pub fn supports_dependency_sources(&self) -> bool {
        self.dependency_sources_provider.unwrap_or(false)
    }

    pub fn supports_output_paths(&self) -> bool {
        self.output_paths_provider.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeBuildResult {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub bsp_version: String,
    #[serde(default)]
    pub capabilities: BuildServerCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// -----------------------------------------------------------------------------
// Workspace queries
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceBuildTargetsResult {
    #[serde(default)]
    pub targets: Vec<BuildTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryItem {
    pub id: BuildTargetIdentifier,
    #[serde(default)]
    pub dependencies: Vec<BuildTargetIdentifier>,
    #[serde(default)]
    pub jars: Vec<String>,
    #[serde(default)]
    pub source_jars: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceLibrariesResult {
    #[serde(default)]
    pub libraries: Vec<LibraryItem>,
}

// -----------------------------------------------------------------------------
// Per-target queries
// -----------------------------------------------------------------------------

/// Params shared by every request that takes only a list of targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetsParams {
    pub targets: Vec<BuildTargetIdentifier>,
}

impl TargetsParams {
    pub fn new(targets: Vec<BuildTargetIdentifier>) -> Self {
        Self { targets }
    }
}

pub type SourcesParams = TargetsParams;
pub type ResourcesParams = TargetsParams;
pub type DependencySourcesParams = TargetsParams;
pub type JavacOptionsParams = TargetsParams;
pub type PythonOptionsParams = TargetsParams;
pub type OutputPathsParams = TargetsParams;
pub type CleanCacheParams = TargetsParams;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceItem {
    pub uri: String,
    pub kind: SourceItemKind,
    #[serde(default)]
    pub generated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcesItem {
    pub target: BuildTargetIdentifier,
    #[serde(default)]
    pub sources: Vec<SourceItem>,
    /// Source roots the server reports for the target; used to compute package prefixes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcesResult {
    #[serde(default)]
    pub items: Vec<SourcesItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcesItem {
    pub target: BuildTargetIdentifier,
    #[serde(default)]
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcesResult {
    #[serde(default)]
    pub items: Vec<ResourcesItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySourcesItem {
    pub target: BuildTargetIdentifier,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySourcesResult {
    #[serde(default)]
    pub items: Vec<DependencySourcesItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JavacOptionsItem {
    pub target: BuildTargetIdentifier,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub classpath: Vec<String>,
    #[serde(default)]
    pub class_directory: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JavacOptionsResult {
    #[serde(default)]
    pub items: Vec<JavacOptionsItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PythonOptionsItem {
    pub target: BuildTargetIdentifier,
    #[serde(default)]
    pub interpreter_options: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PythonOptionsResult {
    #[serde(default)]
    pub items: Vec<PythonOptionsItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPathItem {
    pub uri: String,
    pub kind: OutputPathItemKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputPathsItem {
    pub target: BuildTargetIdentifier,
    #[serde(default)]
    pub output_paths: Vec<OutputPathItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPathsResult {
    #[serde(default)]
    pub items: Vec<OutputPathsItem>,
}

// -----------------------------------------------------------------------------
// Tasks
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileParams {
    pub targets: Vec<BuildTargetIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    pub status_code: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParams {
    pub target: BuildTargetIdentifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    pub status_code: StatusCode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestParams {
    pub targets: Vec<BuildTargetIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    pub status_code: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanCacheResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub cleaned: bool,
}

// -----------------------------------------------------------------------------
// Server notifications
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskId {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parents: Option<Vec<String>>,
}

impl TaskId {
    pub fn parent(&self) -> Option<&str> {
        self.parents.as_ref()?.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowMessageParams {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    pub message: String,
}

pub type LogMessageParams = ShowMessageParams;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStartParams {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgressParams {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFinishParams {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDocumentIdentifier {
    pub uri: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: i32,
    pub character: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub range: Range,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn severity_label(&self) -> &'static str {
        match self.severity {
            Some(1) => "error",
            Some(2) => "warning",
            Some(3) => "info",
            Some(4) => "hint",
            _ => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishDiagnosticsParams {
    pub text_document: TextDocumentIdentifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_target: Option<BuildTargetIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    /// `None` is treated as `true`: the published list replaces earlier ones for the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTargetEvent {
    pub target: BuildTargetIdentifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<BuildTargetEventKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DidChangeBuildTarget {
    #[serde(default)]
    pub changes: Vec<BuildTargetEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelParams {
    pub id: Value,
}

/// Resolve a user-supplied target reference (URI, display name, or a fragment such as a Bazel
/// label) against the workspace's targets.
pub fn resolve_build_target_identifier(
    requested: &str,
    targets: &[BuildTarget],
) -> BuildTargetIdentifier {
    if let Some(target) = targets.iter().find(|target| target.id.uri == requested) {
        return target.id.clone();
    }

    if let Some(target) = targets
        .iter()
        .find(|target| target.display_name.as_deref() == Some(requested))
    {
        return target.id.clone();
    }

    // Bazel servers embed the label in the URI, and users think in labels.
    if let Some(target) = targets
        .iter()
        .find(|target| target.id.uri.contains(requested))
    {
        return target.id.clone();
    }

    BuildTargetIdentifier::new(requested)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn build_target_decodes_jvm_data_once() {
        let target: BuildTarget = serde_json::from_value(json!({
            "id": { "uri": "file:///ws/app" },
            "displayName": "app",
            "baseDirectory": "file:///ws/app/",
            "languageIds": ["java"],
            "capabilities": { "canCompile": true },
            "dataKind": "jvm",
            "data": { "javaHome": "file:///jdk", "javaVersion": "17" }
        }))
        .unwrap();

        assert_eq!(
            target.data.jvm().and_then(|jvm| jvm.java_version.as_deref()),
            Some("17")
        );
        assert!(target.capabilities.can_compile);
        assert!(!target.capabilities.can_test);
        assert!(target.has_language("java"));
    }

    #[test]
    fn kotlin_targets_expose_embedded_jvm_target() {
        let target: BuildTarget = serde_json::from_value(json!({
            "id": { "uri": "k" },
            "dataKind": "kotlin",
            "data": {
                "languageVersion": "1.9",
                "jvmBuildTarget": { "javaVersion": "11" }
            }
        }))
        .unwrap();

        assert!(target.data.kotlin().is_some());
        assert_eq!(
            target.data.jvm().and_then(|jvm| jvm.java_version.as_deref()),
            Some("11")
        );
    }

    #[test]
    fn unknown_or_malformed_data_is_preserved() {
        let target: BuildTarget = serde_json::from_value(json!({
            "id": { "uri": "s" },
            "dataKind": "scala",
            "data": { "scalaVersion": "3.3.0" }
        }))
        .unwrap();
        assert!(matches!(
            &target.data,
            BuildTargetData::Unknown { kind: Some(kind), data: Some(_) } if kind == "scala"
        ));

        let malformed: BuildTarget = serde_json::from_value(json!({
            "id": { "uri": "p" },
            "dataKind": "python",
            "data": ["not", "an", "object"]
        }))
        .unwrap();
        assert!(malformed.data.python().is_none());

        let encoded = serde_json::to_value(&target).unwrap();
        assert_eq!(encoded["dataKind"], "scala");
        assert_eq!(encoded["data"]["scalaVersion"], "3.3.0");
    }

    #[test]
    fn status_codes_use_integer_encoding() {
        let result: CompileResult =
            serde_json::from_value(json!({ "originId": "build-1", "statusCode": 2 })).unwrap();
        assert_eq!(result.status_code, StatusCode::Error);
        assert_eq!(
            serde_json::to_value(StatusCode::Cancelled).unwrap(),
            json!(3)
        );
        assert!(serde_json::from_value::<StatusCode>(json!(9)).is_err());
    }

    #[test]
    fn enums_with_an_error_variant_convert_from_integers() {
        assert_eq!(StatusCode::try_from(2), Ok(StatusCode::Error));
        assert_eq!(MessageType::try_from(1), Ok(MessageType::Error));
        assert_eq!(
            MessageType::try_from(7),
            Err("invalid MessageType value 7".to_string())
        );
        assert_eq!(i64::from(MessageType::Log), 4);
    }

    #[test]
    fn resolves_targets_by_uri_display_name_or_fragment() {
        let mut app = BuildTarget::new(BuildTargetIdentifier::new("bsp://ws?target=//app:lib"));
        app.display_name = Some("app-lib".to_string());
        let targets = vec![app];

        assert_eq!(
            resolve_build_target_identifier("app-lib", &targets).uri,
            "bsp://ws?target=//app:lib"
        );
        assert_eq!(
            resolve_build_target_identifier("//app:lib", &targets).uri,
            "bsp://ws?target=//app:lib"
        );
        assert_eq!(
            resolve_build_target_identifier("//other", &targets).uri,
            "//other"
        );
    }
}
