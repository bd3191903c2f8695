//! Collection of a [`ProjectDetails`] snapshot from a build server.
//!
//! The collector performs the `build/initialize` handshake once, then asks for the workspace
//! targets and fans out every per-target query concurrently. Each query may fail on its own; the
//! failure is reported to the sync console and the remaining queries still run to completion.

use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use trellis_bsp::{
    protocol::{
        method, BuildClientCapabilities, InitializeBuildParams, InitializeBuildResult,
        TargetsParams, BSP_VERSION,
    },
    uri, BspError, BuildServer, BuildTargetIdentifier, CancellationToken, ConsoleSink,
    FailureKind, TaskResult,
};
use trellis_config::TrellisConfig;

use crate::{ProjectDetails, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Initializing,
    CollectingTargets,
    CollectingPerTargetData,
    Complete,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorOptions {
    pub client_name: String,
    pub client_version: String,
    /// Language ids declared in the client capabilities.
    pub languages: Vec<String>,
    /// Upper bound for the `build/initialize` round trip.
    pub connect_timeout: Duration,
}

impl CollectorOptions {
    pub fn from_config(config: &TrellisConfig) -> Self {
        Self {
            client_name: config.sync.client_name.clone(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            languages: config.sync.languages.clone(),
            connect_timeout: config.bsp.connect_timeout(),
        }
    }
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self::from_config(&TrellisConfig::default())
    }
}

pub struct ProjectDetailsCollector<S> {
    server: S,
    project_root: PathBuf,
    options: CollectorOptions,
    console: Arc<dyn ConsoleSink>,
    state: Mutex<CollectorState>,
    server_info: Mutex<Option<InitializeBuildResult>>,
    next_run: AtomicU64,
}

impl<S: BuildServer> ProjectDetailsCollector<S> {
    pub fn new(
        server: S,
        project_root: &Path,
        options: CollectorOptions,
        console: Arc<dyn ConsoleSink>,
    ) -> Self {
        Self {
            server,
            project_root: project_root.to_path_buf(),
            options,
            console,
            state: Mutex::new(CollectorState::Idle),
            server_info: Mutex::new(None),
            next_run: AtomicU64::new(1),
        }
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn state(&self) -> CollectorState {
        *self.state.lock()
    }

    /// The server's answer to `build/initialize`, once the handshake has happened.
    pub fn server_info(&self) -> Option<InitializeBuildResult> {
        self.server_info.lock().clone()
    }

    fn set_state(&self, state: CollectorState) {
        *self.state.lock() = state;
    }

    /// Collects one snapshot.
    ///
    /// Cancelling `cancel` abandons every outstanding request and yields
    /// [`SyncError::Cancelled`]; a partial snapshot is never returned.
    pub async fn collect(&self, cancel: &CancellationToken) -> Result<ProjectDetails, SyncError> {
        let run = self.next_run.fetch_add(1, Ordering::Relaxed);
        let task_id = format!("collect-{run}");
        self.console
            .start_task(&task_id, None, "Collecting project details");

        let result = self.collect_inner(&task_id, cancel).await;

        match &result {
            Ok(details) => {
                self.set_state(CollectorState::Complete);
                tracing::info!(
                    target: "trellis.project",
                    targets = details.targets.len(),
                    libraries = details.libraries.as_ref().map(Vec::len),
                    "collected project details"
                );
                self.console
                    .finish_task(&task_id, None, TaskResult::Success);
            }
            Err(err) if err.is_cancelled() => {
                self.set_state(CollectorState::Cancelled);
                tracing::debug!(target: "trellis.project", "project details collection cancelled");
                self.console
                    .finish_task(&task_id, Some("Canceled"), TaskResult::Cancelled);
            }
            Err(err) => {
                self.set_state(CollectorState::Failed);
                tracing::error!(
                    target: "trellis.project",
                    error = %err,
                    "project details collection failed"
                );
                self.console.finish_task(
                    &task_id,
                    Some(&FailureKind::describe(err)),
                    TaskResult::Failure,
                );
            }
        }

        result
    }

    async fn collect_inner(
        &self,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ProjectDetails, SyncError> {
        let server_info = self.initialize(cancel).await?;
        let capabilities = &server_info.capabilities;

        self.set_state(CollectorState::CollectingTargets);
        let targets = self
            .call(
                task_id,
                method::WORKSPACE_BUILD_TARGETS,
                self.server.workspace_build_targets(cancel),
            )
            .await
            .map_err(|err| SyncError::request(method::WORKSPACE_BUILD_TARGETS, err))?
            .targets;

        let target_ids: Vec<BuildTargetIdentifier> =
            targets.iter().map(|target| target.id.clone()).collect();
        let with_language = |language: &str| -> Vec<BuildTargetIdentifier> {
            targets
                .iter()
                .filter(|target| target.has_language(language))
                .map(|target| target.id.clone())
                .collect()
        };
        let java_ids = with_language("java");
        let python_ids = with_language("python");

        self.set_state(CollectorState::CollectingPerTargetData);
        let all = || TargetsParams::new(target_ids.clone());

        let sources = self.call(
            task_id,
            method::SOURCES,
            self.server.build_target_sources(all(), cancel),
        );
        let resources = async {
            if !capabilities.supports_resources() {
                return Ok(Vec::new());
            }
            self.call(
                task_id,
                method::RESOURCES,
                self.server.build_target_resources(all(), cancel),
            )
            .await
            .map(|result| result.items)
        };
        let dependency_sources = async {
            if !capabilities.supports_dependency_sources() {
                return Ok(Vec::new());
            }
            self.call(
                task_id,
                method::DEPENDENCY_SOURCES,
                self.server.build_target_dependency_sources(all(), cancel),
            )
            .await
            .map(|result| result.items)
        };
        let javac_options = async {
            if java_ids.is_empty() {
                return Ok(Vec::new());
            }
            self.call(
                task_id,
                method::JAVAC_OPTIONS,
                self.server
                    .build_target_javac_options(TargetsParams::new(java_ids.clone()), cancel),
            )
            .await
            .map(|result| result.items)
        };
        let python_options = async {
            if python_ids.is_empty() {
                return Ok(Vec::new());
            }
            self.call(
                task_id,
                method::PYTHON_OPTIONS,
                self.server
                    .build_target_python_options(TargetsParams::new(python_ids.clone()), cancel),
            )
            .await
            .map(|result| result.items)
        };
        let output_paths = self.call(
            task_id,
            method::OUTPUT_PATHS,
            self.server.build_target_output_paths(all(), cancel),
        );
        let libraries = async {
            match self.server.workspace_libraries(cancel).await {
                Ok(result) => Some(result.libraries),
                Err(err) => {
                    tracing::warn!(
                        target: "trellis.project",
                        error = %err,
                        "workspace/libraries failed; continuing without a library index"
                    );
                    None
                }
            }
        };

        let (
            sources,
            resources,
            dependency_sources,
            javac_options,
            python_options,
            output_paths,
            libraries,
        ) = tokio::join!(
            sources,
            resources,
            dependency_sources,
            javac_options,
            python_options,
            output_paths,
            libraries
        );

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let mut details = ProjectDetails {
            target_ids,
            targets,
            sources: sources
                .map_err(|err| SyncError::request(method::SOURCES, err))?
                .items,
            resources: resources.map_err(|err| SyncError::request(method::RESOURCES, err))?,
            dependencies_sources: dependency_sources
                .map_err(|err| SyncError::request(method::DEPENDENCY_SOURCES, err))?,
            javac_options: javac_options
                .map_err(|err| SyncError::request(method::JAVAC_OPTIONS, err))?,
            python_options: python_options
                .map_err(|err| SyncError::request(method::PYTHON_OPTIONS, err))?,
            output_path_uris: output_paths
                .map_err(|err| SyncError::request(method::OUTPUT_PATHS, err))?
                .items
                .into_iter()
                .flat_map(|item| item.output_paths)
                .map(|path| path.uri)
                .collect(),
            libraries,
        };
        details.normalize();
        Ok(details)
    }

    /// Performs the `build/initialize` handshake unless it already happened.
    pub async fn initialize(
        &self,
        cancel: &CancellationToken,
    ) -> Result<InitializeBuildResult, SyncError> {
        if let Some(info) = self.server_info() {
            return Ok(info);
        }

        self.set_state(CollectorState::Initializing);
        let root_uri = uri::dir_to_file_uri(&self.project_root).ok_or_else(|| {
            SyncError::InvalidUri {
                uri: self.project_root.display().to_string(),
            }
        })?;
        let params = InitializeBuildParams {
            display_name: self.options.client_name.clone(),
            version: self.options.client_version.clone(),
            bsp_version: BSP_VERSION.to_string(),
            root_uri,
            capabilities: BuildClientCapabilities {
                language_ids: self.options.languages.clone(),
            },
            data: None,
        };

        let timeout = self.options.connect_timeout;
        let info = match tokio::time::timeout(timeout, self.server.build_initialize(params, cancel))
            .await
        {
            Ok(Ok(info)) => info,
            Ok(Err(err)) if err.is_cancelled() => return Err(SyncError::Cancelled),
            Ok(Err(err)) => return Err(SyncError::Initialize(err)),
            Err(_) => return Err(SyncError::Initialize(BspError::TimedOut { idle: timeout })),
        };
        self.server
            .on_build_initialized()
            .await
            .map_err(SyncError::Initialize)?;

        tracing::info!(
            target: "trellis.project",
            server = %info.display_name,
            version = %info.version,
            bsp_version = %info.bsp_version,
            "build server initialized"
        );
        *self.server_info.lock() = Some(info.clone());
        Ok(info)
    }

    /// Runs one request as a subtask of `parent`, reporting its outcome to the sync console.
    async fn call<T>(
        &self,
        parent: &str,
        method: &'static str,
        request: impl Future<Output = Result<T, BspError>>,
    ) -> Result<T, BspError> {
        let task_id = format!("{parent}/{method}");
        self.console.start_task(&task_id, Some(parent), method);

        let result = request.await;
        match &result {
            Ok(_) => self.console.finish_task(&task_id, None, TaskResult::Success),
            Err(err) => {
                let kind = FailureKind::classify(err);
                if kind != FailureKind::Cancelled {
                    tracing::warn!(target: "trellis.project", method, error = %err, "request failed");
                }
                let outcome = match kind {
                    FailureKind::Cancelled => TaskResult::Cancelled,
                    FailureKind::TimedOut | FailureKind::Failed => TaskResult::Failure,
                };
                self.console
                    .finish_task(&task_id, Some(&FailureKind::describe(err)), outcome);
            }
        }
        result
    }
}
