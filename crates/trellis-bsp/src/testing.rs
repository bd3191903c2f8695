//! An in-memory [`BuildServer`] for tests.
//!
//! Answers per-target requests from canned items, records every call, and can be told to fail
//! or hang individual methods.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use trellis_process::CancellationToken;

use crate::{
    protocol::{
        method, BuildTarget, BuildTargetIdentifier, CleanCacheParams, CleanCacheResult,
        CompileParams, CompileResult, DependencySourcesItem, DependencySourcesParams,
        DependencySourcesResult, InitializeBuildParams, InitializeBuildResult, JavacOptionsItem,
        JavacOptionsParams, JavacOptionsResult, LibraryItem, OutputPathsItem, OutputPathsParams,
        OutputPathsResult, PythonOptionsItem, PythonOptionsParams, PythonOptionsResult,
        ResourcesItem, ResourcesParams, ResourcesResult, RunParams, RunResult, SourcesItem,
        SourcesParams, SourcesResult, StatusCode, TestParams, TestResult,
        WorkspaceBuildTargetsResult, WorkspaceLibrariesResult,
    },
    BspError, BuildServer,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: String,
    pub targets: Vec<BuildTargetIdentifier>,
    pub origin_id: Option<String>,
}

type Latency = Arc<dyn Fn(&str, &[BuildTargetIdentifier]) -> Duration + Send + Sync>;

#[derive(Default)]
struct MockState {
    calls: Vec<RecordedCall>,
    failures: HashMap<String, BspError>,
    hangs: HashSet<String>,
    cancelled: Vec<String>,
}

#[derive(Default)]
pub struct MockBuildServer {
    initialize: InitializeBuildResult,
    targets: Vec<BuildTarget>,
    sources: Vec<SourcesItem>,
    resources: Vec<ResourcesItem>,
    dependency_sources: Vec<DependencySourcesItem>,
    javac_options: Vec<JavacOptionsItem>,
    python_options: Vec<PythonOptionsItem>,
    output_paths: Vec<OutputPathsItem>,
    libraries: Vec<LibraryItem>,
    compile_status: Option<StatusCode>,
    unclean: HashSet<BuildTargetIdentifier>,
    latency: Option<Latency>,
    state: Mutex<MockState>,
}

impl MockBuildServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initialize_result(mut self, result: InitializeBuildResult) -> Self {
        self.initialize = result;
        self
    }

    pub fn with_targets(mut self, targets: Vec<BuildTarget>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_sources(mut self, items: Vec<SourcesItem>) -> Self {
        self.sources = items;
        self
    }

    pub fn with_resources(mut self, items: Vec<ResourcesItem>) -> Self {
        self.resources = items;
        self
    }

    pub fn with_dependency_sources(mut self, items: Vec<DependencySourcesItem>) -> Self {
        self.dependency_sources = items;
        self
    }

    pub fn with_javac_options(mut self, items: Vec<JavacOptionsItem>) -> Self {
        self.javac_options = items;
        self
    }

    pub fn with_python_options(mut self, items: Vec<PythonOptionsItem>) -> Self {
        self.python_options = items;
        self
    }

    pub fn with_output_paths(mut self, items: Vec<OutputPathsItem>) -> Self {
        self.output_paths = items;
        self
    }

    pub fn with_libraries(mut self, libraries: Vec<LibraryItem>) -> Self {
        self.libraries = libraries;
        self
    }

    pub fn with_compile_status(mut self, status: StatusCode) -> Self {
        self.compile_status = Some(status);
        self
    }

    /// `buildTarget/cleanCache` reports `cleaned: false` for chunks containing these targets.
    pub fn with_unclean_targets(mut self, targets: Vec<BuildTargetIdentifier>) -> Self {
        self.unclean = targets.into_iter().collect();
        self
    }

    /// Delay each call by `latency(method, targets)`.
    pub fn with_latency(
        mut self,
        latency: impl Fn(&str, &[BuildTargetIdentifier]) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.latency = Some(Arc::new(latency));
        self
    }

    /// Make every later call to `method` fail with `err`.
    pub fn fail(&self, method: &str, err: BspError) {
        self.state.lock().failures.insert(method.to_string(), err);
    }

    /// Make every later call to `method` wait until it is cancelled.
    pub fn hang(&self, method: &str) {
        self.state.lock().hangs.insert(method.to_string());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.method == method)
            .cloned()
            .collect()
    }

    /// How many calls to `method` observed their cancellation.
    pub fn cancelled_calls(&self, method: &str) -> usize {
        self.state
            .lock()
            .cancelled
            .iter()
            .filter(|m| *m == method)
            .count()
    }

    async fn enter(
        &self,
        method: &str,
        targets: &[BuildTargetIdentifier],
        origin_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), BspError> {
        self.state.lock().calls.push(RecordedCall {
            method: method.to_string(),
            targets: targets.to_vec(),
            origin_id: origin_id.map(str::to_string),
        });

        let delay = self
            .latency
            .as_ref()
            .map(|latency| latency(method, targets))
            .unwrap_or_default();
        let (failure, hang) = {
            let state = self.state.lock();
            (state.failures.get(method).cloned(), state.hangs.contains(method))
        };

        if hang || !delay.is_zero() {
            let wait = async {
                if hang {
                    std::future::pending::<()>().await;
                } else {
                    tokio::time::sleep(delay).await;
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.state.lock().cancelled.push(method.to_string());
                    return Err(BspError::Cancelled);
                }
                _ = wait => {}
            }
        }

        if cancel.is_cancelled() {
            return Err(BspError::Cancelled);
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Items for the requested targets, in request order.
fn select<T: Clone>(
    items: &[T],
    targets: &[BuildTargetIdentifier],
    target_of: impl Fn(&T) -> &BuildTargetIdentifier,
) -> Vec<T> {
    let mut selected = Vec::new();
    for target in targets {
        selected.extend(
            items
                .iter()
                .filter(|item| target_of(item) == target)
                .cloned(),
        );
    }
    selected
}

#[async_trait]
impl BuildServer for MockBuildServer {
    async fn build_initialize(
        &self,
        _params: InitializeBuildParams,
        cancel: &CancellationToken,
    ) -> Result<InitializeBuildResult, BspError> {
        self.enter(method::BUILD_INITIALIZE, &[], None, cancel).await?;
        Ok(self.initialize.clone())
    }

    async fn on_build_initialized(&self) -> Result<(), BspError> {
        self.state.lock().calls.push(RecordedCall {
            method: method::BUILD_INITIALIZED.to_string(),
            targets: Vec::new(),
            origin_id: None,
        });
        Ok(())
    }

    async fn build_shutdown(&self, cancel: &CancellationToken) -> Result<(), BspError> {
        self.enter(method::BUILD_SHUTDOWN, &[], None, cancel).await
    }

    async fn on_build_exit(&self) -> Result<(), BspError> {
        Ok(())
    }

    async fn workspace_build_targets(
        &self,
        cancel: &CancellationToken,
    ) -> Result<WorkspaceBuildTargetsResult, BspError> {
        self.enter(method::WORKSPACE_BUILD_TARGETS, &[], None, cancel)
            .await?;
        Ok(WorkspaceBuildTargetsResult {
            targets: self.targets.clone(),
        })
    }

    async fn workspace_libraries(
        &self,
        cancel: &CancellationToken,
    ) -> Result<WorkspaceLibrariesResult, BspError> {
        self.enter(method::WORKSPACE_LIBRARIES, &[], None, cancel)
            .await?;
        Ok(WorkspaceLibrariesResult {
            libraries: self.libraries.clone(),
        })
    }

    async fn build_target_sources(
        &self,
        params: SourcesParams,
        cancel: &CancellationToken,
    ) -> Result<SourcesResult, BspError> {
        self.enter(method::SOURCES, &params.targets, None, cancel)
            .await?;
        Ok(SourcesResult {
            items: select(&self.sources, &params.targets, |item| &item.target),
        })
    }

    async fn build_target_resources(
        &self,
        params: ResourcesParams,
        cancel: &CancellationToken,
    ) -> Result<ResourcesResult, BspError> {
        self.enter(method::RESOURCES, &params.targets, None, cancel)
            .await?;
        Ok(ResourcesResult {
            items: select(&self.resources, &params.targets, |item| &item.target),
        })
    }

    async fn build_target_dependency_sources(
        &self,
        params: DependencySourcesParams,
        cancel: &CancellationToken,
    ) -> Result<DependencySourcesResult, BspError> {
        self.enter(method::DEPENDENCY_SOURCES, &params.targets, None, cancel)
            .await?;
        Ok(DependencySourcesResult {
            items: select(&self.dependency_sources, &params.targets, |item| {
                &item.target
            }),
        })
    }

    async fn build_target_javac_options(
        &self,
        params: JavacOptionsParams,
        cancel: &CancellationToken,
    ) -> Result<JavacOptionsResult, BspError> {
        self.enter(method::JAVAC_OPTIONS, &params.targets, None, cancel)
            .await?;
        Ok(JavacOptionsResult {
            items: select(&self.javac_options, &params.targets, |item| &item.target),
        })
    }

    async fn build_target_python_options(
        &self,
        params: PythonOptionsParams,
        cancel: &CancellationToken,
    ) -> Result<PythonOptionsResult, BspError> {
        self.enter(method::PYTHON_OPTIONS, &params.targets, None, cancel)
            .await?;
        Ok(PythonOptionsResult {
            items: select(&self.python_options, &params.targets, |item| &item.target),
        })
    }

    async fn build_target_output_paths(
        &self,
        params: OutputPathsParams,
        cancel: &CancellationToken,
    ) -> Result<OutputPathsResult, BspError> {
        self.enter(method::OUTPUT_PATHS, &params.targets, None, cancel)
            .await?;
        Ok(OutputPathsResult {
            items: select(&self.output_paths, &params.targets, |item| &item.target),
        })
    }

    async fn build_target_compile(
        &self,
        params: CompileParams,
        cancel: &CancellationToken,
    ) -> Result<CompileResult, BspError> {
        self.enter(
            method::COMPILE,
            &params.targets,
            params.origin_id.as_deref(),
            cancel,
        )
        .await?;
        Ok(CompileResult {
            origin_id: params.origin_id,
            status_code: self.compile_status.unwrap_or(StatusCode::Ok),
            data_kind: None,
            data: None,
        })
    }

    async fn build_target_run(
        &self,
        params: RunParams,
        cancel: &CancellationToken,
    ) -> Result<RunResult, BspError> {
        self.enter(
            method::RUN,
            std::slice::from_ref(&params.target),
            params.origin_id.as_deref(),
            cancel,
        )
        .await?;
        Ok(RunResult {
            origin_id: params.origin_id,
            status_code: StatusCode::Ok,
        })
    }

    async fn build_target_test(
        &self,
        params: TestParams,
        cancel: &CancellationToken,
    ) -> Result<TestResult, BspError> {
        self.enter(
            method::TEST,
            &params.targets,
            params.origin_id.as_deref(),
            cancel,
        )
        .await?;
        Ok(TestResult {
            origin_id: params.origin_id,
            status_code: StatusCode::Ok,
            data_kind: None,
            data: None,
        })
    }

    async fn build_target_clean_cache(
        &self,
        params: CleanCacheParams,
        cancel: &CancellationToken,
    ) -> Result<CleanCacheResult, BspError> {
        self.enter(method::CLEAN_CACHE, &params.targets, None, cancel)
            .await?;
        let cleaned = !params
            .targets
            .iter()
            .any(|target| self.unclean.contains(target));
        Ok(CleanCacheResult {
            message: Some(format!("cleaned {} targets", params.targets.len())),
            cleaned,
        })
    }
}
