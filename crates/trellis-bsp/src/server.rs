use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use trellis_process::CancellationToken;

use crate::{
    client::BspConnection,
    protocol::{
        method, CleanCacheParams, CleanCacheResult, CompileParams, CompileResult,
        DependencySourcesParams, DependencySourcesResult, InitializeBuildParams,
        InitializeBuildResult, JavacOptionsParams, JavacOptionsResult, OutputPathsParams,
        OutputPathsResult, PythonOptionsParams, PythonOptionsResult, ResourcesParams,
        ResourcesResult, RunParams, RunResult, SourcesParams, SourcesResult, TestParams,
        TestResult, WorkspaceBuildTargetsResult, WorkspaceLibrariesResult,
    },
    BspError,
};

/// The requests a client can make of a build server.
///
/// Every request takes a cancellation token; cancelling it abandons the request and tells the
/// server. Implemented by [`BspConnection`] and by decorators such as
/// [`ChunkingBuildServer`](crate::ChunkingBuildServer).
#[async_trait]
pub trait BuildServer: Send + Sync {
    async fn build_initialize(
        &self,
        params: InitializeBuildParams,
        cancel: &CancellationToken,
    ) -> Result<InitializeBuildResult, BspError>;

    async fn on_build_initialized(&self) -> Result<(), BspError>;

    async fn build_shutdown(&self, cancel: &CancellationToken) -> Result<(), BspError>;

    async fn on_build_exit(&self) -> Result<(), BspError>;

    async fn workspace_build_targets(
        &self,
        cancel: &CancellationToken,
    ) -> Result<WorkspaceBuildTargetsResult, BspError>;

    /// `workspace/libraries`, a Bazel BSP extension. Servers that lack it answer with
    /// "method not found".
    async fn workspace_libraries(
        &self,
        cancel: &CancellationToken,
    ) -> Result<WorkspaceLibrariesResult, BspError>;

    async fn build_target_sources(
        &self,
        params: SourcesParams,
        cancel: &CancellationToken,
    ) -> Result<SourcesResult, BspError>;

    async fn build_target_resources(
        &self,
        params: ResourcesParams,
        cancel: &CancellationToken,
    ) -> Result<ResourcesResult, BspError>;

    async fn build_target_dependency_sources(
        &self,
        params: DependencySourcesParams,
        cancel: &CancellationToken,
    ) -> Result<DependencySourcesResult, BspError>;

    async fn build_target_javac_options(
        &self,
        params: JavacOptionsParams,
        cancel: &CancellationToken,
    ) -> Result<JavacOptionsResult, BspError>;

    async fn build_target_python_options(
        &self,
        params: PythonOptionsParams,
        cancel: &CancellationToken,
    ) -> Result<PythonOptionsResult, BspError>;

    async fn build_target_output_paths(
        &self,
        params: OutputPathsParams,
        cancel: &CancellationToken,
    ) -> Result<OutputPathsResult, BspError>;

    async fn build_target_compile(
        &self,
        params: CompileParams,
        cancel: &CancellationToken,
    ) -> Result<CompileResult, BspError>;

    async fn build_target_run(
        &self,
        params: RunParams,
        cancel: &CancellationToken,
    ) -> Result<RunResult, BspError>;

    async fn build_target_test(
        &self,
        params: TestParams,
        cancel: &CancellationToken,
    ) -> Result<TestResult, BspError>;

    async fn build_target_clean_cache(
        &self,
        params: CleanCacheParams,
        cancel: &CancellationToken,
    ) -> Result<CleanCacheResult, BspError>;
}

#[async_trait]
impl BuildServer for BspConnection {
    async fn build_initialize(
        &self,
        params: InitializeBuildParams,
        cancel: &CancellationToken,
    ) -> Result<InitializeBuildResult, BspError> {
        self.request(method::BUILD_INITIALIZE, params, cancel).await
    }

    async fn on_build_initialized(&self) -> Result<(), BspError> {
        self.notify(method::BUILD_INITIALIZED, Value::Null).await
    }

    async fn build_shutdown(&self, cancel: &CancellationToken) -> Result<(), BspError> {
        let _: Value = self
            .request(method::BUILD_SHUTDOWN, Value::Null, cancel)
            .await?;
        Ok(())
    }

    async fn on_build_exit(&self) -> Result<(), BspError> {
        self.notify(method::BUILD_EXIT, Value::Null).await
    }

    async fn workspace_build_targets(
        &self,
        cancel: &CancellationToken,
    ) -> Result<WorkspaceBuildTargetsResult, BspError> {
        self.request(method::WORKSPACE_BUILD_TARGETS, Value::Null, cancel)
            .await
    }

    async fn workspace_libraries(
        &self,
        cancel: &CancellationToken,
    ) -> Result<WorkspaceLibrariesResult, BspError> {
        self.request(method::WORKSPACE_LIBRARIES, Value::Null, cancel)
            .await
    }

    async fn build_target_sources(
        &self,
        params: SourcesParams,
        cancel: &CancellationToken,
    ) -> Result<SourcesResult, BspError> {
        self.request(method::SOURCES, params, cancel).await
    }

    async fn build_target_resources(
        &self,
        params: ResourcesParams,
        cancel: &CancellationToken,
    ) -> Result<ResourcesResult, BspError> {
        self.request(method::RESOURCES, params, cancel).await
    }

    async fn build_target_dependency_sources(
        &self,
        params: DependencySourcesParams,
        cancel: &CancellationToken,
    ) -> Result<DependencySourcesResult, BspError> {
        self.request(method::DEPENDENCY_SOURCES, params, cancel)
            .await
    }

    async fn build_target_javac_options(
        &self,
        params: JavacOptionsParams,
        cancel: &CancellationToken,
    ) -> Result<JavacOptionsResult, BspError> {
        self.request(method::JAVAC_OPTIONS, params, cancel).await
    }

    async fn build_target_python_options(
        &self,
        params: PythonOptionsParams,
        cancel: &CancellationToken,
    ) -> Result<PythonOptionsResult, BspError> {
        self.request(method::PYTHON_OPTIONS, params, cancel).await
    }

    async fn build_target_output_paths(
        &self,
        params: OutputPathsParams,
        cancel: &CancellationToken,
    ) -> Result<OutputPathsResult, BspError> {
        self.request(method::OUTPUT_PATHS, params, cancel).await
    }

    async fn build_target_compile(
        &self,
        params: CompileParams,
        cancel: &CancellationToken,
    ) -> Result<CompileResult, BspError> {
        self.request(method::COMPILE, params, cancel).await
    }

    async fn build_target_run(
        &self,
        params: RunParams,
        cancel: &CancellationToken,
    ) -> Result<RunResult, BspError> {
        self.request(method::RUN, params, cancel).await
    }

    async fn build_target_test(
        &self,
        params: TestParams,
        cancel: &CancellationToken,
    ) -> Result<TestResult, BspError> {
        self.request(method::TEST, params, cancel).await
    }

    async fn build_target_clean_cache(
        &self,
        params: CleanCacheParams,
        cancel: &CancellationToken,
    ) -> Result<CleanCacheResult, BspError> {
        self.request(method::CLEAN_CACHE, params, cancel).await
    }
}

#[async_trait]
impl<T: BuildServer + ?Sized> BuildServer for Arc<T> {
    async fn build_initialize(
        &self,
        params: InitializeBuildParams,
        cancel: &CancellationToken,
    ) -> Result<InitializeBuildResult, BspError> {
        (**self).build_initialize(params, cancel).await
    }

    async fn on_build_initialized(&self) -> Result<(), BspError> {
        (**self).on_build_initialized().await
    }

    async fn build_shutdown(&self, cancel: &CancellationToken) -> Result<(), BspError> {
        (**self).build_shutdown(cancel).await
    }

    async fn on_build_exit(&self) -> Result<(), BspError> {
        (**self).on_build_exit().await
    }

    async fn workspace_build_targets(
        &self,
        cancel: &CancellationToken,
    ) -> Result<WorkspaceBuildTargetsResult, BspError> {
        (**self).workspace_build_targets(cancel).await
    }

    async fn workspace_libraries(
        &self,
        cancel: &CancellationToken,
    ) -> Result<WorkspaceLibrariesResult, BspError> {
        (**self).workspace_libraries(cancel).await
    }

    async fn build_target_sources(
        &self,
        params: SourcesParams,
        cancel: &CancellationToken,
    ) -> Result<SourcesResult, BspError> {
        (**self).build_target_sources(params, cancel).await
    }

    async fn build_target_resources(
        &self,
        params: ResourcesParams,
        cancel: &CancellationToken,
    ) -> Result<ResourcesResult, BspError> {
        (**self).build_target_resources(params, cancel).await
    }

    async fn build_target_dependency_sources(
        &self,
        params: DependencySourcesParams,
        cancel: &CancellationToken,
    ) -> Result<DependencySourcesResult, BspError> {
        (**self).build_target_dependency_sources(params, cancel).await
    }

    async fn build_target_javac_options(
        &self,
        params: JavacOptionsParams,
        cancel: &CancellationToken,
    ) -> Result<JavacOptionsResult, BspError> {
        (**self).build_target_javac_options(params, cancel).await
    }

    async fn build_target_python_options(
        &self,
        params: PythonOptionsParams,
        cancel: &CancellationToken,
    ) -> Result<PythonOptionsResult, BspError> {
        (**self).build_target_python_options(params, cancel).await
    }

    async fn build_target_output_paths(
        &self,
        params: OutputPathsParams,
        cancel: &CancellationToken,
    ) -> Result<OutputPathsResult, BspError> {
        (**self).build_target_output_paths(params, cancel).await
    }

    async fn build_target_compile(
        &self,
        params: CompileParams,
        cancel: &CancellationToken,
    ) -> Result<CompileResult, BspError> {
        (**self).build_target_compile(params, cancel).await
    }

    async fn build_target_run(
        &self,
        params: RunParams,
        cancel: &CancellationToken,
    ) -> Result<RunResult, BspError> {
        (**self).build_target_run(params, cancel).await
    }

    async fn build_target_test(
        &self,
        params: TestParams,
        cancel: &CancellationToken,
    ) -> Result<TestResult, BspError> {
        (**self).build_target_test(params, cancel).await
    }

    async fn build_target_clean_cache(
        &self,
        params: CleanCacheParams,
        cancel: &CancellationToken,
    ) -> Result<CleanCacheResult, BspError> {
        (**self).build_target_clean_cache(params, cancel).await
    }
}
