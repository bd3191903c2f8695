//! Splits large per-target requests into concurrent chunks.
//!
//! Some servers choke on a single `buildTarget/sources` request naming thousands of targets.
//! [`ChunkingBuildServer`] fans such requests out in `max(floor(sqrt(n)), min_chunk_size)`-sized
//! chunks and concatenates the items back in chunk order, so callers see one result.

use std::future::Future;

use async_trait::async_trait;
use futures::future::join_all;
use trellis_process::CancellationToken;

use crate::{
    protocol::{
        BuildTargetIdentifier, CleanCacheParams, CleanCacheResult, CompileParams, CompileResult,
        DependencySourcesItem, DependencySourcesParams, DependencySourcesResult,
        InitializeBuildParams, InitializeBuildResult, JavacOptionsItem, JavacOptionsParams,
        JavacOptionsResult, OutputPathsItem, OutputPathsParams, OutputPathsResult,
        PythonOptionsItem, PythonOptionsParams, PythonOptionsResult, ResourcesItem,
        ResourcesParams, ResourcesResult, RunParams, RunResult, SourcesItem, SourcesParams,
        SourcesResult, TargetsParams, TestParams, TestResult, WorkspaceBuildTargetsResult,
        WorkspaceLibrariesResult,
    },
    BspError, BuildServer,
};

pub const DEFAULT_MIN_CHUNK_SIZE: usize = 100;

/// Chunk size for `total` targets: `max(floor(sqrt(total)), min_chunk_size)`, never zero.
pub fn chunk_size(total: usize, min_chunk_size: usize) -> usize {
    let sqrt = (total as f64).sqrt().floor() as usize;
    sqrt.max(min_chunk_size).max(1)
}

/// Split `targets` into consecutive chunks.
///
/// An empty list yields a single empty chunk so the server still sees one request.
pub fn chunk_targets(
    targets: &[BuildTargetIdentifier],
    min_chunk_size: usize,
) -> Vec<Vec<BuildTargetIdentifier>> {
    if targets.is_empty() {
        return vec![Vec::new()];
    }
    let size = chunk_size(targets.len(), min_chunk_size);
    targets.chunks(size).map(<[_]>::to_vec).collect()
}

pub struct ChunkingBuildServer<S> {
    base: S,
    min_chunk_size: usize,
}

impl<S: BuildServer> ChunkingBuildServer<S> {
    pub fn new(base: S, min_chunk_size: usize) -> Self {
        Self {
            base,
            min_chunk_size: min_chunk_size.max(1),
        }
    }

    pub fn base(&self) -> &S {
        &self.base
    }

    pub fn min_chunk_size(&self) -> usize {
        self.min_chunk_size
    }

    /// Issue one request per chunk and wait for all of them.
    ///
    /// Every chunk gets a child of `cancel`, so cancelling the aggregate (or dropping it)
    /// cancels all chunks.
    async fn chunked<F, Fut, T>(
        &self,
        targets: Vec<BuildTargetIdentifier>,
        cancel: &CancellationToken,
        request: F,
    ) -> Result<Vec<T>, BspError>
    where
        F: Fn(TargetsParams, CancellationToken) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, BspError>> + Send,
        T: Send,
    {
        let chunks = chunk_targets(&targets, self.min_chunk_size);
        if chunks.len() > 1 {
            tracing::debug!(
                target: "trellis.bsp",
                targets = targets.len(),
                chunks = chunks.len(),
                "splitting BSP request into chunks"
            );
        }

        let chunk_cancel = cancel.child_token();
        let _cancel_on_drop = chunk_cancel.clone().drop_guard();

        let results = join_all(
            chunks
                .into_iter()
                .map(|chunk| request(TargetsParams::new(chunk), chunk_cancel.clone())),
        )
        .await;

        let mut values = Vec::with_capacity(results.len());
        let mut first_err = None;
        for result in results {
            match result {
                Ok(value) => values.push(value),
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }

        match first_err {
            None => Ok(values),
            Some(_) if cancel.is_cancelled() => Err(BspError::Cancelled),
            Some(err) => Err(err),
        }
    }
}

#[async_trait]
impl<S: BuildServer> BuildServer for ChunkingBuildServer<S> {
    async fn build_initialize(
        &self,
        params: InitializeBuildParams,
        cancel: &CancellationToken,
    ) -> Result<InitializeBuildResult, BspError> {
        self.base.build_initialize(params, cancel).await
    }

    async fn on_build_initialized(&self) -> Result<(), BspError> {
        self.base.on_build_initialized().await
    }

    async fn build_shutdown(&self, cancel: &CancellationToken) -> Result<(), BspError> {
        self.base.build_shutdown(cancel).await
    }

    async fn on_build_exit(&self) -> Result<(), BspError> {
        self.base.on_build_exit().await
    }

    async fn workspace_build_targets(
        &self,
        cancel: &CancellationToken,
    ) -> Result<WorkspaceBuildTargetsResult, BspError> {
        self.base.workspace_build_targets(cancel).await
    }

    async fn workspace_libraries(
        &self,
        cancel: &CancellationToken,
    ) -> Result<WorkspaceLibrariesResult, BspError> {
        self.base.workspace_libraries(cancel).await
    }

    async fn build_target_sources(
        &self,
        params: SourcesParams,
        cancel: &CancellationToken,
    ) -> Result<SourcesResult, BspError> {
        let parts = self
            .chunked(params.targets, cancel, |chunk, token| async move {
                self.base.build_target_sources(chunk, &token).await
            })
            .await?;
        Ok(SourcesResult {
            items: flatten::<_, SourcesItem>(parts, |r: SourcesResult| r.items),
        })
    }

    async fn build_target_resources(
        &self,
        params: ResourcesParams,
        cancel: &CancellationToken,
    ) -> Result<ResourcesResult, BspError> {
        let parts = self
            .chunked(params.targets, cancel, |chunk, token| async move {
                self.base.build_target_resources(chunk, &token).await
            })
            .await?;
        Ok(ResourcesResult {
            items: flatten::<_, ResourcesItem>(parts, |r: ResourcesResult| r.items),
        })
    }

    async fn build_target_dependency_sources(
        &self,
        params: DependencySourcesParams,
        cancel: &CancellationToken,
    ) -> Result<DependencySourcesResult, BspError> {
        let parts = self
            .chunked(params.targets, cancel, |chunk, token| async move {
                self.base.build_target_dependency_sources(chunk, &token).await
            })
            .await?;
        Ok(DependencySourcesResult {
            items: flatten::<_, DependencySourcesItem>(parts, |r: DependencySourcesResult| {
                r.items
            }),
        })
    }

    async fn build_target_javac_options(
        &self,
        params: JavacOptionsParams,
        cancel: &CancellationToken,
    ) -> Result<JavacOptionsResult, BspError> {
        let parts = self
            .chunked(params.targets, cancel, |chunk, token| async move {
                self.base.build_target_javac_options(chunk, &token).await
            })
            .await?;
        Ok(JavacOptionsResult {
            items: flatten::<_, JavacOptionsItem>(parts, |r: JavacOptionsResult| r.items),
        })
    }

    async fn build_target_python_options(
        &self,
        params: PythonOptionsParams,
        cancel: &CancellationToken,
    ) -> Result<PythonOptionsResult, BspError> {
        let parts = self
            .chunked(params.targets, cancel, |chunk, token| async move {
                self.base.build_target_python_options(chunk, &token).await
            })
            .await?;
        Ok(PythonOptionsResult {
            items: flatten::<_, PythonOptionsItem>(parts, |r: PythonOptionsResult| r.items),
        })
    }

    async fn build_target_output_paths(
        &self,
        params: OutputPathsParams,
        cancel: &CancellationToken,
    ) -> Result<OutputPathsResult, BspError> {
        let parts = self
            .chunked(params.targets, cancel, |chunk, token| async move {
                self.base.build_target_output_paths(chunk, &token).await
            })
            .await?;
        Ok(OutputPathsResult {
            items: flatten::<_, OutputPathsItem>(parts, |r: OutputPathsResult| r.items),
        })
    }

    async fn build_target_compile(
        &self,
        params: CompileParams,
        cancel: &CancellationToken,
    ) -> Result<CompileResult, BspError> {
        self.base.build_target_compile(params, cancel).await
    }

    async fn build_target_run(
        &self,
        params: RunParams,
        cancel: &CancellationToken,
    ) -> Result<RunResult, BspError> {
        self.base.build_target_run(params, cancel).await
    }

    async fn build_target_test(
        &self,
        params: TestParams,
        cancel: &CancellationToken,
    ) -> Result<TestResult, BspError> {
        self.base.build_target_test(params, cancel).await
    }

    /// `cleaned` is the conjunction of every chunk; messages are joined with newlines.
    async fn build_target_clean_cache(
        &self,
        params: CleanCacheParams,
        cancel: &CancellationToken,
    ) -> Result<CleanCacheResult, BspError> {
        let parts = self
            .chunked(params.targets, cancel, |chunk, token| async move {
                self.base.build_target_clean_cache(chunk, &token).await
            })
            .await?;

        let cleaned = parts.iter().all(|part| part.cleaned);
        let messages: Vec<String> = parts.into_iter().filter_map(|part| part.message).collect();
        Ok(CleanCacheResult {
            cleaned,
            message: (!messages.is_empty()).then(|| messages.join("\n")),
        })
    }
}

fn flatten<R, T>(parts: Vec<R>, items: impl Fn(R) -> Vec<T>) -> Vec<T> {
    parts.into_iter().flat_map(items).collect()
}
