//! Compile, run, test and clean-cache requests.
//!
//! Each request gets a fresh origin id (`build-N`, `run-N`, `test-N`) so the notifications the
//! server sends while working on it land under one task in the matching console.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use trellis_bsp::{
    protocol::{CleanCacheParams, CompileParams, RunParams, StatusCode, TestParams},
    BspError, BuildServer, BuildTargetIdentifier, CancellationToken, ConsoleKind, ConsoleRouter,
    FailureKind, TaskResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Ok,
    Error,
    Cancelled,
    TimedOut,
}

impl From<StatusCode> for TaskStatus {
    fn from(status: StatusCode) -> Self {
        match status {
            StatusCode::Ok => TaskStatus::Ok,
            StatusCode::Error => TaskStatus::Error,
            StatusCode::Cancelled => TaskStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub origin_id: String,
    pub status: TaskStatus,
    pub message: Option<String>,
}

impl TaskOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == TaskStatus::Ok
    }
}

pub struct TaskRunner<S> {
    server: S,
    router: Arc<ConsoleRouter>,
    next_origin: AtomicU64,
}

impl<S: BuildServer> TaskRunner<S> {
    pub fn new(server: S, router: Arc<ConsoleRouter>) -> Self {
        Self {
            server,
            router,
            next_origin: AtomicU64::new(1),
        }
    }

    fn next_origin_id(&self, kind: ConsoleKind) -> String {
        let n = self.next_origin.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", kind.origin_prefix())
    }

    pub async fn compile(
        &self,
        targets: Vec<BuildTargetIdentifier>,
        cancel: &CancellationToken,
    ) -> TaskOutcome {
        let title = format!("Compiling {}", describe_targets(&targets));
        self.drive(ConsoleKind::Build, &title, |origin_id| async move {
            let result = self
                .server
                .build_target_compile(
                    CompileParams {
                        targets,
                        origin_id: Some(origin_id),
                        arguments: None,
                    },
                    cancel,
                )
                .await?;
            Ok((result.status_code.into(), None))
        })
        .await
    }

    pub async fn run(
        &self,
        target: BuildTargetIdentifier,
        arguments: Vec<String>,
        cancel: &CancellationToken,
    ) -> TaskOutcome {
        let title = format!("Running {target}");
        self.drive(ConsoleKind::Run, &title, |origin_id| async move {
            let result = self
                .server
                .build_target_run(
                    RunParams {
                        target,
                        origin_id: Some(origin_id),
                        arguments: non_empty(arguments),
                    },
                    cancel,
                )
                .await?;
            Ok((result.status_code.into(), None))
        })
        .await
    }

    pub async fn test(
        &self,
        targets: Vec<BuildTargetIdentifier>,
        arguments: Vec<String>,
        cancel: &CancellationToken,
    ) -> TaskOutcome {
        let title = format!("Testing {}", describe_targets(&targets));
        self.drive(ConsoleKind::Test, &title, |origin_id| async move {
            let result = self
                .server
                .build_target_test(
                    TestParams {
                        targets,
                        origin_id: Some(origin_id),
                        arguments: non_empty(arguments),
                    },
                    cancel,
                )
                .await?;
            Ok((result.status_code.into(), None))
        })
        .await
    }

    /// `buildTarget/cleanCache` carries no origin id; progress is reported on the build console.
    pub async fn clean_cache(
        &self,
        targets: Vec<BuildTargetIdentifier>,
        cancel: &CancellationToken,
    ) -> TaskOutcome {
        let title = format!("Cleaning {}", describe_targets(&targets));
        self.drive(ConsoleKind::Build, &title, |_origin_id| async move {
            let result = self
                .server
                .build_target_clean_cache(CleanCacheParams::new(targets), cancel)
                .await?;
            let status = if result.cleaned {
                TaskStatus::Ok
            } else {
                TaskStatus::Error
            };
            Ok((status, result.message))
        })
        .await
    }

    async fn drive<F, Fut>(&self, kind: ConsoleKind, title: &str, request: F) -> TaskOutcome
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<(TaskStatus, Option<String>), BspError>>,
    {
        let origin_id = self.next_origin_id(kind);
        let console = self.router.console(kind).clone();
        console.start_task(&origin_id, None, title);

        let (status, message) = match request(origin_id.clone()).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let status = match FailureKind::classify(&err) {
                    FailureKind::Cancelled => TaskStatus::Cancelled,
                    FailureKind::TimedOut => TaskStatus::TimedOut,
                    FailureKind::Failed => TaskStatus::Error,
                };
                if status == TaskStatus::Error {
                    tracing::warn!(
                        target: "trellis.project",
                        origin_id = %origin_id,
                        error = %err,
                        "{title} failed"
                    );
                }
                (status, Some(FailureKind::describe(&err)))
            }
        };

        let result = match status {
            TaskStatus::Ok => TaskResult::Success,
            TaskStatus::Cancelled => TaskResult::Cancelled,
            TaskStatus::Error | TaskStatus::TimedOut => TaskResult::Failure,
        };
        console.finish_task(&origin_id, message.as_deref(), result);

        TaskOutcome {
            origin_id,
            status,
            message,
        }
    }
}

fn non_empty(arguments: Vec<String>) -> Option<Vec<String>> {
    (!arguments.is_empty()).then_some(arguments)
}

fn describe_targets(targets: &[BuildTargetIdentifier]) -> String {
    match targets {
        [single] => single.to_string(),
        many => format!("{} targets", many.len()),
    }
}
