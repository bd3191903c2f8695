//! Routing of server notifications to task consoles.
//!
//! Each request the client starts carries an `originId` whose prefix (`build-`, `test-`,
//! `run-`) selects the console its notifications go to; everything else lands in the sync
//! console. Task start/finish notifications build a tree under the origin's root task.

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;

use crate::{
    client::{NotificationHandler, ServerNotification},
    protocol::{
        BuildTargetEvent, Diagnostic, MessageType, PublishDiagnosticsParams, ShowMessageParams,
        StatusCode, TaskFinishParams, TaskProgressParams, TaskStartParams,
    },
    uri,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConsoleKind {
    Sync,
    Build,
    Test,
    Run,
}

impl ConsoleKind {
    pub const ALL: [ConsoleKind; 4] = [
        ConsoleKind::Sync,
        ConsoleKind::Build,
        ConsoleKind::Test,
        ConsoleKind::Run,
    ];

    /// The origin id prefix used for requests that report to this console.
    pub fn origin_prefix(self) -> &'static str {
        match self {
            ConsoleKind::Sync => "sync",
            ConsoleKind::Build => "build",
            ConsoleKind::Test => "test",
            ConsoleKind::Run => "run",
        }
    }

    pub fn for_origin(origin_id: Option<&str>) -> Self {
        let Some(origin_id) = origin_id else {
            return ConsoleKind::Sync;
        };
        [ConsoleKind::Build, ConsoleKind::Test, ConsoleKind::Run]
            .into_iter()
            .find(|kind| {
                origin_id
                    .strip_prefix(kind.origin_prefix())
                    .is_some_and(|rest| rest.starts_with('-'))
            })
            .unwrap_or(ConsoleKind::Sync)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for ConsoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.origin_prefix())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResult {
    Success,
    Failure,
    Cancelled,
}

impl From<StatusCode> for TaskResult {
    fn from(status: StatusCode) -> Self {
        match status {
            StatusCode::Ok => TaskResult::Success,
            StatusCode::Error => TaskResult::Failure,
            StatusCode::Cancelled => TaskResult::Cancelled,
        }
    }
}

/// A tree-structured output console.
pub trait ConsoleSink: Send + Sync {
    fn start_task(&self, task_id: &str, parent_id: Option<&str>, title: &str);
    /// `task_id == None` writes to the console's top level.
    fn add_message(&self, task_id: Option<&str>, message: &str);
    fn finish_task(&self, task_id: &str, message: Option<&str>, result: TaskResult);
}

/// Writes console events to the log.
#[derive(Debug, Clone, Copy)]
pub struct TracingConsole {
    kind: ConsoleKind,
}

impl TracingConsole {
    pub fn new(kind: ConsoleKind) -> Self {
        Self { kind }
    }
}

impl ConsoleSink for TracingConsole {
    fn start_task(&self, task_id: &str, parent_id: Option<&str>, title: &str) {
        tracing::info!(
            target: "trellis.console",
            console = %self.kind,
            task = task_id,
            parent = parent_id,
            "{title}"
        );
    }

    fn add_message(&self, task_id: Option<&str>, message: &str) {
        tracing::info!(target: "trellis.console", console = %self.kind, task = task_id, "{message}");
    }

    fn finish_task(&self, task_id: &str, message: Option<&str>, result: TaskResult) {
        tracing::info!(
            target: "trellis.console",
            console = %self.kind,
            task = task_id,
            result = ?result,
            "{}",
            message.unwrap_or("finished")
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    Start {
        task_id: String,
        parent_id: Option<String>,
        title: String,
    },
    Message {
        task_id: Option<String>,
        message: String,
    },
    Finish {
        task_id: String,
        message: Option<String>,
        result: TaskResult,
    },
}

/// Keeps every event in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingConsole {
    events: Mutex<Vec<ConsoleEvent>>,
}

impl RecordingConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ConsoleEvent> {
        self.events.lock().clone()
    }

    /// Every plain message, in order.
    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ConsoleEvent::Message { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}

impl ConsoleSink for RecordingConsole {
    fn start_task(&self, task_id: &str, parent_id: Option<&str>, title: &str) {
        self.events.lock().push(ConsoleEvent::Start {
            task_id: task_id.to_string(),
            parent_id: parent_id.map(str::to_string),
            title: title.to_string(),
        });
    }

    fn add_message(&self, task_id: Option<&str>, message: &str) {
        self.events.lock().push(ConsoleEvent::Message {
            task_id: task_id.map(str::to_string),
            message: message.to_string(),
        });
    }

    fn finish_task(&self, task_id: &str, message: Option<&str>, result: TaskResult) {
        self.events.lock().push(ConsoleEvent::Finish {
            task_id: task_id.to_string(),
            message: message.map(str::to_string),
            result,
        });
    }
}

/// Notified when the server reports `buildTarget/didChange`.
pub trait TargetsChangedListener: Send + Sync {
    fn targets_changed(&self, changes: &[BuildTargetEvent]);
}

impl<F> TargetsChangedListener for F
where
    F: Fn(&[BuildTargetEvent]) + Send + Sync,
{
    fn targets_changed(&self, changes: &[BuildTargetEvent]) {
        self(changes)
    }
}

/// `path:line:column: severity: message`, with 1-based line and column.
pub fn render_diagnostic(document_uri: &str, diagnostic: &Diagnostic) -> String {
    let start = diagnostic.range.start;
    format!(
        "{}:{}:{}: {}: {}",
        uri::display_uri(document_uri),
        i64::from(start.line).max(0) + 1,
        i64::from(start.character).max(0) + 1,
        diagnostic.severity_label(),
        diagnostic.message
    )
}

/// Dispatches server notifications to the console selected by each notification's origin id.
pub struct ConsoleRouter {
    consoles: [Arc<dyn ConsoleSink>; 4],
    diagnostics: Mutex<BTreeMap<String, Vec<Diagnostic>>>,
    listeners: Mutex<Vec<Arc<dyn TargetsChangedListener>>>,
}

impl ConsoleRouter {
    /// Route every console to `sink`.
    pub fn new(sink: Arc<dyn ConsoleSink>) -> Self {
        Self {
            consoles: [sink.clone(), sink.clone(), sink.clone(), sink],
            diagnostics: Mutex::new(BTreeMap::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// One [`TracingConsole`] per kind.
    pub fn tracing() -> Self {
        let mut router = Self::new(Arc::new(TracingConsole::new(ConsoleKind::Sync)));
        for kind in ConsoleKind::ALL {
            router.consoles[kind.index()] = Arc::new(TracingConsole::new(kind));
        }
        router
    }

    pub fn with_console(mut self, kind: ConsoleKind, sink: Arc<dyn ConsoleSink>) -> Self {
        self.consoles[kind.index()] = sink;
        self
    }

    pub fn console(&self, kind: ConsoleKind) -> &Arc<dyn ConsoleSink> {
        &self.consoles[kind.index()]
    }

    pub fn console_for_origin(&self, origin_id: Option<&str>) -> &Arc<dyn ConsoleSink> {
        self.console(ConsoleKind::for_origin(origin_id))
    }

    pub fn add_targets_changed_listener(&self, listener: Arc<dyn TargetsChangedListener>) {
        self.listeners.lock().push(listener);
    }

    /// Current diagnostics per document URI.
    pub fn diagnostics(&self) -> BTreeMap<String, Vec<Diagnostic>> {
        self.diagnostics.lock().clone()
    }

    pub fn diagnostics_for(&self, document_uri: &str) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .get(document_uri)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear_diagnostics(&self) {
        self.diagnostics.lock().clear();
    }

    fn on_message(&self, params: ShowMessageParams) {
        let console = self.console_for_origin(params.origin_id.as_deref());
        let task = params
            .task
            .as_ref()
            .map(|task| task.id.as_str())
            .or(params.origin_id.as_deref());
        if params.message_type == MessageType::Error {
            tracing::warn!(target: "trellis.bsp", message = %params.message, "BSP server reported an error");
        }
        console.add_message(task, &params.message);
    }

    fn on_task_start(&self, params: TaskStartParams) {
        let console = self.console_for_origin(params.origin_id.as_deref());
        let parent = params.task_id.parent().or(params.origin_id.as_deref());
        let title = params.message.as_deref().unwrap_or("Task");
        console.start_task(&params.task_id.id, parent, title);
    }

    fn on_task_progress(&self, params: TaskProgressParams) {
        let Some(message) = params.message.as_deref() else {
            return;
        };
        let console = self.console_for_origin(params.origin_id.as_deref());
        let text = match (params.progress, params.total) {
            (Some(progress), Some(total)) => {
                let unit = params.unit.as_deref().unwrap_or("");
                format!("{message} ({progress}/{total}{unit})")
            }
            _ => message.to_string(),
        };
        console.add_message(Some(&params.task_id.id), &text);
    }

    fn on_task_finish(&self, params: TaskFinishParams) {
        let console = self.console_for_origin(params.origin_id.as_deref());
        console.finish_task(
            &params.task_id.id,
            params.message.as_deref(),
            params.status.into(),
        );
    }

    fn on_diagnostics(&self, params: PublishDiagnosticsParams) {
        let document = params.text_document.uri;
        {
            let mut diagnostics = self.diagnostics.lock();
            let entry = diagnostics.entry(document.clone()).or_default();
            if params.reset.unwrap_or(true) {
                entry.clear();
            }
            entry.extend(params.diagnostics.iter().cloned());
            if entry.is_empty() {
                diagnostics.remove(&document);
            }
        }

        let console = self.console_for_origin(params.origin_id.as_deref());
        for diagnostic in &params.diagnostics {
            console.add_message(
                params.origin_id.as_deref(),
                &render_diagnostic(&document, diagnostic),
            );
        }
    }

    fn on_targets_changed(&self, changes: Vec<BuildTargetEvent>) {
        tracing::debug!(target: "trellis.bsp", changes = changes.len(), "build targets changed");
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener.targets_changed(&changes);
        }
    }
}

impl NotificationHandler for ConsoleRouter {
    fn on_notification(&self, notification: ServerNotification) {
        match notification {
            ServerNotification::ShowMessage(params) | ServerNotification::LogMessage(params) => {
                self.on_message(params)
            }
            ServerNotification::TaskStart(params) => self.on_task_start(params),
            ServerNotification::TaskProgress(params) => self.on_task_progress(params),
            ServerNotification::TaskFinish(params) => self.on_task_finish(params),
            ServerNotification::PublishDiagnostics(params) => self.on_diagnostics(params),
            ServerNotification::DidChangeBuildTarget(changes) => self.on_targets_changed(changes),
            ServerNotification::Other { method, .. } => {
                tracing::trace!(target: "trellis.bsp", method = %method, "ignoring BSP notification");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        BuildTargetIdentifier, Position, Range, TaskId, TextDocumentIdentifier,
    };

    fn diagnostic(line: i32, character: i32, severity: i32, message: &str) -> Diagnostic {
        Diagnostic {
            range: Range {
                start: Position { line, character },
                end: Position { line, character },
            },
            severity: Some(severity),
            code: None,
            source: None,
            message: message.to_string(),
        }
    }

    fn publish(origin: &str, reset: Option<bool>, diagnostics: Vec<Diagnostic>) -> ServerNotification {
        ServerNotification::PublishDiagnostics(PublishDiagnosticsParams {
            text_document: TextDocumentIdentifier {
                uri: "file:///ws/src/A.java".to_string(),
            },
            build_target: Some(BuildTargetIdentifier::new("t")),
            origin_id: Some(origin.to_string()),
            diagnostics,
            reset,
        })
    }

    #[test]
    fn origin_prefix_selects_console() {
        assert_eq!(ConsoleKind::for_origin(Some("build-3")), ConsoleKind::Build);
        assert_eq!(ConsoleKind::for_origin(Some("test-1")), ConsoleKind::Test);
        assert_eq!(ConsoleKind::for_origin(Some("run-9")), ConsoleKind::Run);
        assert_eq!(ConsoleKind::for_origin(Some("builder")), ConsoleKind::Sync);
        assert_eq!(ConsoleKind::for_origin(None), ConsoleKind::Sync);
    }

    #[test]
    fn diagnostics_render_with_one_based_positions() {
        let line = render_diagnostic("file:///ws/src/A.java", &diagnostic(4, 0, 1, "boom"));
        assert_eq!(line, "/ws/src/A.java:5:1: error: boom");

        let warning = render_diagnostic("bazel://x", &diagnostic(0, 2, 2, "careful"));
        assert_eq!(warning, "bazel://x:1:3: warning: careful");
    }

    #[test]
    fn extreme_positions_render_without_overflow() {
        let last = render_diagnostic("bazel://x", &diagnostic(i32::MAX, i32::MAX, 1, "edge"));
        assert_eq!(last, "bazel://x:2147483648:2147483648: error: edge");

        let negative = render_diagnostic("bazel://x", &diagnostic(i32::MIN, -1, 1, "edge"));
        assert_eq!(negative, "bazel://x:1:1: error: edge");
    }

    #[test]
    fn routes_messages_by_origin() {
        let sync = Arc::new(RecordingConsole::new());
        let build = Arc::new(RecordingConsole::new());
        let router = ConsoleRouter::new(sync.clone()).with_console(ConsoleKind::Build, build.clone());

        router.on_notification(ServerNotification::LogMessage(ShowMessageParams {
            message_type: MessageType::Info,
            task: None,
            origin_id: Some("build-1".to_string()),
            message: "compiling".to_string(),
        }));
        router.on_notification(ServerNotification::ShowMessage(ShowMessageParams {
            message_type: MessageType::Warning,
            task: None,
            origin_id: None,
            message: "importing".to_string(),
        }));

        assert_eq!(build.messages(), vec!["compiling".to_string()]);
        assert_eq!(sync.messages(), vec!["importing".to_string()]);
    }

    #[test]
    fn task_notifications_form_a_tree_under_the_origin() {
        let build = Arc::new(RecordingConsole::new());
        let router = ConsoleRouter::new(build.clone());

        router.on_notification(ServerNotification::TaskStart(TaskStartParams {
            task_id: TaskId {
                id: "compile-a".to_string(),
                parents: None,
            },
            origin_id: Some("build-7".to_string()),
            event_time: None,
            message: Some("Compiling a".to_string()),
            data_kind: None,
            data: None,
        }));
        router.on_notification(ServerNotification::TaskFinish(TaskFinishParams {
            task_id: TaskId {
                id: "compile-a".to_string(),
                parents: None,
            },
            origin_id: Some("build-7".to_string()),
            event_time: None,
            message: None,
            status: StatusCode::Error,
            data_kind: None,
            data: None,
        }));

        assert_eq!(
            build.events(),
            vec![
                ConsoleEvent::Start {
                    task_id: "compile-a".to_string(),
                    parent_id: Some("build-7".to_string()),
                    title: "Compiling a".to_string(),
                },
                ConsoleEvent::Finish {
                    task_id: "compile-a".to_string(),
                    message: None,
                    result: TaskResult::Failure,
                },
            ]
        );
    }

    #[test]
    fn diagnostics_reset_replaces_and_append_accumulates() {
        let console = Arc::new(RecordingConsole::new());
        let router = ConsoleRouter::new(console.clone());
        let uri = "file:///ws/src/A.java";

        router.on_notification(publish("build-1", Some(true), vec![diagnostic(0, 0, 1, "a")]));
        router.on_notification(publish("build-1", Some(false), vec![diagnostic(1, 0, 2, "b")]));
        assert_eq!(router.diagnostics_for(uri).len(), 2);

        router.on_notification(publish("build-2", None, vec![diagnostic(2, 0, 1, "c")]));
        let current = router.diagnostics_for(uri);
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].message, "c");

        router.on_notification(publish("build-3", Some(true), Vec::new()));
        assert!(router.diagnostics().is_empty());
        assert_eq!(console.messages().len(), 3);
    }

    #[test]
    fn did_change_reaches_listeners() {
        let router = ConsoleRouter::new(Arc::new(RecordingConsole::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        router.add_targets_changed_listener(Arc::new(move |changes: &[BuildTargetEvent]| {
            sink.lock()
                .extend(changes.iter().map(|change| change.target.uri.clone()));
        }));

        router.on_notification(ServerNotification::DidChangeBuildTarget(vec![
            BuildTargetEvent {
                target: BuildTargetIdentifier::new("a"),
                kind: None,
                data_kind: None,
                data: None,
            },
        ]));

        assert_eq!(*seen.lock(), vec!["a".to_string()]);
    }
}
