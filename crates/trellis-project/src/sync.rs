//! Single-flight project sync.
//!
//! Starting a sync cancels the one still in flight, so at most one collection feeds the
//! [`MagicMetaModel`] at a time and a superseded collection never overwrites a newer one.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use trellis_bsp::{BuildServer, CancellationToken};
use trellis_config::SyncSettings;

use crate::{
    collector::ProjectDetailsCollector,
    diff::MagicMetaModelDiff,
    magic_model::{LoadedTargetsListener, MagicMetaModel, MagicMetaModelOptions},
    progress::ProgressSender,
    strategy::{default_module_names, ModuleNameProvider, StrategyTable},
    ProjectDetails, SyncError,
};

struct InFlight {
    id: u64,
    token: CancellationToken,
}

pub struct SyncTask<S> {
    collector: ProjectDetailsCollector<S>,
    settings: SyncSettings,
    module_names: StrategyTable<dyn ModuleNameProvider>,
    progress: ProgressSender,
    next_id: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
    model: Mutex<Option<MagicMetaModel>>,
    listeners: Mutex<Vec<Arc<dyn LoadedTargetsListener>>>,
}

impl<S: BuildServer> SyncTask<S> {
    pub fn new(collector: ProjectDetailsCollector<S>, settings: SyncSettings) -> Self {
        Self {
            collector,
            settings,
            module_names: default_module_names(),
            progress: ProgressSender::default(),
            next_id: AtomicU64::new(1),
            in_flight: Mutex::new(None),
            model: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Module naming keyed by the lowercased server display name.
    pub fn with_module_names(
        mut self,
        module_names: StrategyTable<dyn ModuleNameProvider>,
    ) -> Self {
        self.module_names = module_names;
        self
    }

    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = progress;
        self
    }

    pub fn collector(&self) -> &ProjectDetailsCollector<S> {
        &self.collector
    }

    pub fn progress(&self) -> &ProgressSender {
        &self.progress
    }

    /// Registers a listener for changes to the loaded targets of the current and later models.
    ///
    /// Listeners run after the model lock is released, so they may read the model through
    /// [`SyncTask::with_model`].
    pub fn add_listener(&self, listener: Arc<dyn LoadedTargetsListener>) {
        self.listeners.lock().push(listener);
    }

    /// Runs `f` against the model of the last successful sync.
    pub fn with_model<R>(&self, f: impl FnOnce(&mut MagicMetaModel) -> R) -> Option<R> {
        let (result, changed) = {
            let mut model = self.model.lock();
            let model = model.as_mut()?;
            let before = model.generation();
            let result = f(model);
            (result, model.generation() != before)
        };
        if changed {
            self.notify_listeners();
        }
        Some(result)
    }

    fn notify_listeners(&self) {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener.on_loaded_targets_changed();
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Cancels the sync in flight, if any.
    pub fn cancel(&self) -> bool {
        match self.in_flight.lock().take() {
            Some(previous) => {
                previous.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Collects a fresh snapshot and folds it into the model.
    ///
    /// The first successful sync creates the model and, when enabled, loads the default
    /// targets. Later syncs keep the targets that were loaded. Returns the changes to apply on
    /// the workspace.
    pub async fn sync(&self) -> Result<MagicMetaModelDiff, SyncError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        if let Some(previous) = self.in_flight.lock().replace(InFlight {
            id,
            token: token.clone(),
        }) {
            tracing::debug!(
                target: "trellis.project",
                superseded = previous.id,
                "restarting project sync"
            );
            previous.token.cancel();
        }

        let progress = self.progress.start("Syncing project");
        progress.report("Collecting project details".to_string(), Some(0));
        let result = self.collector.collect(&token).await;

        let result = match result {
            Ok(_) if token.is_cancelled() => Err(SyncError::Cancelled),
            Ok(details) => {
                progress.report("Updating project model".to_string(), Some(80));
                let (diff, changed) = self.update_model(details);
                if changed {
                    self.notify_listeners();
                }
                Ok(diff)
            }
            Err(err) => Err(err),
        };

        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.as_ref().is_some_and(|current| current.id == id) {
                *in_flight = None;
            }
        }

        match &result {
            Ok(diff) => progress.finish(format!(
                "{} modules loaded, {} removed",
                diff.modules_to_load.len(),
                diff.modules_to_remove.len()
            )),
            Err(err) if err.is_cancelled() => progress.finish("Canceled".to_string()),
            Err(err) => progress.finish(format!("Failed: {err}")),
        }
        result
    }

    /// Folds `details` into the model. Also reports whether the loaded targets changed.
    fn update_model(&self, details: ProjectDetails) -> (MagicMetaModelDiff, bool) {
        let mut model = self.model.lock();
        if let Some(model) = model.as_mut() {
            let before = model.generation();
            let diff = model.replace_details(details);
            return (diff, model.generation() != before);
        }

        let server_name = self
            .collector
            .server_info()
            .map(|info| info.display_name.to_lowercase())
            .unwrap_or_default();
        let options = MagicMetaModelOptions::new(self.collector.project_root())
            .with_module_names(Arc::clone(self.module_names.get(&server_name)));
        let mut created = MagicMetaModel::new(details, options);
        let diff = if self.settings.load_default_targets {
            created.load_default_targets()
        } else {
            MagicMetaModelDiff::default()
        };
        let changed = created.generation() != 0;
        *model = Some(created);
        (diff, changed)
    }
}
