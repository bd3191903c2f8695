use std::{path::Path, sync::Arc, time::Duration};

use trellis_bsp::{
    console::RecordingConsole,
    protocol::{
        method, BuildTarget, InitializeBuildResult, SourceItem, SourceItemKind, SourcesItem,
    },
    testing::MockBuildServer,
    BuildTargetIdentifier,
};
use trellis_config::SyncSettings;
use parking_lot::Mutex;
use trellis_project::{
    progress::ProgressId, CollectorOptions, LoadedTargetsListener, ProgressEvent,
    ProjectDetailsCollector, SyncError, SyncTask,
};

fn id(uri: &str) -> BuildTargetIdentifier {
    BuildTargetIdentifier::new(uri)
}

fn server() -> MockBuildServer {
    let mut target = BuildTarget::new(id("@//app:lib"));
    target.base_directory = Some("file:///ws/app/".to_string());
    target.language_ids = vec!["java".to_string()];
    target.capabilities.can_compile = true;

    MockBuildServer::new()
        .with_initialize_result(InitializeBuildResult {
            display_name: "BazelBSP".to_string(),
            ..InitializeBuildResult::default()
        })
        .with_targets(vec![target])
        .with_sources(vec![SourcesItem {
            target: id("@//app:lib"),
            sources: vec![SourceItem {
                uri: "file:///ws/app/src/".to_string(),
                kind: SourceItemKind::Directory,
                generated: false,
            }],
            roots: None,
        }])
}

fn sync_task(
    server: Arc<MockBuildServer>,
    settings: SyncSettings,
) -> SyncTask<Arc<MockBuildServer>> {
    let collector = ProjectDetailsCollector::new(
        server,
        Path::new("/ws"),
        CollectorOptions::default(),
        Arc::new(RecordingConsole::new()),
    );
    SyncTask::new(collector, settings)
}

#[tokio::test]
async fn first_sync_loads_default_targets_with_server_naming() {
    let task = sync_task(Arc::new(server()), SyncSettings::default());
    let mut progress = task.progress().subscribe();

    let diff = task.sync().await.unwrap();

    let names: Vec<&str> = diff.modules_to_load.iter().map(|m| m.name()).collect();
    assert_eq!(names, vec!["app.lib"]);
    assert_eq!(
        task.with_model(|model| model.loaded_targets().count()),
        Some(1)
    );
    assert!(!task.is_running());

    let mut events = Vec::new();
    while let Ok(event) = progress.try_recv() {
        events.push(event);
    }
    assert!(matches!(
        events.first(),
        Some(ProgressEvent::Begin { title, .. }) if title == "Syncing project"
    ));
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::End {
            id: ProgressId(1),
            message: Some("1 modules loaded, 0 removed".to_string()),
        })
    );
}

#[tokio::test]
async fn default_targets_can_be_left_unloaded() {
    let settings = SyncSettings {
        load_default_targets: false,
        ..SyncSettings::default()
    };
    let task = sync_task(Arc::new(server()), settings);

    let diff = task.sync().await.unwrap();

    assert!(diff.is_empty());
    assert_eq!(
        task.with_model(|model| model.not_loaded_targets().count()),
        Some(1)
    );
}

#[tokio::test]
async fn resync_reloads_what_was_loaded() {
    let task = sync_task(Arc::new(server()), SyncSettings::default());
    let _ = task.sync().await.unwrap();

    let diff = task.sync().await.unwrap();

    assert_eq!(diff.modules_to_remove, vec!["app.lib".to_string()]);
    assert_eq!(diff.modules_to_load.len(), 1);
}

#[tokio::test]
async fn cancel_stops_the_sync_in_flight() {
    let server = Arc::new(server());
    server.hang(method::SOURCES);
    let task = sync_task(server.clone(), SyncSettings::default());

    let (result, cancelled) = tokio::join!(task.sync(), async {
        while server.calls_to(method::SOURCES).is_empty() {
            tokio::task::yield_now().await;
        }
        task.cancel()
    });

    assert!(cancelled);
    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert!(!task.is_running());
    assert!(task.with_model(|_| ()).is_none());
}

#[tokio::test(start_paused = true)]
async fn a_new_sync_supersedes_the_running_one() {
    let server = Arc::new(server().with_latency(|name, _| {
        if name == method::SOURCES {
            Duration::from_millis(100)
        } else {
            Duration::ZERO
        }
    }));
    let task = sync_task(server.clone(), SyncSettings::default());

    let (first, second) = tokio::join!(task.sync(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        task.sync().await
    });

    assert!(matches!(first, Err(SyncError::Cancelled)));
    assert_eq!(second.unwrap().modules_to_load.len(), 1);
    assert_eq!(server.cancelled_calls(method::SOURCES), 1);
    assert_eq!(server.calls_to(method::BUILD_INITIALIZE).len(), 1);
}

#[tokio::test]
async fn listeners_can_read_the_model_they_are_told_about() {
    let task = Arc::new(sync_task(Arc::new(server()), SyncSettings::default()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let listener: Arc<dyn LoadedTargetsListener> = {
        let task = Arc::downgrade(&task);
        let seen = seen.clone();
        Arc::new(move || {
            if let Some(task) = task.upgrade() {
                let loaded = task.with_model(|model| model.loaded_targets().count());
                seen.lock().push(loaded);
            }
        })
    };
    task.add_listener(listener);

    tokio::time::timeout(Duration::from_secs(5), task.sync())
        .await
        .expect("sync finished")
        .unwrap();
    assert_eq!(*seen.lock(), vec![Some(1)]);

    let unloaded = task
        .with_model(|model| model.unload_target(&id("@//app:lib")))
        .unwrap()
        .unwrap();
    assert_eq!(unloaded.modules_to_remove, vec!["app.lib".to_string()]);
    assert_eq!(*seen.lock(), vec![Some(1), Some(0)]);

    let _ = task.with_model(|model| model.loaded_targets().count());
    assert_eq!(seen.lock().len(), 2);
}
