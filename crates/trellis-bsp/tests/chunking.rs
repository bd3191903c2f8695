use std::{sync::Arc, time::Duration};

use trellis_bsp::{
    protocol::{method, SourceItem, SourceItemKind, SourcesItem, TargetsParams},
    testing::MockBuildServer,
    BspError, BuildServer, BuildTargetIdentifier, CancellationToken, ChunkingBuildServer,
};

fn ids(n: usize) -> Vec<BuildTargetIdentifier> {
    (0..n)
        .map(|i| BuildTargetIdentifier::new(format!("file:///ws/t{i:04}")))
        .collect()
}

fn sources_for(targets: &[BuildTargetIdentifier]) -> Vec<SourcesItem> {
    targets
        .iter()
        .map(|target| SourcesItem {
            target: target.clone(),
            sources: vec![SourceItem {
                uri: format!("{}/src/", target.uri),
                kind: SourceItemKind::Directory,
                generated: false,
            }],
            roots: None,
        })
        .collect()
}

#[tokio::test]
async fn large_requests_are_split_and_reassembled_in_order() {
    let targets = ids(250);
    // Earlier chunks answer later, so completion order is the reverse of request order.
    let base = Arc::new(
        MockBuildServer::new()
            .with_sources(sources_for(&targets))
            .with_latency(|_, chunk| {
                if chunk.first().is_some_and(|t| t.uri.ends_with("t0000")) {
                    Duration::from_millis(50)
                } else {
                    Duration::ZERO
                }
            }),
    );
    let server = ChunkingBuildServer::new(base.clone(), 100);

    let result = server
        .build_target_sources(TargetsParams::new(targets.clone()), &CancellationToken::new())
        .await
        .unwrap();

    let returned: Vec<_> = result.items.iter().map(|item| item.target.clone()).collect();
    assert_eq!(returned, targets);

    let calls = base.calls_to(method::SOURCES);
    let mut sizes: Vec<_> = calls.iter().map(|call| call.targets.len()).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![50, 100, 100]);
}

#[tokio::test]
async fn small_requests_are_sent_whole() {
    let targets = ids(12);
    let base = Arc::new(MockBuildServer::new().with_sources(sources_for(&targets)));
    let server = ChunkingBuildServer::new(base.clone(), 100);

    let result = server
        .build_target_sources(TargetsParams::new(targets.clone()), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.items.len(), 12);
    assert_eq!(base.calls_to(method::SOURCES).len(), 1);
}

#[tokio::test]
async fn empty_target_list_still_sends_one_request() {
    let base = Arc::new(MockBuildServer::new());
    let server = ChunkingBuildServer::new(base.clone(), 100);

    let result = server
        .build_target_resources(TargetsParams::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.items.is_empty());
    let calls = base.calls_to(method::RESOURCES);
    assert_eq!(calls.len(), 1);
    assert!(calls[0].targets.is_empty());
}

#[tokio::test]
async fn cancelling_the_aggregate_cancels_every_chunk() {
    let base = Arc::new(MockBuildServer::new());
    base.hang(method::JAVAC_OPTIONS);
    let server = Arc::new(ChunkingBuildServer::new(base.clone(), 10));

    let cancel = CancellationToken::new();
    let request = {
        let server = server.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            server
                .build_target_javac_options(TargetsParams::new(ids(30)), &cancel)
                .await
        })
    };

    while base.calls_to(method::JAVAC_OPTIONS).len() < 3 {
        tokio::task::yield_now().await;
    }
    cancel.cancel();

    let err = request.await.unwrap().unwrap_err();
    assert!(matches!(err, BspError::Cancelled), "{err:?}");
    assert_eq!(base.cancelled_calls(method::JAVAC_OPTIONS), 3);
}

#[tokio::test]
async fn failing_chunk_fails_the_aggregate() {
    let base = Arc::new(MockBuildServer::new());
    base.fail(
        method::OUTPUT_PATHS,
        BspError::Protocol {
            message: "boom".to_string(),
        },
    );
    let server = ChunkingBuildServer::new(base, 10);

    let err = server
        .build_target_output_paths(TargetsParams::new(ids(25)), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BspError::Protocol { .. }), "{err:?}");
}

#[tokio::test]
async fn clean_cache_folds_chunk_results() {
    let targets = ids(25);
    let base = Arc::new(MockBuildServer::new().with_unclean_targets(vec![targets[12].clone()]));
    let server = ChunkingBuildServer::new(base, 10);

    let result = server
        .build_target_clean_cache(TargetsParams::new(targets), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.cleaned);
    assert_eq!(
        result.message.as_deref(),
        Some("cleaned 10 targets\ncleaned 10 targets\ncleaned 5 targets")
    );

    let all_clean = ChunkingBuildServer::new(Arc::new(MockBuildServer::new()), 10)
        .build_target_clean_cache(TargetsParams::new(ids(3)), &CancellationToken::new())
        .await
        .unwrap();
    assert!(all_clean.cleaned);
}
