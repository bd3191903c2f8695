use std::{sync::Arc, time::Duration};

use serde_json::{json, Value};
use tokio::{
    io::{BufReader, DuplexStream, ReadHalf, WriteHalf},
    sync::mpsc,
};
use trellis_bsp::{
    codec, BspConnection, BspError, CancellationToken, ConnectionOptions, IgnoreNotifications,
    NotificationHandler, ServerNotification,
};

const MAX_BYTES: usize = 1024 * 1024;

/// The server end of an in-memory connection.
struct Peer {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Peer {
    async fn recv(&mut self) -> Value {
        codec::read_message(&mut self.reader, MAX_BYTES)
            .await
            .unwrap()
            .expect("client closed the stream")
    }

    async fn send(&mut self, msg: Value) {
        codec::write_message(&mut self.writer, &msg).await.unwrap();
    }

    async fn reply(&mut self, id: &Value, result: Value) {
        self.send(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
            .await;
    }
}

fn connect(
    handler: Arc<dyn NotificationHandler>,
    options: ConnectionOptions,
) -> (BspConnection, Peer) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_io);
    let (server_read, server_write) = tokio::io::split(server_io);
    let connection = BspConnection::start(client_read, client_write, handler, options);
    (
        connection,
        Peer {
            reader: BufReader::new(server_read),
            writer: server_write,
        },
    )
}

fn no_idle_timeout() -> ConnectionOptions {
    ConnectionOptions {
        idle_timeout: None,
        max_message_bytes: MAX_BYTES,
    }
}

fn spawn_request(
    connection: &BspConnection,
    method: &'static str,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<Result<Value, BspError>> {
    let connection = connection.clone();
    tokio::spawn(async move { connection.request(method, Value::Null, &cancel).await })
}

#[tokio::test]
async fn responses_are_matched_to_requests_by_id() {
    let (connection, mut peer) = connect(Arc::new(IgnoreNotifications), no_idle_timeout());

    let first = spawn_request(&connection, "workspace/buildTargets", CancellationToken::new());
    let a = peer.recv().await;
    let second = spawn_request(&connection, "workspace/libraries", CancellationToken::new());
    let b = peer.recv().await;
    assert_eq!(a["method"], "workspace/buildTargets");
    assert_eq!(b["method"], "workspace/libraries");
    assert_eq!(a["jsonrpc"], "2.0");

    // Answer out of order.
    peer.reply(&b["id"], json!({ "libraries": [] })).await;
    peer.reply(&a["id"], json!({ "targets": [] })).await;

    assert_eq!(first.await.unwrap().unwrap(), json!({ "targets": [] }));
    assert_eq!(second.await.unwrap().unwrap(), json!({ "libraries": [] }));
    assert_eq!(connection.pending_requests(), 0);
}

#[tokio::test]
async fn rpc_errors_are_surfaced() {
    let (connection, mut peer) = connect(Arc::new(IgnoreNotifications), no_idle_timeout());

    let request = spawn_request(&connection, "workspace/libraries", CancellationToken::new());
    let msg = peer.recv().await;
    peer.send(json!({
        "jsonrpc": "2.0",
        "id": msg["id"],
        "error": { "code": -32601, "message": "method not found" },
    }))
    .await;

    let err = request.await.unwrap().unwrap_err();
    assert!(err.is_method_not_found(), "{err:?}");
}

#[tokio::test]
async fn server_requests_are_answered_with_method_not_found() {
    let (_connection, mut peer) = connect(Arc::new(IgnoreNotifications), no_idle_timeout());

    peer.send(json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "workspace/reload",
        "params": null,
    }))
    .await;

    let reply = peer.recv().await;
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["error"]["code"], -32601);
}

#[tokio::test]
async fn notifications_reach_the_handler() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = Arc::new(move |notification: ServerNotification| {
        let _ = tx.send(notification);
    });
    let (_connection, mut peer) = connect(handler, no_idle_timeout());

    peer.send(json!({
        "jsonrpc": "2.0",
        "method": "build/logMessage",
        "params": { "type": 4, "message": "resolving" },
    }))
    .await;

    let notification = rx.recv().await.unwrap();
    let ServerNotification::LogMessage(params) = notification else {
        panic!("unexpected notification {notification:?}");
    };
    assert_eq!(params.message, "resolving");
}

#[tokio::test]
async fn cancelling_a_request_sends_cancel_request() {
    let (connection, mut peer) = connect(Arc::new(IgnoreNotifications), no_idle_timeout());

    let cancel = CancellationToken::new();
    let request = spawn_request(&connection, "buildTarget/compile", cancel.clone());
    let msg = peer.recv().await;

    cancel.cancel();
    let err = request.await.unwrap().unwrap_err();
    assert!(matches!(err, BspError::Cancelled), "{err:?}");

    let cancel_msg = peer.recv().await;
    assert_eq!(cancel_msg["method"], "$/cancelRequest");
    assert_eq!(cancel_msg["params"]["id"], msg["id"]);

    // A late answer to the cancelled request is dropped and the connection keeps working.
    peer.reply(&msg["id"], json!({ "statusCode": 3 })).await;
    let next = spawn_request(&connection, "workspace/buildTargets", CancellationToken::new());
    let msg = peer.recv().await;
    peer.reply(&msg["id"], json!({ "targets": [] })).await;
    assert!(next.await.unwrap().is_ok());
}

#[tokio::test]
async fn already_cancelled_token_sends_nothing() {
    let (connection, _peer) = connect(Arc::new(IgnoreNotifications), no_idle_timeout());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = connection
        .request::<_, Value>("workspace/buildTargets", Value::Null, &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(connection.pending_requests(), 0);
}

#[tokio::test]
async fn closing_the_stream_fails_pending_requests() {
    let (connection, mut peer) = connect(Arc::new(IgnoreNotifications), no_idle_timeout());

    let request = spawn_request(&connection, "workspace/buildTargets", CancellationToken::new());
    let _ = peer.recv().await;
    drop(peer);

    let err = request.await.unwrap().unwrap_err();
    assert!(matches!(err, BspError::ConnectionClosed), "{err:?}");
    assert!(connection.is_closed());

    let err = connection
        .request::<_, Value>("workspace/buildTargets", Value::Null, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BspError::ConnectionClosed), "{err:?}");
}

#[tokio::test(start_paused = true)]
async fn silent_server_times_out_pending_requests() {
    let options = ConnectionOptions {
        idle_timeout: Some(Duration::from_millis(200)),
        max_message_bytes: MAX_BYTES,
    };
    let (connection, mut peer) = connect(Arc::new(IgnoreNotifications), options);

    let request = spawn_request(&connection, "buildTarget/sources", CancellationToken::new());
    let _ = peer.recv().await;

    let err = request.await.unwrap().unwrap_err();
    assert!(err.is_timeout(), "{err:?}");
    assert!(!connection.is_closed());
}

#[tokio::test(start_paused = true)]
async fn server_activity_resets_the_idle_timer() {
    let options = ConnectionOptions {
        idle_timeout: Some(Duration::from_millis(200)),
        max_message_bytes: MAX_BYTES,
    };
    let (connection, mut peer) = connect(Arc::new(IgnoreNotifications), options);

    let request = spawn_request(&connection, "buildTarget/compile", CancellationToken::new());
    let msg = peer.recv().await;

    // 500ms of work in total, but never more than 100ms of silence.
    for i in 0..5 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        peer.send(json!({
            "jsonrpc": "2.0",
            "method": "build/taskProgress",
            "params": { "taskId": { "id": "t" }, "message": format!("step {i}") },
        }))
        .await;
    }
    peer.reply(&msg["id"], json!({ "statusCode": 1 })).await;

    assert_eq!(request.await.unwrap().unwrap(), json!({ "statusCode": 1 }));
}

#[tokio::test]
async fn oversized_messages_close_the_connection() {
    let options = ConnectionOptions {
        idle_timeout: None,
        max_message_bytes: 1024,
    };
    let (connection, mut peer) = connect(Arc::new(IgnoreNotifications), options);

    let request = spawn_request(&connection, "workspace/buildTargets", CancellationToken::new());
    let msg = peer.recv().await;
    let padding = "x".repeat(4096);
    peer.reply(&msg["id"], json!({ "targets": [], "padding": padding }))
        .await;

    let err = request.await.unwrap().unwrap_err();
    assert!(matches!(err, BspError::MessageTooLarge { max: 1024, .. }), "{err:?}");
    assert!(connection.is_closed());
}
