//! Async JSON-RPC client for a single BSP connection.
//!
//! Outgoing frames go through a bounded channel drained by a writer task; a reader task routes
//! responses to their pending requests and notifications to a [`NotificationHandler`]. Any
//! transport failure closes the connection and fails every in-flight request with the same
//! error.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{mpsc, oneshot, watch},
    time::Instant,
};
use trellis_config::BspSettings;
use trellis_process::CancellationToken;

use crate::{
    codec,
    error::{RpcErrorObject, METHOD_NOT_FOUND},
    protocol::{
        method, BuildTargetEvent, DidChangeBuildTarget, LogMessageParams,
        PublishDiagnosticsParams, ShowMessageParams, TaskFinishParams, TaskProgressParams,
        TaskStartParams,
    },
    BspError,
};

const WRITE_QUEUE_CAPACITY: usize = 256;

/// A decoded server-to-client notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerNotification {
    ShowMessage(ShowMessageParams),
    LogMessage(LogMessageParams),
    TaskStart(TaskStartParams),
    TaskProgress(TaskProgressParams),
    TaskFinish(TaskFinishParams),
    PublishDiagnostics(PublishDiagnosticsParams),
    DidChangeBuildTarget(Vec<BuildTargetEvent>),
    Other { method: String, params: Value },
}

impl ServerNotification {
    pub fn parse(method: &str, params: Value) -> Result<Self, serde_json::Error> {
        Ok(match method {
            method::SHOW_MESSAGE => Self::ShowMessage(serde_json::from_value(params)?),
            method::LOG_MESSAGE => Self::LogMessage(serde_json::from_value(params)?),
            method::TASK_START => Self::TaskStart(serde_json::from_value(params)?),
            method::TASK_PROGRESS => Self::TaskProgress(serde_json::from_value(params)?),
            method::TASK_FINISH => Self::TaskFinish(serde_json::from_value(params)?),
            method::PUBLISH_DIAGNOSTICS => {
                Self::PublishDiagnostics(serde_json::from_value(params)?)
            }
            method::DID_CHANGE_BUILD_TARGET => {
                let changed: DidChangeBuildTarget = serde_json::from_value(params)?;
                Self::DidChangeBuildTarget(changed.changes)
            }
            other => Self::Other {
                method: other.to_string(),
                params,
            },
        })
    }
}

/// Receives server notifications on the connection's reader task.
///
/// Implementations must not block; anything slow should be handed off.
pub trait NotificationHandler: Send + Sync {
    fn on_notification(&self, notification: ServerNotification);
}

/// Drops every notification.
pub struct IgnoreNotifications;

impl NotificationHandler for IgnoreNotifications {
    fn on_notification(&self, _notification: ServerNotification) {}
}

impl<F> NotificationHandler for F
where
    F: Fn(ServerNotification) + Send + Sync,
{
    fn on_notification(&self, notification: ServerNotification) {
        self(notification)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Fail pending requests when the server sends nothing for this long.
    pub idle_timeout: Option<Duration>,
    pub max_message_bytes: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from_settings(&BspSettings::default())
    }
}

impl ConnectionOptions {
    pub fn from_settings(settings: &BspSettings) -> Self {
        Self {
            idle_timeout: Some(settings.idle_timeout()),
            max_message_bytes: settings.max_message_bytes(),
        }
    }
}

/// Handle to a running BSP connection. Cheap to clone.
#[derive(Clone)]
pub struct BspConnection {
    inner: Arc<Inner>,
}

struct Inner {
    next_id: AtomicI64,
    tx: mpsc::Sender<Vec<u8>>,
    shutdown_tx: watch::Sender<bool>,
    closed: Mutex<Option<BspError>>,
    pending: Mutex<HashMap<i64, oneshot::Sender<Result<Value, BspError>>>>,
    last_activity: Mutex<Instant>,
    handler: Arc<dyn NotificationHandler>,
}

impl Inner {
    fn alloc_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn close(&self, err: BspError) {
        {
            let mut closed = self.closed.lock();
            if closed.is_some() {
                return;
            }
            *closed = Some(err.clone());
        }

        tracing::debug!(target: "trellis.bsp", error = %err, "BSP connection closed");
        let _ = self.shutdown_tx.send(true);

        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (_, tx) in pending {
            let _ = tx.send(Err(err.clone()));
        }
    }

    fn closed_error(&self) -> Option<BspError> {
        self.closed.lock().clone()
    }

    async fn send(&self, msg: Value) -> Result<(), BspError> {
        if let Some(err) = self.closed_error() {
            return Err(err);
        }
        let frame = codec::encode_message(&msg)?;
        self.tx
            .send(frame)
            .await
            .map_err(|_| self.closed_error().unwrap_or(BspError::ConnectionClosed))
    }

    /// Best-effort `$/cancelRequest`; never waits for queue space.
    fn send_cancel(&self, id: i64) {
        if self.closed_error().is_some() {
            return;
        }
        let msg = json!({
            "jsonrpc": "2.0",
            "method": method::CANCEL_REQUEST,
            "params": { "id": id },
        });
        match codec::encode_message(&msg) {
            Ok(frame) => {
                if self.tx.try_send(frame).is_err() {
                    tracing::debug!(target: "trellis.bsp", id, "dropped $/cancelRequest: write queue full");
                }
            }
            Err(err) => {
                tracing::debug!(target: "trellis.bsp", id, error = %err, "failed to encode $/cancelRequest");
            }
        }
    }
}

/// Removes the pending entry (and tells the server) if a request is abandoned before its
/// response arrives, e.g. because the caller's token fired or the future was dropped.
struct PendingRequest<'a> {
    inner: &'a Inner,
    id: i64,
    armed: bool,
}

impl PendingRequest<'_> {
    fn settle(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.inner.pending.lock().remove(&self.id).is_some() {
            self.inner.send_cancel(self.id);
        }
    }
}

impl BspConnection {
    /// Start the reader/writer tasks (and the idle watchdog) over an arbitrary byte stream pair.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<R, W>(
        reader: R,
        writer: W,
        handler: Arc<dyn NotificationHandler>,
        options: ConnectionOptions,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel::<Vec<u8>>(WRITE_QUEUE_CAPACITY);

        let inner = Arc::new(Inner {
            next_id: AtomicI64::new(1),
            tx,
            shutdown_tx,
            closed: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            last_activity: Mutex::new(Instant::now()),
            handler,
        });

        tokio::spawn(read_loop(
            reader,
            inner.clone(),
            shutdown_rx.clone(),
            options.max_message_bytes,
        ));
        tokio::spawn(write_loop(writer, inner.clone(), shutdown_rx.clone(), rx));
        if let Some(idle) = options.idle_timeout {
            tokio::spawn(idle_watchdog(inner.clone(), idle, shutdown_rx));
        }

        Self { inner }
    }

    /// Send a request and wait for its response.
    ///
    /// If `cancel` fires first, the request is abandoned, `$/cancelRequest` is sent, and
    /// [`BspError::Cancelled`] is returned.
    pub async fn request<P, R>(
        &self,
        method: &str,
        params: P,
        cancel: &CancellationToken,
    ) -> Result<R, BspError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        if cancel.is_cancelled() {
            return Err(BspError::Cancelled);
        }
        if let Some(err) = self.inner.closed_error() {
            return Err(err);
        }

        let params = serde_json::to_value(params)?;
        let id = self.inner.alloc_id();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id, tx);
        let guard = PendingRequest {
            inner: &self.inner,
            id,
            armed: true,
        };

        tracing::trace!(target: "trellis.bsp", id, method, "sending BSP request");
        let msg = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        if let Err(err) = self.inner.send(msg).await {
            self.inner.pending.lock().remove(&id);
            guard.settle();
            return Err(err);
        }
        // The idle clock measures silence while something is outstanding.
        self.inner.touch();

        let value = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(target: "trellis.bsp", id, method, "BSP request cancelled");
                // Dropping the guard sends `$/cancelRequest`.
                drop(guard);
                return Err(BspError::Cancelled);
            }
            res = rx => {
                guard.settle();
                res.unwrap_or(Err(BspError::ConnectionClosed))?
            }
        };

        serde_json::from_value(value).map_err(|err| BspError::Decode {
            message: format!("invalid `{method}` response: {err}"),
        })
    }

    pub async fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<(), BspError> {
        let msg = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": serde_json::to_value(params)?,
        });
        self.inner.send(msg).await
    }

    /// Close the connection locally. Pending requests fail with
    /// [`BspError::ConnectionClosed`].
    pub fn close(&self) {
        self.inner.close(BspError::ConnectionClosed);
    }

    pub fn closed_error(&self) -> Option<BspError> {
        self.inner.closed_error()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed_error().is_some()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

async fn write_loop<W: AsyncWrite + Unpin + Send + 'static>(
    mut writer: W,
    inner: Arc<Inner>,
    mut shutdown_rx: watch::Receiver<bool>,
    mut rx: mpsc::Receiver<Vec<u8>>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            frame = rx.recv() => {
                let Some(frame) = frame else { break; };
                if let Err(err) = writer.write_all(&frame).await {
                    inner.close(BspError::from(err));
                    break;
                }
                if let Err(err) = writer.flush().await {
                    inner.close(BspError::from(err));
                    break;
                }
            }
        }
    }

    let _ = writer.shutdown().await;
}

async fn read_loop<R: AsyncRead + Unpin + Send + 'static>(
    reader: R,
    inner: Arc<Inner>,
    mut shutdown_rx: watch::Receiver<bool>,
    max_message_bytes: usize,
) {
    let mut reader = BufReader::new(reader);
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            res = codec::read_message(&mut reader, max_message_bytes) => {
                match res {
                    Ok(Some(msg)) => {
                        inner.touch();
                        dispatch(&inner, msg).await;
                    }
                    Ok(None) => {
                        inner.close(BspError::ConnectionClosed);
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(target: "trellis.bsp", error = %err, "failed to read BSP message");
                        inner.close(err);
                        break;
                    }
                }
            }
        }
    }
}

async fn dispatch(inner: &Inner, msg: Value) {
    let method = msg.get("method").and_then(Value::as_str).map(str::to_owned);
    let id = msg.get("id").filter(|id| !id.is_null()).cloned();

    match (method, id) {
        (Some(method), Some(id)) => {
            // We implement no client-side requests.
            tracing::debug!(target: "trellis.bsp", method = %method, "rejecting server request");
            let reply = json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": METHOD_NOT_FOUND,
                    "message": format!("method not found: {method}"),
                },
            });
            if let Err(err) = inner.send(reply).await {
                tracing::debug!(target: "trellis.bsp", error = %err, "failed to answer server request");
            }
        }
        (Some(method), None) => {
            let params = msg.get("params").cloned().unwrap_or(Value::Null);
            match ServerNotification::parse(&method, params) {
                Ok(notification) => inner.handler.on_notification(notification),
                Err(err) => tracing::warn!(
                    target: "trellis.bsp",
                    method = %method,
                    error = %err,
                    "ignoring malformed BSP notification"
                ),
            }
        }
        (None, Some(id)) => {
            let Some(id) = id.as_i64() else {
                tracing::warn!(target: "trellis.bsp", id = %id, "ignoring response with non-numeric id");
                return;
            };
            let Some(tx) = inner.pending.lock().remove(&id) else {
                // Late response to a cancelled or timed-out request.
                tracing::debug!(target: "trellis.bsp", id, "ignoring response for unknown request");
                return;
            };
            let result = match msg.get("error") {
                Some(error) => Err(match serde_json::from_value::<RpcErrorObject>(error.clone()) {
                    Ok(error) => BspError::Rpc(error),
                    Err(_) => BspError::Protocol {
                        message: format!("malformed error response: {error}"),
                    },
                }),
                None => Ok(msg.get("result").cloned().unwrap_or(Value::Null)),
            };
            let _ = tx.send(result);
        }
        (None, None) => {
            tracing::warn!(target: "trellis.bsp", "ignoring BSP message without method or id");
        }
    }
}

/// Fails every pending request once the server has been silent for `idle`.
///
/// The connection stays open; late responses are dropped by `dispatch`.
async fn idle_watchdog(inner: Arc<Inner>, idle: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        let deadline = *inner.last_activity.lock() + idle;
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
                continue;
            }
            _ = tokio::time::sleep_until(deadline) => {}
        }

        if *inner.last_activity.lock() + idle > Instant::now() {
            continue;
        }

        let expired: Vec<_> = inner.pending.lock().drain().collect();
        if !expired.is_empty() {
            tracing::warn!(
                target: "trellis.bsp",
                requests = expired.len(),
                idle_ms = idle.as_millis() as u64,
                "BSP server idle timeout; failing pending requests"
            );
            for (_, tx) in expired {
                let _ = tx.send(Err(BspError::TimedOut { idle }));
            }
        }
        inner.touch();
    }
}
