use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC "method not found".
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC "request cancelled" (LSP/BSP extension code).
pub const REQUEST_CANCELLED: i64 = -32800;

/// JSON-RPC error payload returned by BSP servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for RpcErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.data {
            Some(data) => write!(
                f,
                "BSP JSON-RPC error {}: {} (data: {})",
                self.code, self.message, data
            ),
            None => write!(f, "BSP JSON-RPC error {}: {}", self.code, self.message),
        }
    }
}

/// Everything that can go wrong talking to a build server.
///
/// The error is `Clone` so a single transport failure can be fanned out to every in-flight
/// request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BspError {
    #[error("BSP I/O error: {message}")]
    Io { message: String },
    #[error("failed to decode BSP message: {message}")]
    Decode { message: String },
    #[error("BSP protocol violation: {message}")]
    Protocol { message: String },
    #[error("BSP message too large: {len} bytes (limit {max})")]
    MessageTooLarge { len: usize, max: usize },
    #[error("{0}")]
    Rpc(RpcErrorObject),
    #[error("BSP request cancelled")]
    Cancelled,
    #[error("BSP server timed out after {idle:?} without activity")]
    TimedOut { idle: Duration },
    #[error("BSP server closed the connection")]
    ConnectionClosed,
    #[error("failed to spawn BSP server `{program}`: {message}")]
    Spawn { program: String, message: String },
}

impl BspError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            BspError::Cancelled => true,
            BspError::Rpc(err) => err.code == REQUEST_CANCELLED,
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BspError::TimedOut { .. })
    }

    pub fn is_method_not_found(&self) -> bool {
        matches!(self, BspError::Rpc(err) if err.code == METHOD_NOT_FOUND)
    }
}

impl From<std::io::Error> for BspError {
    fn from(err: std::io::Error) -> Self {
        BspError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BspError {
    fn from(err: serde_json::Error) -> Self {
        BspError::Decode {
            message: err.to_string(),
        }
    }
}

/// Coarse classification used when reporting a failed call to a console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Cancelled,
    TimedOut,
    Failed,
}

impl FailureKind {
    /// Walks the `source()` chain looking for a [`BspError`] that explains the failure.
    pub fn classify(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut current = Some(err);
        while let Some(err) = current {
            if let Some(bsp) = err.downcast_ref::<BspError>() {
                if bsp.is_cancelled() {
                    return FailureKind::Cancelled;
                }
                if bsp.is_timeout() {
                    return FailureKind::TimedOut;
                }
            }
            current = err.source();
        }
        FailureKind::Failed
    }

    /// The line written to the sync console for a failed call.
    pub fn describe(err: &(dyn std::error::Error + 'static)) -> String {
        match Self::classify(err) {
            FailureKind::Cancelled => "Canceled".to_string(),
            FailureKind::TimedOut => "Timed out".to_string(),
            FailureKind::Failed => format!("Failed: {err}"),
        }
    }
}
