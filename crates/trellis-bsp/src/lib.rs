//! Build Server Protocol client.
//!
//! JSON-RPC 2.0 over `Content-Length` framing, driven asynchronously: every request takes a
//! [`CancellationToken`], a silent server fails outstanding requests after an idle timeout, and
//! server notifications are routed to task consoles.

pub mod chunking;
pub mod client;
pub mod codec;
pub mod connection;
pub mod console;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod uri;

pub use chunking::ChunkingBuildServer;
pub use client::{
    BspConnection, ConnectionOptions, IgnoreNotifications, NotificationHandler,
    ServerNotification,
};
pub use connection::{discover_connection_details, resolve_launch_command, BspConnectionDetails};
pub use console::{ConsoleKind, ConsoleRouter, ConsoleSink, TargetsChangedListener, TaskResult};
pub use error::{BspError, FailureKind, RpcErrorObject};
pub use protocol::BuildTargetIdentifier;
pub use server::BuildServer;
pub use session::BspSession;
pub use trellis_process::CancellationToken;
