//! A BSP server running as a child process.

use std::{sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Child,
};
use trellis_process::{CancellationToken, CommandSpec};

use crate::{
    client::{BspConnection, ConnectionOptions, NotificationHandler},
    BspError, BuildServer,
};

/// How long `shutdown` waits for the server to answer `build/shutdown` and then exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Owns the server process and its connection.
///
/// The process tree is killed when the session is dropped without a clean
/// [`shutdown`](Self::shutdown).
pub struct BspSession {
    command: CommandSpec,
    child: Option<Child>,
    connection: BspConnection,
}

impl BspSession {
    /// Spawn `command` and start a connection over its stdio.
    ///
    /// Server stderr is forwarded to the `trellis.bsp.stderr` log target.
    pub fn spawn(
        command: CommandSpec,
        handler: Arc<dyn NotificationHandler>,
        options: ConnectionOptions,
    ) -> Result<Self, BspError> {
        let mut child =
            trellis_process::spawn_piped(&command).map_err(|err| BspError::Spawn {
                program: command.program.display().to_string(),
                message: err.to_string(),
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(BspError::Spawn {
                program: command.program.display().to_string(),
                message: "child stdio was not piped".to_string(),
            });
        };

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "trellis.bsp.stderr", "{line}");
                }
            });
        }

        tracing::info!(target: "trellis.bsp", command = %command, "started BSP server");
        let connection = BspConnection::start(stdout, stdin, handler, options);
        Ok(Self {
            command,
            child: Some(child),
            connection,
        })
    }

    pub fn connection(&self) -> &BspConnection {
        &self.connection
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// `build/shutdown`, then `build/exit`, then wait for the process to go away.
    ///
    /// Falls back to killing the process tree if the server does not cooperate in time.
    pub async fn shutdown(mut self) -> Result<(), BspError> {
        let cancel = CancellationToken::new();
        let polite = tokio::time::timeout(SHUTDOWN_GRACE, async {
            self.connection.build_shutdown(&cancel).await?;
            self.connection.on_build_exit().await
        })
        .await;

        let result = match polite {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                Err(BspError::TimedOut {
                    idle: SHUTDOWN_GRACE,
                })
            }
        };

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(target: "trellis.bsp", %status, "BSP server exited");
                }
                _ => {
                    if let Some(pid) = child.id() {
                        trellis_process::kill_process_tree(pid);
                    }
                    let _ = child.wait().await;
                }
            }
        }
        self.connection.close();
        result
    }
}

impl Drop for BspSession {
    fn drop(&mut self) {
        self.connection.close();
        if let Some(child) = self.child.take() {
            if let Some(pid) = child.id() {
                tracing::debug!(target: "trellis.bsp", pid, "killing BSP server");
                trellis_process::kill_process_tree(pid);
            }
            // `kill_on_drop` reaps the direct child.
            drop(child);
        }
    }
}
