//! BSP connection discovery.
//!
//! Build tools advertise a server by dropping a JSON connection file into `<root>/.bsp/`. The
//! configured launcher (`bsp.program` / `TRELLIS_BSP_PROGRAM`) takes precedence over discovery.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use trellis_config::BspSettings;
use trellis_process::CommandSpec;

pub const BSP_DIR: &str = ".bsp";

/// Contents of a `.bsp/*.json` connection file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BspConnectionDetails {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub bsp_version: String,
    #[serde(default)]
    pub languages: Vec<String>,
    pub argv: Vec<String>,
}

/// All `.bsp/*.json` files under `root`, sorted by file name.
pub fn connection_files(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(root.join(BSP_DIR)) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json") && path.is_file())
        .collect();
    files.sort();
    files
}

/// The first parseable connection file with a non-empty `argv`.
///
/// Unreadable or malformed files are logged and skipped.
pub fn discover_connection_details(root: &Path) -> Option<BspConnectionDetails> {
    for path in connection_files(root) {
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(
                    target: "trellis.bsp",
                    path = %path.display(),
                    error = %err,
                    "failed to read BSP connection file"
                );
                continue;
            }
        };
        match serde_json::from_str::<BspConnectionDetails>(&text) {
            Ok(details) if details.argv.first().is_some_and(|p| !p.trim().is_empty()) => {
                tracing::debug!(
                    target: "trellis.bsp",
                    path = %path.display(),
                    name = %details.name,
                    "discovered BSP connection file"
                );
                return Some(details);
            }
            Ok(_) => {
                tracing::warn!(
                    target: "trellis.bsp",
                    path = %path.display(),
                    "ignoring BSP connection file with empty argv"
                );
            }
            Err(err) => {
                tracing::warn!(
                    target: "trellis.bsp",
                    path = %path.display(),
                    error = %err,
                    "ignoring malformed BSP connection file"
                );
            }
        }
    }
    None
}

/// Work out how to launch the server for `root`.
///
/// Starts from the discovered `argv`; a configured program replaces `argv[0]` and configured
/// args replace the rest.
pub fn resolve_launch_command(root: &Path, settings: &BspSettings) -> Option<CommandSpec> {
    let (mut program, mut args) = match discover_connection_details(root) {
        Some(details) => {
            let mut argv = details.argv.into_iter();
            let program = argv.next().unwrap_or_default();
            (program, argv.collect::<Vec<_>>())
        }
        None => (String::new(), Vec::new()),
    };

    if let Some(configured) = settings.program.as_deref().filter(|p| !p.trim().is_empty()) {
        program = configured.to_string();
    }
    if !settings.args.is_empty() {
        args = settings.args.clone();
    }

    if program.trim().is_empty() {
        return None;
    }
    Some(CommandSpec::new(root, Path::new(&program), &args))
}
