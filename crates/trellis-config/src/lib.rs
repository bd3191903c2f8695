//! Configuration for the trellis BSP sync engine.
//!
//! Settings are read from `<project root>/.trellis/config.toml` (all keys optional) and then
//! `TRELLIS_BSP_*` environment variables are layered on top. This crate also owns the tracing
//! subscriber setup so every binary initializes logging the same way.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_subscriber::prelude::*;

#[cfg(test)]
mod test_support;

pub const CONFIG_DIR: &str = ".trellis";
pub const CONFIG_FILE: &str = "config.toml";

pub const ENV_BSP_PROGRAM: &str = "TRELLIS_BSP_PROGRAM";
pub const ENV_BSP_ARGS: &str = "TRELLIS_BSP_ARGS";
pub const ENV_BSP_CONNECT_TIMEOUT_MS: &str = "TRELLIS_BSP_CONNECT_TIMEOUT_MS";
pub const ENV_BSP_IDLE_TIMEOUT_MS: &str = "TRELLIS_BSP_IDLE_TIMEOUT_MS";
pub const ENV_BSP_MAX_MESSAGE_BYTES: &str = "TRELLIS_BSP_MAX_MESSAGE_BYTES";

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 60_000;
// Cold `buildTarget/javacOptions` calls on large Bazel workspaces can stay silent for minutes.
const DEFAULT_IDLE_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;
const MAX_MESSAGE_BYTES_FLOOR: usize = 1024 * 1024;
const MAX_MESSAGE_BYTES_CEILING: usize = 512 * 1024 * 1024;
const DEFAULT_MIN_CHUNK_SIZE: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrellisConfig {
    pub bsp: BspSettings,
    pub sync: SyncSettings,
    pub logging: LoggingConfig,
}

impl TrellisConfig {
    pub fn config_path(project_root: &Path) -> PathBuf {
        project_root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load the project config, falling back to defaults when no config file exists, and apply
    /// environment overrides.
    pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::config_path(project_root))?;
        config.bsp.apply_env_overrides();
        Ok(config)
    }

    /// Parse a single config file without environment overrides.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// How to reach and talk to the BSP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BspSettings {
    /// Launcher override. When unset the `.bsp/*.json` connection file is used.
    pub program: Option<String>,
    pub args: Vec<String>,
    pub connect_timeout_ms: u64,
    /// A request fails as timed out once the server has been silent this long.
    pub idle_timeout_ms: u64,
    pub max_message_bytes: usize,
    pub min_chunk_size: usize,
}

impl Default for BspSettings {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
        }
    }
}

impl BspSettings {
    pub fn connect_timeout(&self) -> Duration {
        positive_millis(self.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS)
    }

    pub fn idle_timeout(&self) -> Duration {
        positive_millis(self.idle_timeout_ms, DEFAULT_IDLE_TIMEOUT_MS)
    }

    pub fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
            .clamp(MAX_MESSAGE_BYTES_FLOOR, MAX_MESSAGE_BYTES_CEILING)
    }

    pub fn min_chunk_size(&self) -> usize {
        self.min_chunk_size.max(1)
    }

    /// Apply `TRELLIS_BSP_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Some(program) = env_value(ENV_BSP_PROGRAM) {
            self.program = Some(program);
        }
        if let Some(args) = env_value(ENV_BSP_ARGS) {
            self.args = parse_args_env(&args);
        }
        if let Some(ms) = env_millis(ENV_BSP_CONNECT_TIMEOUT_MS) {
            self.connect_timeout_ms = ms;
        }
        if let Some(ms) = env_millis(ENV_BSP_IDLE_TIMEOUT_MS) {
            self.idle_timeout_ms = ms;
        }
        if let Some(bytes) = env_value(ENV_BSP_MAX_MESSAGE_BYTES).and_then(|v| v.parse().ok()) {
            self.max_message_bytes = bytes;
        }
    }
}

fn positive_millis(ms: u64, default: u64) -> Duration {
    // Zero would mean "time out immediately"; treat it as unset instead.
    Duration::from_millis(if ms == 0 { default } else { ms })
}

fn env_value(key: &str) -> Option<String> {
    let value = std::env::var(key).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn env_millis(key: &str) -> Option<u64> {
    let ms: i64 = env_value(key)?.parse().ok()?;
    // Treat <= 0 values as unset so callers can't accidentally disable timeouts and hang forever.
    (ms > 0).then_some(ms as u64)
}

/// Parse a launcher argument list given either as a JSON array or as whitespace-separated words
/// with single/double-quote grouping.
pub fn parse_args_env(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    if raw.starts_with('[') {
        if let Ok(args) = serde_json::from_str::<Vec<String>>(raw) {
            return args;
        }
    }
    split_args_whitespace(raw)
}

fn split_args_whitespace(raw: &str) -> Vec<String> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Quote {
        Single,
        Double,
    }

    // Quotes are removed; escape sequences are not interpreted (use the array form for that).
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<Quote> = None;

    for ch in raw.chars() {
        match quote {
            None => match ch {
                '\'' => quote = Some(Quote::Single),
                '"' => quote = Some(Quote::Double),
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        args.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
            Some(Quote::Single) if ch == '\'' => quote = None,
            Some(Quote::Double) if ch == '"' => quote = None,
            Some(_) => current.push(ch),
        }
    }

    if !current.is_empty() {
        args.push(current);
    }
    args
}

/// Knobs for the sync task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Load the default target selection right after a full sync.
    pub load_default_targets: bool,
    /// Name reported to the server in `build/initialize`.
    pub client_name: String,
    /// Language ids declared in the client capabilities.
    pub languages: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            load_default_targets: true,
            client_name: "trellis".to_string(),
            languages: ["java", "kotlin", "scala", "python"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// A level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    pub level: String,
    /// Emit logs in JSON format.
    pub json: bool,
    /// Mirror logs to stderr.
    pub stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            stderr: true,
        }
    }
}

impl LoggingConfig {
    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return "info".to_string();
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_string(),
            "debug" => "debug".to_string(),
            "info" => "info".to_string(),
            "warn" | "warning" => "warn".to_string(),
            "error" => "error".to_string(),
            _ => trimmed.to_string(),
        }
    }

    /// The effective filter: config directives, with `RUST_LOG` merged in when set.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let config_directives = Self::normalize_level_directives(&self.level);
        let fallback = || {
            tracing_subscriber::EnvFilter::try_new(&config_directives).unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::default()
                    .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
            })
        };

        match env_value("RUST_LOG") {
            Some(env_directives) => {
                tracing_subscriber::EnvFilter::try_new(format!(
                    "{config_directives},{env_directives}"
                ))
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&env_directives))
                .unwrap_or_else(|_| fallback())
            }
            None => fallback(),
        }
    }
}

static TRACING_INIT: Once = Once::new();

/// Install the global tracing subscriber. Only the first call has an effect.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();
        if !config.stderr {
            let _ = tracing_subscriber::registry().with(filter).try_init();
            return;
        }

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true);
        let result = if config.json {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.json().with_ansi(false))
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()
        };
        if result.is_err() {
            tracing::debug!(target: "trellis.config", "tracing subscriber already installed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{env_lock, EnvVarGuard};

    #[test]
    fn missing_config_file_yields_defaults() {
        let root = tempfile::tempdir().unwrap();
        let config = TrellisConfig::load_file(&TrellisConfig::config_path(root.path())).unwrap();
        assert_eq!(config, TrellisConfig::default());
        assert_eq!(config.bsp.min_chunk_size(), 100);
        assert!(config.sync.load_default_targets);
    }

    #[test]
    fn config_file_overrides_selected_keys() {
        let root = tempfile::tempdir().unwrap();
        let path = TrellisConfig::config_path(root.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"
[bsp]
program = "bazel-bsp"
min_chunk_size = 3

[logging]
level = "DEBUG"
"#,
        )
        .unwrap();

        let config = TrellisConfig::load_file(&path).unwrap();
        assert_eq!(config.bsp.program.as_deref(), Some("bazel-bsp"));
        assert_eq!(config.bsp.min_chunk_size(), 3);
        assert_eq!(config.bsp.idle_timeout(), Duration::from_millis(300_000));
        assert_eq!(
            LoggingConfig::normalize_level_directives(&config.logging.level),
            "debug"
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("config.toml");
        std::fs::write(&path, "[bsp]\nnot_a_key = 1\n").unwrap();

        let err = TrellisConfig::load_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "{err}");
    }

    #[test]
    fn zero_min_chunk_size_is_clamped() {
        let settings = BspSettings {
            min_chunk_size: 0,
            ..BspSettings::default()
        };
        assert_eq!(settings.min_chunk_size(), 1);
    }

    #[test]
    fn max_message_bytes_is_clamped() {
        let tiny = BspSettings {
            max_message_bytes: 10,
            ..BspSettings::default()
        };
        assert_eq!(tiny.max_message_bytes(), MAX_MESSAGE_BYTES_FLOOR);
    }

    #[test]
    fn env_overrides_replace_launcher_and_timeouts() {
        let _lock = env_lock();
        let _program = EnvVarGuard::set(ENV_BSP_PROGRAM, Some("from-env"));
        let _args = EnvVarGuard::set(ENV_BSP_ARGS, Some(r#"["--flag", "a b"]"#));
        let _idle = EnvVarGuard::set(ENV_BSP_IDLE_TIMEOUT_MS, Some("1234"));
        let _connect = EnvVarGuard::set(ENV_BSP_CONNECT_TIMEOUT_MS, Some("-5"));

        let mut settings = BspSettings::default();
        settings.apply_env_overrides();

        assert_eq!(settings.program.as_deref(), Some("from-env"));
        assert_eq!(settings.args, vec!["--flag".to_string(), "a b".to_string()]);
        assert_eq!(settings.idle_timeout(), Duration::from_millis(1234));
        assert_eq!(settings.connect_timeout(), Duration::from_millis(60_000));
    }

    #[test]
    fn args_env_parses_whitespace_with_quotes() {
        let raw = r#"--foo "bar baz" --qux='x y' --arg="value with spaces""#;
        assert_eq!(
            parse_args_env(raw),
            vec![
                "--foo".to_string(),
                "bar baz".to_string(),
                "--qux=x y".to_string(),
                "--arg=value with spaces".to_string(),
            ]
        );
    }
}
