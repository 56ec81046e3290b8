//! Logging setup shared by the `murmur` binary and integration tests.
//!
//! [`init_logging`] installs the global `tracing` subscriber once. Events
//! always go to `stderr` (where schedulers and container runtimes collect
//! them); when a log directory is configured they are also written to a
//! daily rolling file through a non-blocking appender. Later calls are no-ops
//! that hand back whatever the first call resolved.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Context;
use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static LOG_SINK: OnceLock<LogSink> = OnceLock::new();

const LOG_DIR_ENV: &str = "MURMUR_LOG_DIR";

/// Output encoding for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format `{other}` (expected text or json)")),
        }
    }
}

/// Where events end up after [`init_logging`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Stderr,
    /// Stderr plus today's file under the configured directory.
    File(PathBuf),
}

/// Configuration passed to [`init_logging`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Logical name of the component, used for the log file name.
    pub app_name: &'static str,
    /// Directory for the rolling file sink. `None` falls back to
    /// `MURMUR_LOG_DIR`, and without that only `stderr` is used.
    pub log_dir: Option<PathBuf>,
    pub format: LogFormat,
    /// Filter applied when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            app_name: "murmur",
            log_dir: None,
            format: LogFormat::Text,
            default_filter: "info".to_string(),
        }
    }
}

/// Initialise the global `tracing` subscriber.
pub fn init_logging(config: LogConfig) -> anyhow::Result<LogSink> {
    if let Some(sink) = LOG_SINK.get() {
        return Ok(sink.clone());
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let sink = match resolve_log_dir(config.log_dir.as_deref()) {
        None => {
            match config.format {
                LogFormat::Text => tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(std::io::stderr))
                    .try_init(),
                LogFormat::Json => tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json().with_writer(std::io::stderr))
                    .try_init(),
            }
            .map_err(|e| anyhow::anyhow!("tracing setup failed: {e}"))?;
            LogSink::Stderr
        }
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create log directory: {}", dir.display()))?;

            let file_name = format!("{}.log", config.app_name);
            let today = Local::now().format("%Y-%m-%d").to_string();
            let full_path = dir.join(format!("{file_name}.{today}"));

            let (writer, guard) = tracing_appender::non_blocking(rolling::daily(&dir, file_name));
            let _ = LOG_GUARD.set(guard);

            match config.format {
                LogFormat::Text => tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(writer).with_ansi(false))
                    .with(fmt::layer().with_writer(std::io::stderr))
                    .try_init(),
                LogFormat::Json => tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json().with_writer(writer))
                    .with(fmt::layer().json().with_writer(std::io::stderr))
                    .try_init(),
            }
            .map_err(|e| anyhow::anyhow!("tracing setup failed: {e}"))?;
            LogSink::File(full_path)
        }
    };

    let _ = LOG_SINK.set(sink.clone());
    Ok(sink)
}

fn resolve_log_dir(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = explicit {
        return Some(expand_home(dir));
    }
    match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => Some(expand_home(Path::new(dir.trim()))),
        _ => None,
    }
}

fn expand_home(path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_log_formats() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" Text ".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn explicit_dir_wins_and_expands_home() {
        let home = std::env::var("HOME").unwrap_or_default();
        let dir = resolve_log_dir(Some(Path::new("~/logs"))).unwrap();
        if !home.is_empty() {
            assert_eq!(dir, PathBuf::from(home).join("logs"));
        }
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(resolve_log_dir(Some(tmp.path())).unwrap(), tmp.path());
    }
}
