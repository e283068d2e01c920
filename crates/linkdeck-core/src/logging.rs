//! Tracing subscriber setup for the linkdeck binary and embedders.
//!
//! Governor code only emits `tracing` events; nothing here is required for
//! the engine to run. Events use stable field names (`tier`, `from`, `to`,
//! `fps`, `average_fps`, `ticket`, `limit`, `active`) so JSON output can be
//! filtered without parsing messages.
//!
//! Logging is best-effort: the `tracing` macros never return errors, so a
//! broken sink cannot abort a frame callback.

pub use crate::config::LogFormat;
use serde::{Deserialize, Serialize};
use std::io;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// `[logging]` section of `linkdeck.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// One of trace, debug, info, warn, error. `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
    /// Also append events to this file.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("failed to create log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to install subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Parse a configured level name. Accepts `warning` as an alias of `warn`.
pub fn parse_level(level: &str) -> Result<Level, LogError> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(LogError::InvalidLevel(level.to_string())),
    }
}

fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    if parent.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(parent)?;
    #[cfg(unix)]
    std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

fn open_log_file(path: &Path) -> io::Result<std::fs::File> {
    ensure_parent_dir(path)?;
    let existed = path.exists();
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    #[cfg(unix)]
    if !existed {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(file)
}

/// Install the global subscriber.
///
/// The configured level is validated even when `RUST_LOG` overrides it.
/// A second call returns [`LogError::AlreadyInitialized`].
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let level = parse_level(&config.level)?;
    if INITIALIZED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from(level).into()));
    let file = config.file.as_deref().map(open_log_file).transpose()?;
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Pretty => {
            let file_layer = file.map(|f| fmt::layer().with_writer(f).with_ansi(false));
            registry
                .with(fmt::layer().with_writer(io::stderr).with_target(true))
                .with(file_layer)
                .try_init()?;
        }
        LogFormat::Json => {
            let file_layer = file.map(|f| fmt::layer().json().flatten_event(true).with_writer(f));
            registry
                .with(
                    fmt::layer()
                        .json()
                        .flatten_event(true)
                        .with_current_span(true)
                        .with_writer(io::stderr),
                )
                .with(file_layer)
                .try_init()?;
        }
    }

    let _ = INITIALIZED.set(());
    tracing::debug!(
        level = %config.level,
        format = %config.format,
        file = ?config.file,
        "logging initialized"
    );
    Ok(())
}
