//! Process-wide logging for the plugin host.
//!
//! # Responsibility
//! - Start the rolling file logger once per process.
//! - Capture panics (host and extension) as `event=panic_captured` lines.
//!
//! # Invariants
//! - Initialization never panics.
//! - Once started, the level and directory are fixed for the process.
//! - Log lines carry metadata only; free-form payloads are flattened to one
//!   line and capped.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::any::Any;
use std::path::{Path, PathBuf};
use thiserror::Error;

const LOG_BASENAME: &str = "plugin_host";
const ROTATE_AT_BYTES: u64 = 8 * 1024 * 1024;
const KEEP_FILES: usize = 4;
const MAX_PAYLOAD_CHARS: usize = 200;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

struct ActiveLogger {
    level: &'static str,
    dir: PathBuf,
    _handle: LoggerHandle,
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("unsupported log level `{0}`; expected trace|debug|info|warn|error")]
    Level(String),
    #[error("log directory must be an absolute path, got `{}`", .0.display())]
    RelativeDir(PathBuf),
    #[error("failed to create log directory `{}`: {source}", .dir.display())]
    CreateDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start logger: {0}")]
    Backend(#[from] flexi_logger::FlexiLoggerError),
    #[error("logging already runs with level `{active_level}` at `{}`", .active_dir.display())]
    Conflict {
        active_level: &'static str,
        active_dir: PathBuf,
    },
}

/// Starts file logging at `level` under `log_dir`.
///
/// Repeating the call with the same arguments is a no-op; different
/// arguments after a successful start return [`LoggingError::Conflict`].
pub fn init_logging(level: &str, log_dir: &Path) -> Result<(), LoggingError> {
    let level = parse_level(level)?;
    if !log_dir.is_absolute() {
        return Err(LoggingError::RelativeDir(log_dir.to_path_buf()));
    }

    let active = ACTIVE.get_or_try_init(|| start(level, log_dir))?;
    if active.level != level || active.dir != log_dir {
        return Err(LoggingError::Conflict {
            active_level: active.level,
            active_dir: active.dir.clone(),
        });
    }
    Ok(())
}

/// `(level, directory)` of the running logger, if any.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    ACTIVE.get().map(|active| (active.level, active.dir.clone()))
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

/// Readable one-line summary of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    let raw = payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    sanitize_message(&raw, MAX_PAYLOAD_CHARS)
}

pub(crate) fn sanitize_message(value: &str, max_chars: usize) -> String {
    let flattened = value.replace(['\n', '\r'], " ");
    if flattened.chars().count() <= max_chars {
        return flattened;
    }
    let mut capped: String = flattened.chars().take(max_chars).collect();
    capped.push_str("...");
    capped
}

fn start(level: &'static str, dir: &Path) -> Result<ActiveLogger, LoggingError> {
    std::fs::create_dir_all(dir).map_err(|source| LoggingError::CreateDir {
        dir: dir.to_path_buf(),
        source,
    })?;

    let handle = Logger::try_with_str(level)?
        .log_to_file(FileSpec::default().directory(dir).basename(LOG_BASENAME))
        .rotate(
            Criterion::Size(ROTATE_AT_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(KEEP_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()?;

    install_panic_hook();
    info!(
        "event=host_start module=core status=ok platform={} version={} level={} log_dir={}",
        std::env::consts::OS,
        env!("CARGO_PKG_VERSION"),
        level,
        dir.display()
    );

    Ok(ActiveLogger {
        level,
        dir: dir.to_path_buf(),
        _handle: handle,
    })
}

fn parse_level(level: &str) -> Result<&'static str, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        _ => Err(LoggingError::Level(level.trim().to_string())),
    }
}

fn install_panic_hook() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        error!(
            "event=panic_captured module=core status=error location={} payload={}",
            location,
            panic_message(panic_info.payload())
        );
        previous(panic_info);
    }));
}
