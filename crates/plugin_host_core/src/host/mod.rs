//! Host service collaborators consumed by extension contexts.
//!
//! # Responsibility
//! - Define the interfaces the core uses to reach host resources
//!   (filesystem, processes, storage, dialogs, notifications, registries).
//! - Provide default in-process implementations for desktop wiring and tests.
//!
//! # Invariants
//! - Implementations must tolerate interleaved async use from several
//!   extensions; the core adds no locking around them.
//! - Storage is keyed externally by `(plugin_id, key)`.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

mod local;
mod registry;
mod storage;

pub use local::{LocalFileSystem, LocalProcessRunner, LogNotifier, NoDialog};
pub use registry::{InMemoryCommandRegistry, InMemoryToolRegistry};
pub use storage::SqliteStorage;

pub type HostResult<T> = Result<T, HostError>;

/// Failures reported by host collaborators.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("i/o failed on `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u128 },
    #[error("watch failed on `{}`: {message}", .path.display())]
    Watch { path: PathBuf, message: String },
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("`{0}` is already registered")]
    AlreadyRegistered(String),
}

/// Metadata returned by [`FileSystemService::stat`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStat {
    pub is_file: bool,
    pub is_dir: bool,
    pub size: u64,
    /// Modification time in unix milliseconds, when the platform reports it.
    pub modified_ms: Option<u64>,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Change kind delivered to watch callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Modified,
    Removed,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub paths: Vec<PathBuf>,
}

pub type WatchCallback = Arc<dyn Fn(WatchEvent) + Send + Sync>;

/// Overrides forwarded unchanged to the process collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOptions {
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

impl NotificationLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// File-type filter shown by the file picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFilter {
    pub name: String,
    pub extensions: Vec<String>,
}

pub type CommandHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// AI tool contributed by an extension.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool input.
    pub parameters: Value,
    pub handler: CommandHandler,
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// One-shot cleanup handle returned by registrations and watches.
///
/// Dropping a handle without calling [`Disposable::dispose`] leaves the
/// registration in place; resources owned by the cleanup closure are released
/// with it.
pub struct Disposable {
    id: Uuid,
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl Disposable {
    pub fn new(cleanup: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id: Uuid::new_v4(),
            cleanup: Some(Box::new(cleanup)),
        }
    }

    /// Handle whose disposal does nothing.
    pub fn noop() -> Self {
        Self {
            id: Uuid::new_v4(),
            cleanup: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn dispose(mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl std::fmt::Debug for Disposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposable").field("id", &self.id).finish()
    }
}

#[async_trait]
pub trait FileSystemService: Send + Sync {
    async fn read_file(&self, path: &Path) -> HostResult<String>;
    async fn write_file(&self, path: &Path, contents: &str) -> HostResult<()>;
    async fn read_dir(&self, path: &Path) -> HostResult<Vec<DirEntry>>;
    async fn stat(&self, path: &Path) -> HostResult<FileStat>;
    fn watch(&self, path: &Path, callback: WatchCallback) -> HostResult<Disposable>;
}

#[async_trait]
pub trait ProcessService: Send + Sync {
    async fn exec(
        &self,
        command: &str,
        args: &[String],
        options: ExecOptions,
    ) -> HostResult<ExecOutput>;
}

/// Structured key/value storage, scoped by `(plugin_id, key)`.
#[async_trait]
pub trait StorageService: Send + Sync {
    async fn get(&self, plugin_id: &str, key: &str) -> HostResult<Option<String>>;
    async fn set(&self, plugin_id: &str, key: &str, value: &str) -> HostResult<()>;
    async fn delete(&self, plugin_id: &str, key: &str) -> HostResult<()>;
}

#[async_trait]
pub trait DialogService: Send + Sync {
    async fn pick_folder(&self) -> HostResult<Option<PathBuf>>;
    async fn pick_file(&self, filters: &[FileFilter]) -> HostResult<Option<PathBuf>>;
}

pub trait NotificationService: Send + Sync {
    fn notify(&self, plugin_id: &str, level: NotificationLevel, message: &str);
}

/// Command registry; registrations are tagged with the owning plugin id.
pub trait CommandRegistry: Send + Sync {
    fn register(
        &self,
        plugin_id: &str,
        command_id: &str,
        handler: CommandHandler,
    ) -> HostResult<Disposable>;
    /// Removes every command owned by `plugin_id`.
    fn unregister_all(&self, plugin_id: &str);
}

/// AI-tool registry; registrations are tagged with the owning plugin id.
pub trait ToolRegistry: Send + Sync {
    fn register(&self, plugin_id: &str, tool: ToolDefinition) -> HostResult<Disposable>;
    /// Removes every tool owned by `plugin_id`.
    fn unregister_all(&self, plugin_id: &str);
}

/// Bundle of collaborators injected into the plugin manager.
#[derive(Clone)]
pub struct HostServices {
    pub fs: Arc<dyn FileSystemService>,
    pub process: Arc<dyn ProcessService>,
    pub storage: Arc<dyn StorageService>,
    pub dialogs: Arc<dyn DialogService>,
    pub notifications: Arc<dyn NotificationService>,
    pub commands: Arc<dyn CommandRegistry>,
    pub tools: Arc<dyn ToolRegistry>,
}

impl HostServices {
    /// Local-machine wiring: real filesystem and processes, the given
    /// storage, log-backed notifications, no dialogs, in-memory registries.
    pub fn local(storage: Arc<dyn StorageService>) -> Self {
        Self {
            fs: Arc::new(LocalFileSystem),
            process: Arc::new(LocalProcessRunner),
            storage,
            dialogs: Arc::new(NoDialog),
            notifications: Arc::new(LogNotifier),
            commands: Arc::new(InMemoryCommandRegistry::new()),
            tools: Arc::new(InMemoryToolRegistry::new()),
        }
    }

    /// Revokes every command and tool `plugin_id` registered.
    pub(crate) fn revoke_registrations(&self, plugin_id: &str) {
        self.commands.unregister_all(plugin_id);
        self.tools.unregister_all(plugin_id);
    }
}

#[cfg(test)]
mod tests {
    use super::Disposable;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn dispose_runs_cleanup_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = Disposable::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.dispose();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_without_dispose_skips_cleanup() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        drop(Disposable::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Disposable::noop().dispose();
    }

    #[test]
    fn handles_have_distinct_ids() {
        assert_ne!(Disposable::noop().id(), Disposable::noop().id());
    }
}
