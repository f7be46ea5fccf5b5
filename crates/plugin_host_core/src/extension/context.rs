//! Capability-scoped API surface handed to an extension's `activate`.
//!
//! # Responsibility
//! - Wrap host collaborators so every gated call checks the extension's
//!   permission manager first.
//! - Tag registrations and storage keys with the extension id.
//!
//! # Invariants
//! - Permission failures are returned to the caller, never swallowed.
//! - Gated calls delegate arguments unchanged once the check passes.

use crate::extension::capability::Capability;
use crate::extension::permission::{PermissionDenied, PermissionManager};
use crate::host::{
    CommandHandler, DirEntry, Disposable, ExecOptions, ExecOutput, FileFilter, FileStat,
    HostError, HostServices, NotificationLevel, ToolDefinition, WatchEvent,
};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub type ContextResult<T> = Result<T, ContextError>;

/// Failures of context calls made by extension code.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    PermissionDenied(#[from] PermissionDenied),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("stored value `{key}` could not be converted: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("`{0}` is not available to extensions yet")]
    Unsupported(&'static str),
}

/// Read-only identity of the extension owning a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginIdentity {
    pub id: String,
    pub name: String,
    pub version: String,
    /// Private data directory of the extension.
    pub data_path: PathBuf,
}

struct ContextInner {
    identity: PluginIdentity,
    permissions: Arc<PermissionManager>,
    services: HostServices,
}

/// Capability-scoped handle passed to `activate`. Clones share state.
#[derive(Clone)]
pub struct PluginContext {
    inner: Arc<ContextInner>,
}

impl PluginContext {
    pub fn new(
        identity: PluginIdentity,
        permissions: Arc<PermissionManager>,
        services: HostServices,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                identity,
                permissions,
                services,
            }),
        }
    }

    pub fn identity(&self) -> &PluginIdentity {
        &self.inner.identity
    }

    /// Permission manager of this extension, for explicit checks.
    pub fn permissions(&self) -> &PermissionManager {
        &self.inner.permissions
    }

    pub fn fs(&self) -> FsApi<'_> {
        FsApi { inner: &self.inner }
    }

    pub fn shell(&self) -> ShellApi<'_> {
        ShellApi { inner: &self.inner }
    }

    pub fn ai(&self) -> AiApi<'_> {
        AiApi { inner: &self.inner }
    }

    pub fn commands(&self) -> CommandsApi<'_> {
        CommandsApi { inner: &self.inner }
    }

    pub fn notifications(&self) -> NotificationsApi<'_> {
        NotificationsApi { inner: &self.inner }
    }

    pub fn workspace(&self) -> WorkspaceApi<'_> {
        WorkspaceApi { inner: &self.inner }
    }

    pub fn storage(&self) -> StorageApi<'_> {
        StorageApi { inner: &self.inner }
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("identity", &self.inner.identity)
            .field("permissions", &self.inner.permissions)
            .finish_non_exhaustive()
    }
}

/// Filesystem operations; reads need `fs:read`, writes `fs:write`.
pub struct FsApi<'a> {
    inner: &'a ContextInner,
}

impl FsApi<'_> {
    pub async fn read_file(&self, path: impl AsRef<Path>) -> ContextResult<String> {
        self.inner.permissions.require(Capability::FsRead)?;
        Ok(self.inner.services.fs.read_file(path.as_ref()).await?)
    }

    /// Writing is high-risk: the first write may ask the user to confirm.
    pub async fn write_file(&self, path: impl AsRef<Path>, contents: &str) -> ContextResult<()> {
        self.inner
            .permissions
            .require_with_confirm(Capability::FsWrite)
            .await?;
        Ok(self
            .inner
            .services
            .fs
            .write_file(path.as_ref(), contents)
            .await?)
    }

    pub async fn read_dir(&self, path: impl AsRef<Path>) -> ContextResult<Vec<DirEntry>> {
        self.inner.permissions.require(Capability::FsRead)?;
        Ok(self.inner.services.fs.read_dir(path.as_ref()).await?)
    }

    pub async fn stat(&self, path: impl AsRef<Path>) -> ContextResult<FileStat> {
        self.inner.permissions.require(Capability::FsRead)?;
        Ok(self.inner.services.fs.stat(path.as_ref()).await?)
    }

    pub fn watch<F>(&self, path: impl AsRef<Path>, callback: F) -> ContextResult<Disposable>
    where
        F: Fn(WatchEvent) + Send + Sync + 'static,
    {
        self.inner.permissions.require(Capability::FsRead)?;
        Ok(self
            .inner
            .services
            .fs
            .watch(path.as_ref(), Arc::new(callback))?)
    }
}

/// Process execution; needs `shell:exec` (high-risk).
pub struct ShellApi<'a> {
    inner: &'a ContextInner,
}

impl ShellApi<'_> {
    pub async fn exec(
        &self,
        command: &str,
        args: &[String],
        options: ExecOptions,
    ) -> ContextResult<ExecOutput> {
        self.inner
            .permissions
            .require_with_confirm(Capability::ShellExec)
            .await?;
        Ok(self
            .inner
            .services
            .process
            .exec(command, args, options)
            .await?)
    }
}

/// AI integration points.
pub struct AiApi<'a> {
    inner: &'a ContextInner,
}

impl AiApi<'_> {
    /// Registers a tool tagged with this extension's id.
    pub fn register_tool(&self, tool: ToolDefinition) -> ContextResult<Disposable> {
        Ok(self
            .inner
            .services
            .tools
            .register(&self.inner.identity.id, tool)?)
    }

    /// Reserved; always fails until chat is wired to the AI subsystem.
    pub async fn chat(&self, _prompt: &str) -> ContextResult<String> {
        self.inner.permissions.require(Capability::AiChat)?;
        Err(ContextError::Unsupported("ai.chat"))
    }
}

pub struct CommandsApi<'a> {
    inner: &'a ContextInner,
}

impl CommandsApi<'_> {
    /// Registers `handler` under `command_id`, tagged with this extension's id.
    pub fn register<F, Fut>(&self, command_id: &str, handler: F) -> ContextResult<Disposable>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: CommandHandler = Arc::new(move |args| handler(args).boxed());
        Ok(self
            .inner
            .services
            .commands
            .register(&self.inner.identity.id, command_id, handler)?)
    }
}

/// Severity-tagged notifications; needs `notification`.
pub struct NotificationsApi<'a> {
    inner: &'a ContextInner,
}

impl NotificationsApi<'_> {
    pub fn info(&self, message: &str) -> ContextResult<()> {
        self.post(NotificationLevel::Info, message)
    }

    pub fn warning(&self, message: &str) -> ContextResult<()> {
        self.post(NotificationLevel::Warning, message)
    }

    pub fn error(&self, message: &str) -> ContextResult<()> {
        self.post(NotificationLevel::Error, message)
    }

    fn post(&self, level: NotificationLevel, message: &str) -> ContextResult<()> {
        self.inner.permissions.require(Capability::Notification)?;
        self.inner
            .services
            .notifications
            .notify(&self.inner.identity.id, level, message);
        Ok(())
    }
}

pub struct WorkspaceApi<'a> {
    inner: &'a ContextInner,
}

impl WorkspaceApi<'_> {
    pub fn data_path(&self) -> &Path {
        &self.inner.identity.data_path
    }

    pub async fn pick_folder(&self) -> ContextResult<Option<PathBuf>> {
        Ok(self.inner.services.dialogs.pick_folder().await?)
    }

    pub async fn pick_file(&self, filters: &[FileFilter]) -> ContextResult<Option<PathBuf>> {
        Ok(self.inner.services.dialogs.pick_file(filters).await?)
    }
}

/// Key/value storage private to this extension; values are stored as JSON.
pub struct StorageApi<'a> {
    inner: &'a ContextInner,
}

impl StorageApi<'_> {
    /// Returns `Ok(None)` when `key` has no value.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> ContextResult<Option<T>> {
        let raw = self
            .inner
            .services
            .storage
            .get(&self.inner.identity.id, key)
            .await?;
        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|source| ContextError::Serialization {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> ContextResult<()> {
        let raw = serde_json::to_string(value).map_err(|source| ContextError::Serialization {
            key: key.to_string(),
            source,
        })?;
        Ok(self
            .inner
            .services
            .storage
            .set(&self.inner.identity.id, key, &raw)
            .await?)
    }

    pub async fn delete(&self, key: &str) -> ContextResult<()> {
        Ok(self
            .inner
            .services
            .storage
            .delete(&self.inner.identity.id, key)
            .await?)
    }
}
