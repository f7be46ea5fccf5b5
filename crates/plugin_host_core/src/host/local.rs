//! Local-machine collaborators: filesystem, processes, log notifications.

use super::{
    DialogService, DirEntry, Disposable, ExecOptions, ExecOutput, FileFilter, FileStat,
    FileSystemService, HostError, HostResult, NotificationLevel, NotificationService,
    ProcessService, WatchCallback, WatchEvent, WatchEventKind,
};
use async_trait::async_trait;
use log::{error, info, warn};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Instant, UNIX_EPOCH};
use tokio::process::Command;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> HostError + '_ {
    move |source| HostError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Filesystem access through `tokio::fs`; watches through `notify`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystemService for LocalFileSystem {
    async fn read_file(&self, path: &Path) -> HostResult<String> {
        tokio::fs::read_to_string(path).await.map_err(io_error(path))
    }

    async fn write_file(&self, path: &Path, contents: &str) -> HostResult<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_error(parent))?;
        }
        tokio::fs::write(path, contents).await.map_err(io_error(path))
    }

    async fn read_dir(&self, path: &Path) -> HostResult<Vec<DirEntry>> {
        let mut reader = tokio::fs::read_dir(path).await.map_err(io_error(path))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(io_error(path))? {
            let is_dir = entry
                .file_type()
                .await
                .map(|file_type| file_type.is_dir())
                .unwrap_or(false);
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                is_dir,
            });
        }
        entries.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(entries)
    }

    async fn stat(&self, path: &Path) -> HostResult<FileStat> {
        let metadata = tokio::fs::metadata(path).await.map_err(io_error(path))?;
        let modified_ms = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .and_then(|elapsed| u64::try_from(elapsed.as_millis()).ok());
        Ok(FileStat {
            is_file: metadata.is_file(),
            is_dir: metadata.is_dir(),
            size: metadata.len(),
            modified_ms,
        })
    }

    fn watch(&self, path: &Path, callback: WatchCallback) -> HostResult<Disposable> {
        let watch_error = |err: notify::Error| HostError::Watch {
            path: path.to_path_buf(),
            message: err.to_string(),
        };

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<notify::Event>| match result {
                Ok(event) => callback(WatchEvent {
                    kind: watch_event_kind(&event.kind),
                    paths: event.paths,
                }),
                Err(err) => warn!("event=fs_watch module=host status=error error={}", err),
            },
            notify::Config::default(),
        )
        .map_err(watch_error)?;
        watcher
            .watch(path, RecursiveMode::Recursive)
            .map_err(watch_error)?;

        // The watcher stops when the handle's closure is dropped or run.
        Ok(Disposable::new(move || drop(watcher)))
    }
}

fn watch_event_kind(kind: &EventKind) -> WatchEventKind {
    match kind {
        EventKind::Create(_) => WatchEventKind::Created,
        EventKind::Modify(_) => WatchEventKind::Modified,
        EventKind::Remove(_) => WatchEventKind::Removed,
        _ => WatchEventKind::Other,
    }
}

/// Subprocess execution through `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalProcessRunner;

#[async_trait]
impl ProcessService for LocalProcessRunner {
    async fn exec(
        &self,
        command: &str,
        args: &[String],
        options: ExecOptions,
    ) -> HostResult<ExecOutput> {
        let started_at = Instant::now();
        let mut child = Command::new(command);
        child
            .args(args)
            .envs(&options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = options.cwd.as_deref() {
            child.current_dir(cwd);
        }

        let spawn_error = |source| HostError::Spawn {
            command: command.to_string(),
            source,
        };
        let output = match options.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child.output())
                .await
                .map_err(|_| HostError::Timeout {
                    command: command.to_string(),
                    timeout_ms: timeout.as_millis(),
                })?
                .map_err(spawn_error)?,
            None => child.output().await.map_err(spawn_error)?,
        };

        info!(
            "event=process_exec module=host status=ok command={} code={:?} duration_ms={}",
            command,
            output.status.code(),
            started_at.elapsed().as_millis()
        );
        Ok(ExecOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Notification sink writing to the core log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl NotificationService for LogNotifier {
    fn notify(&self, plugin_id: &str, level: NotificationLevel, message: &str) {
        match level {
            NotificationLevel::Info => info!(
                "event=plugin_notify module=host level=info plugin_id={} message={}",
                plugin_id, message
            ),
            NotificationLevel::Warning => warn!(
                "event=plugin_notify module=host level=warning plugin_id={} message={}",
                plugin_id, message
            ),
            NotificationLevel::Error => error!(
                "event=plugin_notify module=host level=error plugin_id={} message={}",
                plugin_id, message
            ),
        }
    }
}

/// Dialog collaborator for headless hosts: every pick is cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDialog;

#[async_trait]
impl DialogService for NoDialog {
    async fn pick_folder(&self) -> HostResult<Option<PathBuf>> {
        Ok(None)
    }

    async fn pick_file(&self, _filters: &[FileFilter]) -> HostResult<Option<PathBuf>> {
        Ok(None)
    }
}
