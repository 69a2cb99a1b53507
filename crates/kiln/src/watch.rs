//! File system watcher with debouncing for development mode.
//!
//! Watches the frontend directory recursively and feeds relevant changes to
//! an [`Invalidator`]. Hidden paths, metadata-only events and configured
//! ignore patterns are filtered out.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{ConfigError, Result};
use crate::invalidate::Invalidator;

const CHANNEL_CAPACITY: usize = 100;

/// Recursive watcher sending changed paths through a channel.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Watch `root`. Repeated events for the same path within `debounce_ms`
    /// are dropped.
    pub fn new(
        root: PathBuf,
        ignore_patterns: Vec<String>,
        debounce_ms: u64,
    ) -> Result<(Self, mpsc::Receiver<PathBuf>)> {
        if !root.exists() {
            return Err(ConfigError::NotFound {
                field: "frontend_dir",
                path: root,
            }
            .into());
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let debounce = Duration::from_millis(debounce_ms);
        let mut last_event: Option<(PathBuf, Instant)> = None;
        let watch_root = root.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!(error = %e, "Error watching files");
                    return;
                }
            };

            if !is_content_change(&event.kind) {
                return;
            }

            for path in event.paths {
                if should_ignore(&path, &watch_root, &ignore_patterns) {
                    continue;
                }

                let now = Instant::now();
                if let Some((last_path, last_time)) = &last_event {
                    if *last_path == path && now.duration_since(*last_time) < debounce {
                        continue;
                    }
                }
                last_event = Some((path.clone(), now));

                // Receiver gone means the watch handle was dropped.
                let _ = tx.blocking_send(path);
            }
        })?;

        watcher.watch(&root, RecursiveMode::Recursive)?;

        Ok((
            Self {
                _watcher: watcher,
                root,
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Creations, removals and content edits. Metadata-only changes (chmod,
/// timestamps) and reads are not.
fn is_content_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

fn should_ignore(path: &Path, root: &Path, ignore_patterns: &[String]) -> bool {
    let Ok(rel_path) = path.strip_prefix(root) else {
        return true;
    };
    let path_str = rel_path.to_string_lossy().replace('\\', "/");

    for pattern in ignore_patterns {
        if let Some(ext) = pattern.strip_prefix('*') {
            if path_str.ends_with(ext) {
                return true;
            }
        } else if path_str.starts_with(pattern.as_str())
            || path_str.contains(&format!("/{}", pattern))
        {
            return true;
        }
    }

    // Hidden files and directories, including editor swap files and the
    // default build directory.
    rel_path.components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .is_some_and(|name| name.starts_with('.') && name != "." && name != "..")
    })
}

/// Running watcher plus the task applying its changes. Dropping it stops both.
pub struct WatchHandle {
    watcher: FileWatcher,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub(crate) fn spawn(
        watcher: FileWatcher,
        mut changes: mpsc::Receiver<PathBuf>,
        invalidator: Invalidator,
    ) -> Self {
        let task = tokio::spawn(async move {
            while let Some(path) = changes.recv().await {
                debug!(path = %path.display(), "File change");
                if let Err(e) = invalidator.handle_change(&path).await {
                    error!(path = %path.display(), error = %e, "Failed to apply file change");
                }
            }
        });
        Self { watcher, task }
    }

    pub fn root(&self) -> &Path {
        self.watcher.root()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
