//! Snapshot file watcher for hot re-apply.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Watches the fleet snapshot and emits a trigger whenever it changes.
pub struct SnapshotWatcher {
    path: PathBuf,
    trigger_tx: mpsc::UnboundedSender<()>,
}

impl SnapshotWatcher {
    /// Create a new SnapshotWatcher.
    ///
    /// Returns the watcher and a receiver for change triggers.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<()>) {
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                trigger_tx,
            },
            trigger_rx,
        )
    }

    /// Start watching in a background thread.
    ///
    /// The parent directory is watched because snapshots are replaced by
    /// rename, which would orphan a watch on the file itself.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.trigger_tx.clone();
        let target = self.path.clone();
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let touches_snapshot = event.paths.iter().any(|p| p.file_name() == target.file_name());
                    if touches_snapshot && (event.kind.is_modify() || event.kind.is_create()) {
                        tracing::debug!(path = ?target, "Fleet snapshot changed");
                        let _ = tx.send(());
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Snapshot watcher started");
        Ok(watcher)
    }
}
