//! Detects external modifications to files inside a directory tree.
//!
//! [`ChangeWatcher`] registers the tree with the OS file-event facility via
//! `notify`. Raw events are bridged into a tokio channel and consumed by a
//! single task that owns the [`WatchTable`]; for every create, modify or
//! remove event it compares the file's modification time with the recorded
//! one and publishes a [`ChangeReport`].

use crate::error::{Result, ScribbleError};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Last-seen modification time of one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEntry {
    pub path: PathBuf,
    /// `None` when the path could not be stat'ed, e.g. after removal.
    pub modified: Option<SystemTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    Changed,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeReport {
    pub path: PathBuf,
    pub status: ChangeStatus,
    pub modified: Option<SystemTime>,
}

/// Insertion-ordered table of watched paths.
#[derive(Debug, Default)]
pub struct WatchTable {
    entries: Vec<WatchEntry>,
    index: HashMap<PathBuf, usize>,
}

impl WatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&WatchEntry> {
        self.index.get(path).map(|&i| &self.entries[i])
    }

    /// Records `modified` for `path`. Unseen paths are always `Changed`.
    pub fn observe(&mut self, path: &Path, modified: Option<SystemTime>) -> ChangeStatus {
        match self.index.get(path) {
            Some(&i) => {
                let entry = &mut self.entries[i];
                if entry.modified == modified {
                    ChangeStatus::Unchanged
                } else {
                    entry.modified = modified;
                    ChangeStatus::Changed
                }
            }
            None => {
                self.index.insert(path.to_path_buf(), self.entries.len());
                self.entries.push(WatchEntry {
                    path: path.to_path_buf(),
                    modified,
                });
                ChangeStatus::Changed
            }
        }
    }

    pub fn entries(&self) -> &[WatchEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<WatchEntry> {
        self.entries
    }
}

/// Running watcher over one directory tree.
pub struct ChangeWatcher {
    watcher: RecommendedWatcher,
    root: PathBuf,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<WatchTable>,
}

impl ChangeWatcher {
    /// Starts watching `root` recursively. Must be called inside a tokio runtime.
    pub fn start(root: impl AsRef<Path>) -> Result<(Self, mpsc::UnboundedReceiver<ChangeReport>)> {
        let root = root.as_ref().to_path_buf();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.send(res);
            },
            Config::default(),
        )
        .map_err(|source| ScribbleError::Watch {
            path: root.clone(),
            source,
        })?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| ScribbleError::Watch {
                path: root.clone(),
                source,
            })?;

        let task = tokio::spawn(run_event_loop(event_rx, shutdown_rx, report_tx));
        info!(root = %root.display(), "watching for changes");

        Ok((
            Self {
                watcher,
                root,
                shutdown: shutdown_tx,
                task,
            },
            report_rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Tears down the OS registration, processes events already queued and
    /// returns the table in insertion order.
    pub async fn stop(self) -> Vec<WatchEntry> {
        let Self {
            watcher,
            root,
            shutdown,
            task,
        } = self;
        drop(watcher);
        let _ = shutdown.send(());

        match task.await {
            Ok(table) => {
                info!(root = %root.display(), entries = table.len(), "watcher stopped");
                table.into_entries()
            }
            Err(e) => {
                warn!(root = %root.display(), error = %e, "watcher task ended abnormally");
                Vec::new()
            }
        }
    }
}

async fn run_event_loop(
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    mut shutdown: oneshot::Receiver<()>,
    reports: mpsc::UnboundedSender<ChangeReport>,
) -> WatchTable {
    let mut table = WatchTable::new();

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Some(Ok(event)) => handle_event(&mut table, &event, &reports).await,
                Some(Err(e)) => error!(error = %e, "file watcher error"),
                None => break,
            },
        }
    }

    while let Ok(res) = events.try_recv() {
        if let Ok(event) = res {
            handle_event(&mut table, &event, &reports).await;
        }
    }
    table
}

async fn handle_event(table: &mut WatchTable, event: &Event, reports: &mpsc::UnboundedSender<ChangeReport>) {
    if !is_relevant(&event.kind) {
        return;
    }

    for path in &event.paths {
        let modified = tokio::fs::metadata(path)
            .await
            .ok()
            .and_then(|meta| meta.modified().ok());
        let status = table.observe(path, modified);
        debug!(path = %path.display(), ?status, "observed change event");

        // Nobody listening is fine; the table is still kept current.
        let _ = reports.send(ChangeReport {
            path: path.clone(),
            status,
            modified,
        });
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}
