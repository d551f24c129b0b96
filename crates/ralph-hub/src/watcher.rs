use crate::config::WatchedFiles;
use notify::{Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Which watched file changed. Ordering is the delivery order within one
/// debounce window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    Status,
    Tasks,
    Logs,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Status => "status",
            ChangeKind::Tasks => "tasks",
            ChangeKind::Logs => "logs",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub debounce: Duration,
    /// Only used when the native watcher is unavailable.
    pub poll_interval: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch setup failed: {0}")]
    Notify(#[from] notify::Error),
}

const KIND_QUEUE: usize = 16;

/// Filesystem observation of the status, task and log files.
///
/// Dropping the watcher (or calling [`cancel`](Self::cancel)) releases the
/// notify handle and stops the debounce task; the kind stream then ends.
pub struct FileChangeWatcher {
    watcher: Option<Box<dyn Watcher + Send>>,
    task: JoinHandle<()>,
}

impl FileChangeWatcher {
    pub fn start(
        files: &WatchedFiles,
        options: WatchOptions,
    ) -> Result<(Self, mpsc::Receiver<ChangeKind>), WatchError> {
        let dirs = files.directories();
        for dir in &dirs {
            if let Err(err) = std::fs::create_dir_all(dir) {
                warn!(event = "watch_dir_create_failed", dir = %dir.display(), error = %err);
            }
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let watcher = match native_watcher(files, &dirs, raw_tx.clone()) {
            Ok(watcher) => watcher,
            Err(err) => {
                warn!(event = "native_watch_failed", error = %err, fallback = "poll");
                poll_watcher(files, &dirs, raw_tx, options.poll_interval)?
            }
        };

        let (out_tx, out_rx) = mpsc::channel(KIND_QUEUE);
        let task = tokio::spawn(debounce_loop(raw_rx, out_tx, options.debounce));
        info!(event = "watch_started", dirs = dirs.len());
        Ok((
            Self {
                watcher: Some(watcher),
                task,
            },
            out_rx,
        ))
    }

    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.watcher.take().is_some() {
            debug!(event = "watch_stopped");
        }
        self.task.abort();
    }
}

impl Drop for FileChangeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn event_handler(
    files: &WatchedFiles,
    tx: mpsc::UnboundedSender<ChangeKind>,
) -> impl FnMut(notify::Result<Event>) + Send + 'static {
    let files = files.clone();
    move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            for path in &event.paths {
                if let Some(kind) = files.kind_of(path) {
                    let _ = tx.send(kind);
                }
            }
        }
        Err(err) => warn!(event = "watch_error", error = %err),
    }
}

fn native_watcher(
    files: &WatchedFiles,
    dirs: &[PathBuf],
    tx: mpsc::UnboundedSender<ChangeKind>,
) -> notify::Result<Box<dyn Watcher + Send>> {
    let mut watcher = notify::recommended_watcher(event_handler(files, tx))?;
    watch_dirs(&mut watcher, dirs)?;
    Ok(Box::new(watcher))
}

fn poll_watcher(
    files: &WatchedFiles,
    dirs: &[PathBuf],
    tx: mpsc::UnboundedSender<ChangeKind>,
    interval: Duration,
) -> notify::Result<Box<dyn Watcher + Send>> {
    let config = notify::Config::default().with_poll_interval(interval);
    let mut watcher = PollWatcher::new(event_handler(files, tx), config)?;
    watch_dirs(&mut watcher, dirs)?;
    Ok(Box::new(watcher))
}

fn watch_dirs(watcher: &mut dyn Watcher, dirs: &[PathBuf]) -> notify::Result<()> {
    for dir in dirs {
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
    }
    Ok(())
}

/// Coalesces raw kinds into one delivery per kind per window. The window
/// opens on the first pending kind, so a steady stream of writes cannot
/// postpone delivery indefinitely.
async fn debounce_loop(
    mut raw: mpsc::UnboundedReceiver<ChangeKind>,
    out: mpsc::Sender<ChangeKind>,
    window: Duration,
) {
    let mut pending: BTreeSet<ChangeKind> = BTreeSet::new();
    let mut deadline: Option<Instant> = None;
    loop {
        tokio::select! {
            _ = out.closed() => break,
            received = raw.recv() => match received {
                Some(kind) => {
                    pending.insert(kind);
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + window);
                    }
                }
                None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                for kind in std::mem::take(&mut pending) {
                    if out.send(kind).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
