use crate::source::Format;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Quiet period before a batch of changes is handed over.
pub const DEBOUNCE: Duration = Duration::from_millis(100);

/// The kind of file change detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// A changed content file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Collects raw events and releases them once the stream goes quiet. Repeated
/// events for one path collapse into the latest kind.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, ChangeKind>,
    order: Vec<PathBuf>,
    last_event: Instant,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Debouncer {
            window,
            pending: HashMap::new(),
            order: Vec::new(),
            last_event: Instant::now(),
        }
    }

    pub fn push(&mut self, path: PathBuf, kind: ChangeKind, at: Instant) {
        if Format::from_path(&path).is_none() {
            return;
        }
        if self.pending.insert(path.clone(), kind).is_none() {
            self.order.push(path);
        }
        self.last_event = at;
    }

    /// Drain the pending batch if nothing arrived during the window.
    pub fn flush(&mut self, now: Instant) -> Option<Vec<WatcherEvent>> {
        if self.pending.is_empty() || now.duration_since(self.last_event) < self.window {
            return None;
        }
        let mut pending = std::mem::take(&mut self.pending);
        Some(
            self.order
                .drain(..)
                .filter_map(|path| {
                    let kind = pending.remove(&path)?;
                    Some(WatcherEvent { path, kind })
                })
                .collect(),
        )
    }
}

/// Watches collection directories and delivers debounced change batches.
pub struct ContentWatcher {
    _watcher: RecommendedWatcher,
    _thread: std::thread::JoinHandle<()>,
    batches: mpsc::Receiver<Vec<WatcherEvent>>,
}

impl ContentWatcher {
    /// Start watching `dirs` (relative to `root`) recursively. Directories
    /// that don't exist yet are skipped.
    pub fn start(root: &Path, dirs: &[PathBuf]) -> Result<Self, notify::Error> {
        let (notify_tx, notify_rx) = mpsc::channel::<notify::Result<Event>>();
        let (batch_tx, batches) = mpsc::channel::<Vec<WatcherEvent>>();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = notify_tx.send(res);
            },
            Config::default(),
        )?;

        for dir in dirs {
            let abs_dir = root.join(dir);
            if abs_dir.exists() {
                watcher.watch(&abs_dir, RecursiveMode::Recursive)?;
                log::debug!("Watching {}", abs_dir.display());
            } else {
                log::debug!("Not watching {}: directory does not exist", abs_dir.display());
            }
        }

        let thread = std::thread::spawn(move || {
            let mut debouncer = Debouncer::new(DEBOUNCE);
            loop {
                match notify_rx.recv_timeout(DEBOUNCE) {
                    Ok(Ok(event)) => {
                        let Some(kind) = change_kind(&event.kind) else {
                            continue;
                        };
                        let now = Instant::now();
                        for path in event.paths {
                            debouncer.push(path, kind, now);
                        }
                    }
                    Ok(Err(e)) => log::warn!("File watcher error: {e}"),
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }

                if let Some(batch) = debouncer.flush(Instant::now()) {
                    if batch_tx.send(batch).is_err() {
                        return;
                    }
                }
            }
        });

        Ok(ContentWatcher {
            _watcher: watcher,
            _thread: thread,
            batches,
        })
    }

    /// Block until the next batch. None once the watcher has shut down.
    pub fn next_batch(&self) -> Option<Vec<WatcherEvent>> {
        self.batches.recv().ok()
    }
}

fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        _ => None,
    }
}
