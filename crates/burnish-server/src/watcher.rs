//! Filesystem watching with per-path debouncing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc as async_mpsc;

/// Quiet period a path must see before its change is dispatched.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// A debounced change to one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Watches directories and emits debounced change events.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Watch `paths` recursively. Missing paths are skipped.
    ///
    /// Returns the watcher and a channel to receive events. Events stop when
    /// the watcher is dropped.
    pub fn new(
        paths: &[PathBuf],
        debounce: Duration,
    ) -> Result<(Self, async_mpsc::Receiver<ChangeEvent>), std::io::Error> {
        let (sync_tx, sync_rx) = mpsc::channel();
        let (async_tx, async_rx) = async_mpsc::channel(100);

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(event) = res {
                let _ = sync_tx.send(event);
            }
        })
        .map_err(std::io::Error::other)?;

        for path in paths {
            if path.exists() {
                watcher
                    .watch(path, RecursiveMode::Recursive)
                    .map_err(std::io::Error::other)?;
            } else {
                tracing::warn!("Not watching missing directory {}", path.display());
            }
        }

        std::thread::spawn(move || {
            let mut debouncer = Debouncer::new(debounce);
            loop {
                let received = match debouncer.next_deadline() {
                    Some(deadline) => {
                        let wait = deadline.saturating_duration_since(Instant::now());
                        sync_rx.recv_timeout(wait)
                    }
                    None => sync_rx.recv().map_err(|_| mpsc::RecvTimeoutError::Disconnected),
                };

                match received {
                    Ok(event) => {
                        let Some(kind) = classify(&event.kind) else {
                            continue;
                        };
                        for path in event.paths {
                            debouncer.push(path, kind, Instant::now());
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }

                for change in debouncer.ready(Instant::now()) {
                    if async_tx.blocking_send(change).is_err() {
                        return;
                    }
                }
            }
        });

        Ok((Self { _watcher: watcher }, async_rx))
    }
}

fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        _ => None,
    }
}

/// Holds back each path until it has been quiet for the debounce period.
///
/// Bursts on the same path collapse into one event; distinct paths are
/// tracked independently.
#[derive(Debug)]
struct Debouncer {
    period: Duration,
    pending: HashMap<PathBuf, (ChangeKind, Instant)>,
}

impl Debouncer {
    fn new(period: Duration) -> Self {
        Self {
            period,
            pending: HashMap::new(),
        }
    }

    fn push(&mut self, path: PathBuf, kind: ChangeKind, now: Instant) {
        let deadline = now + self.period;
        self.pending
            .entry(path)
            .and_modify(|(pending, at)| {
                // A create followed by writes is still a create
                if *pending != ChangeKind::Created || kind == ChangeKind::Removed {
                    *pending = kind;
                }
                *at = deadline;
            })
            .or_insert((kind, deadline));
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|(_, at)| *at).min()
    }

    fn ready(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, (_, at))| *at <= now)
            .map(|(path, _)| path.clone())
            .collect();

        let mut events: Vec<ChangeEvent> = due
            .into_iter()
            .filter_map(|path| {
                let (kind, _) = self.pending.remove(&path)?;
                Some(ChangeEvent { path, kind })
            })
            .collect();
        events.sort_by(|a, b| a.path.cmp(&b.path));
        events
    }
}
