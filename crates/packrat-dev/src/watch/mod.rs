//! File watcher feeding the rebuild loop.
//!
//! A notify watcher runs on its own thread. Relevant change events are
//! coalesced into batches, and a batch is sent once no new event arrived for
//! the debounce window.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use rustc_hash::FxHashSet as HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Event coalescing window.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(50);

/// Errors from watcher setup.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Invalid watch root: {0}")]
    InvalidRoot(PathBuf),

    #[error("Failed to create watcher: {0}")]
    WatcherFailed(String),
}

/// Directory names never worth a rebuild.
const IGNORED_DIRS: &[&str] = &["node_modules", ".git", "target"];

/// Whether a changed path should be ignored.
///
/// `out_dir` is the build output directory: our own writes must not trigger
/// another build.
pub fn should_ignore(path: &Path, out_dir: &Path) -> bool {
    if path.starts_with(out_dir) {
        return true;
    }
    if path
        .components()
        .any(|c| c.as_os_str().to_str().is_some_and(|s| IGNORED_DIRS.contains(&s)))
    {
        return true;
    }
    // Editor swap files and dotfiles
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') || n.ends_with('~'))
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Coalesces changed paths until the stream goes quiet.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashSet<PathBuf>,
    last_event: Option<Instant>,
}

impl Debouncer {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashSet::default(),
            last_event: None,
        }
    }

    pub fn push(&mut self, paths: impl IntoIterator<Item = PathBuf>, now: Instant) {
        self.pending.extend(paths);
        self.last_event = Some(now);
    }

    /// Time left before the pending batch is due, `None` when idle.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let last = self.last_event?;
        Some(self.window.saturating_sub(now.duration_since(last)))
    }

    /// Take the pending batch, sorted, if the window has elapsed.
    pub fn take_ready(&mut self, now: Instant) -> Option<Vec<PathBuf>> {
        if self.remaining(now)? > Duration::ZERO || self.pending.is_empty() {
            return None;
        }
        self.last_event = None;
        let mut batch: Vec<PathBuf> = self.pending.drain().collect();
        batch.sort();
        Some(batch)
    }
}

/// A running watcher. Dropping it stops watching.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle").finish_non_exhaustive()
    }
}

/// Watch `root` recursively and send debounced batches of changed paths.
pub fn spawn_watcher(
    root: &Path,
    out_dir: &Path,
    batches: mpsc::Sender<Vec<PathBuf>>,
) -> Result<WatchHandle, WatchError> {
    if !root.is_dir() {
        return Err(WatchError::InvalidRoot(root.to_path_buf()));
    }

    let (tx, rx) = std_mpsc::channel::<notify::Result<Event>>();
    let mut watcher = RecommendedWatcher::new(tx, Config::default())
        .map_err(|e| WatchError::WatcherFailed(e.to_string()))?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|e| WatchError::WatcherFailed(e.to_string()))?;
    debug!(root = %root.display(), "watching");

    let out_dir = out_dir.to_path_buf();
    std::thread::Builder::new()
        .name("packrat-watch".to_string())
        .spawn(move || debounce_loop(&rx, &out_dir, &batches))
        .map_err(|e| WatchError::WatcherFailed(e.to_string()))?;

    Ok(WatchHandle { _watcher: watcher })
}

fn debounce_loop(
    rx: &std_mpsc::Receiver<notify::Result<Event>>,
    out_dir: &Path,
    batches: &mpsc::Sender<Vec<PathBuf>>,
) {
    let mut debouncer = Debouncer::new(DEBOUNCE_WINDOW);

    loop {
        let received = match debouncer.remaining(Instant::now()) {
            Some(timeout) => rx.recv_timeout(timeout),
            None => rx.recv().map_err(|_| std_mpsc::RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(Ok(event)) => {
                if !is_relevant(&event.kind) {
                    continue;
                }
                let paths: Vec<PathBuf> = event
                    .paths
                    .into_iter()
                    .filter(|p| !should_ignore(p, out_dir))
                    .collect();
                if !paths.is_empty() {
                    debouncer.push(paths, Instant::now());
                }
            }
            Ok(Err(e)) => error!(error = %e, "watch error"),
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }

        if let Some(batch) = debouncer.take_ready(Instant::now()) {
            debug!(files = batch.len(), "change batch");
            if batches.blocking_send(batch).is_err() {
                warn!("rebuild loop is gone, stopping watcher");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_ignore() {
        let out = Path::new("/app/dist");
        assert!(should_ignore(Path::new("/app/dist/main.js"), out));
        assert!(should_ignore(Path::new("/app/node_modules/vue/index.js"), out));
        assert!(should_ignore(Path::new("/app/src/.App.vue.swp"), out));
        assert!(should_ignore(Path::new("/app/src/App.vue~"), out));
        assert!(!should_ignore(Path::new("/app/src/App.vue"), out));
        assert!(!should_ignore(Path::new("/app/distribution/a.js"), out));
    }

    #[test]
    fn test_debouncer_waits_for_quiet() {
        let start = Instant::now();
        let mut d = Debouncer::new(Duration::from_millis(50));
        assert!(d.remaining(start).is_none());

        d.push([PathBuf::from("/b.js"), PathBuf::from("/a.js")], start);
        assert!(d.take_ready(start + Duration::from_millis(30)).is_none());

        // A second event restarts the window
        d.push([PathBuf::from("/a.js")], start + Duration::from_millis(40));
        assert!(d.take_ready(start + Duration::from_millis(60)).is_none());

        let batch = d.take_ready(start + Duration::from_millis(90)).unwrap();
        assert_eq!(batch, vec![PathBuf::from("/a.js"), PathBuf::from("/b.js")]);
        assert!(d.remaining(start + Duration::from_millis(90)).is_none());
    }
}
