//! Watch-mode rebuild loop.
//!
//! Each change batch cancels the build in flight, invalidates the cache for
//! the changed paths, and starts a new build on the blocking pool. Only a
//! build that finished without being superseded is written and published.

use crate::state::DevState;
use packrat_core::bundler::{ArtifactDiff, BuildCache, Bundler, CancelToken};
use packrat_core::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// What one rebuild ended with.
#[derive(Debug)]
pub enum RebuildOutcome {
    /// Written to disk and served as generation `generation`.
    Published { generation: u64, diff: ArtifactDiff },
    /// The build failed; the previous generation is still served.
    Failed(String),
    /// A newer build superseded this one.
    Superseded,
}

/// Drives rebuilds for one bundler.
pub struct Rebuilder {
    bundler: Arc<Bundler>,
    cache: Arc<BuildCache>,
    state: Arc<DevState>,
    in_flight: Mutex<Option<CancelToken>>,
    next_seq: AtomicU64,
    /// Sequence number of the last published build.
    published: Arc<Mutex<u64>>,
}

impl std::fmt::Debug for Rebuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rebuilder")
            .field("cache", &self.cache.stats())
            .field("next_seq", &self.next_seq)
            .finish_non_exhaustive()
    }
}

impl Rebuilder {
    pub fn new(bundler: Arc<Bundler>, cache: Arc<BuildCache>, state: Arc<DevState>) -> Self {
        Self {
            bundler,
            cache,
            state,
            in_flight: Mutex::new(None),
            next_seq: AtomicU64::new(0),
            published: Arc::new(Mutex::new(0)),
        }
    }

    pub fn state(&self) -> &Arc<DevState> {
        &self.state
    }

    /// Rebuild after `changed` paths were modified. An empty slice rebuilds
    /// from the current cache.
    pub async fn rebuild(&self, changed: &[PathBuf]) -> RebuildOutcome {
        let cancel = CancelToken::new();
        if let Some(previous) = self.in_flight.lock().unwrap().replace(cancel.clone()) {
            previous.cancel();
        }

        if !changed.is_empty() {
            let dropped = self.cache.invalidate(changed);
            debug!(paths = changed.len(), dropped, "invalidated");
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let job = BuildJob {
            bundler: Arc::clone(&self.bundler),
            cache: Arc::clone(&self.cache),
            state: Arc::clone(&self.state),
            published: Arc::clone(&self.published),
            cancel,
            seq,
        };

        match tokio::task::spawn_blocking(move || job.run()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = format!("build task failed: {e}");
                error!("{message}");
                self.state.record_failure(message.clone());
                RebuildOutcome::Failed(message)
            }
        }
    }

    /// Consume change batches until the sender is dropped.
    pub async fn run(self: Arc<Self>, mut batches: mpsc::Receiver<Vec<PathBuf>>) {
        while let Some(batch) = batches.recv().await {
            if !self.state.quiet() {
                info!(files = batch.len(), "change detected, rebuilding");
            }
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.rebuild(&batch).await;
            });
        }
    }
}

struct BuildJob {
    bundler: Arc<Bundler>,
    cache: Arc<BuildCache>,
    state: Arc<DevState>,
    published: Arc<Mutex<u64>>,
    cancel: CancelToken,
    seq: u64,
}

impl BuildJob {
    fn run(self) -> RebuildOutcome {
        let started = Instant::now();
        let output = match self.bundler.compile(&self.cache, &self.cancel) {
            Ok((_, output)) => output,
            Err(_) if self.cancel.is_cancelled() => return RebuildOutcome::Superseded,
            Err(e) => return self.fail(&e),
        };

        let mut published = self.published.lock().unwrap();
        if self.cancel.is_cancelled() || *published > self.seq {
            return RebuildOutcome::Superseded;
        }
        let diff = match self.bundler.write(&output) {
            Ok(diff) => diff,
            Err(e) => return self.fail(&e),
        };
        *published = self.seq;

        for warning in &output.warnings {
            warn!("{warning}");
        }
        let generation = self.state.publish(output);
        if !self.state.quiet() {
            info!(
                generation = generation.number,
                ms = started.elapsed().as_millis() as u64,
                added = diff.added.len(),
                changed = diff.changed.len(),
                removed = diff.removed.len(),
                "build complete"
            );
        }
        RebuildOutcome::Published {
            generation: generation.number,
            diff,
        }
    }

    fn fail(&self, err: &Error) -> RebuildOutcome {
        let message = err.to_string();
        error!("build failed: {message}");
        self.state.record_failure(message.clone());
        RebuildOutcome::Failed(message)
    }
}
