//! Build cache shared by the builds of one watch session.
//!
//! Holds transformed module records and successful resolutions. The watcher
//! invalidates entries by changed file path; each invalidation starts a new
//! epoch, and a build that started in an older epoch can no longer store
//! results (they may have been computed from stale content).

use super::graph::{ModuleKey, ModuleRecord};
use rustc_hash::FxHashMap as HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

type ResolutionKey = (PathBuf, String);

/// Process-scoped module and resolution cache.
#[derive(Debug, Default)]
pub struct BuildCache {
    modules: RwLock<HashMap<ModuleKey, Arc<ModuleRecord>>>,
    resolutions: RwLock<HashMap<ResolutionKey, PathBuf>>,
    epoch: AtomicU64,
}

impl BuildCache {
    /// Create a new empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current invalidation epoch. Capture it before a build starts.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn module(&self, key: &ModuleKey) -> Option<Arc<ModuleRecord>> {
        self.modules.read().unwrap().get(key).cloned()
    }

    /// Store a record computed during `epoch`. Returns false (and stores
    /// nothing) if the cache was invalidated since.
    pub fn put_module(&self, epoch: u64, record: Arc<ModuleRecord>) -> bool {
        let mut modules = self.modules.write().unwrap();
        if self.epoch() != epoch {
            return false;
        }
        modules.insert(record.key.clone(), record);
        true
    }

    #[must_use]
    pub fn resolution(&self, from_dir: &Path, specifier: &str) -> Option<PathBuf> {
        self.resolutions
            .read()
            .unwrap()
            .get(&(from_dir.to_path_buf(), specifier.to_string()))
            .cloned()
    }

    pub fn put_resolution(&self, epoch: u64, from_dir: &Path, specifier: &str, target: PathBuf) {
        let mut resolutions = self.resolutions.write().unwrap();
        if self.epoch() != epoch {
            return;
        }
        resolutions.insert((from_dir.to_path_buf(), specifier.to_string()), target);
    }

    /// Drop every record read from one of `paths` and all resolutions.
    ///
    /// Resolutions are dropped wholesale: creating or deleting any file can
    /// change what a specifier resolves to.
    ///
    /// Returns the number of module records invalidated.
    pub fn invalidate<P: AsRef<Path>>(&self, paths: &[P]) -> usize {
        let mut modules = self.modules.write().unwrap();
        let mut resolutions = self.resolutions.write().unwrap();
        self.epoch.fetch_add(1, Ordering::AcqRel);

        let canonical: Vec<PathBuf> = paths
            .iter()
            .map(|p| dunce::canonicalize(p.as_ref()).unwrap_or_else(|_| p.as_ref().to_path_buf()))
            .collect();
        let before = modules.len();
        modules.retain(|key, _| {
            !canonical
                .iter()
                .zip(paths)
                .any(|(c, p)| key.path == *c || key.path == p.as_ref())
        });
        resolutions.clear();
        before - modules.len()
    }

    /// Clear all cache entries.
    pub fn clear(&self) {
        let mut modules = self.modules.write().unwrap();
        let mut resolutions = self.resolutions.write().unwrap();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        modules.clear();
        resolutions.clear();
    }

    /// Get cache statistics.
    #[must_use]
    pub fn stats(&self) -> BuildCacheStats {
        BuildCacheStats {
            modules: self.modules.read().unwrap().len(),
            resolutions: self.resolutions.read().unwrap().len(),
            epoch: self.epoch(),
        }
    }
}

/// Build cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildCacheStats {
    pub modules: usize,
    pub resolutions: usize,
    pub epoch: u64,
}
