//! Module dependency graph.
//!
//! Records are immutable once transformed. Ids are assigned by sorting
//! module keys, so they do not depend on traversal order.

use super::loader::{ImportRequest, SideAsset};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Index of a module in a [`ModuleGraph`].
pub type ModuleId = usize;

/// Identity of a module: resolved path plus optional virtual query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleKey {
    pub path: PathBuf,
    pub query: Option<String>,
}

impl ModuleKey {
    #[must_use]
    pub fn new(path: PathBuf, query: Option<String>) -> Self {
        Self { path, query }
    }

    #[must_use]
    pub fn file(path: PathBuf) -> Self {
        Self { path, query: None }
    }

    /// The physical path with forward slashes, as matched by rule patterns.
    #[must_use]
    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().replace('\\', "/")
    }

    /// Value of a `key=value` query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .as_deref()?
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }

    /// Stable id used in emitted code: the path relative to `context`, plus the query.
    #[must_use]
    pub fn display_id(&self, context: &Path) -> String {
        let path = match self.path.strip_prefix(context) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => self.path_string(),
        };
        match &self.query {
            Some(q) => format!("{path}?{q}"),
            None => path,
        }
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())?;
        if let Some(q) = &self.query {
            write!(f, "?{q}")?;
        }
        Ok(())
    }
}

/// A transformed module.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub key: ModuleKey,
    /// Raw file content, after `before_transform` hooks.
    pub source: Vec<u8>,
    /// Loader ids in declared chain order (they ran last to first).
    pub loaders: Vec<String>,
    /// Import requests discovered by the chain.
    pub imports: Vec<ImportRequest>,
    /// Transformed module code.
    pub code: String,
    /// Files the chain asked to emit next to the bundle.
    pub assets: Vec<SideAsset>,
}

/// An import request mapped to its target key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImport {
    pub specifier: String,
    pub dynamic: bool,
    pub target: ModuleKey,
}

/// An edge in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub specifier: String,
    pub target: ModuleId,
    pub dynamic: bool,
}

/// The module dependency graph of one build.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    modules: Vec<Arc<ModuleRecord>>,
    names: Vec<String>,
    key_to_id: HashMap<ModuleKey, ModuleId>,
    dependencies: Vec<Vec<Dependency>>,
    entries: Vec<(String, ModuleId)>,
}

impl ModuleGraph {
    /// Assemble a graph from completed records.
    ///
    /// Every resolved import target and every entry key must be present in
    /// `records`.
    #[must_use]
    pub fn assemble(
        context: &Path,
        mut records: Vec<(Arc<ModuleRecord>, Vec<ResolvedImport>)>,
        entries: &[(String, ModuleKey)],
    ) -> Self {
        records.sort_by(|a, b| a.0.key.cmp(&b.0.key));

        let key_to_id: HashMap<ModuleKey, ModuleId> = records
            .iter()
            .enumerate()
            .map(|(id, (record, _))| (record.key.clone(), id))
            .collect();

        let mut modules = Vec::with_capacity(records.len());
        let mut names = Vec::with_capacity(records.len());
        let mut dependencies = Vec::with_capacity(records.len());
        for (record, resolved) in records {
            let deps = resolved
                .into_iter()
                .filter_map(|r| {
                    key_to_id.get(&r.target).map(|&target| Dependency {
                        specifier: r.specifier,
                        target,
                        dynamic: r.dynamic,
                    })
                })
                .collect();
            names.push(record.key.display_id(context));
            dependencies.push(deps);
            modules.push(record);
        }

        let entries = entries
            .iter()
            .filter_map(|(name, key)| key_to_id.get(key).map(|&id| (name.clone(), id)))
            .collect();

        Self {
            modules,
            names,
            key_to_id,
            dependencies,
            entries,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// # Panics
    /// Panics if `id` is out of range.
    #[must_use]
    pub fn get(&self, id: ModuleId) -> &ModuleRecord {
        &self.modules[id]
    }

    /// Stable module name used in emitted code.
    #[must_use]
    pub fn name(&self, id: ModuleId) -> &str {
        &self.names[id]
    }

    #[must_use]
    pub fn id_of(&self, key: &ModuleKey) -> Option<ModuleId> {
        self.key_to_id.get(key).copied()
    }

    #[must_use]
    pub fn dependencies(&self, id: ModuleId) -> &[Dependency] {
        &self.dependencies[id]
    }

    /// Entry name and root module, in declaration order.
    #[must_use]
    pub fn entries(&self) -> &[(String, ModuleId)] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModuleId, &ModuleRecord)> {
        self.modules.iter().map(AsRef::as_ref).enumerate()
    }

    /// Shared handle to a record, for caching across builds.
    #[must_use]
    pub fn record(&self, id: ModuleId) -> Arc<ModuleRecord> {
        Arc::clone(&self.modules[id])
    }

    /// Modules reachable from `root` through static imports, sorted by id.
    #[must_use]
    pub fn static_closure(&self, root: ModuleId) -> Vec<ModuleId> {
        self.closure_where(root, |_| true)
    }

    /// Static closure of `root` restricted to modules accepted by `include`.
    /// `root` itself is always included.
    pub fn closure_where(&self, root: ModuleId, include: impl Fn(ModuleId) -> bool) -> Vec<ModuleId> {
        let mut seen = HashSet::default();
        let mut stack = vec![root];
        seen.insert(root);
        while let Some(id) = stack.pop() {
            for dep in &self.dependencies[id] {
                if !dep.dynamic && include(dep.target) && seen.insert(dep.target) {
                    stack.push(dep.target);
                }
            }
        }
        let mut ids: Vec<ModuleId> = seen.into_iter().collect();
        ids.sort_unstable();
        ids
    }

    /// Targets of dynamic imports anywhere in the graph, sorted.
    #[must_use]
    pub fn dynamic_targets(&self) -> Vec<ModuleId> {
        let mut targets: Vec<ModuleId> = self
            .dependencies
            .iter()
            .flatten()
            .filter(|d| d.dynamic)
            .map(|d| d.target)
            .collect();
        targets.sort_unstable();
        targets.dedup();
        targets
    }
}
