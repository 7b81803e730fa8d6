//! Module graph construction.
//!
//! Traversal starts at every entry and fans out on a rayon scope. A module
//! key is claimed before its task is spawned, so each module is transformed
//! once per build and import cycles terminate. Results are published only
//! when a record is complete; the first failure stops all further work.

use super::assets::{emit_asset, AssetTarget};
use super::cache::BuildCache;
use super::graph::{ModuleGraph, ModuleKey, ModuleRecord, ResolvedImport};
use super::loader::{LoaderContext, LoaderOutput, LoaderRegistry};
use super::plugin::PluginContainer;
use super::resolve::Resolver;
use super::rules::{Chain, LoaderUse, RuleSet};
use super::template::FilenameTemplate;
use crate::config::NormalizedConfig;
use crate::error::{BuildError, BuildErrorKind, ResolutionError};
use rustc_hash::FxHashSet as HashSet;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Cooperative cancellation flag shared between a build and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Everything a build reads. Borrowed for the duration of one build.
pub(crate) struct BuildContext<'a> {
    pub config: &'a NormalizedConfig,
    pub resolver: &'a Resolver,
    pub rules: &'a RuleSet,
    pub loaders: &'a LoaderRegistry,
    pub plugins: &'a PluginContainer,
    pub raw_asset_template: &'a FilenameTemplate,
    pub cache: &'a BuildCache,
    pub cancel: &'a CancelToken,
}

type Completed = (Arc<ModuleRecord>, Vec<ResolvedImport>);

struct Traversal<'a> {
    ctx: &'a BuildContext<'a>,
    /// Cache epoch at build start.
    epoch: u64,
    claimed: Mutex<HashSet<ModuleKey>>,
    completed: Mutex<Vec<Completed>>,
    error: Mutex<Option<BuildError>>,
    failed: AtomicBool,
}

/// Build the module graph for every configured entry.
pub(crate) fn build_graph(ctx: &BuildContext<'_>) -> Result<ModuleGraph, BuildError> {
    if ctx.cancel.is_cancelled() {
        return Err(BuildError::cancelled());
    }

    let traversal = Traversal {
        ctx,
        epoch: ctx.cache.epoch(),
        claimed: Mutex::new(HashSet::default()),
        completed: Mutex::new(Vec::new()),
        error: Mutex::new(None),
        failed: AtomicBool::new(false),
    };

    let context = ctx.config.context.as_path();
    let mut entry_keys = Vec::with_capacity(ctx.config.entries.len());
    for (name, specifier) in &ctx.config.entries {
        let label = format!("entry '{name}'");
        let key = traversal
            .resolve_request(specifier, None, context)
            .map_err(|e| BuildError {
                chain: vec![label.clone(), specifier.clone()],
                kind: BuildErrorKind::Resolution(e),
            })?;
        entry_keys.push((name.clone(), key, label));
    }

    rayon::scope(|scope| {
        for (_, key, label) in &entry_keys {
            if traversal.claim(key) {
                let key = key.clone();
                let chain = vec![label.clone()];
                let traversal = &traversal;
                scope.spawn(move |scope| traversal.visit(scope, key, chain));
            }
        }
    });

    if let Some(err) = traversal.error.into_inner().unwrap() {
        return Err(err);
    }
    if ctx.cancel.is_cancelled() {
        return Err(BuildError::cancelled());
    }

    let entries: Vec<(String, ModuleKey)> = entry_keys
        .into_iter()
        .map(|(name, key, _)| (name, key))
        .collect();
    let completed = traversal.completed.into_inner().unwrap();
    Ok(ModuleGraph::assemble(context, completed, &entries))
}

impl<'a> Traversal<'a> {
    /// Claim a key. Returns true for the first claimant only.
    fn claim(&self, key: &ModuleKey) -> bool {
        self.claimed.lock().unwrap().insert(key.clone())
    }

    fn fail(&self, err: BuildError) {
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
        self.failed.store(true, Ordering::Release);
    }

    fn visit<'s>(&'s self, scope: &rayon::Scope<'s>, key: ModuleKey, mut chain: Vec<String>) {
        if self.failed.load(Ordering::Acquire) {
            return;
        }
        if self.ctx.cancel.is_cancelled() {
            self.fail(BuildError::cancelled());
            return;
        }

        chain.push(key.display_id(&self.ctx.config.context));
        let record = match self.record(&key) {
            Ok(record) => record,
            Err(kind) => {
                self.fail(BuildError { chain, kind });
                return;
            }
        };

        let from_dir = key.path.parent().unwrap_or(Path::new("/"));
        let mut resolved = Vec::with_capacity(record.imports.len());
        for import in &record.imports {
            match self.resolve_request(&import.specifier, Some(&key), from_dir) {
                Ok(target) => resolved.push(ResolvedImport {
                    specifier: import.specifier.clone(),
                    dynamic: import.is_dynamic(),
                    target,
                }),
                Err(e) => {
                    let mut chain = chain;
                    chain.push(import.specifier.clone());
                    self.fail(BuildError {
                        chain,
                        kind: BuildErrorKind::Resolution(e),
                    });
                    return;
                }
            }
        }

        for import in &resolved {
            if self.claim(&import.target) {
                let target = import.target.clone();
                let chain = chain.clone();
                scope.spawn(move |scope| self.visit(scope, target, chain));
            }
        }
        self.completed.lock().unwrap().push((record, resolved));
    }

    /// Map a request to a module key. `"?query"` alone refers back to the
    /// importer's own file; otherwise the query is split off and kept.
    fn resolve_request(
        &self,
        specifier: &str,
        importer: Option<&ModuleKey>,
        from_dir: &Path,
    ) -> Result<ModuleKey, ResolutionError> {
        if let (Some(query), Some(importer)) = (specifier.strip_prefix('?'), importer) {
            return Ok(ModuleKey::new(importer.path.clone(), Some(query.to_string())));
        }

        let (request, query) = match specifier.split_once('?') {
            Some((request, query)) => (request, Some(query.to_string())),
            None => (specifier, None),
        };
        let path = self.resolve_path(request, from_dir)?;
        Ok(ModuleKey::new(path, query))
    }

    fn resolve_path(&self, request: &str, from_dir: &Path) -> Result<PathBuf, ResolutionError> {
        let cache = self.ctx.cache;
        if let Some(path) = cache.resolution(from_dir, request) {
            return Ok(path);
        }
        let path = self.ctx.resolver.resolve(request, from_dir)?;
        cache.put_resolution(self.epoch, from_dir, request, path.clone());
        Ok(path)
    }

    /// The transformed record for `key`, from the cache or freshly built.
    fn record(&self, key: &ModuleKey) -> Result<Arc<ModuleRecord>, BuildErrorKind> {
        if let Some(record) = self.ctx.cache.module(key) {
            return Ok(record);
        }
        let record = Arc::new(self.transform(key)?);
        self.ctx.cache.put_module(self.epoch, Arc::clone(&record));
        Ok(record)
    }

    fn transform(&self, key: &ModuleKey) -> Result<ModuleRecord, BuildErrorKind> {
        let ctx = self.ctx;
        let raw = std::fs::read(&key.path).map_err(|e| BuildErrorKind::Read {
            path: key.path.clone(),
            message: e.to_string(),
        })?;
        let source = ctx.plugins.before_transform(key, raw)?;

        let virtual_part = ctx.rules.virtual_part(key);
        let loader_ctx = LoaderContext {
            key,
            virtual_part: virtual_part.as_ref(),
            context: &ctx.config.context,
            public_path: &ctx.config.output.public_path,
        };

        let builtin = |id: &str| vec![LoaderUse::new(id, Value::Null)];
        let uses = match ctx.rules.select(key) {
            Chain::Loaders(uses) => uses,
            Chain::NativeScript => builtin("js"),
            Chain::NativeJson => builtin("json"),
            Chain::RawAsset => Vec::new(),
        };

        let output: LoaderOutput = if uses.is_empty() {
            emit_asset(
                key,
                source.clone(),
                &AssetTarget {
                    template: ctx.raw_asset_template,
                    public_path: &ctx.config.output.public_path,
                    output_path: "",
                },
            )
        } else {
            ctx.loaders.run_chain(&uses, source.clone(), &loader_ctx)?
        };

        Ok(ModuleRecord {
            key: key.clone(),
            source,
            loaders: uses.into_iter().map(|u| u.loader).collect(),
            imports: output.imports,
            code: String::from_utf8_lossy(&output.content).into_owned(),
            assets: output.assets,
        })
    }
}
