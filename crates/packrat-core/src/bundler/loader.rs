//! The loader contract and registry.
//!
//! A loader maps `(content, options, context)` to transformed content, plus
//! any side-effect assets and newly discovered imports. Loaders in a chain run
//! last to first; each consumes the previous one's output.

use super::graph::ModuleKey;
use super::loaders;
use super::rules::{LoaderUse, VirtualPart};
use crate::error::TransformError;
use rustc_hash::FxHashMap as HashMap;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// How an import was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ImportKind {
    Static,
    Dynamic,
}

/// An import discovered in a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImportRequest {
    pub specifier: String,
    pub kind: ImportKind,
}

impl ImportRequest {
    pub fn new(specifier: impl Into<String>, kind: ImportKind) -> Self {
        Self {
            specifier: specifier.into(),
            kind,
        }
    }

    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.kind == ImportKind::Dynamic
    }
}

/// A file a loader wants emitted next to the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideAsset {
    /// Output-relative file name.
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Result of one loader invocation.
#[derive(Debug, Clone, Default)]
pub struct LoaderOutput {
    pub content: Vec<u8>,
    pub assets: Vec<SideAsset>,
    pub imports: Vec<ImportRequest>,
}

impl LoaderOutput {
    /// Output with content only.
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            content: code.into().into_bytes(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_imports(mut self, imports: Vec<ImportRequest>) -> Self {
        self.imports = imports;
        self
    }
}

/// A loader failure. The chain runner adds the loader id and module path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderError(pub String);

impl LoaderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::fmt::Display for LoaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build-wide values a loader may read.
#[derive(Debug, Clone, Copy)]
pub struct LoaderContext<'a> {
    /// The module being transformed.
    pub key: &'a ModuleKey,
    /// Set when `key` is a registered virtual sub-request.
    pub virtual_part: Option<&'a VirtualPart>,
    /// Project root.
    pub context: &'a Path,
    /// `output.publicPath`.
    pub public_path: &'a str,
}

/// Decode loader input as text.
#[must_use]
pub fn text(content: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(content)
}

/// A content transform.
pub trait Loader: Send + Sync {
    /// Loader id as referenced from rules.
    fn id(&self) -> &str;

    /// Transform `content`.
    fn run(
        &self,
        content: Vec<u8>,
        options: &Value,
        ctx: &LoaderContext<'_>,
    ) -> Result<LoaderOutput, LoaderError>;
}

/// Loaders by id.
#[derive(Clone, Default)]
pub struct LoaderRegistry {
    loaders: HashMap<String, Arc<dyn Loader>>,
}

impl LoaderRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in loader.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for loader in loaders::builtin() {
            registry.register(loader);
        }
        registry
    }

    /// Register a loader, replacing any loader with the same id.
    pub fn register(&mut self, loader: Arc<dyn Loader>) {
        self.loaders.insert(loader.id().to_string(), loader);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Loader>> {
        self.loaders.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.loaders.contains_key(id)
    }

    /// Run a chain last-to-first over `content`.
    ///
    /// Assets from every loader are kept; imports are merged in discovery
    /// order without duplicates.
    pub fn run_chain(
        &self,
        chain: &[LoaderUse],
        content: Vec<u8>,
        ctx: &LoaderContext<'_>,
    ) -> Result<LoaderOutput, TransformError> {
        let mut current = LoaderOutput {
            content,
            ..LoaderOutput::default()
        };

        for use_ in chain.iter().rev() {
            let transform_error = |message: String| TransformError {
                loader: use_.loader.clone(),
                path: ctx.key.to_string(),
                message,
            };
            let loader = self
                .get(&use_.loader)
                .ok_or_else(|| transform_error("loader is not registered".to_string()))?;
            let output = loader
                .run(std::mem::take(&mut current.content), &use_.options, ctx)
                .map_err(|e| transform_error(e.0))?;

            current.content = output.content;
            current.assets.extend(output.assets);
            for import in output.imports {
                if !current.imports.contains(&import) {
                    current.imports.push(import);
                }
            }
        }

        Ok(current)
    }
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.loaders.keys().collect();
        ids.sort();
        f.debug_struct("LoaderRegistry").field("loaders", &ids).finish()
    }
}
