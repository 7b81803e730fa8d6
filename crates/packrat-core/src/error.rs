//! Error taxonomy for packrat.
//!
//! Every build-phase error is fatal to the current build: nothing is emitted
//! when any of them is returned.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error returned by [`crate::bundler::Bundler::run`].
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error(transparent)]
    Plugin(#[from] crate::bundler::PluginError),
}

/// Malformed configuration. Raised before any build work starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No config file found in {dir} (expected {expected})")]
    NotFound { dir: PathBuf, expected: &'static str },

    #[error("Duplicate entry name '{0}'")]
    DuplicateEntry(String),

    #[error("Configuration has no entries")]
    NoEntries,

    #[error("Invalid pattern '{pattern}' in {field}: {message}")]
    InvalidPattern {
        field: String,
        pattern: String,
        message: String,
    },

    #[error("Invalid filename template '{template}' in {field}: {message}")]
    InvalidTemplate {
        field: String,
        template: String,
        message: String,
    },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Rule #{rule} has no loader (set `loader` or `use`)")]
    EmptyRule { rule: usize },

    #[error("Unknown loader '{loader}' in rule #{rule}")]
    UnknownLoader { rule: usize, loader: String },

    #[error("Unknown plugin '{0}'")]
    UnknownPlugin(String),
}

/// An import specifier that could not be mapped to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionError {
    /// The specifier as written by the importer.
    pub specifier: String,
    /// Directory the specifier was resolved from.
    pub from_dir: PathBuf,
    /// Every candidate path that was tried, in order.
    pub searched: Vec<PathBuf>,
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cannot resolve '{}' from '{}'",
            self.specifier,
            self.from_dir.display()
        )?;
        if !self.searched.is_empty() {
            write!(f, "; tried:")?;
            for path in &self.searched {
                write!(f, "\n    {}", path.display())?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ResolutionError {}

/// A loader rejected its input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{loader}] {path}: {message}")]
pub struct TransformError {
    /// Loader id.
    pub loader: String,
    /// Module the loader was running on (including any virtual query).
    pub path: String,
    /// Loader-specific message.
    pub message: String,
}

/// What went wrong during graph construction.
#[derive(Error, Debug)]
pub enum BuildErrorKind {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Plugin(#[from] crate::bundler::PluginError),

    #[error("Failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Build cancelled")]
    Cancelled,
}

/// A graph construction failure, with the import chain that led to it.
#[derive(Debug)]
pub struct BuildError {
    /// Entry → importer → … → failing specifier.
    pub chain: Vec<String>,
    /// The underlying failure.
    pub kind: BuildErrorKind,
}

impl BuildError {
    /// A build aborted because a newer build superseded it.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            chain: Vec::new(),
            kind: BuildErrorKind::Cancelled,
        }
    }

    /// Whether this build was cancelled rather than failed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, BuildErrorKind::Cancelled)
    }

    /// The resolution failure behind this error, if any.
    #[must_use]
    pub fn resolution(&self) -> Option<&ResolutionError> {
        match &self.kind {
            BuildErrorKind::Resolution(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.chain.is_empty() {
            write!(f, "\n  at: {}", self.chain.join(" → "))?;
        }
        Ok(())
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Failure while naming or writing output artifacts.
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("Conflict: multiple artifacts emit to the same filename '{filename}' ({first} and {second})")]
    Collision {
        filename: String,
        first: String,
        second: String,
    },

    #[error("Artifact '{filename}' is {size} bytes, above the {limit} byte limit")]
    SizeLimit {
        filename: String,
        size: usize,
        limit: usize,
    },

    #[error("Failed to serialize manifest.json: {0}")]
    Manifest(#[source] serde_json::Error),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
