//! Shared dev-server state.
//!
//! Holds the generation being served and the outcome of the latest build.
//! Handlers only ever see a complete generation: a new one replaces the old
//! with a single `Arc` swap.

use packrat_core::bundler::{EmitOutput, EmittedArtifact, EntryPoint};
use packrat_core::config::{DevServerOptions, NormalizedConfig};
use rustc_hash::FxHashMap as HashMap;
use serde::Serialize;
use std::sync::{Arc, RwLock};

/// One completed build's artifact set.
#[derive(Debug)]
pub struct Generation {
    /// 1 for the first published build.
    pub number: u64,
    artifacts: HashMap<String, EmittedArtifact>,
    pub entrypoints: Vec<EntryPoint>,
    pub warnings: Vec<String>,
}

impl Generation {
    fn new(number: u64, output: EmitOutput) -> Self {
        Self {
            number,
            artifacts: output
                .artifacts
                .into_iter()
                .map(|a| (a.filename.clone(), a))
                .collect(),
            entrypoints: output.entrypoints,
            warnings: output.warnings,
        }
    }

    /// Look up an artifact by output-relative file name.
    pub fn artifact(&self, filename: &str) -> Option<&EmittedArtifact> {
        self.artifacts.get(filename)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// `/__packrat/status` payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// Number of the generation being served, 0 before the first success.
    pub generation: u64,
    pub last_error: Option<String>,
    pub artifacts: usize,
    pub entrypoints: Vec<EntryPoint>,
    pub warnings: Vec<String>,
}

/// State shared by the rebuild loop and request handlers.
#[derive(Debug)]
pub struct DevState {
    options: DevServerOptions,
    public_path: String,
    current: RwLock<Option<Arc<Generation>>>,
    last_error: RwLock<Option<String>>,
}

impl DevState {
    #[must_use]
    pub fn new(options: DevServerOptions, public_path: impl Into<String>) -> Self {
        Self {
            options,
            public_path: public_path.into(),
            current: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn from_config(config: &NormalizedConfig) -> Self {
        Self::new(config.dev_server.clone(), config.output.public_path.clone())
    }

    pub fn options(&self) -> &DevServerOptions {
        &self.options
    }

    /// `output.publicPath` as configured.
    pub fn public_path(&self) -> &str {
        &self.public_path
    }

    /// Whether per-request and per-rebuild info logs are suppressed.
    pub fn quiet(&self) -> bool {
        self.options.no_info
    }

    /// The generation being served.
    pub fn current(&self) -> Option<Arc<Generation>> {
        self.current.read().unwrap().clone()
    }

    /// Serve `output` from now on and clear the last error.
    pub fn publish(&self, output: EmitOutput) -> Arc<Generation> {
        let mut current = self.current.write().unwrap();
        let number = current.as_ref().map_or(0, |g| g.number) + 1;
        let generation = Arc::new(Generation::new(number, output));
        *current = Some(Arc::clone(&generation));
        *self.last_error.write().unwrap() = None;
        generation
    }

    /// Record a failed build. The current generation stays in place.
    pub fn record_failure(&self, message: impl Into<String>) {
        *self.last_error.write().unwrap() = Some(message.into());
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().unwrap().clone()
    }

    pub fn status(&self) -> Status {
        let current = self.current();
        Status {
            generation: current.as_ref().map_or(0, |g| g.number),
            last_error: self.last_error(),
            artifacts: current.as_ref().map_or(0, |g| g.len()),
            entrypoints: current
                .as_ref()
                .map(|g| g.entrypoints.clone())
                .unwrap_or_default(),
            warnings: current
                .as_ref()
                .map(|g| g.warnings.clone())
                .unwrap_or_default(),
        }
    }
}
