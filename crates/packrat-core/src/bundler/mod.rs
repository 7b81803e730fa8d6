//! Asset bundler.
//!
//! Turns a [`NormalizedConfig`] into a set of output artifacts.
//!
//! ## Usage
//!
//! ```ignore
//! use packrat_core::bundler::{BuildCache, Bundler, CancelToken};
//! use packrat_core::config::Config;
//!
//! let config = Config::load(path)?.normalize(dir)?;
//! let bundler = Bundler::builder(config).build()?;
//! let output = bundler.run(&BuildCache::new(), &CancelToken::new())?;
//! println!("{} artifacts", output.emit.artifacts.len());
//! ```
//!
//! ## Architecture
//!
//! 1. **Rules** - Pick a loader chain per module key
//! 2. **Graph** - Resolve and transform every reachable module, in parallel
//! 3. **Chunks** - Partition modules into entry, shared and async chunks
//! 4. **Emit** - Render chunks, name them, and write the artifact set

mod assets;
mod build;
mod cache;
mod chunks;
mod emit;
mod graph;
mod loader;
pub mod loaders;
mod lower;
mod plugin;
mod resolve;
mod rules;
mod scan;
mod template;

pub use assets::{content_type, FILE_LOADER_TEMPLATE, RAW_ASSET_TEMPLATE};
pub use build::CancelToken;
pub use cache::{BuildCache, BuildCacheStats};
pub use chunks::{Chunk, ChunkGraph, ChunkId, ChunkKind};
pub use emit::{
    emit, write_artifacts, ArtifactDiff, ArtifactKind, EmitOptions, EmitOutput, EmittedArtifact,
    EntryPoint, MANIFEST_FILE,
};
pub use graph::{Dependency, ModuleGraph, ModuleId, ModuleKey, ModuleRecord, ResolvedImport};
pub use loader::{
    ImportKind, ImportRequest, Loader, LoaderContext, LoaderError, LoaderOutput, LoaderRegistry,
    SideAsset,
};
pub use plugin::{
    builtin_plugin, ComponentPlugin, DefinePlugin, HookResult, Plugin, PluginContainer,
    PluginError, BUILTIN_PLUGINS,
};
pub use resolve::Resolver;
pub use rules::{Chain, LoaderUse, Pattern, Rule, RuleSet, VirtualModuleRule, VirtualModules, VirtualPart};
pub use template::{FilenameTemplate, RenderedName, TemplateData, DEFAULT_HASH_LEN};

use crate::config::NormalizedConfig;
use crate::error::{BuildError, ConfigError, EmitError, Error};
use build::{build_graph, BuildContext};
use std::sync::Arc;

/// Configures a [`Bundler`].
pub struct BundlerBuilder {
    config: NormalizedConfig,
    loaders: LoaderRegistry,
    plugins: Vec<Box<dyn Plugin>>,
}

impl BundlerBuilder {
    /// Register a loader, replacing a built-in with the same id.
    pub fn loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loaders.register(loader);
        self
    }

    /// Add a plugin after the ones named in the config.
    pub fn plugin(mut self, plugin: Box<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Validate loader and plugin names and prepare the rule table.
    pub fn build(self) -> Result<Bundler, ConfigError> {
        let config = self.config;

        for (index, rule) in config.rules.iter().enumerate() {
            for use_ in &rule.uses {
                if !self.loaders.contains(&use_.loader) {
                    return Err(ConfigError::UnknownLoader {
                        rule: index,
                        loader: use_.loader.clone(),
                    });
                }
            }
        }

        let mut plugins = PluginContainer::new();
        for name in &config.plugins {
            let plugin = builtin_plugin(name).ok_or_else(|| ConfigError::UnknownPlugin(name.clone()))?;
            plugins.add(plugin);
        }
        if !config.define.is_empty() {
            plugins.add(Box::new(DefinePlugin::new(config.define.clone())));
        }
        for plugin in self.plugins {
            plugins.add(plugin);
        }

        let mut rules = RuleSet::new(config.rules.clone());
        rules.set_virtual_modules(plugins.virtual_modules());

        let raw_asset_template =
            FilenameTemplate::parse(RAW_ASSET_TEMPLATE).map_err(|message| ConfigError::InvalidTemplate {
                field: "rawAsset".to_string(),
                template: RAW_ASSET_TEMPLATE.to_string(),
                message,
            })?;

        Ok(Bundler {
            resolver: Resolver::new(&config.context, &config.extensions, &config.alias),
            rules,
            loaders: self.loaders,
            plugins,
            raw_asset_template,
            config,
        })
    }
}

/// One successful build: the graph, the artifact set, and what changed on disk.
#[derive(Debug)]
pub struct BuildOutput {
    pub graph: ModuleGraph,
    pub emit: EmitOutput,
    pub diff: ArtifactDiff,
}

/// The main bundler.
pub struct Bundler {
    config: NormalizedConfig,
    resolver: Resolver,
    rules: RuleSet,
    loaders: LoaderRegistry,
    plugins: PluginContainer,
    raw_asset_template: FilenameTemplate,
}

impl std::fmt::Debug for Bundler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundler")
            .field("context", &self.config.context)
            .field("entries", &self.config.entries)
            .field("plugins", &self.plugins)
            .finish_non_exhaustive()
    }
}

impl Bundler {
    /// Start configuring a bundler with the built-in loaders.
    #[must_use]
    pub fn builder(config: NormalizedConfig) -> BundlerBuilder {
        BundlerBuilder {
            config,
            loaders: LoaderRegistry::builtin(),
            plugins: Vec::new(),
        }
    }

    /// A bundler with only built-in loaders and config-named plugins.
    pub fn new(config: NormalizedConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    #[must_use]
    pub fn config(&self) -> &NormalizedConfig {
        &self.config
    }

    #[must_use]
    pub fn plugins(&self) -> &PluginContainer {
        &self.plugins
    }

    /// Resolve and transform every module reachable from the entries.
    pub fn build(&self, cache: &BuildCache, cancel: &CancelToken) -> Result<ModuleGraph, BuildError> {
        build_graph(&BuildContext {
            config: &self.config,
            resolver: &self.resolver,
            rules: &self.rules,
            loaders: &self.loaders,
            plugins: &self.plugins,
            raw_asset_template: &self.raw_asset_template,
            cache,
            cancel,
        })
    }

    /// Split a graph into chunks and render the artifact set.
    pub fn emit(&self, graph: &ModuleGraph) -> Result<EmitOutput, EmitError> {
        let chunks = ChunkGraph::from_module_graph(graph, self.config.split_chunks);
        emit(
            graph,
            &chunks,
            &EmitOptions {
                output: &self.config.output,
                performance: self.config.performance,
            },
        )
    }

    /// Build and emit without touching the output directory.
    pub fn compile(&self, cache: &BuildCache, cancel: &CancelToken) -> Result<(ModuleGraph, EmitOutput), Error> {
        let graph = self.build(cache, cancel)?;
        let output = self.emit(&graph)?;
        Ok((graph, output))
    }

    /// Write an artifact set to `output.path` and run `after_emit` hooks.
    pub fn write(&self, output: &EmitOutput) -> Result<ArtifactDiff, Error> {
        let diff = write_artifacts(&self.config.output.path, &output.artifacts)?;
        self.plugins.after_emit(&output.artifacts)?;
        Ok(diff)
    }

    /// Build, emit, and write. A build cancelled before writing leaves the
    /// output directory untouched.
    pub fn run(&self, cache: &BuildCache, cancel: &CancelToken) -> Result<BuildOutput, Error> {
        let (graph, emit) = self.compile(cache, cancel)?;
        if cancel.is_cancelled() {
            return Err(BuildError::cancelled().into());
        }
        let diff = self.write(&emit)?;
        Ok(BuildOutput { graph, emit, diff })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::fs;
    use tempfile::tempdir;

    fn normalize(root: &std::path::Path, json: &str) -> NormalizedConfig {
        Config::from_json(json).unwrap().normalize(root).unwrap()
    }

    #[test]
    fn test_unknown_loader_is_rejected() {
        let dir = tempdir().unwrap();
        let config = normalize(
            dir.path(),
            r#"{"entry": "./a.js", "rules": [{"test": "\\.js$", "loader": "js"}, {"test": "\\.md$", "loader": "markdown-loader"}]}"#,
        );
        let err = Bundler::new(config).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownLoader { rule: 1, ref loader } if loader == "markdown-loader"));
    }

    #[test]
    fn test_custom_loader_satisfies_rule() {
        struct Markdown;
        impl Loader for Markdown {
            fn id(&self) -> &str {
                "markdown-loader"
            }
            fn run(
                &self,
                content: Vec<u8>,
                _options: &serde_json::Value,
                _ctx: &LoaderContext<'_>,
            ) -> Result<LoaderOutput, LoaderError> {
                let text = String::from_utf8_lossy(&content).to_string();
                Ok(LoaderOutput::code(format!(
                    "module.exports = {};",
                    serde_json::Value::String(text)
                )))
            }
        }

        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "module.exports = require('./doc.md');\n").unwrap();
        fs::write(dir.path().join("doc.md"), "# Title").unwrap();
        let config = normalize(
            dir.path(),
            r#"{"entry": "./a.js", "rules": [{"test": "\\.md$", "loader": "markdown-loader"}]}"#,
        );
        let bundler = Bundler::builder(config).loader(Arc::new(Markdown)).build().unwrap();
        let (graph, output) = bundler.compile(&BuildCache::new(), &CancelToken::new()).unwrap();
        assert_eq!(graph.len(), 2);
        let main = output.get("main.js").unwrap();
        assert!(String::from_utf8_lossy(&main.bytes).contains("module.exports = \"# Title\";"));
    }

    #[test]
    fn test_unknown_plugin_is_rejected() {
        let dir = tempdir().unwrap();
        let config = normalize(dir.path(), r#"{"entry": "./a.js", "plugins": ["nope"]}"#);
        let err = Bundler::new(config).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPlugin(ref name) if name == "nope"));
    }

    #[test]
    fn test_define_plugin_added_from_config() {
        let dir = tempdir().unwrap();
        let config = normalize(
            dir.path(),
            r#"{"entry": "./a.js", "plugins": ["vue-loader"], "define": {"DEBUG": false}}"#,
        );
        let bundler = Bundler::new(config).unwrap();
        assert_eq!(bundler.plugins().names(), vec!["vue-loader", "define"]);
    }
}
