//! Bundler configuration.
//!
//! [`Config`] is the raw `packrat.config.json` document (camelCase keys).
//! [`Config::normalize`] validates it into a [`NormalizedConfig`]: compiled
//! patterns, parsed templates and absolute paths. Every configuration error
//! surfaces there, before any build work starts.

use crate::bundler::{FilenameTemplate, LoaderUse, Pattern, Rule};
use crate::error::ConfigError;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// File name looked up in the working directory when no `--config` is given.
pub const CONFIG_FILE_NAME: &str = "packrat.config.json";

/// webpack's default `performance.maxAssetSize`.
pub const MAX_ASSET_SIZE: usize = 250_000;

/// Raw configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Project root. Defaults to the config file's directory.
    pub context: Option<PathBuf>,
    pub entry: Entries,
    pub output: OutputConfig,
    pub rules: Vec<RuleConfig>,
    pub resolve: ResolveConfig,
    /// Built-in plugin names.
    pub plugins: Vec<String>,
    /// Identifier → replacement. Strings are inserted as code, other values
    /// as their JSON text.
    pub define: BTreeMap<String, Value>,
    pub optimization: OptimizationConfig,
    pub dev_server: DevServerConfig,
    pub performance: PerformanceConfig,
}

/// Entry points in declaration order. Duplicate names are kept here and
/// rejected by [`Config::normalize`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Entries(pub Vec<(String, String)>);

impl<'de> Deserialize<'de> for Entries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = Entries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an entry specifier or a map of bundle names to specifiers")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Entries, E> {
                Ok(Entries(vec![("main".to_string(), value.to_string())]))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Entries, A::Error> {
                let mut entries = Vec::new();
                while let Some((name, specifier)) = map.next_entry::<String, String>()? {
                    entries.push((name, specifier));
                }
                Ok(Entries(entries))
            }
        }

        deserializer.deserialize_any(EntriesVisitor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputConfig {
    pub path: PathBuf,
    pub filename: String,
    pub chunk_filename: String,
    pub library: Option<String>,
    pub library_target: LibraryTarget,
    pub public_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dist"),
            filename: "[name].js".to_string(),
            chunk_filename: "[name].[contenthash].js".to_string(),
            library: None,
            library_target: LibraryTarget::default(),
            public_path: String::new(),
        }
    }
}

/// How an entry chunk exposes its exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryTarget {
    /// `var X = …;`
    #[default]
    Var,
    /// `X = …;`
    Assign,
    /// `this["X"] = …;`
    This,
    /// `window["X"] = …;`
    Window,
}

/// One entry of `rules`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleConfig {
    pub test: String,
    pub loader: Option<String>,
    #[serde(rename = "use")]
    pub use_: Option<UseConfig>,
    pub exclude: Option<String>,
    /// Options for `loader`.
    pub options: Option<Value>,
}

/// `use`: a loader string (`"style-loader!css-loader"` allowed) or a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UseConfig {
    One(UseItem),
    Many(Vec<UseItem>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UseItem {
    Name(String),
    Loader {
        loader: String,
        #[serde(default)]
        options: Option<Value>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolveConfig {
    pub extensions: Vec<String>,
    pub alias: BTreeMap<String, String>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            extensions: vec![".js".to_string()],
            alias: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptimizationConfig {
    pub split_chunks: bool,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self { split_chunks: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevServerConfig {
    pub history_api_fallback: bool,
    pub no_info: bool,
    pub port: u16,
    pub host: String,
    pub content_base: Option<PathBuf>,
    pub index: String,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            history_api_fallback: false,
            no_info: false,
            port: 8080,
            host: "127.0.0.1".to_string(),
            content_base: None,
            index: "index.html".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub hints: Option<Value>,
}

/// Size-hint level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PerformanceHints {
    #[default]
    Off,
    Warning,
    Error,
}

/// Validated output options.
#[derive(Debug, Clone)]
pub struct OutputOptions {
    /// Absolute output directory.
    pub path: PathBuf,
    pub filename: FilenameTemplate,
    pub chunk_filename: FilenameTemplate,
    pub library: Option<String>,
    pub library_target: LibraryTarget,
    pub public_path: String,
}

/// Validated dev-server options.
#[derive(Debug, Clone)]
pub struct DevServerOptions {
    pub history_api_fallback: bool,
    pub no_info: bool,
    pub port: u16,
    pub host: String,
    /// Absolute static-file root.
    pub content_base: PathBuf,
    /// App-shell document, relative to `content_base`.
    pub index: String,
}

/// A validated configuration.
#[derive(Debug, Clone)]
pub struct NormalizedConfig {
    /// Absolute, canonical project root.
    pub context: PathBuf,
    /// Entry name → specifier, in declaration order.
    pub entries: Vec<(String, String)>,
    pub output: OutputOptions,
    pub rules: Vec<Rule>,
    pub extensions: Vec<String>,
    pub alias: BTreeMap<String, String>,
    pub plugins: Vec<String>,
    /// Identifier → replacement code.
    pub define: BTreeMap<String, String>,
    pub split_chunks: bool,
    pub dev_server: DevServerOptions,
    pub performance: PerformanceHints,
}

impl Config {
    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse a configuration document.
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Locate the configuration file in `dir`.
    pub fn find(dir: &Path) -> Result<PathBuf, ConfigError> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.is_file() {
            Ok(path)
        } else {
            Err(ConfigError::NotFound {
                dir: dir.to_path_buf(),
                expected: CONFIG_FILE_NAME,
            })
        }
    }

    /// Validate and resolve against `config_dir` (the directory holding the
    /// config file).
    pub fn normalize(&self, config_dir: &Path) -> Result<NormalizedConfig, ConfigError> {
        let context = match &self.context {
            Some(dir) => config_dir.join(dir),
            None => config_dir.to_path_buf(),
        };
        let context = dunce::canonicalize(&context).unwrap_or(context);

        let entries = self.normalize_entries()?;
        let output = self.normalize_output(&context)?;
        let rules = self
            .rules
            .iter()
            .enumerate()
            .map(|(index, rule)| normalize_rule(index, rule))
            .collect::<Result<Vec<_>, _>>()?;

        let define = self
            .define
            .iter()
            .map(|(key, value)| {
                let code = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), code)
            })
            .collect();

        let dev_server = DevServerOptions {
            history_api_fallback: self.dev_server.history_api_fallback,
            no_info: self.dev_server.no_info,
            port: self.dev_server.port,
            host: self.dev_server.host.clone(),
            content_base: self
                .dev_server
                .content_base
                .as_ref()
                .map_or_else(|| context.clone(), |dir| context.join(dir)),
            index: self.dev_server.index.clone(),
        };

        Ok(NormalizedConfig {
            entries,
            output,
            rules,
            extensions: self.resolve.extensions.clone(),
            alias: self.resolve.alias.clone(),
            plugins: self.plugins.clone(),
            define,
            split_chunks: self.optimization.split_chunks,
            dev_server,
            performance: self.performance_hints()?,
            context,
        })
    }

    fn normalize_entries(&self) -> Result<Vec<(String, String)>, ConfigError> {
        let entries = &self.entry.0;
        if entries.is_empty() {
            return Err(ConfigError::NoEntries);
        }
        for (i, (name, _)) in entries.iter().enumerate() {
            if entries[..i].iter().any(|(earlier, _)| earlier == name) {
                return Err(ConfigError::DuplicateEntry(name.clone()));
            }
        }
        Ok(entries.clone())
    }

    fn normalize_output(&self, context: &Path) -> Result<OutputOptions, ConfigError> {
        let template = |field: &str, source: &str| {
            FilenameTemplate::parse(source).map_err(|message| ConfigError::InvalidTemplate {
                field: field.to_string(),
                template: source.to_string(),
                message,
            })
        };

        let output = &self.output;
        let filename = template("output.filename", &output.filename)?;
        if self.entry.0.len() > 1 && !filename.uses_name() && !filename.uses_content_hash() {
            return Err(ConfigError::InvalidTemplate {
                field: "output.filename".to_string(),
                template: output.filename.clone(),
                message: "several entries need [name] or [contenthash] in the file name"
                    .to_string(),
            });
        }

        Ok(OutputOptions {
            path: context.join(&output.path),
            filename,
            chunk_filename: template("output.chunkFilename", &output.chunk_filename)?,
            library: output.library.clone(),
            library_target: output.library_target,
            public_path: output.public_path.clone(),
        })
    }

    fn performance_hints(&self) -> Result<PerformanceHints, ConfigError> {
        match &self.performance.hints {
            None | Some(Value::Null | Value::Bool(false)) => Ok(PerformanceHints::Off),
            Some(Value::Bool(true)) => Ok(PerformanceHints::Warning),
            Some(Value::String(level)) if level == "warning" => Ok(PerformanceHints::Warning),
            Some(Value::String(level)) if level == "error" => Ok(PerformanceHints::Error),
            Some(other) => Err(ConfigError::InvalidValue {
                field: "performance.hints".to_string(),
                message: format!("expected false, \"warning\" or \"error\", got {other}"),
            }),
        }
    }
}

fn normalize_rule(index: usize, rule: &RuleConfig) -> Result<Rule, ConfigError> {
    let test = Pattern::new(&format!("rules[{index}].test"), &rule.test)?;
    let exclude = rule
        .exclude
        .as_deref()
        .map(|source| Pattern::new(&format!("rules[{index}].exclude"), source))
        .transpose()?;

    let mut uses = Vec::new();
    if let Some(loader) = &rule.loader {
        let options = rule.options.clone().unwrap_or(Value::Null);
        for (i, name) in split_loader_string(loader).into_iter().enumerate() {
            // Rule-level options belong to the first named loader
            let options = if i == 0 { options.clone() } else { Value::Null };
            uses.push(LoaderUse::new(name, options));
        }
    }
    let items: &[UseItem] = match &rule.use_ {
        Some(UseConfig::One(item)) => std::slice::from_ref(item),
        Some(UseConfig::Many(items)) => items,
        None => &[],
    };
    for item in items {
        match item {
            UseItem::Name(names) => {
                for name in split_loader_string(names) {
                    uses.push(LoaderUse::new(name, Value::Null));
                }
            }
            UseItem::Loader { loader, options } => {
                uses.push(LoaderUse::new(
                    loader.clone(),
                    options.clone().unwrap_or(Value::Null),
                ));
            }
        }
    }

    if uses.is_empty() {
        return Err(ConfigError::EmptyRule { rule: index });
    }
    Rule::new(index, test, exclude, uses)
}

/// `"style-loader!css-loader"` → `["style-loader", "css-loader"]`.
fn split_loader_string(loaders: &str) -> Vec<&str> {
    loaders
        .split('!')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}
