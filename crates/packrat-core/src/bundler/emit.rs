//! Bundle output emission.
//!
//! Renders every chunk of a [`ChunkGraph`] into a script, collects side-effect
//! assets and a manifest, and writes the artifact set to disk.
//!
//! ## Output shape
//!
//! Every chunk pushes a batch of module factories onto a global queue:
//!
//! ```text
//! (function (g) {
//!   (g.__packrat_chunks__ = g.__packrat_chunks__ || []).push({
//!   "src/a.js": [function (module, exports, require) { ... }, {"./b": "src/b.js"}],
//!   });
//! })(<global>);
//! ```
//!
//! Entry chunks start with the runtime, which drains that queue and keeps
//! the module registry, and end by requiring the entry module and binding
//! its exports according to `output.libraryTarget`. Chunk scripts can thus
//! load in any order before the entry chunk.

use super::assets::content_type;
use super::chunks::{Chunk, ChunkGraph, ChunkId, ChunkKind};
use super::graph::{ModuleGraph, ModuleId};
use super::lower::js_string;
use super::template::TemplateData;
use crate::config::{LibraryTarget, OutputOptions, PerformanceHints, MAX_ASSET_SIZE};
use crate::error::EmitError;
use packrat_util::fs::{atomic_write, join_relative};
use packrat_util::hash::blake3_bytes;
use rayon::prelude::*;
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// File name of the manifest artifact.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Expression for the global object in browsers, workers and scripts.
const GLOBAL: &str =
    "(typeof globalThis !== \"undefined\" ? globalThis : typeof self !== \"undefined\" ? self : this)";

/// Module registry and chunk loader. Installed once per page.
const RUNTIME: &str = r#"(function (g) {
  if (g.__packrat__) return;
  var modules = {};
  var cache = {};
  var chunkFiles = {};
  var loading = {};
  var has = Object.prototype.hasOwnProperty;

  function register(batch) {
    for (var id in batch) {
      if (has.call(batch, id) && !has.call(modules, id)) modules[id] = batch[id];
    }
  }

  function load(id) {
    if (has.call(cache, id)) return cache[id].exports;
    if (!has.call(modules, id)) throw new Error("Module '" + id + "' is not loaded");
    var module = (cache[id] = { id: id, exports: {} });
    modules[id][0].call(module.exports, module, module.exports, makeRequire(modules[id][1]));
    return module.exports;
  }

  function loadScript(file) {
    if (has.call(loading, file)) return loading[file];
    return (loading[file] = new Promise(function (resolve, reject) {
      var script = document.createElement("script");
      script.src = file;
      script.onload = function () { resolve(); };
      script.onerror = function () {
        delete loading[file];
        reject(new Error("Failed to load chunk " + file));
      };
      document.head.appendChild(script);
    }));
  }

  function makeRequire(deps) {
    function require(spec) {
      if (!has.call(deps, spec)) throw new Error("Cannot find module '" + spec + "'");
      return load(deps[spec]);
    }
    require.dynamic = function (spec) {
      if (!has.call(deps, spec)) return Promise.reject(new Error("Cannot find module '" + spec + "'"));
      var id = deps[spec];
      return Promise.all((chunkFiles[id] || []).map(loadScript)).then(function () {
        return load(id);
      });
    };
    require.interopDefault = function (m) {
      return m && m.__esModule ? m["default"] : m;
    };
    require.exportStar = function (target, source) {
      for (var key in source) {
        if (key !== "default" && key !== "__esModule" && has.call(source, key) && !has.call(target, key)) {
          target[key] = source[key];
        }
      }
      return source;
    };
    require.injectStyle = function (css) {
      if (typeof document === "undefined") return;
      var style = document.createElement("style");
      style.appendChild(document.createTextNode(css));
      document.head.appendChild(style);
    };
    return require;
  }

  var queue = (g.__packrat_chunks__ = g.__packrat_chunks__ || []);
  for (var i = 0; i < queue.length; i++) register(queue[i]);
  queue.length = 0;
  queue.push = function (batch) {
    register(batch);
    return 0;
  };
  g.__packrat__ = { register: register, require: load, chunkFiles: chunkFiles };
})"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Chunk,
    Asset,
    Manifest,
}

/// One output file.
#[derive(Debug, Clone)]
pub struct EmittedArtifact {
    /// Output-relative file name, forward slashes.
    pub filename: String,
    pub bytes: Arc<[u8]>,
    /// Full blake3 digest of `bytes`.
    pub content_hash: String,
    pub kind: ArtifactKind,
}

impl EmittedArtifact {
    fn new(filename: String, bytes: Vec<u8>, kind: ArtifactKind) -> Self {
        Self {
            content_hash: blake3_bytes(&bytes),
            filename,
            bytes: bytes.into(),
            kind,
        }
    }

    #[must_use]
    pub fn content_type(&self) -> &'static str {
        content_type(&self.filename)
    }
}

/// Files a host page loads for one entry, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub name: String,
    /// Output-relative file names.
    pub files: Vec<String>,
    /// `publicPath`-prefixed URLs of `files`.
    pub urls: Vec<String>,
}

/// The artifact set of one build, before it is written.
#[derive(Debug, Clone, Default)]
pub struct EmitOutput {
    /// Sorted by file name.
    pub artifacts: Vec<EmittedArtifact>,
    /// In entry declaration order.
    pub entrypoints: Vec<EntryPoint>,
    pub warnings: Vec<String>,
}

impl EmitOutput {
    #[must_use]
    pub fn get(&self, filename: &str) -> Option<&EmittedArtifact> {
        self.artifacts
            .binary_search_by(|a| a.filename.as_str().cmp(filename))
            .ok()
            .map(|i| &self.artifacts[i])
    }
}

#[derive(Serialize, Deserialize)]
struct Manifest {
    entrypoints: Vec<EntryPoint>,
    /// Every artifact except the manifest itself.
    files: Vec<String>,
}

/// Emission settings.
#[derive(Debug, Clone, Copy)]
pub struct EmitOptions<'a> {
    pub output: &'a OutputOptions,
    pub performance: PerformanceHints,
}

struct RenderedChunk {
    filename: String,
    url: String,
    bytes: Vec<u8>,
}

/// Render the artifact set for a graph and its chunk partition.
pub fn emit(
    graph: &ModuleGraph,
    chunks: &ChunkGraph,
    options: &EmitOptions<'_>,
) -> Result<EmitOutput, EmitError> {
    let output = options.output;

    // Parallel render: module factories are independent, concatenated in id order
    let factories: Vec<String> = (0..graph.len())
        .into_par_iter()
        .map(|id| render_factory(graph, id))
        .collect();

    // Non-entry chunks first: entry chunks embed their URLs.
    let mut rendered: HashMap<ChunkId, RenderedChunk> = HashMap::default();
    for chunk in chunks.chunks().iter().filter(|c| c.kind != ChunkKind::Entry) {
        let body = render_chunk_body(chunk, &factories);
        let name = render_name(output, chunk, &body);
        rendered.insert(chunk.id, name);
    }

    let chunk_files = chunk_files_map(graph, chunks, &rendered);
    for chunk in chunks.entry_chunks() {
        let mut body = String::from(RUNTIME);
        body.push('(');
        body.push_str(GLOBAL);
        body.push_str(");\n");
        body.push_str(&render_chunk_body(chunk, &factories));
        if !chunk_files.is_empty() {
            body.push_str("(function (r) {\n");
            for (target, files) in &chunk_files {
                let list: Vec<String> = files.iter().map(|f| js_string(f)).collect();
                body.push_str(&format!(
                    "  r.chunkFiles[{}] = [{}];\n",
                    js_string(target),
                    list.join(", ")
                ));
            }
            body.push_str(&format!("}})({GLOBAL}.__packrat__);\n"));
        }
        if let Some(root) = chunk.root {
            body.push_str(&render_entry_call(output, &chunk.name, graph.name(root)));
        }
        let name = render_name(output, chunk, &body);
        rendered.insert(chunk.id, name);
    }

    let entrypoints: Vec<EntryPoint> = chunks
        .entry_chunks()
        .map(|chunk| {
            let order = chunks.load_order(chunk.id);
            EntryPoint {
                name: chunk.name.clone(),
                files: order.iter().map(|id| rendered[id].filename.clone()).collect(),
                urls: order.iter().map(|id| rendered[id].url.clone()).collect(),
            }
        })
        .collect();

    let mut collector = ArtifactCollector::default();
    for chunk in chunks.chunks() {
        if let Some(r) = rendered.remove(&chunk.id) {
            collector.add(
                EmittedArtifact::new(r.filename, r.bytes, ArtifactKind::Chunk),
                &format!("chunk '{}'", chunk.name),
            )?;
        }
    }
    for (id, record) in graph.iter() {
        for asset in &record.assets {
            collector.add(
                EmittedArtifact::new(asset.filename.clone(), asset.bytes.clone(), ArtifactKind::Asset),
                graph.name(id),
            )?;
        }
    }

    let mut warnings = Vec::new();
    for artifact in collector.artifacts.values() {
        let size = artifact.bytes.len();
        if size <= MAX_ASSET_SIZE {
            continue;
        }
        match options.performance {
            PerformanceHints::Off => {}
            PerformanceHints::Warning => warnings.push(format!(
                "asset size limit: '{}' is {size} bytes, above the recommended {MAX_ASSET_SIZE} bytes",
                artifact.filename
            )),
            PerformanceHints::Error => {
                return Err(EmitError::SizeLimit {
                    filename: artifact.filename.clone(),
                    size,
                    limit: MAX_ASSET_SIZE,
                })
            }
        }
    }

    let manifest = Manifest {
        entrypoints: entrypoints.clone(),
        files: collector.artifacts.keys().cloned().collect(),
    };
    let manifest_bytes = serde_json::to_vec_pretty(&manifest).map_err(EmitError::Manifest)?;
    collector.add(
        EmittedArtifact::new(MANIFEST_FILE.to_string(), manifest_bytes, ArtifactKind::Manifest),
        "manifest",
    )?;

    Ok(EmitOutput {
        artifacts: collector.artifacts.into_values().collect(),
        entrypoints,
        warnings,
    })
}

/// Artifacts by file name, rejecting conflicting duplicates.
#[derive(Default)]
struct ArtifactCollector {
    artifacts: BTreeMap<String, EmittedArtifact>,
    origins: HashMap<String, String>,
}

impl ArtifactCollector {
    fn add(&mut self, artifact: EmittedArtifact, origin: &str) -> Result<(), EmitError> {
        if let Some(existing) = self.artifacts.get(&artifact.filename) {
            // Two modules copying the same bytes to the same name is fine
            if existing.content_hash == artifact.content_hash && existing.kind == artifact.kind {
                return Ok(());
            }
            return Err(EmitError::Collision {
                filename: artifact.filename,
                first: self.origins[&existing.filename].clone(),
                second: origin.to_string(),
            });
        }
        self.origins.insert(artifact.filename.clone(), origin.to_string());
        self.artifacts.insert(artifact.filename.clone(), artifact);
        Ok(())
    }
}

/// `"id": [function (module, exports, require) {…}, {deps}],`
fn render_factory(graph: &ModuleGraph, id: ModuleId) -> String {
    let record = graph.get(id);
    let deps: BTreeMap<&str, &str> = graph
        .dependencies(id)
        .iter()
        .map(|d| (d.specifier.as_str(), graph.name(d.target)))
        .collect();
    let deps = deps
        .iter()
        .map(|(spec, target)| format!("{}: {}", js_string(spec), js_string(target)))
        .collect::<Vec<_>>()
        .join(", ");

    let mut out = String::with_capacity(record.code.len() + 128);
    out.push_str(&format!(
        "{}: [function (module, exports, require) {{\n",
        js_string(graph.name(id))
    ));
    out.push_str(&record.code);
    if !record.code.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&format!("}}, {{{deps}}}],\n"));
    out
}

fn render_chunk_body(chunk: &Chunk, factories: &[String]) -> String {
    let mut body = String::from(
        "(function (g) {\n(g.__packrat_chunks__ = g.__packrat_chunks__ || []).push({\n",
    );
    for &id in &chunk.modules {
        body.push_str(&factories[id]);
    }
    body.push_str("});\n})(");
    body.push_str(GLOBAL);
    body.push_str(");\n");
    body
}

fn render_name(output: &OutputOptions, chunk: &Chunk, body: &str) -> RenderedChunk {
    let template = match chunk.kind {
        ChunkKind::Entry => &output.filename,
        ChunkKind::Shared | ChunkKind::Async => &output.chunk_filename,
    };
    let hash = blake3_bytes(body.as_bytes());
    let name = template.render(&TemplateData {
        name: &chunk.name,
        ext: "js",
        content_hash: &hash,
    });
    RenderedChunk {
        url: format!("{}{}", output.public_path, name.url()),
        filename: name.file,
        bytes: body.as_bytes().to_vec(),
    }
}

/// Dynamic import target → URLs of the chunks to load before requiring it.
fn chunk_files_map(
    graph: &ModuleGraph,
    chunks: &ChunkGraph,
    rendered: &HashMap<ChunkId, RenderedChunk>,
) -> BTreeMap<String, Vec<String>> {
    let mut map = BTreeMap::new();
    for target in graph.dynamic_targets() {
        let Some(owner) = chunks.chunk_for_module(target) else {
            continue;
        };
        let urls: Vec<String> = chunks
            .load_order(owner)
            .into_iter()
            .filter_map(|id| rendered.get(&id).map(|r| r.url.clone()))
            .collect();
        if !urls.is_empty() {
            map.insert(graph.name(target).to_string(), urls);
        }
    }
    map
}

/// Require the entry module and bind it per `libraryTarget`.
fn render_entry_call(output: &OutputOptions, entry_name: &str, module: &str) -> String {
    let call = format!("{GLOBAL}.__packrat__.require({})", js_string(module));
    let Some(library) = &output.library else {
        return format!("{call};\n");
    };
    let library = library.replace("[name]", entry_name);
    match output.library_target {
        LibraryTarget::Var => format!("var {library} = {call};\n"),
        LibraryTarget::Assign => format!("{library} = {call};\n"),
        LibraryTarget::This => format!("this[{}] = {call};\n", js_string(&library)),
        LibraryTarget::Window => format!("window[{}] = {call};\n", js_string(&library)),
    }
}

/// What a write pass changed on disk, by output-relative file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactDiff {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ArtifactDiff {
    /// True when the write pass left the output directory as it was.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Write `artifacts` under `out_dir`, skipping files whose bytes are already
/// on disk, and delete files the previous manifest listed that are gone.
pub fn write_artifacts(
    out_dir: &Path,
    artifacts: &[EmittedArtifact],
) -> Result<ArtifactDiff, EmitError> {
    let io_error = |path: &Path, source: std::io::Error| EmitError::Io {
        path: path.to_path_buf(),
        source,
    };

    let previous = previous_files(out_dir);
    let mut diff = ArtifactDiff::default();

    for artifact in artifacts {
        let path = join_relative(out_dir, &artifact.filename);
        match std::fs::read(&path) {
            Ok(existing) if existing[..] == artifact.bytes[..] => {
                diff.unchanged.push(artifact.filename.clone());
                continue;
            }
            Ok(_) => diff.changed.push(artifact.filename.clone()),
            Err(_) => diff.added.push(artifact.filename.clone()),
        }
        atomic_write(&path, &artifact.bytes).map_err(|e| io_error(&path, e))?;
    }

    for stale in previous {
        if stale.split('/').any(|seg| seg == "..")
            || artifacts.iter().any(|a| a.filename == stale)
        {
            continue;
        }
        let path = join_relative(out_dir, &stale);
        match std::fs::remove_file(&path) {
            Ok(()) => diff.removed.push(stale),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(&path, e)),
        }
    }

    Ok(diff)
}

/// Files listed by the manifest already in `out_dir`.
fn previous_files(out_dir: &Path) -> Vec<String> {
    std::fs::read(out_dir.join(MANIFEST_FILE))
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Manifest>(&bytes).ok())
        .map(|m| m.files)
        .unwrap_or_default()
}
