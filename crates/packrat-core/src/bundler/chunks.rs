//! Code splitting and chunk generation.
//!
//! Partitions the module graph so every module lands in exactly one chunk:
//!
//! - one entry chunk per entry, holding its statically reachable modules;
//! - with `splitChunks` on, one shared chunk per distinct set of entries
//!   reaching a module (`a~b`); with it off, a shared module stays in the
//!   first entry that reaches it and later entries depend on that chunk;
//! - one async chunk per dynamic import target, holding the part of its
//!   static closure not already placed.
//!
//! Chunk order and membership derive from sorted module ids only.

use super::graph::{ModuleGraph, ModuleId};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use std::collections::BTreeMap;

/// Unique identifier for a chunk.
pub type ChunkId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Entry,
    Shared,
    Async,
}

/// A group of modules emitted as one file.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: ChunkId,
    /// Value of `[name]`.
    pub name: String,
    pub kind: ChunkKind,
    /// Member modules, sorted.
    pub modules: Vec<ModuleId>,
    /// Entry module (entry chunks) or dynamic import target (async chunks).
    pub root: Option<ModuleId>,
    /// Chunks that must be loaded before this one.
    pub dependencies: Vec<ChunkId>,
}

/// Result of code splitting.
#[derive(Debug, Default)]
pub struct ChunkGraph {
    chunks: Vec<Chunk>,
    module_to_chunk: HashMap<ModuleId, ChunkId>,
}

impl ChunkGraph {
    /// Split the module graph into chunks.
    #[must_use]
    pub fn from_module_graph(graph: &ModuleGraph, split_chunks: bool) -> Self {
        let mut chunk_graph = Self::default();
        chunk_graph.create_entry_chunks(graph, split_chunks);
        chunk_graph.create_async_chunks(graph);
        chunk_graph
    }

    fn create_entry_chunks(&mut self, graph: &ModuleGraph, split_chunks: bool) {
        let entries = graph.entries();
        let closures: Vec<Vec<ModuleId>> = entries
            .iter()
            .map(|(_, root)| graph.static_closure(*root))
            .collect();

        // Module → indexes of the entries reaching it, in declaration order
        let mut reached_by: BTreeMap<ModuleId, Vec<usize>> = BTreeMap::new();
        for (index, closure) in closures.iter().enumerate() {
            for &id in closure {
                reached_by.entry(id).or_default().push(index);
            }
        }

        for (name, root) in entries {
            self.create_chunk(name.clone(), ChunkKind::Entry, Some(*root));
        }

        if split_chunks {
            let mut shared: BTreeMap<Vec<usize>, Vec<ModuleId>> = BTreeMap::new();
            for (&id, reach) in &reached_by {
                if reach.len() == 1 {
                    self.assign(id, reach[0]);
                } else {
                    shared.entry(reach.clone()).or_default().push(id);
                }
            }
            for (reach, modules) in shared {
                let name = reach
                    .iter()
                    .map(|&i| entries[i].0.as_str())
                    .collect::<Vec<_>>()
                    .join("~");
                let chunk = self.create_chunk(name, ChunkKind::Shared, None);
                for id in modules {
                    self.assign(id, chunk);
                }
                for entry_chunk in reach {
                    self.chunks[entry_chunk].dependencies.push(chunk);
                }
            }
        } else {
            for (&id, reach) in &reached_by {
                self.assign(id, reach[0]);
            }
            for (index, closure) in closures.iter().enumerate() {
                let mut owners: Vec<ChunkId> = closure
                    .iter()
                    .map(|id| self.module_to_chunk[id])
                    .filter(|&owner| owner != index)
                    .collect();
                owners.sort_unstable();
                owners.dedup();
                self.chunks[index].dependencies = owners;
            }
        }
    }

    fn create_async_chunks(&mut self, graph: &ModuleGraph) {
        let mut used_names: HashSet<String> = self.chunks.iter().map(|c| c.name.clone()).collect();

        for target in graph.dynamic_targets() {
            if self.module_to_chunk.contains_key(&target) {
                continue;
            }

            let stem = graph
                .get(target)
                .key
                .path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("chunk")
                .to_string();
            let mut name = stem.clone();
            let mut n = 1;
            while !used_names.insert(name.clone()) {
                n += 1;
                name = format!("{stem}-{n}");
            }

            let chunk = self.create_chunk(name, ChunkKind::Async, Some(target));
            let members = graph.closure_where(target, |id| !self.module_to_chunk.contains_key(&id));
            for id in members {
                self.assign(id, chunk);
            }

            // Modules of the closure placed earlier in shared or async chunks
            let mut dependencies: Vec<ChunkId> = graph
                .static_closure(target)
                .iter()
                .map(|id| self.module_to_chunk[id])
                .filter(|&owner| owner != chunk && self.chunks[owner].kind != ChunkKind::Entry)
                .collect();
            dependencies.sort_unstable();
            dependencies.dedup();
            self.chunks[chunk].dependencies = dependencies;
        }
    }

    fn create_chunk(&mut self, name: String, kind: ChunkKind, root: Option<ModuleId>) -> ChunkId {
        let id = self.chunks.len();
        self.chunks.push(Chunk {
            id,
            name,
            kind,
            modules: Vec::new(),
            root,
            dependencies: Vec::new(),
        });
        id
    }

    fn assign(&mut self, module: ModuleId, chunk: ChunkId) {
        self.module_to_chunk.insert(module, chunk);
        // Callers assign in ascending module order
        self.chunks[chunk].modules.push(module);
    }

    /// Get all chunks.
    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    #[must_use]
    pub fn get(&self, id: ChunkId) -> &Chunk {
        &self.chunks[id]
    }

    /// Entry chunks, in entry declaration order.
    pub fn entry_chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().filter(|c| c.kind == ChunkKind::Entry)
    }

    /// Get the chunk containing a module.
    #[must_use]
    pub fn chunk_for_module(&self, module: ModuleId) -> Option<ChunkId> {
        self.module_to_chunk.get(&module).copied()
    }

    /// `chunk` and everything it depends on, dependencies first.
    #[must_use]
    pub fn load_order(&self, chunk: ChunkId) -> Vec<ChunkId> {
        let mut order = Vec::new();
        let mut seen = HashSet::default();
        self.visit_load_order(chunk, &mut seen, &mut order);
        order
    }

    fn visit_load_order(&self, chunk: ChunkId, seen: &mut HashSet<ChunkId>, order: &mut Vec<ChunkId>) {
        if !seen.insert(chunk) {
            return;
        }
        for &dep in &self.chunks[chunk].dependencies {
            self.visit_load_order(dep, seen, order);
        }
        order.push(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::graph::{ModuleKey, ModuleRecord, ResolvedImport};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    /// `(path, [(specifier target, dynamic)])`
    fn graph(modules: &[(&str, &[(&str, bool)])], entries: &[(&str, &str)]) -> ModuleGraph {
        let key = |p: &str| ModuleKey::file(PathBuf::from(format!("/app/{p}")));
        let records = modules
            .iter()
            .map(|(path, deps)| {
                let record = Arc::new(ModuleRecord {
                    key: key(path),
                    source: Vec::new(),
                    loaders: Vec::new(),
                    imports: Vec::new(),
                    code: String::new(),
                    assets: Vec::new(),
                });
                let resolved = deps
                    .iter()
                    .map(|(target, dynamic)| ResolvedImport {
                        specifier: format!("./{target}"),
                        dynamic: *dynamic,
                        target: key(target),
                    })
                    .collect();
                (record, resolved)
            })
            .collect();
        let entries: Vec<(String, ModuleKey)> = entries
            .iter()
            .map(|(name, path)| ((*name).to_string(), key(path)))
            .collect();
        ModuleGraph::assemble(Path::new("/app"), records, &entries)
    }

    fn names(graph: &ModuleGraph, chunk: &Chunk) -> Vec<String> {
        chunk.modules.iter().map(|&id| graph.name(id).to_string()).collect()
    }

    fn two_entries() -> ModuleGraph {
        graph(
            &[
                ("adb.js", &[("shared.js", false), ("util.js", false)]),
                ("flash.js", &[("shared.js", false)]),
                ("shared.js", &[("util.js", false)]),
                ("util.js", &[]),
            ],
            &[("adb", "adb.js"), ("flash_message", "flash.js")],
        )
    }

    #[test]
    fn test_shared_chunk_per_reach_set() {
        let g = two_entries();
        let chunks = ChunkGraph::from_module_graph(&g, true);

        assert_eq!(chunks.chunks().len(), 3);
        let adb = chunks.get(0);
        assert_eq!(adb.name, "adb");
        assert_eq!(names(&g, adb), vec!["adb.js"]);

        let shared = chunks.get(2);
        assert_eq!(shared.name, "adb~flash_message");
        assert_eq!(shared.kind, ChunkKind::Shared);
        assert_eq!(names(&g, shared), vec!["shared.js", "util.js"]);
        assert_eq!(chunks.load_order(0), vec![2, 0]);
        assert_eq!(chunks.load_order(1), vec![2, 1]);
    }

    #[test]
    fn test_split_chunks_off_keeps_module_in_first_entry() {
        let g = two_entries();
        let chunks = ChunkGraph::from_module_graph(&g, false);

        assert_eq!(chunks.chunks().len(), 2);
        assert_eq!(names(&g, chunks.get(0)), vec!["adb.js", "shared.js", "util.js"]);
        assert_eq!(names(&g, chunks.get(1)), vec!["flash.js"]);
        assert_eq!(chunks.load_order(1), vec![0, 1]);
    }

    #[test]
    fn test_async_chunk_excludes_placed_modules() {
        let g = graph(
            &[
                ("main.js", &[("util.js", false), ("page.js", true)]),
                ("page.js", &[("util.js", false), ("widget.js", false)]),
                ("util.js", &[]),
                ("widget.js", &[]),
            ],
            &[("main", "main.js")],
        );
        let chunks = ChunkGraph::from_module_graph(&g, true);

        assert_eq!(chunks.chunks().len(), 2);
        let page = chunks.get(1);
        assert_eq!(page.kind, ChunkKind::Async);
        assert_eq!(page.name, "page");
        assert_eq!(names(&g, page), vec!["page.js", "widget.js"]);
        assert!(page.dependencies.is_empty());
        assert_eq!(names(&g, chunks.get(0)), vec!["main.js", "util.js"]);
    }

    #[test]
    fn test_every_module_placed_once() {
        let g = graph(
            &[
                ("a.js", &[("b.js", true), ("c.js", true)]),
                ("b.js", &[("lib.js", false)]),
                ("c.js", &[("lib.js", false)]),
                ("lib.js", &[]),
            ],
            &[("a", "a.js")],
        );
        let chunks = ChunkGraph::from_module_graph(&g, true);

        let mut placed: Vec<ModuleId> = chunks.chunks().iter().flat_map(|c| c.modules.clone()).collect();
        placed.sort_unstable();
        assert_eq!(placed, vec![0, 1, 2, 3]);
        // `c` reuses `lib`, which the `b` chunk placed first
        let c = chunks.get(chunks.chunk_for_module(2).unwrap());
        assert_eq!(c.dependencies, vec![chunks.chunk_for_module(3).unwrap()]);
    }
}
