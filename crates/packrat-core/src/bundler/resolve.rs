//! Import specifier resolution.
//!
//! Resolves import specifiers to absolute file paths.
//!
//! ## Specifier Types
//!
//! - Relative: `./utils`, `../lib/foo`, `.`, `..`
//! - Absolute: `/abs/path/to/module`
//! - Bare: `vue`, `@scope/pkg`, `normalize.css/normalize.css`
//!
//! Aliases are applied first. Every candidate path that is tried is recorded,
//! so a failure can list them all.

use crate::error::ResolutionError;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// `package.json` fields consulted for a package root, in order.
const PACKAGE_ENTRY_FIELDS: &[&str] = &["browser", "module", "main"];

#[derive(Debug, Clone)]
struct Alias {
    key: String,
    exact: bool,
    target: String,
}

/// Import resolver. Pure over the file system; memoization lives in the
/// build cache.
#[derive(Debug, Clone)]
pub struct Resolver {
    context: PathBuf,
    extensions: Vec<String>,
    /// Longest key first.
    aliases: Vec<Alias>,
}

impl Resolver {
    /// Create a resolver. Relative alias targets are resolved against `context`.
    #[must_use]
    pub fn new(context: &Path, extensions: &[String], alias: &BTreeMap<String, String>) -> Self {
        let mut aliases: Vec<Alias> = alias
            .iter()
            .map(|(key, target)| {
                let (key, exact) = match key.strip_suffix('$') {
                    Some(k) => (k.to_string(), true),
                    None => (key.clone(), false),
                };
                let target = if is_relative(target) {
                    context.join(target).to_string_lossy().into_owned()
                } else {
                    target.clone()
                };
                Alias { key, exact, target }
            })
            .collect();
        aliases.sort_by(|a, b| b.key.len().cmp(&a.key.len()).then_with(|| a.key.cmp(&b.key)));

        Self {
            context: context.to_path_buf(),
            extensions: extensions.to_vec(),
            aliases,
        }
    }

    #[must_use]
    pub fn context(&self) -> &Path {
        &self.context
    }

    /// Resolve `specifier` as written in a module located in `from_dir`.
    pub fn resolve(&self, specifier: &str, from_dir: &Path) -> Result<PathBuf, ResolutionError> {
        let aliased = self.apply_alias(specifier);
        let request = aliased.as_deref().unwrap_or(specifier);

        let mut searched = Vec::new();
        let found = if is_relative(request) {
            self.resolve_path(&from_dir.join(request), &mut searched)
        } else if Path::new(request).is_absolute() {
            self.resolve_path(Path::new(request), &mut searched)
        } else {
            self.resolve_bare(request, from_dir, &mut searched)
        };

        found.ok_or_else(|| ResolutionError {
            specifier: specifier.to_string(),
            from_dir: from_dir.to_path_buf(),
            searched,
        })
    }

    fn apply_alias(&self, specifier: &str) -> Option<String> {
        self.aliases.iter().find_map(|alias| {
            if specifier == alias.key {
                return Some(alias.target.clone());
            }
            if alias.exact {
                return None;
            }
            specifier
                .strip_prefix(alias.key.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .map(|rest| format!("{}/{rest}", alias.target))
        })
    }

    /// The path verbatim, then with each extension, then as a directory index.
    fn resolve_path(&self, target: &Path, searched: &mut Vec<PathBuf>) -> Option<PathBuf> {
        let target = normalize_path(target);
        if let Some(found) = self.resolve_file(&target, searched) {
            return Some(found);
        }
        self.resolve_index(&target, searched)
    }

    fn resolve_file(&self, target: &Path, searched: &mut Vec<PathBuf>) -> Option<PathBuf> {
        if try_file(target, searched) {
            return Some(canonical(target));
        }
        for ext in &self.extensions {
            let with_ext = PathBuf::from(format!("{}{ext}", target.display()));
            if try_file(&with_ext, searched) {
                return Some(canonical(&with_ext));
            }
        }
        None
    }

    fn resolve_index(&self, dir: &Path, searched: &mut Vec<PathBuf>) -> Option<PathBuf> {
        for ext in &self.extensions {
            let index = dir.join(format!("index{ext}"));
            if try_file(&index, searched) {
                return Some(canonical(&index));
            }
        }
        None
    }

    /// Resolve a bare specifier (node_modules lookup).
    fn resolve_bare(
        &self,
        specifier: &str,
        from_dir: &Path,
        searched: &mut Vec<PathBuf>,
    ) -> Option<PathBuf> {
        let (pkg_name, subpath) = parse_bare_specifier(specifier);

        // Walk up from `from_dir` looking for node_modules
        let mut current = Some(from_dir);
        while let Some(dir) = current {
            let pkg_dir = dir.join("node_modules").join(pkg_name);
            if pkg_dir.is_dir() {
                let found = match subpath {
                    Some(sub) => self.resolve_path(&pkg_dir.join(sub), searched),
                    None => self.resolve_package_root(&pkg_dir, searched),
                };
                if found.is_some() {
                    return found;
                }
            } else {
                searched.push(pkg_dir);
            }
            current = dir.parent();
        }
        None
    }

    /// Entry point of a package directory.
    fn resolve_package_root(&self, pkg_dir: &Path, searched: &mut Vec<PathBuf>) -> Option<PathBuf> {
        let pkg_json = pkg_dir.join("package.json");
        let manifest = std::fs::read_to_string(&pkg_json)
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok());

        if let Some(manifest) = manifest {
            for field in PACKAGE_ENTRY_FIELDS {
                let Some(entry) = manifest.get(*field).and_then(|v| v.as_str()) else {
                    continue;
                };
                if let Some(found) = self.resolve_path(&pkg_dir.join(entry), searched) {
                    return Some(found);
                }
            }
        }

        self.resolve_index(pkg_dir, searched)
    }
}

fn is_relative(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
}

/// Fold `.` and `..` components without touching the filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !result.pop() {
                    result.push(component);
                }
            }
            other => result.push(other),
        }
    }
    result
}

fn try_file(path: &Path, searched: &mut Vec<PathBuf>) -> bool {
    searched.push(path.to_path_buf());
    path.is_file()
}

fn canonical(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Parse a bare specifier into package name and subpath.
fn parse_bare_specifier(specifier: &str) -> (&str, Option<&str>) {
    let split_at = if specifier.starts_with('@') {
        specifier
            .match_indices('/')
            .nth(1)
            .map(|(i, _)| i)
    } else {
        specifier.find('/')
    };
    match split_at {
        Some(i) => (&specifier[..i], Some(&specifier[i + 1..])),
        None => (specifier, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn resolver(root: &Path, alias: &[(&str, &str)]) -> Resolver {
        let alias: BTreeMap<String, String> = alias
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Resolver::new(root, &[".js".to_string(), ".ts".to_string()], &alias)
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_parse_bare_specifier() {
        assert_eq!(parse_bare_specifier("lodash"), ("lodash", None));
        assert_eq!(parse_bare_specifier("lodash/get"), ("lodash", Some("get")));
        assert_eq!(parse_bare_specifier("@types/node"), ("@types/node", None));
        assert_eq!(
            parse_bare_specifier("@babel/core/lib/parse"),
            ("@babel/core", Some("lib/parse"))
        );
    }

    #[test]
    fn test_resolve_relative_extensions_and_index() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        write(&root.join("src/utils.ts"), "");
        write(&root.join("src/widgets/index.js"), "");
        write(&root.join("src/data.json"), "{}");

        let r = resolver(&root, &[]);
        let src = root.join("src");
        assert_eq!(r.resolve("./utils", &src).unwrap(), src.join("utils.ts"));
        assert_eq!(r.resolve("./widgets", &src).unwrap(), src.join("widgets/index.js"));
        assert_eq!(r.resolve("./data.json", &src).unwrap(), src.join("data.json"));
        assert_eq!(r.resolve("../src/utils", &src).unwrap(), src.join("utils.ts"));
    }

    #[test]
    fn test_extension_order() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        write(&root.join("a.js"), "");
        write(&root.join("a.ts"), "");

        let r = resolver(&root, &[]);
        assert_eq!(r.resolve("./a", &root).unwrap(), root.join("a.js"));
    }

    #[test]
    fn test_resolve_bare_package() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        write(
            &root.join("node_modules/vue/package.json"),
            r#"{"main": "dist/vue.runtime.common.js", "module": "dist/vue.runtime.esm.js"}"#,
        );
        write(&root.join("node_modules/vue/dist/vue.runtime.esm.js"), "");
        write(&root.join("node_modules/vue/dist/vue.esm.js"), "");
        write(&root.join("node_modules/@scope/pkg/index.js"), "");
        write(&root.join("frontend/app.ts"), "");

        let r = resolver(&root, &[]);
        let from = root.join("frontend");
        assert_eq!(
            r.resolve("vue", &from).unwrap(),
            root.join("node_modules/vue/dist/vue.runtime.esm.js")
        );
        assert_eq!(
            r.resolve("vue/dist/vue.esm", &from).unwrap(),
            root.join("node_modules/vue/dist/vue.esm.js")
        );
        assert_eq!(
            r.resolve("@scope/pkg", &from).unwrap(),
            root.join("node_modules/@scope/pkg/index.js")
        );
    }

    #[test]
    fn test_browser_field_wins() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        write(
            &root.join("node_modules/pkg/package.json"),
            r#"{"browser": "browser.js", "main": "main.js"}"#,
        );
        write(&root.join("node_modules/pkg/browser.js"), "");
        write(&root.join("node_modules/pkg/main.js"), "");

        let r = resolver(&root, &[]);
        assert_eq!(
            r.resolve("pkg", &root).unwrap(),
            root.join("node_modules/pkg/browser.js")
        );
    }

    #[test]
    fn test_exact_alias() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        write(&root.join("node_modules/vue/package.json"), r#"{"main": "index.js"}"#);
        write(&root.join("node_modules/vue/index.js"), "");
        write(&root.join("node_modules/vue/dist/vue.esm.js"), "");
        write(&root.join("node_modules/vue/other.js"), "");

        let r = resolver(&root, &[("vue$", "vue/dist/vue.esm.js")]);
        assert_eq!(
            r.resolve("vue", &root).unwrap(),
            root.join("node_modules/vue/dist/vue.esm.js")
        );
        // `$` keys match only the exact specifier
        assert_eq!(
            r.resolve("vue/other", &root).unwrap(),
            root.join("node_modules/vue/other.js")
        );
    }

    #[test]
    fn test_prefix_alias_longest_wins() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        write(&root.join("src/lib/x.js"), "");
        write(&root.join("vendor/ui/button.js"), "");

        let r = resolver(&root, &[("@", "./src"), ("@/ui", "./vendor/ui")]);
        let from = root.join("deep/nested");
        assert_eq!(r.resolve("@/lib/x", &from).unwrap(), root.join("src/lib/x.js"));
        assert_eq!(
            r.resolve("@/ui/button", &from).unwrap(),
            root.join("vendor/ui/button.js")
        );
    }

    #[test]
    fn test_failure_lists_searched_paths() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();

        let r = resolver(&root, &[]);
        let err = r.resolve("./missing", &root).unwrap_err();
        assert_eq!(err.specifier, "./missing");
        assert_eq!(err.from_dir, root);
        assert_eq!(
            err.searched,
            vec![
                root.join("missing"),
                root.join("missing.js"),
                root.join("missing.ts"),
                root.join("missing").join("index.js"),
                root.join("missing").join("index.ts"),
            ]
        );
        assert!(!err.to_string().contains("/./"));

        let nested = root.join("src").join("pages");
        let err = r.resolve("../lib/./missing", &nested).unwrap_err();
        assert_eq!(err.searched[0], root.join("src").join("lib").join("missing"));
        assert_eq!(
            err.searched[1].display().to_string(),
            format!("{}.js", root.join("src").join("lib").join("missing").display())
        );

        let err = r.resolve("nope", &root).unwrap_err();
        assert!(err.searched.contains(&root.join("node_modules").join("nope")));
    }
}
