//! Plugin system for the bundler.
//!
//! A plugin is a fixed set of hooks. All have no-op defaults, so a plugin only
//! implements what it needs.
//!
//! ## Example
//!
//! ```ignore
//! use packrat_core::bundler::{HookResult, ModuleKey, Plugin};
//!
//! struct Banner;
//!
//! impl Plugin for Banner {
//!     fn name(&self) -> &str { "banner" }
//!
//!     fn before_transform(&self, key: &ModuleKey, content: &[u8]) -> HookResult<Option<Vec<u8>>> {
//!         if key.path.extension().is_some_and(|e| e == "js") {
//!             let mut out = b"/* (c) */\n".to_vec();
//!             out.extend_from_slice(content);
//!             return Ok(Some(out));
//!         }
//!         Ok(None)
//!     }
//! }
//! ```

use super::emit::EmittedArtifact;
use super::graph::ModuleKey;
use super::loaders::COMPONENT_QUERY_MARKER;
use super::rules::{VirtualModuleRule, VirtualModules};

/// Result type for plugin hooks.
pub type HookResult<T> = Result<T, PluginError>;

/// Error from a plugin.
#[derive(Debug)]
pub struct PluginError {
    /// Plugin name that caused the error.
    pub plugin: String,
    /// Hook that failed.
    pub hook: &'static str,
    /// Error message.
    pub message: String,
}

impl std::fmt::Display for PluginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.plugin, self.hook, self.message)
    }
}

impl std::error::Error for PluginError {}

/// The plugin trait.
pub trait Plugin: Send + Sync {
    /// Plugin name for debugging and error messages.
    fn name(&self) -> &str;

    /// Register virtual sub-request schemes. Called once, before any build.
    fn register_virtual_modules(&self, _modules: &mut VirtualModules) {}

    /// Replace a module's raw content before its loader chain runs.
    ///
    /// Return `Some(content)` to replace, `None` to pass through.
    fn before_transform(&self, _key: &ModuleKey, _content: &[u8]) -> HookResult<Option<Vec<u8>>> {
        Ok(None)
    }

    /// Called with the complete artifact set after it has been written.
    fn after_emit(&self, _artifacts: &[EmittedArtifact]) -> HookResult<()> {
        Ok(())
    }
}

/// Plugins in registration order.
#[derive(Default)]
pub struct PluginContainer {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginContainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Collect every plugin's virtual sub-request schemes.
    #[must_use]
    pub fn virtual_modules(&self) -> VirtualModules {
        let mut modules = VirtualModules::default();
        for plugin in &self.plugins {
            plugin.register_virtual_modules(&mut modules);
        }
        modules
    }

    /// Run `before_transform` through every plugin; each sees the previous
    /// plugin's output.
    pub fn before_transform(&self, key: &ModuleKey, content: Vec<u8>) -> HookResult<Vec<u8>> {
        let mut current = content;
        for plugin in &self.plugins {
            if let Some(replaced) = plugin.before_transform(key, &current)? {
                current = replaced;
            }
        }
        Ok(current)
    }

    pub fn after_emit(&self, artifacts: &[EmittedArtifact]) -> HookResult<()> {
        for plugin in &self.plugins {
            plugin.after_emit(artifacts)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PluginContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContainer")
            .field("plugins", &self.names())
            .finish()
    }
}

/// Names accepted in the `plugins` config list.
pub const BUILTIN_PLUGINS: &[&str] = &["vue-loader"];

/// Instantiate a built-in plugin by config name.
#[must_use]
pub fn builtin_plugin(name: &str) -> Option<Box<dyn Plugin>> {
    match name {
        "vue-loader" => Some(Box::new(ComponentPlugin)),
        _ => None,
    }
}

/// Companion plugin of `vue-loader`: makes `?vue&type=…` sub-requests go
/// through the rules that match their block language.
pub struct ComponentPlugin;

impl Plugin for ComponentPlugin {
    fn name(&self) -> &str {
        "vue-loader"
    }

    fn register_virtual_modules(&self, modules: &mut VirtualModules) {
        modules.register(VirtualModuleRule {
            marker: COMPONENT_QUERY_MARKER.to_string(),
            selector: "vue-loader".to_string(),
            default_langs: vec![
                ("script".to_string(), "js".to_string()),
                ("style".to_string(), "css".to_string()),
            ],
        });
    }
}

/// Replaces identifiers such as `process.env.NODE_ENV` with literal code
/// before transforms run (the `define` config option).
pub struct DefinePlugin {
    /// Longest key first, so `a.b.c` wins over `a.b`.
    replacements: Vec<(String, String)>,
}

impl DefinePlugin {
    pub fn new(definitions: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut replacements: Vec<(String, String)> = definitions.into_iter().collect();
        replacements.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { replacements }
    }
}

impl Plugin for DefinePlugin {
    fn name(&self) -> &str {
        "define"
    }

    fn before_transform(&self, key: &ModuleKey, content: &[u8]) -> HookResult<Option<Vec<u8>>> {
        if self.replacements.is_empty() || !is_script_path(key) {
            return Ok(None);
        }
        let Ok(code) = std::str::from_utf8(content) else {
            return Ok(None);
        };

        let mut result = code.to_string();
        let mut changed = false;
        for (from, to) in &self.replacements {
            if result.contains(from.as_str()) {
                result = replace_identifier(&result, from, to);
                changed = true;
            }
        }

        Ok(changed.then(|| result.into_bytes()))
    }
}

fn is_script_path(key: &ModuleKey) -> bool {
    matches!(
        key.path.extension().and_then(|e| e.to_str()),
        Some("js" | "mjs" | "cjs" | "jsx" | "ts" | "tsx" | "vue")
    )
}

/// Replace whole-identifier occurrences of `from`.
fn replace_identifier(source: &str, from: &str, to: &str) -> String {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(idx) = rest.find(from) {
        let before_ok = rest[..idx]
            .chars()
            .next_back()
            .map_or(true, |c| !is_ident(c) && c != '.');
        let after_ok = rest[idx + from.len()..]
            .chars()
            .next()
            .map_or(true, |c| !is_ident(c));
        out.push_str(&rest[..idx]);
        out.push_str(if before_ok && after_ok { to } else { from });
        rest = &rest[idx + from.len()..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct Fails;

    impl Plugin for Fails {
        fn name(&self) -> &str {
            "fails"
        }

        fn after_emit(&self, _artifacts: &[EmittedArtifact]) -> HookResult<()> {
            Err(PluginError {
                plugin: self.name().to_string(),
                hook: "after_emit",
                message: "nope".to_string(),
            })
        }
    }

    fn key(path: &str) -> ModuleKey {
        ModuleKey::file(PathBuf::from(path))
    }

    #[test]
    fn test_component_plugin_registers_scheme() {
        let mut container = PluginContainer::new();
        container.add(builtin_plugin("vue-loader").unwrap());
        let modules = container.virtual_modules();

        let part = modules
            .part_of(&ModuleKey::new(
                PathBuf::from("/app/App.vue"),
                Some("vue&type=style&index=1".to_string()),
            ))
            .unwrap();
        assert_eq!(part.part, "style");
        assert_eq!(part.lang.as_deref(), Some("css"));
        assert_eq!(part.index, Some(1));
        assert!(builtin_plugin("nope").is_none());
    }

    #[test]
    fn test_define_plugin() {
        let plugin = DefinePlugin::new([
            ("process.env.NODE_ENV".to_string(), "\"production\"".to_string()),
            ("DEBUG".to_string(), "false".to_string()),
        ]);
        let out = plugin
            .before_transform(
                &key("/app/a.js"),
                b"if (process.env.NODE_ENV !== 'x' && DEBUG && DEBUGGER && a.DEBUG) {}",
            )
            .unwrap()
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "if (\"production\" !== 'x' && false && DEBUGGER && a.DEBUG) {}"
        );

        assert!(plugin
            .before_transform(&key("/app/a.css"), b"DEBUG")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_after_emit_error_propagates() {
        let mut container = PluginContainer::new();
        container.add(Box::new(Fails));
        let err = container.after_emit(&[]).unwrap_err();
        assert_eq!(err.to_string(), "[fails] after_emit: nope");
    }
}
