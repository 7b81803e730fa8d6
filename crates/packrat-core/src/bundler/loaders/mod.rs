//! Built-in loaders.
//!
//! These honour the loader contract without compiling anything: script
//! loaders lower module syntax and discover imports, the component loader
//! splits a single-file component into virtual sub-requests, and the style
//! and asset loaders turn files into modules.

mod component;
mod file;
mod script;
mod style;
mod text;

pub use component::{ComponentLoader, COMPONENT_QUERY_MARKER};
pub use file::FileLoader;
pub use script::ScriptLoader;
pub use style::{CssLoader, StyleLoader};
pub use text::{JsonLoader, RawLoader};

use super::loader::Loader;
use std::sync::Arc;

/// Every built-in loader.
#[must_use]
pub fn builtin() -> Vec<Arc<dyn Loader>> {
    vec![
        Arc::new(ScriptLoader::new("js")),
        Arc::new(ScriptLoader::new("ts-loader")),
        Arc::new(ScriptLoader::new("babel-loader")),
        Arc::new(ComponentLoader),
        Arc::new(CssLoader),
        Arc::new(StyleLoader),
        Arc::new(FileLoader),
        Arc::new(RawLoader),
        Arc::new(JsonLoader),
    ]
}
