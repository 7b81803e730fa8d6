//! `raw-loader` and the native JSON loader.

use crate::bundler::loader::{text, Loader, LoaderContext, LoaderError, LoaderOutput};
use crate::bundler::lower::js_string;
use serde_json::Value;

/// Exports the file content as a string.
pub struct RawLoader;

impl Loader for RawLoader {
    fn id(&self) -> &str {
        "raw-loader"
    }

    fn run(
        &self,
        content: Vec<u8>,
        _options: &Value,
        _ctx: &LoaderContext<'_>,
    ) -> Result<LoaderOutput, LoaderError> {
        Ok(LoaderOutput::code(format!(
            "module.exports = {};",
            js_string(&text(&content))
        )))
    }
}

/// Exports parsed JSON.
pub struct JsonLoader;

impl Loader for JsonLoader {
    fn id(&self) -> &str {
        "json"
    }

    fn run(
        &self,
        content: Vec<u8>,
        _options: &Value,
        _ctx: &LoaderContext<'_>,
    ) -> Result<LoaderOutput, LoaderError> {
        let value: Value = serde_json::from_slice(&content)
            .map_err(|e| LoaderError::new(format!("invalid JSON: {e}")))?;
        let json = serde_json::to_string(&value).map_err(|e| LoaderError::new(e.to_string()))?;
        Ok(LoaderOutput::code(format!("module.exports = {json};")))
    }
}
