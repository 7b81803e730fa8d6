//! `file-loader`.

use crate::bundler::assets::{emit_asset, AssetTarget, FILE_LOADER_TEMPLATE};
use crate::bundler::loader::{Loader, LoaderContext, LoaderError, LoaderOutput};
use crate::bundler::template::FilenameTemplate;
use serde_json::Value;

/// Copies the file to the output directory and exports its URL.
///
/// Options: `name` (filename template), `publicPath` (URL prefix, defaults to
/// `output.publicPath`), `outputPath` (directory inside the output).
pub struct FileLoader;

impl Loader for FileLoader {
    fn id(&self) -> &str {
        "file-loader"
    }

    fn run(
        &self,
        content: Vec<u8>,
        options: &Value,
        ctx: &LoaderContext<'_>,
    ) -> Result<LoaderOutput, LoaderError> {
        let option = |name: &str| options.get(name).and_then(Value::as_str);

        let template = FilenameTemplate::parse(option("name").unwrap_or(FILE_LOADER_TEMPLATE))
            .map_err(|e| LoaderError::new(format!("invalid `name` option: {e}")))?;

        Ok(emit_asset(
            ctx.key,
            content,
            &AssetTarget {
                template: &template,
                public_path: option("publicPath").unwrap_or(ctx.public_path),
                output_path: option("outputPath").unwrap_or(""),
            },
        ))
    }
}
