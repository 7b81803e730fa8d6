//! Copied binary assets.
//!
//! Raw files and `file-loader` outputs are emitted under a name template and
//! the referring module exports their public URL.

use super::graph::ModuleKey;
use super::loader::{LoaderOutput, SideAsset};
use super::lower::js_string;
use super::template::{FilenameTemplate, TemplateData};
use packrat_util::hash::blake3_bytes;

/// Template for files no rule applies to.
pub const RAW_ASSET_TEMPLATE: &str = "[name].[ext]?[contenthash:8]";

/// `file-loader`'s default `name` option.
pub const FILE_LOADER_TEMPLATE: &str = "[contenthash].[ext]";

/// Where an asset goes and how it is addressed.
#[derive(Debug, Clone, Copy)]
pub struct AssetTarget<'a> {
    pub template: &'a FilenameTemplate,
    /// URL prefix in the exported URL.
    pub public_path: &'a str,
    /// Directory prefix inside the output directory.
    pub output_path: &'a str,
}

/// Emit `content` as an asset and produce the module that exports its URL.
///
/// The `?…` part of the rendered name is a cache-busting URL query; it is
/// not part of the file name.
#[must_use]
pub fn emit_asset(key: &ModuleKey, content: Vec<u8>, target: &AssetTarget<'_>) -> LoaderOutput {
    let name = key
        .path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("asset");
    let ext = key
        .path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let hash = blake3_bytes(&content);

    let rendered = target.template.render(&TemplateData {
        name,
        ext,
        content_hash: &hash,
    });
    let output_path = normalize_dir(target.output_path);
    let filename = format!("{output_path}{}", rendered.file);
    let url = format!("{}{output_path}{}", target.public_path, rendered.url());

    LoaderOutput {
        content: format!("module.exports = {};", js_string(&url)).into_bytes(),
        assets: vec![SideAsset {
            filename,
            bytes: content,
        }],
        imports: Vec::new(),
    }
}

fn normalize_dir(dir: &str) -> String {
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        String::new()
    } else {
        format!("{dir}/")
    }
}

/// MIME type for an output file name.
#[must_use]
pub fn content_type(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "json" | "map" => "application/json; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "txt" => "text/plain; charset=utf-8",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::loader::text;
    use std::path::PathBuf;

    #[test]
    fn test_raw_asset_name_and_url() {
        let template = FilenameTemplate::parse(RAW_ASSET_TEMPLATE).unwrap();
        let key = ModuleKey::file(PathBuf::from("/app/img/logo.png"));
        let out = emit_asset(
            &key,
            b"PNG".to_vec(),
            &AssetTarget {
                template: &template,
                public_path: "/dist/",
                output_path: "",
            },
        );

        let hash = blake3_bytes(b"PNG");
        assert_eq!(out.assets.len(), 1);
        assert_eq!(out.assets[0].filename, "logo.png");
        assert_eq!(out.assets[0].bytes, b"PNG");
        assert_eq!(
            text(&out.content),
            format!("module.exports = \"/dist/logo.png?{}\";", &hash[..8])
        );
    }

    #[test]
    fn test_output_path_prefix() {
        let template = FilenameTemplate::parse("[name].[ext]").unwrap();
        let key = ModuleKey::file(PathBuf::from("/app/fonts/a.woff2"));
        let out = emit_asset(
            &key,
            Vec::new(),
            &AssetTarget {
                template: &template,
                public_path: "dist/",
                output_path: "/fonts/",
            },
        );
        assert_eq!(out.assets[0].filename, "fonts/a.woff2");
        assert_eq!(text(&out.content), "module.exports = \"dist/fonts/a.woff2\";");
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("adb.js"), "application/javascript; charset=utf-8");
        assert_eq!(content_type("logo.PNG"), "image/png");
        assert_eq!(content_type("LICENSE"), "application/octet-stream");
    }
}
