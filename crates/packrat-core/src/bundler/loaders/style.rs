//! `css-loader` and `style-loader`.

use crate::bundler::loader::{
    text, ImportKind, ImportRequest, Loader, LoaderContext, LoaderError, LoaderOutput,
};
use crate::bundler::lower::js_string;
use regex_lite::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"@import\s+(?:url\(\s*)?["']?([^"')\s;]+)["']?\s*\)?[^;]*;"#)
            .expect("static regex")
    })
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)"#).expect("static regex")
    })
}

/// Turns a stylesheet into a module exporting a list of CSS strings.
///
/// `@import` rules become dependencies; `url()` references to local files
/// become dependencies whose exported URLs are spliced back into the CSS.
pub struct CssLoader;

impl Loader for CssLoader {
    fn id(&self) -> &str {
        "css-loader"
    }

    fn run(
        &self,
        content: Vec<u8>,
        _options: &Value,
        _ctx: &LoaderContext<'_>,
    ) -> Result<LoaderOutput, LoaderError> {
        let css = text(&content);
        let mut imports = Vec::new();
        let mut code = String::from("var __css = [];\n");

        for caps in import_re().captures_iter(&css) {
            if let Some(spec) = caps.get(1).and_then(|m| local_request(m.as_str())) {
                code.push_str(&format!(
                    "(function (m) {{ if (Array.isArray(m)) __css.push.apply(__css, m); }})(require({}));\n",
                    js_string(&spec)
                ));
                imports.push(ImportRequest::new(spec, ImportKind::Static));
            }
        }
        let without_imports = import_re().replace_all(&css, "");

        // Build a JS string expression, splicing in the URL of every local asset.
        let mut expr = String::new();
        let mut last = 0;
        for caps in url_re().captures_iter(&without_imports) {
            let Some(whole) = caps.get(0) else { continue };
            let raw = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map_or("", |m| m.as_str());
            let Some(spec) = local_request(raw) else {
                continue;
            };
            expr.push_str(&js_string(&without_imports[last..whole.start()]));
            expr.push_str(&format!(" + \"url(\" + require({}) + \")\" + ", js_string(&spec)));
            last = whole.end();
            if !imports.iter().any(|i: &ImportRequest| i.specifier == spec) {
                imports.push(ImportRequest::new(spec, ImportKind::Static));
            }
        }
        expr.push_str(&js_string(&without_imports[last..]));

        code.push_str(&format!("__css.push({expr});\n"));
        code.push_str("module.exports = __css;\n");
        Ok(LoaderOutput::code(code).with_imports(imports))
    }
}

/// Map a CSS reference to an import specifier, or `None` for references that
/// stay as written (remote, data, absolute, fragment).
fn local_request(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty()
        || raw.starts_with('#')
        || raw.starts_with('/')
        || raw.starts_with("data:")
        || raw.contains("://")
    {
        return None;
    }
    if let Some(module) = raw.strip_prefix('~') {
        return Some(module.to_string());
    }
    if raw.starts_with("./") || raw.starts_with("../") {
        return Some(raw.to_string());
    }
    Some(format!("./{raw}"))
}

/// Injects the stylesheet produced by `css-loader` into the page when the
/// module runs. Plain CSS input is injected as-is.
pub struct StyleLoader;

impl Loader for StyleLoader {
    fn id(&self) -> &str {
        "style-loader"
    }

    fn run(
        &self,
        content: Vec<u8>,
        _options: &Value,
        _ctx: &LoaderContext<'_>,
    ) -> Result<LoaderOutput, LoaderError> {
        let input = text(&content);
        if !input.contains("module.exports") {
            return Ok(LoaderOutput::code(format!(
                "require.injectStyle({});\n",
                js_string(&input)
            )));
        }

        let code = format!(
            "var __style = {{ exports: {{}} }};\n(function (module, exports) {{\n{input}\n}})(__style, __style.exports);\nrequire.injectStyle([].concat(__style.exports).join(\"\\n\"));\n"
        );
        Ok(LoaderOutput::code(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::graph::ModuleKey;
    use std::path::{Path, PathBuf};

    fn run(loader: &dyn Loader, input: &str) -> LoaderOutput {
        let key = ModuleKey::file(PathBuf::from("/app/src/site.css"));
        let ctx = LoaderContext {
            key: &key,
            virtual_part: None,
            context: Path::new("/app"),
            public_path: "/",
        };
        loader
            .run(input.as_bytes().to_vec(), &Value::Null, &ctx)
            .unwrap()
    }

    #[test]
    fn test_css_imports_and_urls() {
        let out = run(
            &CssLoader,
            "@import \"./base.css\";\n@import url(~normalize.css/normalize.css);\n.a { background: url(img/logo.png); }\n.b { background: url('https://cdn/x.png'); }\n.c { background: url(data:image/png;base64,AA==); }\n",
        );
        let specs: Vec<&str> = out.imports.iter().map(|i| i.specifier.as_str()).collect();
        assert_eq!(
            specs,
            vec!["./base.css", "normalize.css/normalize.css", "./img/logo.png"]
        );

        let code = text(&out.content).into_owned();
        assert!(code.contains(r#"+ "url(" + require("./img/logo.png") + ")" +"#));
        assert!(code.contains("url('https://cdn/x.png')"));
        assert!(!code.contains("@import"));
        assert!(code.ends_with("module.exports = __css;\n"));
    }

    #[test]
    fn test_style_loader_wraps_css_module() {
        let css_module = text(&run(&CssLoader, ".a { color: red; }").content).into_owned();
        let out = run(&StyleLoader, &css_module);
        let code = text(&out.content).into_owned();
        assert!(code.starts_with("var __style = { exports: {} };"));
        assert!(code.contains("require.injectStyle("));
        assert!(out.imports.is_empty());
    }

    #[test]
    fn test_style_loader_plain_css() {
        let out = run(&StyleLoader, ".a { color: red; }");
        assert_eq!(
            text(&out.content),
            "require.injectStyle(\".a { color: red; }\");\n"
        );
    }
}
