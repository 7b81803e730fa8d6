//! `vue-loader`: single-file component splitter.
//!
//! On the component file itself it emits a module that requires one virtual
//! sub-request per block (`App.vue?vue&type=script&lang=ts`, …). On a
//! sub-request it returns the raw content of the selected block, which the
//! rest of the chain then transforms. Template compilation is out of scope:
//! the template block is exported as a string.

use crate::bundler::loader::{
    text, ImportKind, ImportRequest, Loader, LoaderContext, LoaderError, LoaderOutput,
};
use crate::bundler::lower::js_string;
use serde_json::Value;

/// Query flag marking this loader's sub-requests.
pub const COMPONENT_QUERY_MARKER: &str = "vue";

/// One top-level block of a component file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Block {
    tag: &'static str,
    attrs: Vec<(String, Option<String>)>,
    content: String,
}

impl Block {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.as_deref())
    }
}

pub struct ComponentLoader;

impl Loader for ComponentLoader {
    fn id(&self) -> &str {
        "vue-loader"
    }

    fn run(
        &self,
        content: Vec<u8>,
        _options: &Value,
        ctx: &LoaderContext<'_>,
    ) -> Result<LoaderOutput, LoaderError> {
        let source = text(&content);
        let blocks = parse_blocks(&source)?;

        if let Some(part) = ctx.virtual_part {
            return select_block(&blocks, &part.part, part.index.unwrap_or(0));
        }
        if ctx.key.query.as_deref().is_some_and(|q| {
            q.split('&').any(|p| p == COMPONENT_QUERY_MARKER)
        }) {
            return Err(LoaderError::new(
                "vue-loader was used without the corresponding plugin; add \"vue-loader\" to `plugins`",
            ));
        }

        let file_name = ctx
            .key
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| LoaderError::new("component path has no file name"))?;
        Ok(component_module(file_name, &blocks))
    }
}

/// The module for the component file itself.
fn component_module(file_name: &str, blocks: &[Block]) -> LoaderOutput {
    let mut code = String::new();
    let mut imports = Vec::new();
    let mut request = |block: &Block, index: Option<usize>| {
        let mut spec = format!("./{file_name}?{COMPONENT_QUERY_MARKER}&type={}", block.tag);
        if let Some(index) = index {
            spec.push_str(&format!("&index={index}"));
        }
        if let Some(lang) = block.attr("lang") {
            spec.push_str(&format!("&lang={lang}"));
        }
        imports.push(ImportRequest::new(spec.clone(), ImportKind::Static));
        js_string(&spec)
    };

    let script = blocks.iter().find(|b| b.tag == "script");
    let template = blocks.iter().find(|b| b.tag == "template");

    match script {
        Some(block) => code.push_str(&format!(
            "var __script = require.interopDefault(require({})) || {{}};\n",
            request(block, None)
        )),
        None => code.push_str("var __script = {};\n"),
    }
    if let Some(block) = template {
        code.push_str(&format!(
            "__script.template = require({});\n",
            request(block, None)
        ));
    }
    for (index, block) in blocks.iter().filter(|b| b.tag == "style").enumerate() {
        code.push_str(&format!("require({});\n", request(block, Some(index))));
    }
    code.push_str("module.exports = __script;\n");

    LoaderOutput::code(code).with_imports(imports)
}

/// Content of the requested block.
fn select_block(blocks: &[Block], part: &str, index: usize) -> Result<LoaderOutput, LoaderError> {
    let block = blocks
        .iter()
        .filter(|b| b.tag == part)
        .nth(index)
        .ok_or_else(|| LoaderError::new(format!("no <{part}> block #{index}")))?;

    if block.tag == "template" {
        return Ok(LoaderOutput::code(format!(
            "module.exports = {};",
            js_string(block.content.trim())
        )));
    }
    Ok(LoaderOutput::code(block.content.clone()))
}

/// Split a component file into its top-level blocks.
fn parse_blocks(source: &str) -> Result<Vec<Block>, LoaderError> {
    let mut blocks = Vec::new();
    let mut pos = 0;

    while let Some(offset) = source[pos..].find('<') {
        let start = pos + offset;
        let rest = &source[start..];

        if rest.starts_with("<!--") {
            pos = rest
                .find("-->")
                .map_or(source.len(), |end| start + end + 3);
            continue;
        }

        let Some(tag) = ["template", "script", "style"]
            .into_iter()
            .find(|tag| opens_tag(rest, tag))
        else {
            pos = start + 1;
            continue;
        };

        let open_end = rest
            .find('>')
            .ok_or_else(|| LoaderError::new(format!("unterminated <{tag}> tag")))?;
        let attrs = parse_attrs(&rest[1 + tag.len()..open_end]);
        let body_start = start + open_end + 1;
        let body_end = find_close(source, body_start, tag)
            .ok_or_else(|| LoaderError::new(format!("missing </{tag}>")))?;

        blocks.push(Block {
            tag,
            attrs,
            content: source[body_start..body_end].to_string(),
        });
        pos = body_end + tag.len() + 3;
    }

    Ok(blocks)
}

fn opens_tag(rest: &str, tag: &str) -> bool {
    rest.strip_prefix('<')
        .and_then(|r| r.strip_prefix(tag))
        .and_then(|r| r.chars().next())
        .is_some_and(|c| c == '>' || c.is_whitespace())
}

/// Index of the `</tag>` closing the block opened before `from`. Templates
/// may nest `<template>` elements.
fn find_close(source: &str, from: usize, tag: &str) -> Option<usize> {
    let close = format!("</{tag}>");
    let mut depth = 0usize;
    let mut pos = from;
    loop {
        let next_close = source[pos..].find(&close)? + pos;
        if tag != "template" {
            return Some(next_close);
        }
        let next_open = source[pos..next_close]
            .match_indices('<')
            .map(|(i, _)| pos + i)
            .find(|&i| opens_tag(&source[i..], tag));
        match next_open {
            Some(open) => {
                depth += 1;
                pos = open + tag.len() + 1;
            }
            None if depth == 0 => return Some(next_close),
            None => {
                depth -= 1;
                pos = next_close + close.len();
            }
        }
    }
}

fn parse_attrs(raw: &str) -> Vec<(String, Option<String>)> {
    let mut attrs = Vec::new();
    let mut rest = raw.trim();
    while !rest.is_empty() {
        let name_end = rest
            .find(|c: char| c == '=' || c.is_whitespace())
            .unwrap_or(rest.len());
        let name = rest[..name_end].trim_end_matches('/').to_string();
        rest = rest[name_end..].trim_start();

        let value = if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            match after_eq.chars().next() {
                Some(q @ ('"' | '\'')) => {
                    let inner = &after_eq[1..];
                    let end = inner.find(q).unwrap_or(inner.len());
                    rest = inner.get(end + 1..).unwrap_or("").trim_start();
                    Some(inner[..end].to_string())
                }
                _ => {
                    let end = after_eq.find(char::is_whitespace).unwrap_or(after_eq.len());
                    rest = after_eq[end..].trim_start();
                    Some(after_eq[..end].to_string())
                }
            }
        } else {
            None
        };

        if !name.is_empty() {
            attrs.push((name, value));
        }
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::graph::ModuleKey;
    use crate::bundler::rules::VirtualPart;
    use std::path::{Path, PathBuf};

    const APP: &str = r#"<template>
  <div id="app">
    <template v-if="ok"><span>{{ msg }}</span></template>
  </div>
</template>

<!-- <script>commented</script> -->
<script lang="ts">
import Vue from 'vue';
export default Vue.extend({ data: () => ({ msg: 'hi', ok: true }) });
</script>

<style scoped>
#app { color: red; }
</style>
<style lang="css">
span { margin: 0; }
</style>
"#;

    fn run(query: Option<&str>, part: Option<VirtualPart>) -> Result<LoaderOutput, LoaderError> {
        let key = ModuleKey::new(
            PathBuf::from("/app/src/App.vue"),
            query.map(str::to_string),
        );
        let ctx = LoaderContext {
            key: &key,
            virtual_part: part.as_ref(),
            context: Path::new("/app"),
            public_path: "/",
        };
        ComponentLoader.run(APP.as_bytes().to_vec(), &Value::Null, &ctx)
    }

    fn part(kind: &str, index: Option<usize>) -> VirtualPart {
        VirtualPart {
            selector: "vue-loader".to_string(),
            part: kind.to_string(),
            lang: None,
            index,
        }
    }

    #[test]
    fn test_parse_blocks() {
        let blocks = parse_blocks(APP).unwrap();
        let tags: Vec<&str> = blocks.iter().map(|b| b.tag).collect();
        assert_eq!(tags, vec!["template", "script", "style", "style"]);
        assert!(blocks[0].content.contains("<template v-if=\"ok\">"));
        assert_eq!(blocks[1].attr("lang"), Some("ts"));
        assert_eq!(blocks[2].attrs, vec![("scoped".to_string(), None)]);
    }

    #[test]
    fn test_component_module_requests_parts() {
        let out = run(None, None).unwrap();
        let specs: Vec<&str> = out.imports.iter().map(|i| i.specifier.as_str()).collect();
        assert_eq!(
            specs,
            vec![
                "./App.vue?vue&type=script&lang=ts",
                "./App.vue?vue&type=template",
                "./App.vue?vue&type=style&index=0",
                "./App.vue?vue&type=style&index=1&lang=css",
            ]
        );
        assert!(text(&out.content).contains("module.exports = __script;"));
    }

    #[test]
    fn test_selects_script_and_style_blocks() {
        let script = run(Some("vue&type=script&lang=ts"), Some(part("script", None))).unwrap();
        assert!(text(&script.content).contains("export default Vue.extend"));

        let style = run(Some("vue&type=style&index=1"), Some(part("style", Some(1)))).unwrap();
        assert_eq!(text(&style.content).trim(), "span { margin: 0; }");
    }

    #[test]
    fn test_template_exported_as_string() {
        let out = run(Some("vue&type=template"), Some(part("template", None))).unwrap();
        let code = text(&out.content).into_owned();
        assert!(code.starts_with("module.exports = \"<div id=\\\"app\\\">"));
    }

    #[test]
    fn test_sub_request_without_plugin_fails() {
        let err = run(Some("vue&type=script"), None).unwrap_err();
        assert!(err.0.contains("without the corresponding plugin"));
    }

    #[test]
    fn test_missing_block() {
        let err = run(Some("vue&type=style&index=5"), Some(part("style", Some(5)))).unwrap_err();
        assert_eq!(err.0, "no <style> block #5");
    }
}
