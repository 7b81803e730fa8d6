//! ES module syntax lowering.
//!
//! Rewrites `import`/`export` statements into the CommonJS shape the chunk
//! runtime executes (`require`, `module`, `exports`). Statement-level and
//! line-oriented: anything that is not module syntax passes through.
//! Bindings are snapshots taken when the importing statement runs.

/// Lower module syntax in `source`.
#[must_use]
pub fn lower_module(source: &str) -> String {
    let mut lowering = Lowering::default();
    let mut body = String::with_capacity(source.len() + 128);
    let mut pending: Option<String> = None;
    let mut lexer = LineLexer::default();

    for line in source.lines() {
        let in_code = lexer.in_code();
        lexer.feed(line);
        if pending.is_none() && !in_code {
            body.push_str(line);
            body.push('\n');
            continue;
        }

        if let Some(mut stmt) = pending.take() {
            stmt.push('\n');
            stmt.push_str(line);
            if statement_complete(&stmt) {
                body.push_str(&lowering.statement(&stmt));
                body.push('\n');
            } else {
                pending = Some(stmt);
            }
            continue;
        }

        let trimmed = line.trim_start();
        if starts_statement(trimmed) {
            if statement_complete(trimmed) {
                let indent = &line[..line.len() - trimmed.len()];
                body.push_str(indent);
                body.push_str(&lowering.statement(trimmed));
            } else {
                pending = Some(trimmed.to_string());
                continue;
            }
        } else if trimmed.starts_with("export ") {
            let indent = &line[..line.len() - trimmed.len()];
            body.push_str(indent);
            body.push_str(&lowering.declaration(trimmed));
        } else {
            body.push_str(&rewrite_dynamic_imports(line));
        }
        body.push('\n');
    }

    // An unterminated statement at EOF is left as written.
    if let Some(stmt) = pending {
        body.push_str(&stmt);
        body.push('\n');
    }

    if !lowering.is_module {
        return body;
    }

    let mut out = String::with_capacity(body.len() + 256);
    out.push_str("Object.defineProperty(exports, \"__esModule\", { value: true });\n");
    // Function declarations are hoisted, so their exports can be bound before
    // the body runs. Cyclic importers see them.
    for stmt in &lowering.hoisted_exports {
        out.push_str(stmt);
        out.push('\n');
    }
    out.push_str(&body);
    for stmt in &lowering.trailing_exports {
        out.push_str(stmt);
        out.push('\n');
    }
    out
}

#[derive(Default)]
struct Lowering {
    is_module: bool,
    temp_counter: usize,
    hoisted_exports: Vec<String>,
    trailing_exports: Vec<String>,
}

impl Lowering {
    fn temp(&mut self, prefix: &str) -> String {
        let name = format!("__{prefix}_{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }

    /// Lower a complete `import …` or `export {…}` / `export * …` statement.
    fn statement(&mut self, stmt: &str) -> String {
        let stmt = collapse_whitespace(stmt);
        let stmt = stmt.trim_end_matches(';').trim();
        self.is_module = true;

        if let Some(rest) = stmt.strip_prefix("import") {
            return self.import(rest.trim());
        }
        if let Some(rest) = stmt.strip_prefix("export") {
            return self.export_list(rest.trim());
        }
        stmt.to_string()
    }

    fn import(&mut self, rest: &str) -> String {
        // Side-effect import.
        if let Some(spec) = unquote(rest) {
            return format!("require({});", js_string(spec));
        }

        let Some((clause, spec)) = split_from(rest) else {
            return format!("/* unsupported import */ import {rest};");
        };

        if let Some(after_type) = clause.strip_prefix("type ") {
            if !after_type.trim().is_empty() {
                return String::new();
            }
        }

        let required = format!("require({})", js_string(spec));
        let (default, rest_clause) = match clause.find(['{', '*']) {
            Some(0) => (None, Some(clause)),
            Some(idx) => (
                Some(clause[..idx].trim().trim_end_matches(',').trim()),
                Some(clause[idx..].trim()),
            ),
            None => (Some(clause.trim()), None),
        };

        let namespace = rest_clause.and_then(|c| c.strip_prefix('*')).map(|c| {
            c.trim()
                .strip_prefix("as ")
                .unwrap_or(c)
                .trim()
                .to_string()
        });
        let named = rest_clause
            .filter(|c| c.starts_with('{'))
            .map(|c| destructure(c.trim_start_matches('{').trim_end_matches('}')));

        match (default, namespace, named) {
            (None, Some(ns), None) => format!("var {ns} = {required};"),
            (None, None, Some(named)) => {
                if named.is_empty() {
                    format!("{required};")
                } else {
                    format!("var {{ {named} }} = {required};")
                }
            }
            (Some(default), None, None) => {
                format!("var {default} = require.interopDefault({required});")
            }
            (default, namespace, named) => {
                let temp = namespace.unwrap_or_else(|| self.temp("imported"));
                let mut out = format!("var {temp} = {required};");
                if let Some(default) = default {
                    out.push_str(&format!(" var {default} = require.interopDefault({temp});"));
                }
                if let Some(named) = named.filter(|n| !n.is_empty()) {
                    out.push_str(&format!(" var {{ {named} }} = {temp};"));
                }
                out
            }
        }
    }

    /// `export {…}`, `export {…} from "…"`, `export * from "…"`.
    fn export_list(&mut self, rest: &str) -> String {
        if rest.starts_with("type ") || rest.starts_with("type{") {
            return String::new();
        }

        if let Some(star) = rest.strip_prefix('*') {
            let star = star.trim();
            if let Some(spec) = star.strip_prefix("from").and_then(unquote) {
                return format!("require.exportStar(exports, require({}));", js_string(spec));
            }
            if let Some((clause, spec)) = split_from(star) {
                if let Some(ns) = clause.strip_prefix("as ") {
                    return format!("exports.{} = require({});", ns.trim(), js_string(spec));
                }
            }
            return format!("/* unsupported export */ export {rest};");
        }

        let (list, source) = match split_from(rest) {
            Some((list, spec)) => (list, Some(spec)),
            None => (rest, None),
        };
        let names = export_names(list.trim().trim_start_matches('{').trim_end_matches('}'));

        match source {
            Some(spec) => {
                let temp = self.temp("reexport");
                let mut out = format!("var {temp} = require({});", js_string(spec));
                for (local, exported) in names {
                    out.push_str(&format!(" exports.{exported} = {temp}.{local};"));
                }
                out
            }
            None => {
                for (local, exported) in names {
                    self.trailing_exports
                        .push(format!("exports.{exported} = {local};"));
                }
                String::new()
            }
        }
    }

    /// `export default …` and `export <declaration>` on a single line prefix.
    fn declaration(&mut self, line: &str) -> String {
        self.is_module = true;
        let decl = line.strip_prefix("export ").unwrap_or(line).trim_start();

        if let Some(value) = decl.strip_prefix("default ") {
            let value = value.trim_start();
            if let Some(name) = declared_function(value) {
                self.hoisted_exports
                    .push(format!("exports.default = {name};"));
                return value.to_string();
            }
            if let Some(name) = declared_class(value) {
                self.trailing_exports
                    .push(format!("exports.default = {name};"));
                return value.to_string();
            }
            return format!("exports.default = {value}");
        }

        if decl.starts_with("interface ")
            || decl.starts_with("type ")
            || decl.starts_with("declare ")
        {
            return decl.to_string();
        }

        if let Some(name) = declared_function(decl) {
            self.hoisted_exports.push(format!("exports.{name} = {name};"));
            return decl.to_string();
        }

        if let Some(name) = declared_class(decl) {
            self.trailing_exports.push(format!("exports.{name} = {name};"));
            return decl.to_string();
        }

        for keyword in ["const enum ", "const ", "let ", "var ", "enum "] {
            if let Some(after) = decl.strip_prefix(keyword) {
                for name in binding_names(after) {
                    self.trailing_exports.push(format!("exports.{name} = {name};"));
                }
                return decl.to_string();
            }
        }

        format!("/* unsupported export */ {line}")
    }
}

/// Whether `line` opens a statement that must be collected whole.
/// Carries template-literal and block-comment state across lines, so a line
/// that begins inside either is passed through untouched.
#[derive(Default)]
struct LineLexer {
    /// Brace depth inside each open `${…}` substitution.
    substitutions: Vec<usize>,
    in_template: bool,
    in_block_comment: bool,
}

impl LineLexer {
    fn in_code(&self) -> bool {
        !self.in_template && !self.in_block_comment
    }

    fn feed(&mut self, line: &str) {
        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let next = chars.get(i + 1).copied();
            if self.in_block_comment {
                if chars[i] == '*' && next == Some('/') {
                    self.in_block_comment = false;
                    i += 1;
                }
                i += 1;
                continue;
            }
            if self.in_template {
                match chars[i] {
                    '\\' => i += 1,
                    '`' => self.in_template = false,
                    '$' if next == Some('{') => {
                        self.in_template = false;
                        self.substitutions.push(0);
                        i += 1;
                    }
                    _ => {}
                }
                i += 1;
                continue;
            }
            match chars[i] {
                '/' if next == Some('/') => return,
                '/' if next == Some('*') => {
                    self.in_block_comment = true;
                    i += 1;
                }
                quote @ ('"' | '\'') => {
                    i += 1;
                    while i < chars.len() && chars[i] != quote {
                        if chars[i] == '\\' {
                            i += 1;
                        }
                        i += 1;
                    }
                }
                '`' => self.in_template = true,
                '{' => {
                    if let Some(depth) = self.substitutions.last_mut() {
                        *depth += 1;
                    }
                }
                '}' => match self.substitutions.last().copied() {
                    Some(0) => {
                        self.substitutions.pop();
                        self.in_template = true;
                    }
                    Some(depth) => {
                        if let Some(top) = self.substitutions.last_mut() {
                            *top = depth - 1;
                        }
                    }
                    None => {}
                },
                _ => {}
            }
            i += 1;
        }
    }
}

fn starts_statement(line: &str) -> bool {
    // `import(` and `import.meta` are expressions.
    let is_import = line.strip_prefix("import").is_some_and(|rest| {
        let next = rest.trim_start();
        rest.starts_with(|c: char| c.is_whitespace() || matches!(c, '{' | '"' | '\'' | '*'))
            && !next.is_empty()
            && !next.starts_with('(')
            && !next.starts_with('.')
    });
    let is_export_list = line.starts_with("export {")
        || line.starts_with("export{")
        || line.starts_with("export *")
        || line.starts_with("export type {");
    is_import || is_export_list
}

/// Braces balanced and, when a `from` clause or bare import is expected, its
/// specifier is present.
fn statement_complete(stmt: &str) -> bool {
    let opens = stmt.matches('{').count();
    let closes = stmt.matches('}').count();
    if opens > closes {
        return false;
    }

    let tail = stmt.rfind('}').map_or(stmt, |i| &stmt[i + 1..]);
    let has_quote = tail.contains('"') || tail.contains('\'');
    if stmt.starts_with("import") {
        return has_quote;
    }
    // `export { a }` without a source is complete once braces close.
    if tail.contains("from") || stmt.starts_with("export *") {
        return has_quote;
    }
    true
}

/// `clause from "spec"` → `(clause, spec)`.
fn split_from(rest: &str) -> Option<(&str, &str)> {
    let idx = rest.rfind(" from")?;
    let spec = unquote(rest[idx + 5..].trim())?;
    Some((rest[..idx].trim(), spec))
}

fn unquote(s: &str) -> Option<&str> {
    let s = s.trim().trim_end_matches(';').trim();
    let first = s.chars().next()?;
    if (first == '"' || first == '\'') && s.len() >= 2 && s.ends_with(first) {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

/// `a, b as c, type T` → `a, b: c`.
fn destructure(list: &str) -> String {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty() && !item.starts_with("type "))
        .map(|item| match item.split_once(" as ") {
            Some((imported, local)) => format!("{}: {}", imported.trim(), local.trim()),
            None => item.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `a, b as c` → `[(a, a), (b, c)]` as `(local, exported)`.
fn export_names(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty() && !item.starts_with("type "))
        .map(|item| match item.split_once(" as ") {
            Some((local, exported)) => (local.trim().to_string(), exported.trim().to_string()),
            None => (item.to_string(), item.to_string()),
        })
        .collect()
}

/// Name of a `function`/`async function`/`function*` declaration.
fn declared_function(decl: &str) -> Option<&str> {
    let rest = decl.strip_prefix("async ").unwrap_or(decl);
    let rest = rest.strip_prefix("function")?;
    let rest = rest.trim_start().trim_start_matches('*').trim_start();
    let name = identifier_prefix(rest);
    (!name.is_empty()).then_some(name)
}

fn declared_class(decl: &str) -> Option<&str> {
    let rest = decl
        .strip_prefix("abstract ")
        .unwrap_or(decl)
        .strip_prefix("class ")?;
    let name = identifier_prefix(rest.trim_start());
    (!name.is_empty() && name != "extends").then_some(name)
}

/// Names bound by `const`/`let`/`var`/`enum` (single binding or a flat
/// `{ a, b }` / `[a, b]` pattern).
fn binding_names(after_keyword: &str) -> Vec<String> {
    let rest = after_keyword.trim_start();
    if let Some(pattern) = rest.strip_prefix(['{', '[']) {
        let end = pattern.find(['}', ']']).unwrap_or(pattern.len());
        return pattern[..end]
            .split(',')
            .filter_map(|item| {
                let item = item.trim();
                let local = item.split_once(':').map_or(item, |(_, l)| l.trim());
                let local = local.split('=').next().unwrap_or(local).trim();
                (!local.is_empty()).then(|| local.to_string())
            })
            .collect();
    }
    let name = identifier_prefix(rest);
    if name.is_empty() {
        Vec::new()
    } else {
        vec![name.to_string()]
    }
}

fn identifier_prefix(s: &str) -> &str {
    let end = s
        .char_indices()
        .find(|(_, c)| !is_ident_char(*c))
        .map_or(s.len(), |(i, _)| i);
    &s[..end]
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rewrite `import(` calls to `require.dynamic(`.
fn rewrite_dynamic_imports(line: &str) -> String {
    if !line.contains("import") {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len() + 16);
    let mut rest = line;
    while let Some(idx) = rest.find("import") {
        let before = &rest[..idx];
        let after = &rest[idx + 6..];
        let boundary = before
            .chars()
            .next_back()
            .map_or(true, |c| !is_ident_char(c) && c != '.');
        out.push_str(before);
        if boundary && after.trim_start().starts_with('(') {
            out.push_str("require.dynamic");
        } else {
            out.push_str("import");
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

/// Encode a string as a JavaScript string literal.
#[must_use]
pub fn js_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_script_untouched() {
        let source = "var x = require('./a');\nmodule.exports = x;\n";
        assert_eq!(lower_module(source), source);
    }

    #[test]
    fn test_import_forms() {
        let out = lower_module(
            r#"import Vue from "vue";
import { a, b as c } from './dep';
import * as utils from "./utils";
import "./polyfill";
import def, { named } from "./mixed";
"#,
        );
        assert!(out.starts_with("Object.defineProperty(exports, \"__esModule\""));
        assert!(out.contains(r#"var Vue = require.interopDefault(require("vue"));"#));
        assert!(out.contains(r#"var { a, b: c } = require("./dep");"#));
        assert!(out.contains(r#"var utils = require("./utils");"#));
        assert!(out.contains(r#"require("./polyfill");"#));
        assert!(out.contains(r#"var __imported_0 = require("./mixed"); var def = require.interopDefault(__imported_0); var { named } = __imported_0;"#));
    }

    #[test]
    fn test_multiline_import() {
        let out = lower_module("import {\n  one,\n  two,\n} from './many';\nconsole.log(one);\n");
        assert!(out.contains(r#"var { one, two } = require("./many");"#));
        assert!(out.contains("console.log(one);"));
    }

    #[test]
    fn test_type_only_imports_dropped() {
        let out = lower_module("import type { Props } from './types';\nimport { type T, v } from './v';\n");
        assert!(!out.contains("./types"));
        assert!(out.contains(r#"var { v } = require("./v");"#));
    }

    #[test]
    fn test_export_declarations() {
        let out = lower_module(
            "export const answer = 42;\nexport function greet() {}\nexport class Widget {}\nexport default {\n  name: 'app',\n};\n",
        );
        assert!(out.contains("const answer = 42;"));
        assert!(out.contains("exports.answer = answer;"));
        assert!(out.contains("exports.greet = greet;"));
        assert!(out.contains("exports.Widget = Widget;"));
        assert!(out.contains("exports.default = {"));
        // Function exports are bound before the body.
        let greet_binding = out.find("exports.greet = greet;").unwrap();
        let greet_decl = out.find("function greet()").unwrap();
        assert!(greet_binding < greet_decl);
    }

    #[test]
    fn test_export_default_named_function() {
        let out = lower_module("export default function App() {\n  return 1;\n}\n");
        assert!(out.contains("function App() {"));
        assert!(out.contains("exports.default = App;"));
    }

    #[test]
    fn test_export_lists_and_reexports() {
        let out = lower_module(
            "const a = 1, b = 2;\nexport { a, b as bee };\nexport { x as y } from './x';\nexport * from './star';\nexport * as ns from './ns';\n",
        );
        assert!(out.contains("exports.a = a;"));
        assert!(out.contains("exports.bee = b;"));
        assert!(out.contains(r#"var __reexport_0 = require("./x"); exports.y = __reexport_0.x;"#));
        assert!(out.contains(r#"require.exportStar(exports, require("./star"));"#));
        assert!(out.contains(r#"exports.ns = require("./ns");"#));
    }

    #[test]
    fn test_dynamic_import_rewrite() {
        let out = lower_module("const page = () => import('./page');\nfoo.import('./not');\n");
        assert!(out.contains("() => require.dynamic('./page')"));
        assert!(out.contains("foo.import('./not')"));
    }

    #[test]
    fn test_destructured_export() {
        let out = lower_module("export const { a, b: renamed } = obj;\n");
        assert!(out.contains("exports.a = a;"));
        assert!(out.contains("exports.renamed = renamed;"));
    }

    #[test]
    fn test_template_literal_text_untouched() {
        let src = "export const help = `\nimport x from \"./not-real\";\nexport default 1;\n`;\nexport const n = 1;\n";
        let out = lower_module(src);
        assert!(out.contains("\nimport x from \"./not-real\";\nexport default 1;\n`;"));
        assert!(!out.contains("require(\"./not-real\")"));
        assert!(out.contains("exports.n"));
    }

    #[test]
    fn test_template_substitution_resumes_text() {
        let src = "const s = `a ${ {b: 1}.b } c\nimport y from './y';\n`;\nimport z from './z';\n";
        let out = lower_module(src);
        assert!(out.contains("import y from './y';"));
        assert!(out.contains("require(\"./z\")"));
    }

    #[test]
    fn test_js_string_escapes() {
        assert_eq!(js_string("a\"b\\c\n"), r#""a\"b\\c\n""#);
    }
}
