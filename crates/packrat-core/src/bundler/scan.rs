//! Import specifier scanner.
//!
//! Finds `import`, `export … from`, `require()` and `import()` specifiers
//! without a full parse. Comments, quoted strings and template-literal text
//! are skipped; `${…}` substitutions are scanned as code.

use super::loader::{ImportKind, ImportRequest};
use rustc_hash::FxHashSet as HashSet;

/// Scan source for import specifiers.
///
/// Returns requests in first-appearance order, deduplicated by
/// `(specifier, kind)`.
#[must_use]
pub fn scan_imports(source: &str) -> Vec<ImportRequest> {
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut results = Vec::new();
    let mut seen = HashSet::default();
    let mut push = |spec: String, kind: ImportKind| {
        if !spec.is_empty() && seen.insert((spec.clone(), kind)) {
            results.push(ImportRequest::new(spec, kind));
        }
    };
    // Brace depth inside each open `${…}` substitution.
    let mut substitutions: Vec<usize> = Vec::new();
    let mut i = 0;

    while i < len {
        if i + 1 < len && chars[i] == '/' && chars[i + 1] == '/' {
            while i < len && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if i + 1 < len && chars[i] == '/' && chars[i + 1] == '*' {
            i += 2;
            while i + 1 < len && !(chars[i] == '*' && chars[i + 1] == '/') {
                i += 1;
            }
            i += 2;
            continue;
        }

        if chars[i] == '"' || chars[i] == '\'' {
            i = skip_string(&chars, i);
            continue;
        }

        if chars[i] == '`' {
            let (end, opened) = skip_template_text(&chars, i + 1);
            if opened {
                substitutions.push(0);
            }
            i = end;
            continue;
        }

        if let Some(depth) = substitutions.last().copied() {
            if chars[i] == '{' {
                if let Some(top) = substitutions.last_mut() {
                    *top = depth + 1;
                }
            } else if chars[i] == '}' {
                if depth == 0 {
                    substitutions.pop();
                    let (end, opened) = skip_template_text(&chars, i + 1);
                    if opened {
                        substitutions.push(0);
                    }
                    i = end;
                    continue;
                }
                if let Some(top) = substitutions.last_mut() {
                    *top = depth - 1;
                }
            }
        }

        if matches_keyword(&chars, i, "import") {
            if let Some((spec, kind, end)) = scan_import_statement(&chars, i + 6) {
                push(spec, kind);
                i = end;
                continue;
            }
            i += 1;
            continue;
        }

        if matches_keyword(&chars, i, "export") {
            if let Some((spec, end)) = scan_export_from(&chars, i + 6) {
                push(spec, ImportKind::Static);
                i = end;
                continue;
            }
            i += 1;
            continue;
        }

        if matches_keyword(&chars, i, "require") {
            let mut j = i + 7;
            let mut kind = ImportKind::Static;
            // `require.dynamic("…")` is the lowered form of `import("…")`.
            if chars[j..].starts_with(&['.', 'd', 'y', 'n', 'a', 'm', 'i', 'c']) {
                j += 8;
                kind = ImportKind::Dynamic;
            }
            if let Some((spec, end)) = scan_call_argument(&chars, j) {
                push(spec, kind);
                i = end;
                continue;
            }
            i += 1;
            continue;
        }

        i += 1;
    }

    results
}

/// Skip a single- or double-quoted string starting at `start`.
fn skip_string(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() && chars[i] != quote && chars[i] != '\n' {
        if chars[i] == '\\' {
            i += 1;
        }
        i += 1;
    }
    i + 1
}

/// Skip template-literal text starting at `start`. Returns the index after
/// the closing backtick, or after `${` with `true` when a substitution opens.
fn skip_template_text(chars: &[char], start: usize) -> (usize, bool) {
    let mut i = start;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '`' => return (i + 1, false),
            '$' if chars.get(i + 1) == Some(&'{') => return (i + 2, true),
            _ => i += 1,
        }
    }
    (chars.len(), false)
}

/// Check if chars at position match a keyword (with word boundary).
fn matches_keyword(chars: &[char], pos: usize, keyword: &str) -> bool {
    let kw: Vec<char> = keyword.chars().collect();
    let len = kw.len();

    if pos + len > chars.len() {
        return false;
    }

    // A preceding `.` means a property access such as `foo.import`.
    if pos > 0 && (chars[pos - 1].is_alphanumeric() || matches!(chars[pos - 1], '_' | '$' | '.')) {
        return false;
    }

    if chars[pos..pos + len] != kw[..] {
        return false;
    }

    if pos + len < chars.len() && (chars[pos + len].is_alphanumeric() || matches!(chars[pos + len], '_' | '$')) {
        return false;
    }

    true
}

fn skip_whitespace(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

/// Read a quoted specifier at `i`. Returns the specifier and the index after
/// the closing quote.
fn read_quoted(chars: &[char], mut i: usize) -> Option<(String, usize)> {
    let len = chars.len();
    if i >= len || !matches!(chars[i], '"' | '\'' | '`') {
        return None;
    }
    let quote = chars[i];
    i += 1;
    let spec_start = i;
    while i < len && chars[i] != quote {
        if chars[i] == '\\' && i + 1 < len {
            i += 2;
            continue;
        }
        if chars[i] == '\n' || (quote == '`' && chars[i] == '$') {
            return None;
        }
        i += 1;
    }
    if i >= len {
        return None;
    }
    Some((chars[spec_start..i].iter().collect(), i + 1))
}

/// Scan after `import`: a dynamic `import("…")`, `import … from "…"` or a
/// bare `import "…"`.
fn scan_import_statement(chars: &[char], start: usize) -> Option<(String, ImportKind, usize)> {
    let len = chars.len();
    let mut i = skip_whitespace(chars, start);

    if i < len && chars[i] == '(' {
        return scan_call_argument(chars, i).map(|(spec, end)| (spec, ImportKind::Dynamic, end));
    }

    // `import.meta`
    if i < len && chars[i] == '.' {
        return None;
    }

    // `import type { X } from "…"` has no runtime edge.
    if matches_keyword(chars, i, "type") {
        let after = skip_whitespace(chars, i + 4);
        if after < len
            && (chars[after] == '{' || chars[after].is_alphabetic())
            && !matches_keyword(chars, after, "from")
        {
            return None;
        }
    }

    let limit = (start + 2000).min(len);
    while i < limit {
        if matches_keyword(chars, i, "from") {
            let at = skip_whitespace(chars, i + 4);
            if let Some((spec, end)) = read_quoted(chars, at) {
                return Some((spec, ImportKind::Static, end));
            }
        }

        if matches!(chars[i], '"' | '\'') {
            return read_quoted(chars, i).map(|(spec, end)| (spec, ImportKind::Static, end));
        }

        if chars[i] == ';' {
            break;
        }

        i += 1;
    }

    None
}

/// Scan after `export` for `… from "…"`.
fn scan_export_from(chars: &[char], start: usize) -> Option<(String, usize)> {
    let len = chars.len();
    let mut i = skip_whitespace(chars, start);

    // Only `export {…} from` and `export * from` forms carry a specifier.
    if i >= len || !matches!(chars[i], '{' | '*') {
        return None;
    }

    let limit = (start + 2000).min(len);
    while i < limit {
        if matches_keyword(chars, i, "from") {
            let at = skip_whitespace(chars, i + 4);
            return read_quoted(chars, at);
        }
        if chars[i] == ';' {
            break;
        }
        i += 1;
    }

    None
}

/// Scan `( "spec" )` starting at `start`.
fn scan_call_argument(chars: &[char], start: usize) -> Option<(String, usize)> {
    let len = chars.len();
    let mut i = skip_whitespace(chars, start);
    if i >= len || chars[i] != '(' {
        return None;
    }
    i = skip_whitespace(chars, i + 1);

    let (spec, mut i) = read_quoted(chars, i)?;
    i = skip_whitespace(chars, i);
    // A computed argument such as `require("./x" + name)` has no static edge.
    if i < len && chars[i] != ')' {
        return None;
    }
    Some((spec, i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(source: &str) -> Vec<(String, ImportKind)> {
        scan_imports(source)
            .into_iter()
            .map(|r| (r.specifier, r.kind))
            .collect()
    }

    #[test]
    fn test_esm_forms() {
        let source = r#"
import foo from "lodash";
import { a, b } from './dep';
import * as utils from "./utils";
import "./polyfill";
export { x } from "./reexport";
export * from "./star";
"#;
        let found: Vec<String> = specs(source).into_iter().map(|(s, _)| s).collect();
        assert_eq!(
            found,
            vec!["lodash", "./dep", "./utils", "./polyfill", "./reexport", "./star"]
        );
    }

    #[test]
    fn test_multiline_import() {
        let source = "import {\n  a,\n  b,\n} from \"./multi\";";
        assert_eq!(specs(source), vec![("./multi".to_string(), ImportKind::Static)]);
    }

    #[test]
    fn test_dynamic_import_and_lowered_form() {
        let source = r#"
const a = import("./lazy");
const b = require.dynamic("./other");
"#;
        assert_eq!(
            specs(source),
            vec![
                ("./lazy".to_string(), ImportKind::Dynamic),
                ("./other".to_string(), ImportKind::Dynamic),
            ]
        );
    }

    #[test]
    fn test_cjs_require() {
        let source = r#"const dep = require("./dep"); const x = require.interopDefault(dep);"#;
        assert_eq!(specs(source), vec![("./dep".to_string(), ImportKind::Static)]);
    }

    #[test]
    fn test_ignores_comments_and_strings() {
        let source = r#"
// import foo from "commented"
/* require("./also-commented") */
const url = "http://example.com"; const real = require("./real");
const text = 'require("./in-string")';
"#;
        assert_eq!(specs(source), vec![("./real".to_string(), ImportKind::Static)]);
    }

    #[test]
    fn test_type_only_import_has_no_edge() {
        let source = r#"
import type { Props } from "./types";
import { type Other, value } from "./values";
"#;
        assert_eq!(specs(source), vec![("./values".to_string(), ImportKind::Static)]);
    }

    #[test]
    fn test_default_import_named_type() {
        assert_eq!(
            specs(r#"import type from "./type";"#),
            vec![("./type".to_string(), ImportKind::Static)]
        );
        assert!(specs(r#"if (import.meta.env) log("str");"#).is_empty());
    }

    #[test]
    fn test_computed_require_is_skipped() {
        assert!(specs(r#"const x = require("./locale/" + lang);"#).is_empty());
        assert!(specs("const x = import(`./pages/${name}`);").is_empty());
    }

    #[test]
    fn test_deduplicates_by_specifier_and_kind() {
        let source = r#"
import a from "./dep";
import b from "./dep";
const c = import("./dep");
"#;
        assert_eq!(
            specs(source),
            vec![
                ("./dep".to_string(), ImportKind::Static),
                ("./dep".to_string(), ImportKind::Dynamic),
            ]
        );
    }

    #[test]
    fn test_template_literal_text_is_skipped() {
        let src = "export const help = `\nimport x from \"./not-real\";\nrequire('./also-not');\n`;\nimport './real';\n";
        assert_eq!(specs(src), vec![("./real".to_string(), ImportKind::Static)]);
    }

    #[test]
    fn test_template_substitution_is_code() {
        let src = "const url = `${require('./base')}/a ${ {k: 1}.k } import './no'`;\nimport('./page');\n";
        assert_eq!(
            specs(src),
            vec![
                ("./base".to_string(), ImportKind::Static),
                ("./page".to_string(), ImportKind::Dynamic),
            ]
        );
    }

    #[test]
    fn test_property_named_import_is_ignored() {
        assert!(specs(r#"loader.import("./nope");"#).is_empty());
    }
}
