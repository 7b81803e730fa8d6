//! Transform rule table.
//!
//! Rules are evaluated top to bottom against a module key. Every applying
//! rule contributes its loaders, in rule order; the concatenated chain runs
//! last-to-first.

use super::graph::ModuleKey;
use crate::error::ConfigError;
use regex_lite::Regex;
use serde_json::Value;

/// Options key that makes a loader treat matching composite files as TypeScript.
const APPEND_SUFFIX_OPTIONS: &[(&str, &str)] =
    &[("appendTsSuffixTo", ".ts"), ("appendTsxSuffixTo", ".tsx")];

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compile a pattern. `/body/flags` literals are accepted; only the `i`
    /// flag changes matching.
    pub fn new(field: &str, source: &str) -> Result<Self, ConfigError> {
        let body = strip_regex_literal(source);
        let regex = Regex::new(&body).map_err(|e| ConfigError::InvalidPattern {
            field: field.to_string(),
            pattern: source.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// Test a path (or path-like candidate string).
    #[must_use]
    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn strip_regex_literal(source: &str) -> String {
    if let Some(rest) = source.strip_prefix('/') {
        if let Some(end) = rest.rfind('/') {
            let (body, flags) = (&rest[..end], &rest[end + 1..]);
            if !body.is_empty() && flags.chars().all(|c| "gimsuy".contains(c)) {
                return if flags.contains('i') {
                    format!("(?i){body}")
                } else {
                    body.to_string()
                };
            }
        }
    }
    source.to_string()
}

/// One loader in a chain, with its options.
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderUse {
    pub loader: String,
    pub options: Value,
}

impl LoaderUse {
    pub fn new(loader: impl Into<String>, options: Value) -> Self {
        Self {
            loader: loader.into(),
            options,
        }
    }
}

/// Physical paths matching `targets` are also tested as `path + suffix`.
#[derive(Debug, Clone)]
struct SuffixAppend {
    targets: Vec<Pattern>,
    suffix: &'static str,
}

/// A transform rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub test: Pattern,
    pub exclude: Option<Pattern>,
    pub uses: Vec<LoaderUse>,
    suffix_append: Vec<SuffixAppend>,
}

impl Rule {
    /// Build a rule, deriving suffix-append carve-outs from loader options.
    pub fn new(
        index: usize,
        test: Pattern,
        exclude: Option<Pattern>,
        uses: Vec<LoaderUse>,
    ) -> Result<Self, ConfigError> {
        let mut suffix_append = Vec::new();
        for use_ in &uses {
            for (key, suffix) in APPEND_SUFFIX_OPTIONS {
                let Some(value) = use_.options.get(*key) else {
                    continue;
                };
                let field = format!("rules[{index}].options.{key}");
                let sources: Vec<&str> = match value {
                    Value::String(s) => vec![s.as_str()],
                    Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
                    _ => {
                        return Err(ConfigError::InvalidPattern {
                            field,
                            pattern: value.to_string(),
                            message: "expected a pattern or a list of patterns".to_string(),
                        })
                    }
                };
                let targets = sources
                    .into_iter()
                    .map(|s| Pattern::new(&field, s))
                    .collect::<Result<Vec<_>, _>>()?;
                suffix_append.push(SuffixAppend { targets, suffix });
            }
        }

        Ok(Self {
            test,
            exclude,
            uses,
            suffix_append,
        })
    }

    fn applies(&self, physical: &str, part: Option<&VirtualPart>) -> bool {
        if self.exclude.as_ref().is_some_and(|e| e.is_match(physical)) {
            return false;
        }
        match part {
            None => self.test.is_match(physical),
            Some(part) => {
                if let Some(lang) = &part.lang {
                    if self.test.is_match(&format!("{physical}.{lang}")) {
                        return true;
                    }
                }
                part.is_script()
                    && self.suffix_append.iter().any(|sa| {
                        sa.targets.iter().any(|t| t.is_match(physical))
                            && self.test.is_match(&format!("{physical}{}", sa.suffix))
                    })
            }
        }
    }
}

/// A virtual sub-request scheme registered by a plugin.
#[derive(Debug, Clone)]
pub struct VirtualModuleRule {
    /// Bare query flag that marks the sub-request (e.g. `vue`).
    pub marker: String,
    /// Loader that extracts the requested part from the composite file.
    pub selector: String,
    /// Language assumed for a part without a `lang` parameter.
    pub default_langs: Vec<(String, String)>,
}

/// Registered virtual sub-request schemes.
#[derive(Debug, Clone, Default)]
pub struct VirtualModules {
    rules: Vec<VirtualModuleRule>,
}

impl VirtualModules {
    pub fn register(&mut self, rule: VirtualModuleRule) {
        self.rules.push(rule);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Match a key's query against the registered schemes.
    #[must_use]
    pub fn part_of(&self, key: &ModuleKey) -> Option<VirtualPart> {
        let query = key.query.as_deref()?;
        let rule = self
            .rules
            .iter()
            .find(|r| query.split('&').any(|p| p == r.marker))?;
        let part = key.query_param("type").unwrap_or_default().to_string();
        let lang = key.query_param("lang").map(str::to_string).or_else(|| {
            rule.default_langs
                .iter()
                .find(|(p, _)| *p == part)
                .map(|(_, lang)| lang.clone())
        });
        let index = key.query_param("index").and_then(|i| i.parse().ok());

        Some(VirtualPart {
            selector: rule.selector.clone(),
            part,
            lang,
            index,
        })
    }
}

/// The logical part of a composite file a virtual key refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualPart {
    pub selector: String,
    /// `type` query parameter (`script`, `template`, `style`, ...).
    pub part: String,
    pub lang: Option<String>,
    pub index: Option<usize>,
}

impl VirtualPart {
    #[must_use]
    pub fn is_script(&self) -> bool {
        self.part == "script"
    }
}

/// What to do with a module.
#[derive(Debug, Clone, PartialEq)]
pub enum Chain {
    /// Run these loaders, last to first.
    Loaders(Vec<LoaderUse>),
    /// No rule applied to a `.js`/`.mjs`/`.cjs` file.
    NativeScript,
    /// No rule applied to a `.json` file.
    NativeJson,
    /// No rule applied: copy the file untransformed.
    RawAsset,
}

/// The ordered rule table plus registered virtual schemes.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    virtual_modules: VirtualModules,
}

impl RuleSet {
    #[must_use]
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            virtual_modules: VirtualModules::default(),
        }
    }

    pub fn set_virtual_modules(&mut self, virtual_modules: VirtualModules) {
        self.virtual_modules = virtual_modules;
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Virtual part of `key`, if its query matches a registered scheme.
    #[must_use]
    pub fn virtual_part(&self, key: &ModuleKey) -> Option<VirtualPart> {
        self.virtual_modules.part_of(key)
    }

    /// Select the chain for a module key.
    #[must_use]
    pub fn select(&self, key: &ModuleKey) -> Chain {
        let physical = key.path_string();
        let part = self.virtual_part(key);

        let mut uses: Vec<LoaderUse> = self
            .rules
            .iter()
            .filter(|rule| rule.applies(&physical, part.as_ref()))
            .flat_map(|rule| rule.uses.iter().cloned())
            .collect();

        if let Some(part) = part {
            // Parts no rule claims get the built-ins a physical file would.
            if uses.is_empty() {
                if part.is_script() {
                    uses.push(LoaderUse::new("js", Value::Null));
                } else if part.lang.as_deref() == Some("json") {
                    uses.push(LoaderUse::new("json", Value::Null));
                }
            }
            // The selector runs first: it extracts the part from the raw file.
            let options = self
                .rules
                .iter()
                .flat_map(|r| &r.uses)
                .find(|u| u.loader == part.selector)
                .map_or(Value::Null, |u| u.options.clone());
            uses.push(LoaderUse::new(part.selector, options));
            return Chain::Loaders(uses);
        }

        if !uses.is_empty() {
            return Chain::Loaders(uses);
        }

        match key.path.extension().and_then(|e| e.to_str()) {
            Some("js" | "mjs" | "cjs") => Chain::NativeScript,
            Some("json") => Chain::NativeJson,
            _ => Chain::RawAsset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn pattern(s: &str) -> Pattern {
        Pattern::new("test", s).unwrap()
    }

    fn rule(test: &str, exclude: Option<&str>, loaders: &[&str], options: Value) -> Rule {
        Rule::new(
            0,
            pattern(test),
            exclude.map(pattern),
            loaders
                .iter()
                .map(|l| LoaderUse::new(*l, options.clone()))
                .collect(),
        )
        .unwrap()
    }

    fn key(path: &str, query: Option<&str>) -> ModuleKey {
        ModuleKey::new(PathBuf::from(path), query.map(str::to_string))
    }

    fn loader_ids(chain: &Chain) -> Vec<&str> {
        match chain {
            Chain::Loaders(uses) => uses.iter().map(|u| u.loader.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    fn reference_rules() -> RuleSet {
        let mut set = RuleSet::new(vec![
            rule(r"\.vue$", None, &["vue-loader"], Value::Null),
            rule(
                r"\.[jt]sx?$",
                Some("node_modules"),
                &["ts-loader"],
                json!({ "appendTsSuffixTo": [r"\.vue$"] }),
            ),
            rule(r"\.css$", None, &["style-loader", "css-loader"], Value::Null),
        ]);
        let mut vm = VirtualModules::default();
        vm.register(VirtualModuleRule {
            marker: "vue".to_string(),
            selector: "vue-loader".to_string(),
            default_langs: vec![
                ("script".to_string(), "js".to_string()),
                ("style".to_string(), "css".to_string()),
            ],
        });
        set.set_virtual_modules(vm);
        set
    }

    #[test]
    fn test_pattern_regex_literal() {
        let p = pattern(r"/\.PNG$/i");
        assert!(p.is_match("/a/logo.png"));
        assert!(!pattern(r"\.png$").is_match("/a/logo.PNG"));
    }

    #[test]
    fn test_exclude_wins_over_test() {
        let rules = reference_rules();
        assert_eq!(
            rules.select(&key("/app/node_modules/lib/index.js", None)),
            Chain::NativeScript
        );
        assert_eq!(
            loader_ids(&rules.select(&key("/app/src/main.ts", None))),
            vec!["ts-loader"]
        );
    }

    #[test]
    fn test_concatenated_chain_order() {
        let rules = reference_rules();
        assert_eq!(
            loader_ids(&rules.select(&key("/app/src/site.css", None))),
            vec!["style-loader", "css-loader"]
        );
    }

    #[test]
    fn test_composite_file_gets_selector_only() {
        let rules = reference_rules();
        assert_eq!(
            loader_ids(&rules.select(&key("/app/src/App.vue", None))),
            vec!["vue-loader"]
        );
    }

    #[test]
    fn test_virtual_script_part_via_lang() {
        let rules = reference_rules();
        let chain = rules.select(&key("/app/src/App.vue", Some("vue&type=script&lang=ts")));
        assert_eq!(loader_ids(&chain), vec!["ts-loader", "vue-loader"]);
    }

    #[test]
    fn test_virtual_style_part_uses_css_rule() {
        let rules = reference_rules();
        let chain = rules.select(&key("/app/src/App.vue", Some("vue&type=style&index=0")));
        assert_eq!(
            loader_ids(&chain),
            vec!["style-loader", "css-loader", "vue-loader"]
        );
    }

    #[test]
    fn test_template_part_has_no_lang_rule() {
        let rules = reference_rules();
        let chain = rules.select(&key("/app/src/App.vue", Some("vue&type=template")));
        assert_eq!(loader_ids(&chain), vec!["vue-loader"]);
    }

    #[test]
    fn test_suffix_append_applies_to_script_parts() {
        // A rule that only matches `.ts` still picks up plain `<script>` blocks
        // through the carve-out.
        let mut rules = RuleSet::new(vec![
            rule(r"\.vue$", None, &["vue-loader"], Value::Null),
            rule(
                r"\.ts$",
                None,
                &["ts-loader"],
                json!({ "appendTsSuffixTo": r"\.vue$" }),
            ),
        ]);
        let mut vm = VirtualModules::default();
        vm.register(VirtualModuleRule {
            marker: "vue".to_string(),
            selector: "vue-loader".to_string(),
            default_langs: vec![("script".to_string(), "js".to_string())],
        });
        rules.set_virtual_modules(vm);

        let script = rules.select(&key("/app/src/App.vue", Some("vue&type=script")));
        assert_eq!(loader_ids(&script), vec!["ts-loader", "vue-loader"]);

        let template = rules.select(&key("/app/src/App.vue", Some("vue&type=template")));
        assert_eq!(loader_ids(&template), vec!["vue-loader"]);
    }

    #[test]
    fn test_unclaimed_parts_get_builtin_loaders() {
        let mut rules = RuleSet::new(vec![rule(r"\.vue$", None, &["vue-loader"], Value::Null)]);
        let mut vm = VirtualModules::default();
        vm.register(VirtualModuleRule {
            marker: "vue".to_string(),
            selector: "vue-loader".to_string(),
            default_langs: vec![("script".to_string(), "js".to_string())],
        });
        rules.set_virtual_modules(vm);

        let script = rules.select(&key("/app/src/App.vue", Some("vue&type=script")));
        assert_eq!(loader_ids(&script), vec!["js", "vue-loader"]);

        let data = rules.select(&key("/app/src/App.vue", Some("vue&type=i18n&lang=json")));
        assert_eq!(loader_ids(&data), vec!["json", "vue-loader"]);

        let template = rules.select(&key("/app/src/App.vue", Some("vue&type=template")));
        assert_eq!(loader_ids(&template), vec!["vue-loader"]);
    }

    #[test]
    fn test_zero_rules_fallbacks() {
        let rules = RuleSet::default();
        assert_eq!(rules.select(&key("/a/b.mjs", None)), Chain::NativeScript);
        assert_eq!(rules.select(&key("/a/b.json", None)), Chain::NativeJson);
        assert_eq!(rules.select(&key("/a/logo.png", None)), Chain::RawAsset);
    }

    #[test]
    fn test_invalid_append_suffix_option() {
        let err = Rule::new(
            3,
            pattern(r"\.ts$"),
            None,
            vec![LoaderUse::new("ts-loader", json!({ "appendTsSuffixTo": 5 }))],
        )
        .unwrap_err();
        assert!(err.to_string().contains("rules[3].options.appendTsSuffixTo"));
    }
}
