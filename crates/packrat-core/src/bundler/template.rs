//! Output filename templates.
//!
//! Placeholders: `[name]`, `[ext]`, `[contenthash]`, `[contenthash:N]`, and
//! `[hash]` / `[hash:N]` (same as `[contenthash]`). A `?` splits the rendered
//! name into a file name and a URL query.

use packrat_util::hash::truncate_hex;

/// Default digest length for `[contenthash]`.
pub const DEFAULT_HASH_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Name,
    Ext,
    ContentHash(usize),
}

/// A parsed filename template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameTemplate {
    source: String,
    segments: Vec<Segment>,
}

/// Values substituted into a template.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateData<'a> {
    pub name: &'a str,
    pub ext: &'a str,
    pub content_hash: &'a str,
}

/// A rendered template split at the first `?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedName {
    /// Output-relative file name.
    pub file: String,
    /// URL query (without the `?`), if the template had one.
    pub query: Option<String>,
}

impl RenderedName {
    /// File name plus query, as used in URLs.
    #[must_use]
    pub fn url(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{q}", self.file),
            None => self.file.clone(),
        }
    }
}

impl FilenameTemplate {
    /// Parse a template, rejecting unknown placeholders.
    pub fn parse(source: &str) -> Result<Self, String> {
        if source.is_empty() {
            return Err("template is empty".to_string());
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(open) = rest.find('[') {
            literal.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find(']') else {
                return Err("unterminated '['".to_string());
            };
            let placeholder = &after[..close];
            let segment = parse_placeholder(placeholder)?;
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(segment);
            rest = &after[close + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The template as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the rendered name depends on content.
    #[must_use]
    pub fn uses_content_hash(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::ContentHash(_)))
    }

    /// Whether the rendered name depends on `[name]`.
    #[must_use]
    pub fn uses_name(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Name))
    }

    /// Expand the template.
    #[must_use]
    pub fn render(&self, data: &TemplateData<'_>) -> RenderedName {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Name => out.push_str(data.name),
                Segment::Ext => out.push_str(data.ext),
                Segment::ContentHash(len) => out.push_str(truncate_hex(data.content_hash, *len)),
            }
        }

        match out.split_once('?') {
            Some((file, query)) => RenderedName {
                file: file.to_string(),
                query: Some(query.to_string()),
            },
            None => RenderedName {
                file: out,
                query: None,
            },
        }
    }
}

fn parse_placeholder(placeholder: &str) -> Result<Segment, String> {
    let (key, len) = match placeholder.split_once(':') {
        Some((key, len)) => {
            let len: usize = len
                .parse()
                .map_err(|_| format!("invalid length in [{placeholder}]"))?;
            if len == 0 {
                return Err(format!("zero length in [{placeholder}]"));
            }
            (key, Some(len))
        }
        None => (placeholder, None),
    };

    match (key, len) {
        ("name", None) => Ok(Segment::Name),
        ("ext", None) => Ok(Segment::Ext),
        ("contenthash" | "hash", len) => Ok(Segment::ContentHash(len.unwrap_or(DEFAULT_HASH_LEN))),
        _ => Err(format!("unknown placeholder [{placeholder}]")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_name_only() {
        let t = FilenameTemplate::parse("[name].js").unwrap();
        let r = t.render(&TemplateData {
            name: "adb",
            ..Default::default()
        });
        assert_eq!(r.file, "adb.js");
        assert!(!t.uses_content_hash());
    }

    #[test]
    fn test_contenthash_default_and_truncated() {
        let t = FilenameTemplate::parse("[name].[contenthash].js").unwrap();
        let r = t.render(&TemplateData {
            name: "a~b",
            content_hash: HASH,
            ..Default::default()
        });
        assert_eq!(r.file, "a~b.0123456789abcdef0123.js");

        let t = FilenameTemplate::parse("[name].[contenthash:8].js").unwrap();
        let r = t.render(&TemplateData {
            name: "lazy",
            content_hash: HASH,
            ..Default::default()
        });
        assert_eq!(r.file, "lazy.01234567.js");
        assert!(t.uses_content_hash());
    }

    #[test]
    fn test_query_split() {
        let t = FilenameTemplate::parse("[name].[ext]?[hash]").unwrap();
        let r = t.render(&TemplateData {
            name: "logo",
            ext: "png",
            content_hash: HASH,
        });
        assert_eq!(r.file, "logo.png");
        assert_eq!(r.query.as_deref(), Some("0123456789abcdef0123"));
        assert_eq!(r.url(), "logo.png?0123456789abcdef0123");
    }

    #[test]
    fn test_rejects_unknown_placeholder() {
        assert!(FilenameTemplate::parse("[id].js").is_err());
        assert!(FilenameTemplate::parse("[name.js").is_err());
        assert!(FilenameTemplate::parse("[contenthash:x].js").is_err());
        assert!(FilenameTemplate::parse("").is_err());
    }
}
