// src/source/mod.rs
pub mod rss;

use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::content::{ContentKind, RawItem};

/// Lister + fetcher for one content source. Site- or platform-specific
/// extraction lives behind this trait.
#[async_trait::async_trait]
pub trait ContentSource: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> ContentKind;

    /// Enumerate candidate identifiers (URLs or source-native IDs).
    async fn list_candidates(&self) -> Result<Vec<String>>;

    /// Full detail for one candidate. `Ok(None)` when required fields are missing.
    async fn fetch_detail(&self, key: &str) -> Result<Option<RawItem>>;
}

pub type DynSource = Arc<dyn ContentSource>;

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\r\f\v]+").expect("ws regex"));
static RE_BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n+").expect("blank line regex"));

/// Normalize fetched text: decode entities, strip tags, unify quotes,
/// collapse runs of spaces and blank lines. Paragraph breaks survive.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();
    out = RE_TAGS.replace_all(&out, " ").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('\u{00A0}', " ");

    out = RE_WS.replace_all(&out, " ").to_string();
    out = RE_BLANK_LINES.replace_all(&out, "\n\n").to_string();
    out.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_strips_tags_and_entities() {
        let s = "  <p>Hello,&nbsp;&nbsp; <b>world</b>&ldquo;ok&rdquo;</p>  ";
        assert_eq!(normalize_text(s), "Hello, world \"ok\"");
    }

    #[test]
    fn normalize_text_keeps_paragraphs() {
        let s = "First  line\n\n\n   Second\tline ";
        assert_eq!(normalize_text(s), "First line\n\nSecond line");
    }
}
