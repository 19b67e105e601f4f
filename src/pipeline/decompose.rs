// src/pipeline/decompose.rs
//! String contracts for enrichment output.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::content::Category;

/// Detail stored for a summary line whose elaboration call failed.
pub const DETAIL_GENERATION_FAILED: &str = "[generation failed]";

static RE_POINT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.").expect("summary point regex"));
static RE_DIGIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([1-5])\b").expect("category regex"));

/// Keep lines that start with `N.` at column zero; drop everything else.
pub fn summary_lines(completion: &str) -> Vec<String> {
    completion
        .lines()
        .filter(|l| RE_POINT.is_match(l))
        .map(|l| l.trim_end().to_owned())
        .collect()
}

/// First standalone digit 1..=5 in the answer.
pub fn parse_category(completion: &str) -> Option<Category> {
    RE_DIGIT
        .captures(completion)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u8>().ok())
        .and_then(Category::from_number)
}
