//! Text normalization and token extraction.
//!
//! Matching always happens on the lowercased form; the original casing is
//! kept separately for display.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;

static HASHTAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#([\p{L}\p{N}_]+)").expect("valid hashtag regex"));
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)https?://\S+").expect("valid url regex"));
static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("valid word regex"));

/// Maximum number of text-derived keywords kept for an item without tags.
pub const MAX_TEXT_KEYWORDS: usize = 8;

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "also", "been", "being", "could", "does", "from", "have",
    "here", "into", "just", "like", "more", "most", "much", "only", "other", "over", "same",
    "should", "some", "such", "than", "that", "their", "them", "then", "there", "these",
    "they", "this", "those", "very", "were", "what", "when", "where", "which", "while",
    "will", "with", "would", "your", "http", "https",
];

/// Trim and collapse every whitespace run to a single space.
#[must_use]
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Matching form of `text`: URLs removed, lowercased, whitespace collapsed.
#[must_use]
pub fn match_text(text: &str) -> String {
    collapse_whitespace(&URL_RE.replace_all(text, " ").to_lowercase())
}

/// Normalize a tag token: strip leading `#`, trim, lowercase.
///
/// Returns `None` when nothing meaningful remains.
#[must_use]
pub fn normalize_tag(raw: &str) -> Option<String> {
    let tag = raw.trim().trim_start_matches('#').trim().to_lowercase();
    if tag.is_empty() || !tag.chars().any(char::is_alphanumeric) {
        None
    } else {
        Some(tag)
    }
}

/// Hashtags appearing inline in `text`, normalized.
#[must_use]
pub fn extract_hashtags(text: &str) -> BTreeSet<String> {
    HASHTAG_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| normalize_tag(m.as_str()))
        .collect()
}

/// Most frequent non-stopword words of at least four characters, ties broken
/// by first occurrence. Hashtag bodies are excluded.
#[must_use]
pub fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
    let without_tags = HASHTAG_RE.replace_all(text, " ");
    let without_urls = URL_RE.replace_all(&without_tags, " ");
    let lowered = without_urls.to_lowercase();

    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, m) in WORD_RE.find_iter(&lowered).enumerate() {
        let word = m.as_str();
        if word.chars().count() < 4
            || STOPWORDS.contains(&word)
            || word.chars().all(|c| c.is_ascii_digit())
        {
            continue;
        }
        let entry = counts.entry(word).or_insert((0, position));
        entry.0 += 1;
    }

    let mut ranked: Vec<(&str, usize, usize)> =
        counts.into_iter().map(|(w, (n, first))| (w, n, first)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(w, _, _)| w.to_string())
        .collect()
}

/// Lowercased word tokens of `text`, hashtags and URLs excluded.
#[must_use]
pub fn words(text: &str) -> Vec<String> {
    let without_tags = HASHTAG_RE.replace_all(text, " ");
    let without_urls = URL_RE.replace_all(&without_tags, " ");
    WORD_RE
        .find_iter(&without_urls.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}
