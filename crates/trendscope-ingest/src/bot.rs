use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use trendscope_core::ContentItem;

/// Pluggable bot-likelihood scorer.
///
/// Implementations return a value in `[0, 1]`; anything outside is clamped
/// by the normalizer.
pub trait BotScorer: Send + Sync {
    fn score(&self, item: &ContentItem) -> f64;
}

static GENERATED_HANDLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4,}$").expect("valid generated handle regex"));

const HANDLE_WEIGHT: f64 = 0.30;
const LOW_REACH_WEIGHT: f64 = 0.20;
const TAG_STUFFING_WEIGHT: f64 = 0.25;
const EMPTY_CONTENT_WEIGHT: f64 = 0.15;
const REPETITION_WEIGHT: f64 = 0.25;

const LOW_REACH: u64 = 10;
const TAG_STUFFING_LIMIT: usize = 15;
/// Share of all tokens taken by the single most common token.
const REPETITION_SHARE: f64 = 0.5;
const REPETITION_MIN_TOKENS: usize = 6;

/// Rule-based default scorer used when no upstream model is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicBotScorer;

impl BotScorer for HeuristicBotScorer {
    fn score(&self, item: &ContentItem) -> f64 {
        let mut score = 0.0;
        if GENERATED_HANDLE_RE.is_match(&item.author_handle) {
            score += HANDLE_WEIGHT;
        }
        if item.author_reach.is_some_and(|r| r < LOW_REACH) {
            score += LOW_REACH_WEIGHT;
        }
        if item.tags.len() > TAG_STUFFING_LIMIT {
            score += TAG_STUFFING_WEIGHT;
        }
        if item.text.is_empty() && item.media_refs.is_empty() {
            score += EMPTY_CONTENT_WEIGHT;
        }
        if is_repetitive(&item.text) {
            score += REPETITION_WEIGHT;
        }
        score.clamp(0.0, 1.0)
    }
}

#[allow(clippy::cast_precision_loss)]
fn is_repetitive(text: &str) -> bool {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() < REPETITION_MIN_TOKENS {
        return false;
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in &tokens {
        *counts.entry(token).or_default() += 1;
    }
    let max = counts.values().copied().max().unwrap_or(0);
    max as f64 / tokens.len() as f64 > REPETITION_SHARE
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;
    use trendscope_core::{ItemId, Platform, PromotionLabel};

    use super::*;

    fn item(handle: &str, reach: Option<u64>, text: &str) -> ContentItem {
        let now = Utc::now();
        ContentItem {
            item_id: ItemId::new(Platform::X, "1"),
            author_handle: handle.into(),
            author_reach: reach,
            text: text.into(),
            display_text: text.into(),
            media_refs: Vec::new(),
            tags: BTreeSet::new(),
            created_at: now,
            last_seen_at: now,
            is_promoted: false,
            promotion: PromotionLabel::Organic,
            promotion_probability: 0.0,
            bot_score: 0.0,
            bot_flagged: false,
        }
    }

    #[test]
    fn ordinary_account_scores_zero() {
        let score = HeuristicBotScorer.score(&item("jane_doe", Some(4_000), "loving this weather"));
        assert!(score.abs() < f64::EPSILON);
    }

    #[test]
    fn spammy_account_accumulates_signals() {
        let mut spam = item("user83726451", Some(2), "buy buy buy buy buy now");
        spam.tags = (0..20).map(|i| format!("tag{i}")).collect();
        let score = HeuristicBotScorer.score(&spam);
        assert!((score - 1.0).abs() < 1e-9, "score was {score}");
    }

    #[test]
    fn empty_item_without_media_is_suspicious() {
        let score = HeuristicBotScorer.score(&item("someone", None, ""));
        assert!((score - EMPTY_CONTENT_WEIGHT).abs() < f64::EPSILON);
    }

    #[test]
    fn short_texts_are_never_repetitive() {
        assert!(!is_repetitive("go go go"));
        assert!(is_repetitive("go go go go go now"));
    }
}
