//! Trend signatures and item-to-trend similarity.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use trendscope_core::{ContentItem, SimilarityWeights};
use trendscope_ingest::text;

const SHINGLE_WIDTH: usize = 3;
/// Tags whose decayed weight falls below this are dropped from a signature.
const MIN_TAG_WEIGHT: f64 = 0.01;

/// Stable 64-bit hash of a token sequence (first eight bytes of SHA-256).
#[must_use]
pub fn token_hash(tokens: &[String]) -> u64 {
    let mut hasher = Sha256::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            hasher.update(b" ");
        }
        hasher.update(token.as_bytes());
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Word 3-gram fingerprint of `text`. Texts shorter than three words yield
/// a single shingle of the whole text; empty text yields none.
#[must_use]
pub fn shingles(text: &str) -> BTreeSet<u64> {
    let words = text::words(text);
    if words.is_empty() {
        return BTreeSet::new();
    }
    if words.len() < SHINGLE_WIDTH {
        return BTreeSet::from([token_hash(&words)]);
    }
    words.windows(SHINGLE_WIDTH).map(token_hash).collect()
}

#[allow(clippy::cast_precision_loss)]
fn jaccard(a: &BTreeSet<u64>, b: &BTreeSet<u64>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Representative fingerprint of an open trend.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendSignature {
    /// Tag -> weight in `(0, 1]`; the strongest tag always has weight 1.
    tags: BTreeMap<String, f64>,
    /// Shingles of the most-engaged member with text.
    shingles: BTreeSet<u64>,
    shingle_engagement: f64,
    /// Creation time of the newest member.
    latest_member_at: DateTime<Utc>,
}

impl TrendSignature {
    #[must_use]
    pub fn seeded(founder: &ContentItem, engagement: f64) -> Self {
        Self {
            tags: founder.tags.iter().map(|t| (t.clone(), 1.0)).collect(),
            shingles: shingles(&founder.text),
            shingle_engagement: engagement,
            latest_member_at: founder.created_at,
        }
    }

    /// Fold a new member in: existing tag weights decay by `recency_bias`,
    /// the newcomer's tags are set to full weight, and weights are rescaled
    /// so the strongest is 1.
    pub fn absorb(&mut self, member: &ContentItem, engagement: f64, recency_bias: f64, max_tags: usize) {
        let keep = 1.0 - recency_bias;
        for weight in self.tags.values_mut() {
            *weight *= keep;
        }
        for tag in &member.tags {
            self.tags.insert(tag.clone(), 1.0);
        }
        let max = self.tags.values().copied().fold(0.0_f64, f64::max);
        if max > 0.0 {
            for weight in self.tags.values_mut() {
                *weight /= max;
            }
        }
        self.tags.retain(|_, w| *w >= MIN_TAG_WEIGHT);
        if self.tags.len() > max_tags {
            let keep: BTreeSet<String> = self
                .strongest_tags(max_tags)
                .into_iter()
                .collect();
            self.tags.retain(|t, _| keep.contains(t));
        }

        self.latest_member_at = self.latest_member_at.max(member.created_at);
        self.offer_fingerprint(member, engagement);
    }

    /// Replace the shingle fingerprint if `member` is now the most engaged.
    pub fn offer_fingerprint(&mut self, member: &ContentItem, engagement: f64) {
        if member.text.is_empty() {
            return;
        }
        if self.shingles.is_empty() || engagement > self.shingle_engagement {
            self.shingles = shingles(&member.text);
            self.shingle_engagement = engagement;
        }
    }

    /// Up to `limit` tags, strongest first, ties by name.
    #[must_use]
    pub fn strongest_tags(&self, limit: usize) -> Vec<String> {
        let mut ranked: Vec<(&String, f64)> = self.tags.iter().map(|(t, w)| (t, *w)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.into_iter().take(limit).map(|(t, _)| t.clone()).collect()
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains_key(tag)
    }

    /// Weighted Jaccard between the signature tags and the item's tags
    /// (each item tag weighs 1).
    #[must_use]
    pub fn tag_similarity(&self, item: &ContentItem) -> f64 {
        let mut shared = 0.0;
        let mut union = 0.0;
        for tag in &item.tags {
            shared += self.tags.get(tag).copied().unwrap_or(0.0);
            union += 1.0;
        }
        union += self
            .tags
            .iter()
            .filter(|(t, _)| !item.tags.contains(*t))
            .map(|(_, w)| w)
            .sum::<f64>();
        if union <= 0.0 {
            0.0
        } else {
            shared / union
        }
    }

    /// Combined similarity in `[0, 1]`. When either side has no text the
    /// shingle term is dropped and the remaining weights rescaled.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn similarity(
        &self,
        item: &ContentItem,
        weights: SimilarityWeights,
        temporal_window_secs: u64,
    ) -> f64 {
        let tag_score = self.tag_similarity(item);

        let gap = (item.created_at - self.latest_member_at).num_seconds().unsigned_abs();
        let temporal = (1.0 - gap as f64 / temporal_window_secs.max(1) as f64).max(0.0);

        let item_shingles = shingles(&item.text);
        if item_shingles.is_empty() || self.shingles.is_empty() {
            let total = weights.tags + weights.temporal;
            if total <= 0.0 {
                return 0.0;
            }
            return (weights.tags * tag_score + weights.temporal * temporal) / total;
        }
        let shingle_score = jaccard(&self.shingles, &item_shingles);
        weights.tags * tag_score + weights.shingles * shingle_score + weights.temporal * temporal
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use trendscope_core::{ItemId, Platform, PromotionLabel};

    use super::*;

    fn item(id: &str, tags: &[&str], text: &str, minutes: i64) -> ContentItem {
        let at = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes);
        ContentItem {
            item_id: ItemId::new(Platform::Threads, id),
            author_handle: format!("author_{id}"),
            author_reach: None,
            text: text.to_string(),
            display_text: text.to_string(),
            media_refs: Vec::new(),
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            created_at: at,
            last_seen_at: at,
            is_promoted: false,
            promotion: PromotionLabel::Organic,
            promotion_probability: 0.0,
            bot_score: 0.0,
            bot_flagged: false,
        }
    }

    #[test]
    fn shingle_hash_is_stable() {
        let a = shingles("the quick brown fox");
        let b = shingles("The quick brown fox");
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert_eq!(shingles("hi there").len(), 1);
        assert!(shingles("").is_empty());
    }

    #[test]
    fn identical_tags_and_time_score_high() {
        let sig = TrendSignature::seeded(&item("a", &["rust", "release"], "", 0), 10.0);
        let score = sig.similarity(
            &item("b", &["rust", "release"], "", 2),
            SimilarityWeights::default(),
            3_600,
        );
        // (0.5 * 1.0 + 0.2 * (1 - 120/3600)) / 0.7
        let expected = (0.5 + 0.2 * (1.0 - 120.0 / 3_600.0)) / 0.7;
        assert!((score - expected).abs() < 1e-9, "score {score}");
    }

    #[test]
    fn shingles_contribute_when_both_sides_have_text() {
        let sig = TrendSignature::seeded(&item("a", &["x"], "new phone launch event today", 0), 1.0);
        let same = sig.similarity(
            &item("b", &["x"], "new phone launch event today", 0),
            SimilarityWeights::default(),
            3_600,
        );
        assert!((same - 1.0).abs() < 1e-9);
        let different = sig.similarity(
            &item("c", &["x"], "completely unrelated words here", 0),
            SimilarityWeights::default(),
            3_600,
        );
        assert!((different - 0.7).abs() < 1e-9);
    }

    #[test]
    fn disjoint_tags_far_apart_score_zero() {
        let sig = TrendSignature::seeded(&item("a", &["cats"], "", 0), 1.0);
        let score = sig.similarity(
            &item("b", &["dogs"], "", 300),
            SimilarityWeights::default(),
            3_600,
        );
        assert!(score.abs() < 1e-9);
    }

    #[test]
    fn absorb_decays_old_tags_toward_newer_members() {
        let mut sig = TrendSignature::seeded(&item("a", &["old"], "", 0), 1.0);
        sig.absorb(&item("b", &["new"], "", 5), 1.0, 0.2, 32);
        assert_eq!(sig.strongest_tags(2), vec!["new".to_string(), "old".to_string()]);
        assert!((sig.tags["old"] - 0.8).abs() < 1e-9);
        assert!((sig.tags["new"] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn absorb_caps_tag_count() {
        let mut sig = TrendSignature::seeded(&item("a", &["a1", "a2", "a3"], "", 0), 1.0);
        sig.absorb(&item("b", &["b1", "b2"], "", 1), 1.0, 0.2, 3);
        assert_eq!(sig.tags.len(), 3);
        assert!(sig.has_tag("b1") && sig.has_tag("b2"));
    }

    #[test]
    fn fingerprint_follows_most_engaged_member() {
        let mut sig = TrendSignature::seeded(&item("a", &["t"], "first text body", 0), 5.0);
        sig.offer_fingerprint(&item("b", &["t"], "second text body", 1), 2.0);
        assert_eq!(sig.shingles, shingles("first text body"));
        sig.offer_fingerprint(&item("c", &["t"], "third text body", 1), 50.0);
        assert_eq!(sig.shingles, shingles("third text body"));
    }
}
