//! Velocity, virality, sentiment and source scoring for one trend.

use std::collections::{BTreeMap, HashMap, VecDeque};

use trendscope_core::{
    ContentItem, EngineConfig, Platform, PromotionLabel, PromotionMix, ScoreTerm,
    SentimentBreakdown, SentimentDistribution, SourceContribution, ViralityBreakdown,
};

use crate::classify::Classified;

/// Velocity score assigned when too little category history exists for a
/// z-score: log-scaled against this many weighted engagements per hour.
const FALLBACK_VELOCITY_CEILING_PER_HOUR: f64 = 1_000.0;
const FALLBACK_CONFIDENCE: f64 = 0.5;

/// Rolling per-category record of trend velocities, one sample per trend
/// per cycle.
#[derive(Debug, Default)]
pub struct CategoryHistory {
    samples: HashMap<Option<String>, VecDeque<f64>>,
    capacity: usize,
}

impl CategoryHistory {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, category: Option<&str>, velocity: f64) {
        let key = category.map(ToOwned::to_owned);
        let samples = self.samples.entry(key).or_default();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(velocity);
    }

    #[must_use]
    pub fn len(&self, category: Option<&str>) -> usize {
        self.get(category).map_or(0, VecDeque::len)
    }

    fn get(&self, category: Option<&str>) -> Option<&VecDeque<f64>> {
        self.samples.get(&category.map(ToOwned::to_owned))
    }

    /// Nearest-rank percentile `p` in `[0, 1]`, or `None` without samples.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn percentile(&self, category: Option<&str>, p: f64) -> Option<f64> {
        let samples = self.get(category)?;
        if samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let rank = (p.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize;
        Some(sorted[rank.saturating_sub(1).min(sorted.len() - 1)])
    }

    /// Mean and population standard deviation.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_std(&self, category: Option<&str>) -> Option<(f64, f64)> {
        let samples = self.get(category)?;
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let var = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some((mean, var.sqrt()))
    }
}

/// Velocity score: z-score of `velocity` within its category mapped onto
/// `[0, 1]` (z of `velocity_z_ceiling` or more scores 1). With too little
/// history a log-scaled absolute score is used at reduced confidence.
#[must_use]
pub fn velocity_term(
    velocity: f64,
    category: Option<&str>,
    history: &CategoryHistory,
    config: &EngineConfig,
) -> ScoreTerm {
    let weight = config.virality.velocity;
    if history.len(category) >= config.min_category_samples {
        if let Some((mean, std)) = history.mean_std(category) {
            if std > f64::EPSILON {
                let z = (velocity - mean) / std;
                return ScoreTerm {
                    value: (z / config.velocity_z_ceiling).clamp(0.0, 1.0),
                    weight,
                    confidence: 1.0,
                };
            }
        }
    }
    let per_hour = velocity.max(0.0) * 3_600.0;
    ScoreTerm {
        value: (per_hour.ln_1p() / FALLBACK_VELOCITY_CEILING_PER_HOUR.ln_1p()).clamp(0.0, 1.0),
        weight,
        confidence: FALLBACK_CONFIDENCE,
    }
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn spread_term(platforms: usize, config: &EngineConfig) -> ScoreTerm {
    ScoreTerm {
        value: (platforms as f64 / config.spread_saturation as f64).min(1.0),
        weight: config.virality.spread,
        confidence: 1.0,
    }
}

/// Influencer participation: reach of each top source weighted by its
/// engagement rate relative to the best rate, log-normalized. Confidence is
/// the share of sources whose reach is known.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn influence_term(sources: &[SourceContribution], config: &EngineConfig) -> ScoreTerm {
    let weight = config.virality.influence;
    if sources.is_empty() {
        return ScoreTerm {
            value: 0.0,
            weight,
            confidence: 0.0,
        };
    }
    let max_rate = sources
        .iter()
        .map(|s| s.engagement_rate)
        .fold(0.0_f64, f64::max);
    let weighted_reach: f64 = sources
        .iter()
        .filter_map(|s| {
            let reach = s.reach? as f64;
            let rate_weight = if max_rate > 0.0 {
                s.engagement_rate / max_rate
            } else {
                0.0
            };
            Some(reach * rate_weight)
        })
        .sum();
    let known = sources.iter().filter(|s| s.reach.is_some()).count();
    ScoreTerm {
        value: (weighted_reach.ln_1p() / config.influence_saturation.ln_1p()).clamp(0.0, 1.0),
        weight,
        confidence: known as f64 / sources.len() as f64,
    }
}

#[must_use]
pub fn pattern_term(matched: Option<&Classified<f64>>, config: &EngineConfig) -> ScoreTerm {
    let weight = config.virality.pattern;
    match matched {
        Some(m) => ScoreTerm {
            value: m.value.clamp(0.0, 1.0),
            weight,
            confidence: m.confidence.clamp(0.0, 1.0),
        },
        None => ScoreTerm {
            value: 0.0,
            weight,
            confidence: 0.0,
        },
    }
}

/// Combine the four terms into a 0-100 score. Aggregate confidence is the
/// weighted term confidence, discounted by how much classifier signal the
/// trend's members carry.
#[must_use]
pub fn virality(
    velocity: ScoreTerm,
    spread: ScoreTerm,
    influence: ScoreTerm,
    pattern: ScoreTerm,
    signal_coverage: f64,
) -> ViralityBreakdown {
    let terms = [velocity, spread, influence, pattern];
    let score = terms.iter().map(ScoreTerm::contribution).sum::<f64>() * 100.0;
    let term_confidence: f64 = terms.iter().map(|t| t.weight * t.confidence).sum();
    let coverage = signal_coverage.clamp(0.0, 1.0);
    ViralityBreakdown {
        velocity,
        spread,
        influence,
        pattern,
        score: score.clamp(0.0, 100.0),
        confidence: (term_confidence * (0.5 + 0.5 * coverage)).clamp(0.0, 1.0),
    }
}

/// One member's contribution to trend-level aggregates.
#[derive(Debug, Clone)]
pub struct MemberStats<'a> {
    pub item: &'a ContentItem,
    /// Latest weighted engagement value.
    pub engagement: f64,
    pub total_engagement: u64,
    pub interactions: u64,
    pub sentiment: Option<Classified<SentimentDistribution>>,
}

/// Engagement-share weighted average of member sentiment, as percentages
/// rounded to one decimal that always sum to exactly 100.
///
/// Members without a sentiment payload do not contribute. When no member
/// has one the neutral default with zero confidence is returned.
#[must_use]
pub fn aggregate_sentiment(members: &[MemberStats<'_>]) -> SentimentBreakdown {
    let with_sentiment: Vec<(&Classified<SentimentDistribution>, f64)> = members
        .iter()
        .filter_map(|m| m.sentiment.as_ref().map(|s| (s, m.engagement.max(0.0))))
        .collect();
    if with_sentiment.is_empty() {
        return SentimentBreakdown::default();
    }

    let total_engagement: f64 = with_sentiment.iter().map(|(_, e)| e).sum();
    let uniform = total_engagement <= f64::EPSILON;
    #[allow(clippy::cast_precision_loss)]
    let share = |engagement: f64| {
        if uniform {
            1.0 / with_sentiment.len() as f64
        } else {
            engagement / total_engagement
        }
    };

    let mut parts = [0.0_f64; 4];
    let mut confidence = 0.0;
    for (classified, engagement) in &with_sentiment {
        let w = share(*engagement);
        let d = classified.value;
        parts[0] += w * d.positive;
        parts[1] += w * d.neutral;
        parts[2] += w * d.negative;
        parts[3] += w * d.mixed;
        confidence += w * classified.confidence;
    }

    let Some(tenths) = largest_remainder(parts, 1_000) else {
        return SentimentBreakdown::default();
    };
    SentimentBreakdown {
        positive: f64::from(tenths[0]) / 10.0,
        neutral: f64::from(tenths[1]) / 10.0,
        negative: f64::from(tenths[2]) / 10.0,
        mixed: f64::from(tenths[3]) / 10.0,
        confidence: confidence.clamp(0.0, 1.0),
    }
}

/// Apportion `total` units across `parts` proportionally, floors first and
/// the remaining units to the largest fractional parts (earlier index wins
/// ties).
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn largest_remainder(parts: [f64; 4], total: u32) -> Option<[u32; 4]> {
    let sum: f64 = parts.iter().sum();
    if !(sum.is_finite() && sum > 0.0) || parts.iter().any(|p| *p < 0.0) {
        return None;
    }
    let scaled: Vec<f64> = parts.iter().map(|p| p / sum * f64::from(total)).collect();
    let mut units: [u32; 4] = [0; 4];
    for (i, s) in scaled.iter().enumerate() {
        units[i] = s.floor() as u32;
    }
    let assigned: u32 = units.iter().sum();
    let mut order: Vec<usize> = (0..4).collect();
    order.sort_by(|&a, &b| {
        let fa = scaled[a] - scaled[a].floor();
        let fb = scaled[b] - scaled[b].floor();
        fb.total_cmp(&fa).then(a.cmp(&b))
    });
    for &i in order.iter().take(total.saturating_sub(assigned) as usize) {
        units[i] += 1;
    }
    Some(units)
}

/// Members grouped by `(platform, author)`, ranked by engagement, then
/// reach, then handle.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn top_sources(members: &[MemberStats<'_>], limit: usize) -> Vec<SourceContribution> {
    let mut grouped: BTreeMap<(Platform, &str), (SourceContribution, u64)> = BTreeMap::new();
    for m in members {
        let key = (m.item.platform(), m.item.author_handle.as_str());
        let (entry, interactions) = grouped.entry(key).or_insert_with(|| {
            (
                SourceContribution {
                    author_handle: m.item.author_handle.clone(),
                    platform: m.item.platform(),
                    reach: None,
                    volume: 0,
                    engagement: 0,
                    engagement_rate: 0.0,
                },
                0,
            )
        });
        entry.volume += 1;
        entry.engagement = entry.engagement.saturating_add(m.total_engagement);
        *interactions = interactions.saturating_add(m.interactions);
        entry.reach = match (entry.reach, m.item.author_reach) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    let mut sources: Vec<SourceContribution> = grouped
        .into_values()
        .map(|(mut source, interactions)| {
            source.engagement_rate = match source.reach {
                Some(reach) if reach > 0 => interactions as f64 / reach as f64,
                _ => 0.0,
            };
            source
        })
        .collect();
    sources.sort_by(|a, b| {
        b.engagement
            .cmp(&a.engagement)
            .then_with(|| b.reach.unwrap_or(0).cmp(&a.reach.unwrap_or(0)))
            .then_with(|| a.author_handle.cmp(&b.author_handle))
    });
    sources.truncate(limit);
    sources
}

/// Organic / paid / uncertain member counts; the dominant label needs a
/// strict majority.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn promotion_mix<'a>(items: impl IntoIterator<Item = &'a ContentItem>) -> PromotionMix {
    let mut mix = PromotionMix::default();
    for item in items {
        match item.promotion {
            PromotionLabel::Organic => mix.organic += 1,
            PromotionLabel::Paid => mix.paid += 1,
            PromotionLabel::Uncertain => mix.uncertain += 1,
        }
    }
    let total = mix.organic + mix.paid + mix.uncertain;
    if total == 0 {
        return PromotionMix::default();
    }
    mix.dominant = if mix.organic * 2 > total {
        PromotionLabel::Organic
    } else if mix.paid * 2 > total {
        PromotionLabel::Paid
    } else {
        PromotionLabel::Uncertain
    };
    mix.organic_ratio = mix.organic as f64 / total as f64;
    mix
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;
    use trendscope_core::ItemId;

    use super::*;

    fn item(platform: Platform, id: &str, author: &str, reach: Option<u64>) -> ContentItem {
        let now = Utc::now();
        ContentItem {
            item_id: ItemId::new(platform, id),
            author_handle: author.into(),
            author_reach: reach,
            text: String::new(),
            display_text: String::new(),
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

    fn dist(positive: f64, neutral: f64, negative: f64, mixed: f64) -> Classified<SentimentDistribution> {
        Classified {
            value: SentimentDistribution {
                positive,
                neutral,
                negative,
                mixed,
            },
            confidence: 1.0,
        }
    }

    fn stats<'a>(
        item: &'a ContentItem,
        engagement: f64,
        sentiment: Option<Classified<SentimentDistribution>>,
    ) -> MemberStats<'a> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let total = engagement as u64;
        MemberStats {
            item,
            engagement,
            total_engagement: total,
            interactions: total,
            sentiment,
        }
    }

    #[test]
    fn sentiment_thirds_still_sum_to_hundred() {
        let a = item(Platform::X, "1", "a", None);
        let b = item(Platform::X, "2", "b", None);
        let c = item(Platform::X, "3", "c", None);
        let members = [
            stats(&a, 1.0, Some(dist(1.0, 0.0, 0.0, 0.0))),
            stats(&b, 1.0, Some(dist(0.0, 1.0, 0.0, 0.0))),
            stats(&c, 1.0, Some(dist(0.0, 0.0, 1.0, 0.0))),
        ];
        let breakdown = aggregate_sentiment(&members);
        assert!((breakdown.total() - 100.0).abs() < 1e-9, "{breakdown:?}");
        assert!((breakdown.positive - 33.4).abs() < 1e-9);
        assert!((breakdown.neutral - 33.3).abs() < 1e-9);
    }

    #[test]
    fn sentiment_is_weighted_by_engagement_share() {
        let a = item(Platform::X, "1", "a", None);
        let b = item(Platform::X, "2", "b", None);
        let members = [
            stats(&a, 300.0, Some(dist(1.0, 0.0, 0.0, 0.0))),
            stats(&b, 100.0, Some(dist(0.0, 0.0, 1.0, 0.0))),
        ];
        let breakdown = aggregate_sentiment(&members);
        assert!((breakdown.positive - 75.0).abs() < 1e-9);
        assert!((breakdown.negative - 25.0).abs() < 1e-9);
        assert!((breakdown.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn missing_sentiment_defaults_to_neutral_with_zero_confidence() {
        let a = item(Platform::X, "1", "a", None);
        let breakdown = aggregate_sentiment(&[stats(&a, 10.0, None)]);
        assert_eq!(breakdown, SentimentBreakdown::default());
    }

    #[test]
    fn zero_engagement_members_share_equally() {
        let a = item(Platform::X, "1", "a", None);
        let b = item(Platform::X, "2", "b", None);
        let members = [
            stats(&a, 0.0, Some(dist(1.0, 0.0, 0.0, 0.0))),
            stats(&b, 0.0, Some(dist(0.0, 1.0, 0.0, 0.0))),
        ];
        let breakdown = aggregate_sentiment(&members);
        assert!((breakdown.positive - 50.0).abs() < 1e-9);
    }

    #[test]
    fn top_sources_group_by_author_and_rank_by_engagement() {
        let a1 = item(Platform::X, "1", "alice", Some(1_000));
        let a2 = item(Platform::X, "2", "alice", Some(1_200));
        let b = item(Platform::Threads, "3", "bob", None);
        let c = item(Platform::X, "4", "carol", Some(50));
        let members = [
            stats(&a1, 10.0, None),
            stats(&a2, 20.0, None),
            stats(&b, 100.0, None),
            stats(&c, 5.0, None),
        ];
        let sources = top_sources(&members, 2);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].author_handle, "bob");
        assert_eq!(sources[1].author_handle, "alice");
        assert_eq!(sources[1].volume, 2);
        assert_eq!(sources[1].engagement, 30);
        assert_eq!(sources[1].reach, Some(1_200));
        assert!((sources[1].engagement_rate - 0.025).abs() < 1e-9);
        assert!(sources[0].engagement_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn same_handle_on_two_platforms_is_two_sources() {
        let a = item(Platform::X, "1", "brand", None);
        let b = item(Platform::Instagram, "2", "brand", None);
        let sources = top_sources(&[stats(&a, 1.0, None), stats(&b, 1.0, None)], 5);
        assert_eq!(sources.len(), 2);
    }

    #[test]
    fn velocity_term_uses_fallback_without_history() {
        let config = EngineConfig::default();
        let history = CategoryHistory::new(16);
        let term = velocity_term(1_000.0 / 3_600.0, None, &history, &config);
        assert!((term.value - 1.0).abs() < 1e-9);
        assert!((term.confidence - 0.5).abs() < 1e-9);
        assert!(velocity_term(-1.0, None, &history, &config).value.abs() < f64::EPSILON);
    }

    #[test]
    fn velocity_term_uses_category_z_score() {
        let config = EngineConfig::default();
        let mut history = CategoryHistory::new(16);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            history.push(Some("tech"), v);
        }
        let (mean, std) = history.mean_std(Some("tech")).unwrap();
        let term = velocity_term(mean + std, Some("tech"), &history, &config);
        assert!((term.value - 0.5).abs() < 1e-9);
        assert!((term.confidence - 1.0).abs() < 1e-9);
        let below = velocity_term(mean - std, Some("tech"), &history, &config);
        assert!(below.value.abs() < f64::EPSILON);
    }

    #[test]
    fn percentile_uses_nearest_rank() {
        let mut history = CategoryHistory::new(3);
        for v in [5.0, 1.0, 3.0, 2.0] {
            history.push(None, v);
        }
        // capacity 3 keeps [1, 3, 2]
        assert_eq!(history.len(None), 3);
        assert!((history.percentile(None, 0.8).unwrap() - 3.0).abs() < f64::EPSILON);
        assert!(history.percentile(Some("none"), 0.8).is_none());
    }

    #[test]
    fn influence_confidence_reflects_known_reach() {
        let config = EngineConfig::default();
        let sources = vec![
            SourceContribution {
                author_handle: "a".into(),
                platform: Platform::X,
                reach: Some(1_000_000),
                volume: 1,
                engagement: 10,
                engagement_rate: 0.1,
            },
            SourceContribution {
                author_handle: "b".into(),
                platform: Platform::X,
                reach: None,
                volume: 1,
                engagement: 10,
                engagement_rate: 0.0,
            },
        ];
        let term = influence_term(&sources, &config);
        assert!((term.value - 1.0).abs() < 1e-9);
        assert!((term.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn virality_score_is_weighted_sum() {
        let config = EngineConfig::default();
        let v = virality(
            ScoreTerm { value: 1.0, weight: config.virality.velocity, confidence: 1.0 },
            ScoreTerm { value: 1.0, weight: config.virality.spread, confidence: 1.0 },
            ScoreTerm { value: 0.0, weight: config.virality.influence, confidence: 1.0 },
            ScoreTerm { value: 0.0, weight: config.virality.pattern, confidence: 0.0 },
            1.0,
        );
        assert!((v.score - 65.0).abs() < 1e-9);
        assert!((v.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn promotion_mix_requires_strict_majority() {
        let mut a = item(Platform::X, "1", "a", None);
        let mut b = item(Platform::X, "2", "b", None);
        a.promotion = PromotionLabel::Paid;
        b.promotion = PromotionLabel::Organic;
        let mix = promotion_mix([&a, &b]);
        assert_eq!(mix.dominant, PromotionLabel::Uncertain);
        assert!((mix.organic_ratio - 0.5).abs() < f64::EPSILON);
        b.promotion = PromotionLabel::Paid;
        assert_eq!(promotion_mix([&a, &b]).dominant, PromotionLabel::Paid);
    }
}
