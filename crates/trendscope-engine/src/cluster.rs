//! Cross-platform clustering of eligible items into open trends.
//!
//! Open trends live in an arena keyed by creation sequence; items point back
//! to their trend through a plain `ItemId -> TrendId` table. Each candidate
//! is compared against every open trend's signature, so the cost per item is
//! linear in the number of open trends, never in history.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use trendscope_core::{ContentItem, EngineConfig, ItemId, Trend, TrendId};
use uuid::Uuid;

use crate::classify::TopicLabel;
use crate::lifecycle::LifecycleTracker;
use crate::signature::TrendSignature;

/// Scores closer than this are treated as equal and fall through to the
/// tie-break.
const SCORE_TIE_EPSILON: f64 = 1e-9;

/// One open trend plus the engine-private state that travels with it.
#[derive(Debug, Clone)]
pub struct TrendRecord {
    pub trend: Trend,
    pub signature: TrendSignature,
    pub tracker: LifecycleTracker,
    /// `last_updated_at` of the most recent state handed to storage.
    pub persisted_version: Option<DateTime<Utc>>,
    seq: u64,
}

impl TrendRecord {
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// A newly eligible item offered to the clusterer.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub item: &'a ContentItem,
    /// Latest weighted engagement value.
    pub engagement: f64,
    pub topic: Option<&'a TopicLabel>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Assignment {
    Joined { trend_id: TrendId, similarity: f64 },
    Created { trend_id: TrendId },
    /// The item already belongs to an open trend.
    AlreadyMember { trend_id: TrendId },
}

impl Assignment {
    #[must_use]
    pub fn trend_id(&self) -> TrendId {
        match *self {
            Assignment::Joined { trend_id, .. }
            | Assignment::Created { trend_id }
            | Assignment::AlreadyMember { trend_id } => trend_id,
        }
    }
}

#[derive(Debug, Default)]
pub struct Clusterer {
    records: BTreeMap<u64, TrendRecord>,
    by_id: HashMap<TrendId, u64>,
    members: HashMap<ItemId, TrendId>,
    next_seq: u64,
}

impl Clusterer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn trend_of(&self, item_id: &ItemId) -> Option<TrendId> {
        self.members.get(item_id).copied()
    }

    #[must_use]
    pub fn is_member(&self, item_id: &ItemId) -> bool {
        self.members.contains_key(item_id)
    }

    #[must_use]
    pub fn get(&self, trend_id: &TrendId) -> Option<&TrendRecord> {
        self.by_id.get(trend_id).and_then(|seq| self.records.get(seq))
    }

    pub fn get_mut(&mut self, trend_id: &TrendId) -> Option<&mut TrendRecord> {
        let seq = self.by_id.get(trend_id)?;
        self.records.get_mut(seq)
    }

    /// Open trends in creation order.
    pub fn records(&self) -> impl Iterator<Item = &TrendRecord> + '_ {
        self.records.values()
    }

    /// Trend ids in creation order.
    #[must_use]
    pub fn trend_ids(&self) -> Vec<TrendId> {
        self.records.values().map(|r| r.trend.trend_id).collect()
    }

    /// Place `candidate` into the best-matching open trend, or seed a new
    /// one in `candidate` state.
    ///
    /// A trend qualifies when its similarity exceeds `merge_threshold` and
    /// its category does not conflict with the item's. Among equal scores
    /// the larger trend wins, then the older one, then the lower id.
    pub fn assign(
        &mut self,
        candidate: Candidate<'_>,
        config: &EngineConfig,
        now: DateTime<Utc>,
    ) -> Assignment {
        let item = candidate.item;
        if let Some(&trend_id) = self.members.get(&item.item_id) {
            return Assignment::AlreadyMember { trend_id };
        }
        let category = candidate.topic.map(|t| t.category.as_str());

        let mut best: Option<(f64, &TrendRecord)> = None;
        for record in self.records.values() {
            if !categories_compatible(record.trend.category.as_deref(), category) {
                continue;
            }
            let score = record.signature.similarity(
                item,
                config.similarity,
                config.temporal_window_secs,
            );
            if score <= config.merge_threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_score, incumbent)) => {
                    if (score - best_score).abs() <= SCORE_TIE_EPSILON {
                        prefer(record, incumbent)
                    } else {
                        score > best_score
                    }
                }
            };
            if better {
                best = Some((score, record));
            }
        }

        if let Some((similarity, record)) = best {
            let seq = record.seq;
            let trend_id = record.trend.trend_id;
            if let Some(record) = self.records.get_mut(&seq) {
                join(record, candidate, config);
            }
            self.members.insert(item.item_id.clone(), trend_id);
            tracing::debug!(
                item_id = %item.item_id,
                trend_id = %trend_id,
                similarity,
                "item joined trend"
            );
            return Assignment::Joined {
                trend_id,
                similarity,
            };
        }

        let trend_id = Uuid::new_v4();
        let mut trend = Trend::seeded(trend_id, item.item_id.clone(), item.created_at, now);
        if let Some(topic) = candidate.topic {
            trend.category = Some(topic.category.clone());
            trend.subcategory.clone_from(&topic.subcategory);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.insert(
            seq,
            TrendRecord {
                trend,
                signature: TrendSignature::seeded(item, candidate.engagement),
                tracker: LifecycleTracker::new(),
                persisted_version: None,
                seq,
            },
        );
        self.by_id.insert(trend_id, seq);
        self.members.insert(item.item_id.clone(), trend_id);
        tracing::debug!(item_id = %item.item_id, trend_id = %trend_id, "new candidate trend");
        Assignment::Created { trend_id }
    }

    /// Take a trend out of the open set. Its members become free items.
    pub fn remove(&mut self, trend_id: &TrendId) -> Option<TrendRecord> {
        let seq = self.by_id.remove(trend_id)?;
        let record = self.records.remove(&seq)?;
        for member in &record.trend.member_item_ids {
            self.members.remove(member);
        }
        Some(record)
    }
}

fn categories_compatible(trend: Option<&str>, item: Option<&str>) -> bool {
    match (trend, item) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// Stability bias: more members first, then the older trend, then the
/// lower id.
fn prefer(challenger: &TrendRecord, incumbent: &TrendRecord) -> bool {
    let a = &challenger.trend;
    let b = &incumbent.trend;
    a.member_count()
        .cmp(&b.member_count())
        .then_with(|| incumbent.seq.cmp(&challenger.seq))
        .then_with(|| b.trend_id.cmp(&a.trend_id))
        .is_gt()
}

fn join(record: &mut TrendRecord, candidate: Candidate<'_>, config: &EngineConfig) {
    let item = candidate.item;
    let trend = &mut record.trend;
    trend.member_item_ids.insert(item.item_id.clone());
    trend.platforms.insert(item.platform());
    trend.first_seen_at = trend.first_seen_at.min(item.created_at);
    if trend.category.is_none() {
        if let Some(topic) = candidate.topic {
            trend.category = Some(topic.category.clone());
            trend.subcategory.clone_from(&topic.subcategory);
        }
    }
    record.signature.absorb(
        item,
        candidate.engagement,
        config.signature_recency_bias,
        config.signature_max_tags,
    );
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use trendscope_core::{Platform, PromotionLabel};

    use super::*;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn item(platform: Platform, id: &str, tags: &[&str], minutes: i64) -> ContentItem {
        ContentItem {
            item_id: ItemId::new(platform, id),
            author_handle: format!("author_{id}"),
            author_reach: Some(1_000),
            text: String::new(),
            display_text: String::new(),
            media_refs: Vec::new(),
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            created_at: at(minutes),
            last_seen_at: at(minutes),
            is_promoted: false,
            promotion: PromotionLabel::Organic,
            promotion_probability: 0.0,
            bot_score: 0.0,
            bot_flagged: false,
        }
    }

    fn offer(clusterer: &mut Clusterer, item: &ContentItem, topic: Option<&TopicLabel>) -> Assignment {
        clusterer.assign(
            Candidate {
                item,
                engagement: 100.0,
                topic,
            },
            &EngineConfig::default(),
            at(10),
        )
    }

    fn label(category: &str) -> TopicLabel {
        TopicLabel {
            category: category.to_string(),
            subcategory: None,
        }
    }

    #[test]
    fn same_tags_across_platforms_share_a_trend() {
        let mut clusterer = Clusterer::new();
        let a = item(Platform::X, "a", &["worldcup", "final"], 0);
        let b = item(Platform::TikTok, "b", &["worldcup", "final"], 2);
        let first = offer(&mut clusterer, &a, None);
        let second = offer(&mut clusterer, &b, None);
        assert!(matches!(first, Assignment::Created { .. }));
        assert!(matches!(second, Assignment::Joined { .. }));
        assert_eq!(first.trend_id(), second.trend_id());

        let record = clusterer.get(&first.trend_id()).unwrap();
        assert_eq!(record.trend.member_count(), 2);
        assert_eq!(record.trend.platforms.len(), 2);
    }

    #[test]
    fn unrelated_items_seed_separate_trends() {
        let mut clusterer = Clusterer::new();
        offer(&mut clusterer, &item(Platform::X, "a", &["cats"], 0), None);
        offer(&mut clusterer, &item(Platform::X, "b", &["stocks"], 0), None);
        assert_eq!(clusterer.len(), 2);
    }

    #[test]
    fn conflicting_categories_never_merge() {
        let mut clusterer = Clusterer::new();
        let sports = label("sports");
        let music = label("music");
        offer(&mut clusterer, &item(Platform::X, "a", &["final"], 0), Some(&sports));
        let out = offer(&mut clusterer, &item(Platform::X, "b", &["final"], 0), Some(&music));
        assert!(matches!(out, Assignment::Created { .. }));
    }

    #[test]
    fn uncategorized_trend_adopts_first_category() {
        let mut clusterer = Clusterer::new();
        let first = offer(&mut clusterer, &item(Platform::X, "a", &["final"], 0), None);
        offer(&mut clusterer, &item(Platform::Reddit, "b", &["final"], 1), Some(&label("sports")));
        let record = clusterer.get(&first.trend_id()).unwrap();
        assert_eq!(record.trend.category.as_deref(), Some("sports"));
    }

    #[test]
    fn adopted_category_is_not_overwritten_by_a_later_label() {
        let mut clusterer = Clusterer::new();
        let first = offer(&mut clusterer, &item(Platform::X, "a", &["final"], 0), None);
        offer(&mut clusterer, &item(Platform::TikTok, "b", &["final"], 1), Some(&label("sports")));
        let mut loud = item(Platform::YouTube, "c", &["final"], 2);
        loud.author_reach = Some(5_000_000);
        let out = offer(&mut clusterer, &loud, Some(&label("music")));

        assert_ne!(out.trend_id(), first.trend_id());
        let record = clusterer.get(&first.trend_id()).unwrap();
        assert_eq!(record.trend.category.as_deref(), Some("sports"));
        assert_eq!(record.trend.member_count(), 2);
    }

    #[test]
    fn membership_is_exclusive() {
        let mut clusterer = Clusterer::new();
        let a = item(Platform::X, "a", &["final"], 0);
        let first = offer(&mut clusterer, &a, None);
        let again = offer(&mut clusterer, &a, None);
        assert_eq!(again, Assignment::AlreadyMember { trend_id: first.trend_id() });
        assert_eq!(clusterer.len(), 1);
    }

    #[test]
    fn tie_prefers_the_larger_trend() {
        let mut clusterer = Clusterer::new();
        // Two trends with identical signatures; the second gets an extra
        // member so it is larger.
        let small = offer(&mut clusterer, &item(Platform::X, "s1", &["x"], 0), Some(&label("a")));
        let large = offer(&mut clusterer, &item(Platform::X, "l1", &["x"], 0), Some(&label("b")));
        offer(&mut clusterer, &item(Platform::X, "l2", &["x"], 0), Some(&label("b")));
        assert_ne!(small.trend_id(), large.trend_id());

        let out = offer(&mut clusterer, &item(Platform::Threads, "c", &["x"], 0), None);
        assert_eq!(out.trend_id(), large.trend_id());
    }

    #[test]
    fn removal_frees_members() {
        let mut clusterer = Clusterer::new();
        let a = item(Platform::X, "a", &["final"], 0);
        let created = offer(&mut clusterer, &a, None);
        let record = clusterer.remove(&created.trend_id()).unwrap();
        assert_eq!(record.trend.member_count(), 1);
        assert!(!clusterer.is_member(&a.item_id));
        assert!(clusterer.is_empty());
    }
}
