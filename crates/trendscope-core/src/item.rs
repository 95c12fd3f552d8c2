use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::Platform;

/// Canonical metric names every platform adapter maps onto.
pub mod metric {
    pub const LIKES: &str = "likes";
    pub const SHARES: &str = "shares";
    pub const COMMENTS: &str = "comments";
    pub const VIEWS: &str = "views";
}

/// Globally unique content identity: `(platform, native_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId {
    pub platform: Platform,
    pub native_id: String,
}

impl ItemId {
    #[must_use]
    pub fn new(platform: Platform, native_id: impl Into<String>) -> Self {
        Self {
            platform,
            native_id: native_id.into(),
        }
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.platform, self.native_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Carousel,
    Audio,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub url: String,
}

/// Organic vs. paid verdict for a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionLabel {
    Organic,
    Paid,
    Uncertain,
}

impl PromotionLabel {
    /// `>= 0.7` is paid, `<= 0.3` is organic, anything between is uncertain.
    #[must_use]
    pub fn from_probability(probability: f64) -> Self {
        if probability >= 0.7 {
            PromotionLabel::Paid
        } else if probability <= 0.3 {
            PromotionLabel::Organic
        } else {
            PromotionLabel::Uncertain
        }
    }
}

/// One piece of public content observed on one platform.
///
/// `item_id` never changes once created and `last_seen_at` only moves
/// forward; use [`ContentItem::merge_observation`] to fold a newer
/// observation of the same item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub item_id: ItemId,
    pub author_handle: String,
    pub author_reach: Option<u64>,
    /// Lowercased, whitespace-collapsed text used for matching.
    pub text: String,
    /// Original-case text retained for display.
    pub display_text: String,
    pub media_refs: Vec<MediaRef>,
    /// Normalized hashtags and keywords, without the leading `#`.
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub is_promoted: bool,
    pub promotion: PromotionLabel,
    pub promotion_probability: f64,
    pub bot_score: f64,
    /// Set when `bot_score` exceeded the configured threshold. Flagged items
    /// are kept for audit but never seed or join a trend.
    pub bot_flagged: bool,
}

impl ContentItem {
    #[must_use]
    pub fn platform(&self) -> Platform {
        self.item_id.platform
    }

    /// Fold a newer observation of the same item into `self`.
    ///
    /// Identity and `created_at` are kept; descriptive fields are taken from
    /// `newer`; `last_seen_at` never moves backwards.
    pub fn merge_observation(&mut self, newer: ContentItem) {
        debug_assert_eq!(self.item_id, newer.item_id);
        let last_seen_at = self.last_seen_at.max(newer.last_seen_at);
        let created_at = self.created_at;
        let item_id = self.item_id.clone();
        *self = newer;
        self.item_id = item_id;
        self.created_at = created_at;
        self.last_seen_at = last_seen_at;
    }
}

/// Point-in-time metric measurement of one item. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementSnapshot {
    pub item_id: ItemId,
    pub observed_at: DateTime<Utc>,
    pub metric_values: BTreeMap<String, u64>,
}

impl EngagementSnapshot {
    #[must_use]
    pub fn metric(&self, name: &str) -> u64 {
        self.metric_values.get(name).copied().unwrap_or(0)
    }

    /// Unweighted sum of likes, shares, comments and views.
    #[must_use]
    pub fn total_engagement(&self) -> u64 {
        [metric::LIKES, metric::SHARES, metric::COMMENTS, metric::VIEWS]
            .iter()
            .map(|m| self.metric(m))
            .fold(0u64, u64::saturating_add)
    }

    /// Interactions only (views excluded), used for engagement rates.
    #[must_use]
    pub fn interactions(&self) -> u64 {
        [metric::LIKES, metric::SHARES, metric::COMMENTS]
            .iter()
            .map(|m| self.metric(m))
            .fold(0u64, u64::saturating_add)
    }
}
