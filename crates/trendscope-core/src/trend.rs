use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::item::{ItemId, PromotionLabel};
use crate::platform::Platform;

pub type TrendId = Uuid;

/// Lifecycle state of a [`Trend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendState {
    Candidate,
    Emerging,
    Trending,
    Peaked,
    Declining,
    Archived,
}

impl TrendState {
    #[must_use]
    pub fn is_open(self) -> bool {
        self != TrendState::Archived
    }

    /// Whether `self -> next` is a legal lifecycle step.
    ///
    /// Steps only move forward through the lifecycle, with one exception:
    /// `declining -> trending` (re-ignition). Any open state may be archived.
    #[must_use]
    pub fn can_transition_to(self, next: TrendState) -> bool {
        use TrendState::{Archived, Candidate, Declining, Emerging, Peaked, Trending};
        match (self, next) {
            (Archived, _) => false,
            (_, Archived) => true,
            (Declining, Trending) => true,
            (Candidate, Emerging)
            | (Emerging, Trending | Peaked)
            | (Trending, Peaked)
            | (Peaked, Declining) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TrendState::Candidate => "candidate",
            TrendState::Emerging => "emerging",
            TrendState::Trending => "trending",
            TrendState::Peaked => "peaked",
            TrendState::Declining => "declining",
            TrendState::Archived => "archived",
        }
    }
}

impl std::fmt::Display for TrendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TrendState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "candidate" => Ok(TrendState::Candidate),
            "emerging" => Ok(TrendState::Emerging),
            "trending" => Ok(TrendState::Trending),
            "peaked" => Ok(TrendState::Peaked),
            "declining" => Ok(TrendState::Declining),
            "archived" => Ok(TrendState::Archived),
            other => Err(format!("unknown trend state \"{other}\"")),
        }
    }
}

/// Per-item sentiment distribution supplied by a classifier.
///
/// Components are non-negative probabilities; [`SentimentDistribution::normalized`]
/// rescales them to sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SentimentDistribution {
    pub positive: f64,
    pub neutral: f64,
    pub negative: f64,
    pub mixed: f64,
}

impl SentimentDistribution {
    #[must_use]
    pub fn neutral() -> Self {
        Self {
            positive: 0.0,
            neutral: 1.0,
            negative: 0.0,
            mixed: 0.0,
        }
    }

    /// Returns `None` if every component is zero or any is negative/non-finite.
    #[must_use]
    pub fn normalized(self) -> Option<Self> {
        let parts = [self.positive, self.neutral, self.negative, self.mixed];
        if parts.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return None;
        }
        let sum: f64 = parts.iter().sum();
        if sum <= f64::EPSILON {
            return None;
        }
        Some(Self {
            positive: self.positive / sum,
            neutral: self.neutral / sum,
            negative: self.negative / sum,
            mixed: self.mixed / sum,
        })
    }
}

/// Trend-level sentiment in percentages that always sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentBreakdown {
    pub positive: f64,
    pub neutral: f64,
    pub negative: f64,
    pub mixed: f64,
    pub confidence: f64,
}

impl Default for SentimentBreakdown {
    fn default() -> Self {
        Self {
            positive: 0.0,
            neutral: 100.0,
            negative: 0.0,
            mixed: 0.0,
            confidence: 0.0,
        }
    }
}

impl SentimentBreakdown {
    #[must_use]
    pub fn total(&self) -> f64 {
        self.positive + self.neutral + self.negative + self.mixed
    }
}

/// An author contributing to a trend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceContribution {
    pub author_handle: String,
    pub platform: Platform,
    pub reach: Option<u64>,
    /// Number of member items by this author.
    pub volume: usize,
    pub engagement: u64,
    /// Interactions divided by reach; `0.0` when reach is unknown.
    pub engagement_rate: f64,
}

/// One weighted term of the virality score.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreTerm {
    /// Normalized value in `[0, 1]`.
    pub value: f64,
    pub weight: f64,
    /// Fraction of the term's expected signal that was actually present.
    pub confidence: f64,
}

impl ScoreTerm {
    #[must_use]
    pub fn contribution(&self) -> f64 {
        self.value * self.weight
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ViralityBreakdown {
    pub velocity: ScoreTerm,
    pub spread: ScoreTerm,
    pub influence: ScoreTerm,
    pub pattern: ScoreTerm,
    /// Aggregate score in `[0, 100]`.
    pub score: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PromotionMix {
    pub organic: usize,
    pub paid: usize,
    pub uncertain: usize,
    pub dominant: PromotionLabel,
    pub organic_ratio: f64,
}

impl Default for PromotionMix {
    fn default() -> Self {
        Self {
            organic: 0,
            paid: 0,
            uncertain: 0,
            dominant: PromotionLabel::Organic,
            organic_ratio: 1.0,
        }
    }
}

/// Coarse label derived from the virality score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendLevel {
    Hot,
    Trending,
    Rising,
    LowActivity,
    None,
}

impl TrendLevel {
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            TrendLevel::Hot
        } else if score >= 60.0 {
            TrendLevel::Trending
        } else if score >= 40.0 {
            TrendLevel::Rising
        } else if score >= 20.0 {
            TrendLevel::LowActivity
        } else {
            TrendLevel::None
        }
    }
}

/// A detected trend spanning one or more platforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub trend_id: TrendId,
    pub member_item_ids: BTreeSet<ItemId>,
    pub platforms: BTreeSet<Platform>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub state: TrendState,
    pub first_seen_at: DateTime<Utc>,
    pub peak_observed_at: Option<DateTime<Utc>>,
    /// Summed member velocity (weighted engagement per second).
    pub velocity: f64,
    /// Change in `velocity` since the previous cycle.
    pub acceleration: f64,
    pub velocity_score: f64,
    pub virality_score: f64,
    pub virality: ViralityBreakdown,
    pub level: TrendLevel,
    pub sentiment_breakdown: SentimentBreakdown,
    pub top_sources: Vec<SourceContribution>,
    pub promotion_mix: PromotionMix,
    /// Signature tags, strongest first.
    pub signature_tags: Vec<String>,
    /// Fraction of expected classifier payloads that were present.
    pub signal_coverage: f64,
    pub created_at_engine: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl Trend {
    /// Fresh `candidate` trend seeded by a single item.
    #[must_use]
    pub fn seeded(
        trend_id: TrendId,
        founder: ItemId,
        first_seen_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let platforms = BTreeSet::from([founder.platform]);
        Self {
            trend_id,
            member_item_ids: BTreeSet::from([founder]),
            platforms,
            category: None,
            subcategory: None,
            state: TrendState::Candidate,
            first_seen_at,
            peak_observed_at: None,
            velocity: 0.0,
            acceleration: 0.0,
            velocity_score: 0.0,
            virality_score: 0.0,
            virality: ViralityBreakdown::default(),
            level: TrendLevel::None,
            sentiment_breakdown: SentimentBreakdown::default(),
            top_sources: Vec::new(),
            promotion_mix: PromotionMix::default(),
            signature_tags: Vec::new(),
            signal_coverage: 0.0,
            created_at_engine: now,
            last_updated_at: now,
        }
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.member_item_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peaked_never_returns_to_emerging() {
        assert!(!TrendState::Peaked.can_transition_to(TrendState::Emerging));
        assert!(!TrendState::Peaked.can_transition_to(TrendState::Trending));
    }

    #[test]
    fn declining_may_reignite() {
        assert!(TrendState::Declining.can_transition_to(TrendState::Trending));
        assert!(!TrendState::Declining.can_transition_to(TrendState::Emerging));
    }

    #[test]
    fn archived_is_terminal() {
        for next in [
            TrendState::Candidate,
            TrendState::Emerging,
            TrendState::Trending,
            TrendState::Archived,
        ] {
            assert!(!TrendState::Archived.can_transition_to(next));
        }
    }

    #[test]
    fn distribution_normalizes_and_rejects_empty() {
        let dist = SentimentDistribution {
            positive: 2.0,
            neutral: 1.0,
            negative: 1.0,
            mixed: 0.0,
        }
        .normalized()
        .unwrap();
        assert!((dist.positive - 0.5).abs() < 1e-12);
        assert!(SentimentDistribution::default().normalized().is_none());
    }

    #[test]
    fn default_breakdown_sums_to_hundred() {
        assert!((SentimentBreakdown::default().total() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn level_bands() {
        assert_eq!(TrendLevel::from_score(85.0), TrendLevel::Hot);
        assert_eq!(TrendLevel::from_score(60.0), TrendLevel::Trending);
        assert_eq!(TrendLevel::from_score(45.0), TrendLevel::Rising);
        assert_eq!(TrendLevel::from_score(20.0), TrendLevel::LowActivity);
        assert_eq!(TrendLevel::from_score(3.0), TrendLevel::None);
    }
}
