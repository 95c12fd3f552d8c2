//! Organic vs. paid classification of a single item.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use trendscope_core::PromotionLabel;

const WEIGHT_KEYWORD: f64 = 0.35;
const WEIGHT_PLATFORM_FLAG: f64 = 0.30;
const WEIGHT_ENGAGEMENT: f64 = 0.15;
const WEIGHT_BURST: f64 = 0.10;
const WEIGHT_BUSINESS: f64 = 0.10;

/// Likes per follower above which engagement is treated as boosted.
const ENGAGEMENT_ANOMALY_RATE: f64 = 0.10;
/// Likes per view below which reach looks bought rather than earned.
const BURST_LIKE_VIEW_RATIO: f64 = 0.005;
const BURST_MIN_LIKES: u64 = 100;

// `#` is not a word character, so tag keywords are bounded by whitespace
// rather than `\b`.
static SPONSOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:^|\s)#ad(?:\s|$)|(?:^|\s)#sponsored(?:\s|$)|(?:^|\s)#광고(?:\s|$)|(?:^|\s)#스폰서(?:\s|$)|paid\s*partnership|sponsored\s*post|브랜디드\s*콘텐츠|광고\s*포함",
    )
    .expect("valid sponsor keyword regex")
});

/// Inputs to the promotion detector, taken from the raw payload before
/// normalization discards platform-specific flags.
#[derive(Debug, Clone, Default)]
pub struct PromotionInput<'a> {
    pub text: &'a str,
    pub sponsor_label: bool,
    pub business_account: bool,
    pub author_reach: Option<u64>,
    pub likes: u64,
    pub comments: u64,
    pub views: u64,
}

/// Which promotion signals fired, plus the weighted probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PromotionSignals {
    pub keyword_detected: bool,
    pub platform_sponsor_flag: bool,
    pub engagement_anomaly: bool,
    pub burst_pattern: bool,
    pub business_account: bool,
    pub probability: f64,
}

impl PromotionSignals {
    #[must_use]
    pub fn label(&self) -> PromotionLabel {
        PromotionLabel::from_probability(self.probability)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PromotionDetector;

impl PromotionDetector {
    #[must_use]
    pub fn detect(&self, input: &PromotionInput<'_>) -> PromotionSignals {
        let keyword_detected = SPONSOR_RE.is_match(input.text);
        let engagement_anomaly = engagement_anomaly(input);
        let burst_pattern = burst_pattern(input);

        let probability = [
            (keyword_detected, WEIGHT_KEYWORD),
            (input.sponsor_label, WEIGHT_PLATFORM_FLAG),
            (engagement_anomaly, WEIGHT_ENGAGEMENT),
            (burst_pattern, WEIGHT_BURST),
            (input.business_account, WEIGHT_BUSINESS),
        ]
        .iter()
        .filter(|(fired, _)| *fired)
        .map(|(_, w)| w)
        .sum::<f64>();

        PromotionSignals {
            keyword_detected,
            platform_sponsor_flag: input.sponsor_label,
            engagement_anomaly,
            burst_pattern,
            business_account: input.business_account,
            probability: (probability * 1000.0).round() / 1000.0,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn engagement_anomaly(input: &PromotionInput<'_>) -> bool {
    match input.author_reach {
        Some(reach) if reach > 0 => input.likes as f64 / reach as f64 > ENGAGEMENT_ANOMALY_RATE,
        _ => false,
    }
}

#[allow(clippy::cast_precision_loss)]
fn burst_pattern(input: &PromotionInput<'_>) -> bool {
    if input.views > 0
        && input.likes > 0
        && (input.likes as f64 / input.views as f64) < BURST_LIKE_VIEW_RATIO
    {
        return true;
    }
    input.likes > BURST_MIN_LIKES && input.comments == 0
}
