use chrono::{DateTime, Utc};
use trendscope_core::{
    Alert, AlertKind, AlertSeverity, CrisisBands, SentimentBreakdown, Trend,
};

use crate::signature::TrendSignature;

const SPIKE_CRITICAL_SCORE: f64 = 80.0;
const SPIKE_WARNING_SCORE: f64 = 60.0;

/// Spike alert for a trend that has just entered `trending`. Severity
/// follows the virality score.
#[must_use]
pub fn spike_alert(trend: &Trend, at: DateTime<Utc>) -> Alert {
    let score = trend.virality_score;
    let severity = if score >= SPIKE_CRITICAL_SCORE {
        AlertSeverity::Critical
    } else if score >= SPIKE_WARNING_SCORE {
        AlertSeverity::Warning
    } else {
        AlertSeverity::Watch
    };
    Alert {
        trend_id: trend.trend_id,
        kind: AlertKind::Spike,
        severity,
        triggered_at: at,
        trigger_metric: "virality_score".to_string(),
        trigger_value: score,
    }
}

/// Severity band for a sentiment shift given as a fraction (`0.30` = 30
/// percentage points).
#[must_use]
pub fn crisis_severity(delta: f64, bands: &CrisisBands) -> Option<AlertSeverity> {
    if delta >= bands.critical {
        Some(AlertSeverity::Critical)
    } else if delta >= bands.warning {
        Some(AlertSeverity::Warning)
    } else if delta >= bands.watch {
        Some(AlertSeverity::Watch)
    } else {
        None
    }
}

/// Crisis alert when sentiment turned sharply negative since the previous
/// cycle: the larger of the positive-share drop and the negative-share rise
/// is compared against the crisis bands.
///
/// Nothing fires unless both breakdowns carry confidence, or when
/// `branded_keywords` is non-empty and the trend's signature contains none
/// of them.
#[must_use]
pub fn crisis_alert(
    trend: &Trend,
    signature: &TrendSignature,
    previous: &SentimentBreakdown,
    current: &SentimentBreakdown,
    bands: &CrisisBands,
    branded_keywords: &std::collections::BTreeSet<String>,
    at: DateTime<Utc>,
) -> Option<Alert> {
    if previous.confidence <= 0.0 || current.confidence <= 0.0 {
        return None;
    }
    if !branded_keywords.is_empty() && !branded_keywords.iter().any(|k| signature.has_tag(k)) {
        return None;
    }
    let positive_drop = (previous.positive - current.positive) / 100.0;
    let negative_rise = (current.negative - previous.negative) / 100.0;
    let (metric, delta) = if positive_drop >= negative_rise {
        ("sentiment_positive_drop", positive_drop)
    } else {
        ("sentiment_negative_rise", negative_rise)
    };
    let severity = crisis_severity(delta, bands)?;
    Some(Alert {
        trend_id: trend.trend_id,
        kind: AlertKind::Crisis,
        severity,
        triggered_at: at,
        trigger_metric: metric.to_string(),
        trigger_value: delta,
    })
}
