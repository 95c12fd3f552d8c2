use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::platform::Platform;
use crate::ConfigError;

/// Weights for the composite engagement metric the aggregator differentiates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricWeights {
    pub likes: f64,
    pub shares: f64,
    pub comments: f64,
    pub views: f64,
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            likes: 1.0,
            shares: 2.0,
            comments: 1.5,
            views: 0.1,
        }
    }
}

/// Weights of the three clustering similarity terms. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityWeights {
    pub tags: f64,
    pub shingles: f64,
    pub temporal: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            tags: 0.5,
            shingles: 0.3,
            temporal: 0.2,
        }
    }
}

/// Weights of the four virality terms. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViralityWeights {
    pub velocity: f64,
    pub spread: f64,
    pub influence: f64,
    pub pattern: f64,
}

impl Default for ViralityWeights {
    fn default() -> Self {
        Self {
            velocity: 0.40,
            spread: 0.25,
            influence: 0.20,
            pattern: 0.15,
        }
    }
}

/// Per-cycle sentiment shift (fraction, `0.30` = 30 points) at which each
/// crisis severity starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrisisBands {
    pub watch: f64,
    pub warning: f64,
    pub critical: f64,
}

impl Default for CrisisBands {
    fn default() -> Self {
        Self {
            watch: 0.15,
            warning: 0.25,
            critical: 0.40,
        }
    }
}

/// What a full per-platform intake queue does with the next batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Evict the oldest queued batch to make room.
    DropOldest,
    /// Reject the batch so the adapter pauses polling.
    Pause,
}

impl std::str::FromStr for BackpressurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop_oldest" => Ok(BackpressurePolicy::DropOldest),
            "pause" => Ok(BackpressurePolicy::Pause),
            other => Err(format!(
                "expected \"drop_oldest\" or \"pause\", got \"{other}\""
            )),
        }
    }
}

/// Every tunable threshold and weight of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    // Ingestion
    pub bot_score_threshold: f64,
    pub queue_capacity: usize,
    pub backpressure: BackpressurePolicy,
    /// Classifier outputs held between cycles; overflow follows `backpressure`.
    pub signal_queue_capacity: usize,

    // Windowed aggregation
    pub window_secs: u64,
    pub window_capacity: usize,
    pub ema_alpha: f64,
    pub metric_weights: MetricWeights,
    pub volume_thresholds: BTreeMap<Platform, u64>,
    /// An item whose newest snapshot is older than this contributes no velocity.
    pub stale_after_secs: u64,

    // Clustering
    pub similarity: SimilarityWeights,
    pub merge_threshold: f64,
    pub temporal_window_secs: u64,
    /// How much an existing signature decays each time a new member joins.
    pub signature_recency_bias: f64,
    pub signature_max_tags: usize,

    // Lifecycle
    pub cycle_interval_secs: u64,
    pub emerging_percentile: f64,
    pub trending_cycles: u32,
    pub peak_confirm_cycles: u32,
    pub declining_cycles: u32,
    pub cooldown_secs: u64,
    pub max_trend_age_secs: u64,
    pub quiet_velocity_epsilon: f64,
    pub acceleration_epsilon: f64,

    // Scoring
    pub virality: ViralityWeights,
    pub category_history_len: usize,
    pub min_category_samples: usize,
    /// Z-score mapped to a velocity score of 1.0.
    pub velocity_z_ceiling: f64,
    pub spread_saturation: usize,
    pub influence_saturation: f64,
    pub top_sources_limit: usize,
    pub crisis_bands: CrisisBands,
    /// When non-empty, crisis alerts fire only for trends whose signature
    /// contains one of these keywords.
    pub branded_keywords: BTreeSet<String>,
    pub pattern_library_path: Option<PathBuf>,
    pub recent_alerts_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bot_score_threshold: 0.85,
            queue_capacity: 1024,
            backpressure: BackpressurePolicy::DropOldest,
            signal_queue_capacity: 65_536,
            window_secs: 6 * 3600,
            window_capacity: 128,
            ema_alpha: 0.3,
            metric_weights: MetricWeights::default(),
            volume_thresholds: Platform::ALL
                .iter()
                .map(|p| (*p, p.default_volume_threshold()))
                .collect(),
            stale_after_secs: 900,
            similarity: SimilarityWeights::default(),
            merge_threshold: 0.6,
            temporal_window_secs: 3600,
            signature_recency_bias: 0.2,
            signature_max_tags: 32,
            cycle_interval_secs: 300,
            emerging_percentile: 0.8,
            trending_cycles: 2,
            peak_confirm_cycles: 2,
            declining_cycles: 3,
            cooldown_secs: 2 * 3600,
            max_trend_age_secs: 30 * 24 * 3600,
            quiet_velocity_epsilon: 0.001,
            acceleration_epsilon: 1e-6,
            virality: ViralityWeights::default(),
            category_history_len: 256,
            min_category_samples: 5,
            velocity_z_ceiling: 2.0,
            spread_saturation: 3,
            influence_saturation: 1_000_000.0,
            top_sources_limit: 5,
            crisis_bands: CrisisBands::default(),
            branded_keywords: BTreeSet::new(),
            pattern_library_path: None,
            recent_alerts_limit: 200,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn volume_threshold(&self, platform: Platform) -> u64 {
        self.volume_thresholds
            .get(&platform)
            .copied()
            .unwrap_or_else(|| platform.default_volume_threshold())
    }

    /// Check every invariant the pipeline relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |name: &str, v: f64| -> Result<(), ConfigError> {
            if v.is_finite() && (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{name} must be in [0, 1], got {v}")))
            }
        };
        let positive = |name: &str, v: u64| -> Result<(), ConfigError> {
            if v == 0 {
                Err(ConfigError::Invalid(format!("{name} must be greater than zero")))
            } else {
                Ok(())
            }
        };

        unit("bot_score_threshold", self.bot_score_threshold)?;
        unit("merge_threshold", self.merge_threshold)?;
        unit("emerging_percentile", self.emerging_percentile)?;
        unit("signature_recency_bias", self.signature_recency_bias)?;
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "ema_alpha must be in (0, 1], got {}",
                self.ema_alpha
            )));
        }

        let s = self.similarity;
        for (name, w) in [("tags", s.tags), ("shingles", s.shingles), ("temporal", s.temporal)] {
            unit(&format!("similarity weight {name}"), w)?;
        }
        check_sum("similarity weights", s.tags + s.shingles + s.temporal)?;

        let v = self.virality;
        for (name, w) in [
            ("velocity", v.velocity),
            ("spread", v.spread),
            ("influence", v.influence),
            ("pattern", v.pattern),
        ] {
            unit(&format!("virality weight {name}"), w)?;
        }
        check_sum("virality weights", v.velocity + v.spread + v.influence + v.pattern)?;

        let m = self.metric_weights;
        if [m.likes, m.shares, m.comments, m.views]
            .iter()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err(ConfigError::Invalid(
                "metric weights must be finite and non-negative".into(),
            ));
        }

        let c = self.crisis_bands;
        unit("crisis watch band", c.watch)?;
        unit("crisis warning band", c.warning)?;
        unit("crisis critical band", c.critical)?;
        if !(c.watch > 0.0 && c.watch < c.warning && c.warning < c.critical) {
            return Err(ConfigError::Invalid(format!(
                "crisis bands must satisfy 0 < watch < warning < critical, got {} / {} / {}",
                c.watch, c.warning, c.critical
            )));
        }

        positive("window_secs", self.window_secs)?;
        positive("cycle_interval_secs", self.cycle_interval_secs)?;
        positive("cooldown_secs", self.cooldown_secs)?;
        positive("max_trend_age_secs", self.max_trend_age_secs)?;
        positive("temporal_window_secs", self.temporal_window_secs)?;
        positive("stale_after_secs", self.stale_after_secs)?;
        if self.window_capacity < 2 {
            return Err(ConfigError::Invalid(
                "window_capacity must hold at least two snapshots".into(),
            ));
        }
        for (name, n) in [
            ("queue_capacity", self.queue_capacity),
            ("signal_queue_capacity", self.signal_queue_capacity),
            ("category_history_len", self.category_history_len),
            ("spread_saturation", self.spread_saturation),
            ("top_sources_limit", self.top_sources_limit),
            ("signature_max_tags", self.signature_max_tags),
        ] {
            if n == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        for (name, n) in [
            ("trending_cycles", self.trending_cycles),
            ("peak_confirm_cycles", self.peak_confirm_cycles),
        ] {
            if n == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        if self.declining_cycles < self.peak_confirm_cycles {
            return Err(ConfigError::Invalid(format!(
                "declining_cycles ({}) must be at least peak_confirm_cycles ({})",
                self.declining_cycles, self.peak_confirm_cycles
            )));
        }
        if !(self.velocity_z_ceiling.is_finite() && self.velocity_z_ceiling > 0.0) {
            return Err(ConfigError::Invalid(
                "velocity_z_ceiling must be positive".into(),
            ));
        }
        if !(self.influence_saturation.is_finite() && self.influence_saturation > 0.0) {
            return Err(ConfigError::Invalid(
                "influence_saturation must be positive".into(),
            ));
        }
        if self.quiet_velocity_epsilon < 0.0 || self.acceleration_epsilon < 0.0 {
            return Err(ConfigError::Invalid("epsilons must be non-negative".into()));
        }
        Ok(())
    }
}

fn check_sum(name: &str, sum: f64) -> Result<(), ConfigError> {
    if (sum - 1.0).abs() > 1e-6 {
        return Err(ConfigError::Invalid(format!("{name} must sum to 1.0, got {sum}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_similarity_weights_not_summing_to_one() {
        let mut cfg = EngineConfig::default();
        cfg.similarity.tags = 0.7;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("similarity weights"), "{err}");
    }

    #[test]
    fn rejects_unordered_crisis_bands() {
        let mut cfg = EngineConfig::default();
        cfg.crisis_bands.warning = 0.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_alpha() {
        let cfg = EngineConfig {
            ema_alpha: 0.0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_signal_queue_capacity() {
        let cfg = EngineConfig {
            signal_queue_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_single_slot_window() {
        let cfg = EngineConfig {
            window_capacity: 1,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn volume_threshold_falls_back_to_platform_default() {
        let mut cfg = EngineConfig::default();
        cfg.volume_thresholds.clear();
        assert_eq!(cfg.volume_threshold(Platform::TikTok), 200);
    }
}
