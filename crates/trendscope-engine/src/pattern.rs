//! Historical growth-curve matching for the virality pattern term.

use std::path::Path;

use serde::{Deserialize, Serialize};
use trendscope_core::ConfigError;

use crate::classify::Classified;

/// Every curve is resampled to this many points before comparison.
pub const CURVE_POINTS: usize = 16;
/// Observed curves shorter than this are not matched.
const MIN_OBSERVED_POINTS: usize = 3;
/// Learned curves kept per category; the oldest is dropped first.
const MAX_LEARNED_PER_CATEGORY: usize = 32;

/// Capability: compare a trend's velocity history against known shapes.
pub trait PatternMatcher: Send + Sync {
    /// Best similarity in `[0, 1]`, or `None` when there is nothing to
    /// compare against or not enough history.
    fn match_pattern(&self, category: Option<&str>, curve: &[f64]) -> Option<Classified<f64>>;

    /// Offer the curve of a trend that has just peaked.
    fn learn(&mut self, _category: Option<&str>, _curve: &[f64]) {}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthCurve {
    pub name: String,
    /// `None` matches every category.
    #[serde(default)]
    pub category: Option<String>,
    pub points: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternLibraryFile {
    #[serde(default)]
    pub curves: Vec<GrowthCurve>,
}

/// Load and validate a growth-curve library from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or contains an
/// unusable curve.
pub fn load_pattern_library(path: &Path) -> Result<PatternLibraryFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileIo {
        path: path.display().to_string(),
        source: e,
    })?;
    let library: PatternLibraryFile = serde_yaml::from_str(&content)?;
    validate_library(&library)?;
    Ok(library)
}

fn validate_library(library: &PatternLibraryFile) -> Result<(), ConfigError> {
    for curve in &library.curves {
        if curve.name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "growth curve name must be non-empty".to_string(),
            ));
        }
        if curve.points.len() < MIN_OBSERVED_POINTS {
            return Err(ConfigError::Invalid(format!(
                "growth curve '{}' needs at least {MIN_OBSERVED_POINTS} points",
                curve.name
            )));
        }
        if curve.points.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(ConfigError::Invalid(format!(
                "growth curve '{}' has negative or non-finite points",
                curve.name
            )));
        }
        if curve.points.iter().all(|p| *p <= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "growth curve '{}' is all zeros",
                curve.name
            )));
        }
    }
    Ok(())
}

/// Linear resample to `n` points, negatives clamped to zero, scaled so the
/// maximum is 1. Returns `None` for empty or all-zero input.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn normalize_curve(points: &[f64], n: usize) -> Option<Vec<f64>> {
    if points.is_empty() || n == 0 {
        return None;
    }
    let clamped: Vec<f64> = points.iter().map(|p| p.max(0.0)).collect();
    let resampled: Vec<f64> = if clamped.len() == 1 {
        vec![clamped[0]; n]
    } else {
        (0..n)
            .map(|i| {
                let pos = if n == 1 {
                    0.0
                } else {
                    i as f64 * (clamped.len() - 1) as f64 / (n - 1) as f64
                };
                let lo = pos.floor() as usize;
                let hi = (lo + 1).min(clamped.len() - 1);
                let frac = pos - lo as f64;
                clamped[lo] * (1.0 - frac) + clamped[hi] * frac
            })
            .collect()
    };
    let max = resampled.iter().copied().fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return None;
    }
    Some(resampled.into_iter().map(|p| p / max).collect())
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na <= 0.0 || nb <= 0.0 {
        return 0.0;
    }
    (dot / (na * nb)).clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
struct StoredCurve {
    name: String,
    category: Option<String>,
    shape: Vec<f64>,
}

/// Default matcher: cosine similarity between resampled, max-normalized
/// curves. Library curves for the trend's own category count fully;
/// category-agnostic curves count at half confidence.
#[derive(Debug, Clone, Default)]
pub struct CosineCurveMatcher {
    curves: Vec<StoredCurve>,
}

impl CosineCurveMatcher {
    /// Matcher seeded with a handful of generic shapes.
    #[must_use]
    pub fn with_builtin_curves() -> Self {
        let mut matcher = Self::default();
        for curve in builtin_curves() {
            matcher.add(&curve);
        }
        matcher
    }

    #[must_use]
    pub fn from_library(library: &PatternLibraryFile) -> Self {
        let mut matcher = Self::with_builtin_curves();
        for curve in &library.curves {
            matcher.add(curve);
        }
        matcher
    }

    pub fn add(&mut self, curve: &GrowthCurve) {
        if let Some(shape) = normalize_curve(&curve.points, CURVE_POINTS) {
            self.curves.push(StoredCurve {
                name: curve.name.clone(),
                category: curve.category.clone(),
                shape,
            });
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.curves.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }
}

impl PatternMatcher for CosineCurveMatcher {
    #[allow(clippy::cast_precision_loss)]
    fn match_pattern(&self, category: Option<&str>, curve: &[f64]) -> Option<Classified<f64>> {
        if curve.len() < MIN_OBSERVED_POINTS {
            return None;
        }
        let observed = normalize_curve(curve, CURVE_POINTS)?;
        let history_confidence = (curve.len() as f64 / CURVE_POINTS as f64).min(1.0);

        let mut best: Option<(f64, f64, &str)> = None;
        for stored in &self.curves {
            let source_confidence = match (&stored.category, category) {
                (None, _) => 0.5,
                (Some(c), Some(wanted)) if c == wanted => 1.0,
                _ => continue,
            };
            let similarity = cosine(&observed, &stored.shape);
            let better = best.is_none_or(|(s, c, _)| {
                similarity > s || ((similarity - s).abs() < f64::EPSILON && source_confidence > c)
            });
            if better {
                best = Some((similarity, source_confidence, stored.name.as_str()));
            }
        }

        best.map(|(similarity, source_confidence, name)| {
            tracing::trace!(curve = name, similarity, "best growth-curve match");
            Classified {
                value: similarity,
                confidence: history_confidence * source_confidence,
            }
        })
    }

    fn learn(&mut self, category: Option<&str>, curve: &[f64]) {
        let Some(category) = category else {
            return;
        };
        if curve.len() < MIN_OBSERVED_POINTS {
            return;
        }
        let learned_name = format!("learned:{category}");
        let learned: Vec<usize> = self
            .curves
            .iter()
            .enumerate()
            .filter(|(_, c)| c.name == learned_name)
            .map(|(i, _)| i)
            .collect();
        if learned.len() >= MAX_LEARNED_PER_CATEGORY {
            self.curves.remove(learned[0]);
        }
        self.add(&GrowthCurve {
            name: learned_name,
            category: Some(category.to_string()),
            points: curve.to_vec(),
        });
    }
}

fn builtin_curves() -> Vec<GrowthCurve> {
    let curve = |name: &str, points: &[f64]| GrowthCurve {
        name: name.to_string(),
        category: None,
        points: points.to_vec(),
    };
    vec![
        curve("spike", &[0.05, 0.3, 1.0, 0.6, 0.3, 0.15, 0.08, 0.04]),
        curve("steady_rise", &[0.1, 0.2, 0.3, 0.45, 0.6, 0.75, 0.9, 1.0]),
        curve("double_wave", &[0.1, 0.6, 1.0, 0.5, 0.3, 0.7, 0.9, 0.4]),
        curve("slow_burn", &[0.05, 0.1, 0.2, 0.4, 0.7, 1.0, 0.8, 0.5]),
    ]
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn normalize_resamples_and_scales() {
        let shape = normalize_curve(&[0.0, 2.0, 4.0], 5).unwrap();
        assert_eq!(shape.len(), 5);
        assert!((shape[0]).abs() < 1e-12);
        assert!((shape[2] - 0.5).abs() < 1e-12);
        assert!((shape[4] - 1.0).abs() < 1e-12);
        assert!(normalize_curve(&[0.0, -1.0], 4).is_none());
    }

    #[test]
    fn identical_shape_matches_fully() {
        let mut matcher = CosineCurveMatcher::default();
        matcher.add(&GrowthCurve {
            name: "ramp".into(),
            category: Some("tech".into()),
            points: vec![1.0, 2.0, 3.0, 4.0],
        });
        let out = matcher
            .match_pattern(Some("tech"), &[10.0, 20.0, 30.0, 40.0])
            .unwrap();
        assert!((out.value - 1.0).abs() < 1e-9);
        assert!((out.confidence - 0.25).abs() < 1e-9);
    }

    #[test]
    fn other_category_curves_are_ignored() {
        let mut matcher = CosineCurveMatcher::default();
        matcher.add(&GrowthCurve {
            name: "ramp".into(),
            category: Some("tech".into()),
            points: vec![1.0, 2.0, 3.0],
        });
        assert!(matcher.match_pattern(Some("food"), &[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn short_history_is_not_matched() {
        let matcher = CosineCurveMatcher::with_builtin_curves();
        assert!(matcher.match_pattern(None, &[1.0, 2.0]).is_none());
        let out = matcher.match_pattern(None, &[1.0, 2.0, 3.0]).unwrap();
        assert!(out.confidence < 0.5);
    }

    #[test]
    fn learned_curves_are_category_scoped_and_capped() {
        let mut matcher = CosineCurveMatcher::default();
        for _ in 0..40 {
            matcher.learn(Some("music"), &[1.0, 3.0, 2.0]);
        }
        assert_eq!(matcher.len(), MAX_LEARNED_PER_CATEGORY);
        let out = matcher.match_pattern(Some("music"), &[1.0, 3.0, 2.0]).unwrap();
        assert!((out.value - 1.0).abs() < 1e-9);
        matcher.learn(None, &[1.0, 3.0, 2.0]);
        assert_eq!(matcher.len(), MAX_LEARNED_PER_CATEGORY);
    }

    #[test]
    fn loads_yaml_library() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "curves:\n  - name: k-drama\n    category: entertainment\n    points: [0.1, 0.5, 1.0, 0.4]\n"
        )
        .unwrap();
        let library = load_pattern_library(file.path()).unwrap();
        assert_eq!(library.curves.len(), 1);
        let matcher = CosineCurveMatcher::from_library(&library);
        assert_eq!(matcher.len(), builtin_curves().len() + 1);
    }

    #[test]
    fn rejects_curve_with_negative_points() {
        let library = PatternLibraryFile {
            curves: vec![GrowthCurve {
                name: "bad".into(),
                category: None,
                points: vec![1.0, -2.0, 3.0],
            }],
        };
        assert!(matches!(validate_library(&library), Err(ConfigError::Invalid(_))));
    }
}
