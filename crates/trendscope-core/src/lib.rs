//! Canonical event model and configuration shared by every trendscope crate.

pub mod alert;
pub mod app_config;
pub mod config;
pub mod engine_config;
pub mod item;
pub mod platform;
pub mod trend;

pub use alert::{Alert, AlertKind, AlertSeverity};
pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env, load_engine_config_from_env};
pub use engine_config::{
    BackpressurePolicy, CrisisBands, EngineConfig, MetricWeights, SimilarityWeights,
    ViralityWeights,
};
pub use item::{metric, ContentItem, EngagementSnapshot, ItemId, MediaKind, MediaRef, PromotionLabel};
pub use platform::Platform;
pub use trend::{
    PromotionMix, ScoreTerm, SentimentBreakdown, SentimentDistribution, SourceContribution,
    Trend, TrendId, TrendLevel, TrendState, ViralityBreakdown,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("invalid engine configuration: {0}")]
    Invalid(String),

    #[error("failed to read {path}: {source}")]
    FileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML: {0}")]
    FileParse(#[from] serde_yaml::Error),
}
