//! Ingestion normalizer.
//!
//! Maps per-platform payload batches onto canonical [`ContentItem`] +
//! [`EngagementSnapshot`] records, extracts hashtags and keywords, labels
//! promoted content, and assigns a bot score through a pluggable
//! [`BotScorer`]. Performs no I/O.
//!
//! [`ContentItem`]: trendscope_core::ContentItem
//! [`EngagementSnapshot`]: trendscope_core::EngagementSnapshot

pub mod bot;
pub mod error;
pub mod normalize;
pub mod promotion;
pub mod text;
pub mod types;

pub use bot::{BotScorer, HeuristicBotScorer};
pub use error::NormalizationError;
pub use normalize::{normalize_batch, NormalizedRecord};
pub use promotion::{PromotionDetector, PromotionInput, PromotionSignals};
pub use types::{IngestBatch, RawContentPayload, RawMedia};
