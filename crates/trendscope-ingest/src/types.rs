use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trendscope_core::Platform;

/// One adapter fetch: every payload in it comes from `platform`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestBatch {
    pub platform: Platform,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub raw_items: Vec<RawContentPayload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMedia {
    /// `image`, `video`, `carousel`, `audio`, or a platform-native name
    /// (`IMAGE`, `VIDEO`, `CAROUSEL_ALBUM`, `REEL`, ...).
    pub kind: String,
    pub url: String,
}

/// A platform content payload as produced by an adapter.
///
/// Metric names may be canonical (`likes`, `shares`, `comments`, `views`) or
/// the platform's own (`like_count`, `repost_count`, `play_count`, ...).
/// Signed integers are accepted so negative values can be rejected as
/// malformed rather than failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawContentPayload {
    pub native_id: String,
    #[serde(default)]
    pub author_handle: Option<String>,
    #[serde(default)]
    pub author_reach: Option<i64>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media: Vec<RawMedia>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// When the metrics were read; defaults to the batch `fetched_at`.
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metrics: BTreeMap<String, i64>,
    /// Explicit promoted flag from the platform, when it exposes one.
    #[serde(default)]
    pub is_promoted: Option<bool>,
    #[serde(default)]
    pub sponsor_label: bool,
    #[serde(default)]
    pub business_account: bool,
    /// Upstream bot-filter score, when the adapter already has one.
    #[serde(default)]
    pub bot_score: Option<f64>,
}
