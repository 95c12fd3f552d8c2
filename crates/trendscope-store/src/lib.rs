//! Archive Store interface for detected trends, with an in-memory
//! implementation and a PostgreSQL-backed one.
//!
//! The engine hands every dirty trend version and its members' engagement
//! snapshots to [`ArchiveStore::persist`], and archived trends to
//! [`ArchiveStore::archive`]. Delivery is at-least-once, so both operations
//! must be idempotent on `(trend_id, last_updated_at)`.

pub mod archiver;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trendscope_core::{EngagementSnapshot, ItemId, Platform, Trend, TrendId, TrendState};

pub use archiver::{Archiver, DeliveryReport, PendingWrite, RetryPolicy};
pub use error::StoreError;
pub use memory::MemoryArchive;
pub use postgres::{PgArchive, PoolConfig};
pub use retry::retry_with_backoff;

/// Result of a single `persist` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistOutcome {
    /// A new trend version was written.
    Stored,
    /// The same `(trend_id, last_updated_at)` with identical content was
    /// already present; nothing changed.
    Duplicate,
}

/// Closed time window `[from, to]` for historical queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    #[must_use]
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }

    /// Whether `[start, end]` intersects this window.
    #[must_use]
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start <= self.to && end >= self.from
    }
}

/// Optional narrowing applied by [`ArchiveStore::query_range`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendFilters {
    pub category: Option<String>,
    pub state: Option<TrendState>,
    pub platform: Option<Platform>,
    pub limit: Option<usize>,
}

impl TrendFilters {
    #[must_use]
    pub fn matches(&self, trend: &Trend) -> bool {
        if let Some(category) = &self.category {
            if trend.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if self.state.is_some_and(|s| s != trend.state) {
            return false;
        }
        if let Some(platform) = self.platform {
            if !trend.platforms.contains(&platform) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Writes one trend version plus engagement snapshots for its members.
    ///
    /// Re-delivering an identical version yields [`PersistOutcome::Duplicate`].
    /// A different body under an already stored version, or a new version of
    /// an archived trend, is a [`StoreError::ContractViolation`].
    async fn persist(
        &self,
        trend: &Trend,
        snapshots: &[EngagementSnapshot],
    ) -> Result<PersistOutcome, StoreError>;

    /// Records the final state of an archived trend. Idempotent.
    async fn archive(&self, trend: &Trend) -> Result<(), StoreError>;

    /// Latest stored version (as of `window.to`) of every trend whose
    /// `[first_seen_at, last_updated_at]` span overlaps the window, ordered
    /// by virality score descending, then trend id.
    async fn query_range(
        &self,
        window: TimeWindow,
        filters: &TrendFilters,
    ) -> Result<Vec<Trend>, StoreError>;

    /// Latest stored version of one trend, archived or not.
    async fn get(&self, trend_id: TrendId) -> Result<Option<Trend>, StoreError>;

    /// Writes engagement snapshots that belong to no trend, such as those of
    /// bot-flagged items kept for audit. Idempotent per
    /// `(item_id, observed_at)`; returns how many snapshots were written.
    async fn record_snapshots(&self, snapshots: &[EngagementSnapshot]) -> Result<usize, StoreError>;

    /// Stored engagement history of one item, ordered by `observed_at`.
    async fn snapshots(&self, item_id: &ItemId) -> Result<Vec<EngagementSnapshot>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
