use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use trendscope_core::{AppConfig, EngagementSnapshot, ItemId, Trend, TrendId};

use crate::{ArchiveStore, PersistOutcome, StoreError, TimeWindow, TrendFilters};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

// Path relative to crates/trendscope-store/Cargo.toml; resolves to <workspace-root>/migrations/
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_connections: config.db_max_connections,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct BodyRow {
    body: Json<Trend>,
}

#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    observed_at: DateTime<Utc>,
    metric_values: Json<BTreeMap<String, u64>>,
}

/// Archive backed by PostgreSQL: trend versions as JSONB documents keyed by
/// `(trend_id, last_updated_at)`, engagement snapshots as an append-only
/// time series.
#[derive(Debug, Clone)]
pub struct PgArchive {
    pool: PgPool,
}

impl PgArchive {
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool using explicit URL and config.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, config: PoolConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run all pending migrations. Returns the number that were applied.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Migration`] if any migration fails.
    pub async fn run_migrations(&self) -> Result<usize, StoreError> {
        // The _sqlx_migrations table does not exist on a fresh database.
        let applied_before: i64 =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = true")
                .fetch_one(&self.pool)
                .await
                .unwrap_or(0);

        MIGRATOR.run(&self.pool).await?;

        let applied_after: i64 =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = true")
                .fetch_one(&self.pool)
                .await
                .unwrap_or(0);

        let delta = (applied_after - applied_before).max(0);
        Ok(usize::try_from(delta).unwrap_or(0))
    }
}

/// Hex SHA-256 of the serialized trend, used to tell a harmless redelivery
/// from a conflicting write under the same version key.
fn content_hash(body: &[u8]) -> String {
    format!("{:x}", Sha256::digest(body))
}

async fn upsert_snapshots(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    snapshots: &[EngagementSnapshot],
) -> Result<(), StoreError> {
    for snapshot in snapshots {
        sqlx::query(
            "INSERT INTO engagement_snapshots (platform, native_id, observed_at, metric_values) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (platform, native_id, observed_at) \
             DO UPDATE SET metric_values = EXCLUDED.metric_values",
        )
        .bind(snapshot.item_id.platform.as_str())
        .bind(&snapshot.item_id.native_id)
        .bind(snapshot.observed_at)
        .bind(Json(&snapshot.metric_values))
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl ArchiveStore for PgArchive {
    async fn persist(
        &self,
        trend: &Trend,
        snapshots: &[EngagementSnapshot],
    ) -> Result<PersistOutcome, StoreError> {
        let encoded = serde_json::to_vec(trend)?;
        let hash = content_hash(&encoded);
        let body: serde_json::Value = serde_json::from_slice(&encoded)?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_scalar::<_, String>(
            "INSERT INTO trend_versions \
             (trend_id, last_updated_at, first_seen_at, state, category, virality_score, content_hash, body) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (trend_id, last_updated_at) DO NOTHING \
             RETURNING content_hash",
        )
        .bind(trend.trend_id)
        .bind(trend.last_updated_at)
        .bind(trend.first_seen_at)
        .bind(trend.state.as_str())
        .bind(trend.category.as_deref())
        .bind(trend.virality_score)
        .bind(&hash)
        .bind(Json(&body))
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = if inserted.is_some() {
            let archived = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM archived_trends WHERE trend_id = $1",
            )
            .bind(trend.trend_id)
            .fetch_one(&mut *tx)
            .await?;
            if archived > 0 {
                tx.rollback().await?;
                return Err(StoreError::ContractViolation(format!(
                    "trend {} is archived and cannot take new versions",
                    trend.trend_id
                )));
            }
            PersistOutcome::Stored
        } else {
            let existing = sqlx::query_scalar::<_, String>(
                "SELECT content_hash FROM trend_versions \
                 WHERE trend_id = $1 AND last_updated_at = $2",
            )
            .bind(trend.trend_id)
            .bind(trend.last_updated_at)
            .fetch_one(&mut *tx)
            .await?;
            if existing != hash {
                tx.rollback().await?;
                return Err(StoreError::ContractViolation(format!(
                    "trend {} version {} already stored with different content",
                    trend.trend_id, trend.last_updated_at
                )));
            }
            PersistOutcome::Duplicate
        };

        upsert_snapshots(&mut tx, snapshots).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn record_snapshots(&self, snapshots: &[EngagementSnapshot]) -> Result<usize, StoreError> {
        if snapshots.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        upsert_snapshots(&mut tx, snapshots).await?;
        tx.commit().await?;
        Ok(snapshots.len())
    }

    async fn archive(&self, trend: &Trend) -> Result<(), StoreError> {
        let body = serde_json::to_value(trend)?;
        sqlx::query(
            "INSERT INTO archived_trends (trend_id, archived_at, body) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (trend_id) DO NOTHING",
        )
        .bind(trend.trend_id)
        .bind(trend.last_updated_at)
        .bind(Json(&body))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query_range(
        &self,
        window: TimeWindow,
        filters: &TrendFilters,
    ) -> Result<Vec<Trend>, StoreError> {
        if window.is_empty() {
            return Ok(Vec::new());
        }
        let limit = filters.limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));
        let rows = sqlx::query_as::<_, BodyRow>(
            "WITH latest AS ( \
                SELECT DISTINCT ON (trend_id) \
                    trend_id, last_updated_at, first_seen_at, state, category, virality_score, body \
                FROM trend_versions \
                WHERE last_updated_at <= $2 \
                ORDER BY trend_id, last_updated_at DESC \
             ) \
             SELECT body FROM latest \
             WHERE first_seen_at <= $2 \
               AND last_updated_at >= $1 \
               AND ($3::text IS NULL OR category = $3) \
               AND ($4::text IS NULL OR state = $4) \
               AND ($5::text IS NULL OR jsonb_exists(body->'platforms', $5)) \
             ORDER BY virality_score DESC, trend_id \
             LIMIT $6",
        )
        .bind(window.from)
        .bind(window.to)
        .bind(filters.category.as_deref())
        .bind(filters.state.map(trendscope_core::TrendState::as_str))
        .bind(filters.platform.map(trendscope_core::Platform::as_str))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.body.0).collect())
    }

    async fn get(&self, trend_id: TrendId) -> Result<Option<Trend>, StoreError> {
        let archived = sqlx::query_as::<_, BodyRow>(
            "SELECT body FROM archived_trends WHERE trend_id = $1",
        )
        .bind(trend_id)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = archived {
            return Ok(Some(row.body.0));
        }
        let latest = sqlx::query_as::<_, BodyRow>(
            "SELECT body FROM trend_versions WHERE trend_id = $1 \
             ORDER BY last_updated_at DESC LIMIT 1",
        )
        .bind(trend_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(latest.map(|r| r.body.0))
    }

    async fn snapshots(&self, item_id: &ItemId) -> Result<Vec<EngagementSnapshot>, StoreError> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            "SELECT observed_at, metric_values FROM engagement_snapshots \
             WHERE platform = $1 AND native_id = $2 \
             ORDER BY observed_at",
        )
        .bind(item_id.platform.as_str())
        .bind(&item_id.native_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| EngagementSnapshot {
                item_id: item_id.clone(),
                observed_at: r.observed_at,
                metric_values: r.metric_values.0,
            })
            .collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_hex() {
        let a = content_hash(br#"{"a":1}"#);
        assert_eq!(a.len(), 64);
        assert_eq!(a, content_hash(br#"{"a":1}"#));
        assert_ne!(a, content_hash(br#"{"a":2}"#));
    }

    #[test]
    fn pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.acquire_timeout_secs, 10);
    }
}
