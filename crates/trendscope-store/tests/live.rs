//! Live integration tests for the Postgres archive using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated database from the sqlx test
//! harness (requires `DATABASE_URL`). The `migrations` path is relative to
//! `crates/trendscope-store/`.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::PgPool;
use trendscope_core::{EngagementSnapshot, ItemId, Platform, Trend, TrendState};
use trendscope_store::{
    ArchiveStore, PersistOutcome, PgArchive, StoreError, TimeWindow, TrendFilters,
};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn t(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes)
}

fn trend(native_id: &str, first_seen: i64, updated: i64, score: f64) -> Trend {
    let mut trend = Trend::seeded(
        Uuid::new_v4(),
        ItemId::new(Platform::TikTok, native_id),
        t(first_seen),
        t(first_seen),
    );
    trend.last_updated_at = t(updated);
    trend.virality_score = score;
    trend
}

fn snapshot(native_id: &str, observed: i64, views: u64) -> EngagementSnapshot {
    EngagementSnapshot {
        item_id: ItemId::new(Platform::TikTok, native_id),
        observed_at: t(observed),
        metric_values: BTreeMap::from([("views".to_string(), views)]),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn persist_is_idempotent_per_version(pool: PgPool) {
    let store = PgArchive::from_pool(pool.clone());
    let trend = trend("v1", 0, 5, 33.0);
    let snaps = [snapshot("v1", 5, 900)];

    assert_eq!(
        store.persist(&trend, &snaps).await.unwrap(),
        PersistOutcome::Stored
    );
    assert_eq!(
        store.persist(&trend, &snaps).await.unwrap(),
        PersistOutcome::Duplicate
    );

    let versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trend_versions")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(versions, 1);
    let stored = store.get(trend.trend_id).await.unwrap().unwrap();
    assert_eq!(stored.trend_id, trend.trend_id);
    assert_eq!(stored.last_updated_at, trend.last_updated_at);
}

#[sqlx::test(migrations = "../../migrations")]
async fn conflicting_version_is_a_contract_violation(pool: PgPool) {
    let store = PgArchive::from_pool(pool);
    let mut trend = trend("v2", 0, 5, 10.0);
    store.persist(&trend, &[]).await.unwrap();
    trend.state = TrendState::Emerging;
    let err = store.persist(&trend, &[]).await.unwrap_err();
    assert!(matches!(err, StoreError::ContractViolation(_)));
}

#[sqlx::test(migrations = "../../migrations")]
async fn snapshots_come_back_in_observation_order(pool: PgPool) {
    let store = PgArchive::from_pool(pool);
    let trend = trend("v3", 0, 10, 10.0);
    store
        .persist(&trend, &[snapshot("v3", 10, 500), snapshot("v3", 0, 100)])
        .await
        .unwrap();
    let mut next = trend.clone();
    next.last_updated_at = t(15);
    store.persist(&next, &[snapshot("v3", 5, 300)]).await.unwrap();

    let history = store
        .snapshots(&ItemId::new(Platform::TikTok, "v3"))
        .await
        .unwrap();
    let observed: Vec<_> = history.iter().map(|s| s.observed_at).collect();
    assert_eq!(observed, vec![t(0), t(5), t(10)]);
    assert_eq!(history[1].metric("views"), 300);
}

#[sqlx::test(migrations = "../../migrations")]
async fn untracked_snapshots_are_recorded_without_a_trend(pool: PgPool) {
    let store = PgArchive::from_pool(pool.clone());
    let snaps = [snapshot("bot1", 0, 5_000), snapshot("bot1", 5, 9_000)];
    assert_eq!(store.record_snapshots(&snaps).await.unwrap(), 2);
    // Redelivery overwrites in place.
    store.record_snapshots(&snaps[1..]).await.unwrap();

    let history = store
        .snapshots(&ItemId::new(Platform::TikTok, "bot1"))
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].metric("views"), 9_000);
    let versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trend_versions")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(versions, 0);
}

#[sqlx::test(migrations = "../../migrations")]
async fn archived_trend_refuses_new_versions(pool: PgPool) {
    let store = PgArchive::from_pool(pool);
    let mut trend = trend("v4", 0, 5, 10.0);
    trend.state = TrendState::Archived;
    store.persist(&trend, &[]).await.unwrap();
    store.archive(&trend).await.unwrap();
    store.archive(&trend).await.unwrap();

    let mut later = trend.clone();
    later.last_updated_at = t(60);
    assert!(matches!(
        store.persist(&later, &[]).await,
        Err(StoreError::ContractViolation(_))
    ));
    let fetched = store.get(trend.trend_id).await.unwrap().unwrap();
    assert_eq!(fetched.state, TrendState::Archived);
}

#[sqlx::test(migrations = "../../migrations")]
async fn query_range_filters_and_orders(pool: PgPool) {
    let store = PgArchive::from_pool(pool);
    let mut music = trend("m", 0, 20, 40.0);
    music.category = Some("music".into());
    let mut sports = trend("s", 10, 30, 80.0);
    sports.category = Some("sports".into());
    let late = trend("l", 500, 510, 90.0);
    for stored in [&music, &sports, &late] {
        store.persist(stored, &[]).await.unwrap();
    }

    let window = TimeWindow::new(t(0), t(60));
    let all = store
        .query_range(window, &TrendFilters::default())
        .await
        .unwrap();
    let ids: Vec<_> = all.iter().map(|found| found.trend_id).collect();
    assert_eq!(ids, vec![sports.trend_id, music.trend_id]);

    let only_music = store
        .query_range(
            window,
            &TrendFilters {
                category: Some("music".into()),
                ..TrendFilters::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(only_music.len(), 1);
    assert_eq!(only_music[0].trend_id, music.trend_id);

    let on_x = store
        .query_range(
            window,
            &TrendFilters {
                platform: Some(Platform::X),
                ..TrendFilters::default()
            },
        )
        .await
        .unwrap();
    assert!(on_x.is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn health_check_succeeds(pool: PgPool) {
    PgArchive::from_pool(pool).health_check().await.unwrap();
}
