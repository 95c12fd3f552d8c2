use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use trendscope_core::{EngagementSnapshot, ItemId, Trend, TrendId};

use crate::{ArchiveStore, PersistOutcome, StoreError, TimeWindow, TrendFilters};

#[derive(Debug, Default)]
struct State {
    versions: HashMap<TrendId, BTreeMap<DateTime<Utc>, Trend>>,
    snapshots: HashMap<ItemId, BTreeMap<DateTime<Utc>, EngagementSnapshot>>,
    archived: HashMap<TrendId, Trend>,
}

/// Process-local archive. Used when no database is configured, by the CLI,
/// and as the reference implementation in tests.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    state: Mutex<State>,
}

impl MemoryArchive {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored versions for one trend.
    #[must_use]
    pub fn version_count(&self, trend_id: TrendId) -> usize {
        self.lock().versions.get(&trend_id).map_or(0, BTreeMap::len)
    }

    #[must_use]
    pub fn is_archived(&self, trend_id: TrendId) -> bool {
        self.lock().archived.contains_key(&trend_id)
    }

    /// Latest version of every stored trend, in id order.
    #[must_use]
    pub fn latest_versions(&self) -> Vec<Trend> {
        let state = self.lock();
        let mut out: Vec<Trend> = state
            .versions
            .values()
            .filter_map(|v| v.values().next_back().cloned())
            .collect();
        out.sort_by_key(|t| t.trend_id);
        out
    }
}

fn insert_snapshots(state: &mut State, snapshots: &[EngagementSnapshot]) {
    for snapshot in snapshots {
        state
            .snapshots
            .entry(snapshot.item_id.clone())
            .or_default()
            .insert(snapshot.observed_at, snapshot.clone());
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchive {
    async fn persist(
        &self,
        trend: &Trend,
        snapshots: &[EngagementSnapshot],
    ) -> Result<PersistOutcome, StoreError> {
        let mut state = self.lock();
        let outcome = match state
            .versions
            .get(&trend.trend_id)
            .and_then(|v| v.get(&trend.last_updated_at))
        {
            Some(existing) if existing == trend => PersistOutcome::Duplicate,
            Some(_) => {
                return Err(StoreError::ContractViolation(format!(
                    "trend {} version {} already stored with different content",
                    trend.trend_id, trend.last_updated_at
                )));
            }
            None if state.archived.contains_key(&trend.trend_id) => {
                return Err(StoreError::ContractViolation(format!(
                    "trend {} is archived and cannot take new versions",
                    trend.trend_id
                )));
            }
            None => {
                state
                    .versions
                    .entry(trend.trend_id)
                    .or_default()
                    .insert(trend.last_updated_at, trend.clone());
                PersistOutcome::Stored
            }
        };

        insert_snapshots(&mut state, snapshots);
        Ok(outcome)
    }

    async fn record_snapshots(&self, snapshots: &[EngagementSnapshot]) -> Result<usize, StoreError> {
        insert_snapshots(&mut self.lock(), snapshots);
        Ok(snapshots.len())
    }

    async fn archive(&self, trend: &Trend) -> Result<(), StoreError> {
        let mut state = self.lock();
        state
            .versions
            .entry(trend.trend_id)
            .or_default()
            .entry(trend.last_updated_at)
            .or_insert_with(|| trend.clone());
        state
            .archived
            .entry(trend.trend_id)
            .or_insert_with(|| trend.clone());
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
        let state = self.lock();
        let mut out: Vec<Trend> = state
            .versions
            .values()
            .filter_map(|versions| versions.range(..=window.to).next_back().map(|(_, t)| t))
            .filter(|t| window.overlaps(t.first_seen_at, t.last_updated_at))
            .filter(|t| filters.matches(t))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.virality_score
                .total_cmp(&a.virality_score)
                .then(a.trend_id.cmp(&b.trend_id))
        });
        if let Some(limit) = filters.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn get(&self, trend_id: TrendId) -> Result<Option<Trend>, StoreError> {
        let state = self.lock();
        if let Some(final_state) = state.archived.get(&trend_id) {
            return Ok(Some(final_state.clone()));
        }
        Ok(state
            .versions
            .get(&trend_id)
            .and_then(|v| v.values().next_back().cloned()))
    }

    async fn snapshots(&self, item_id: &ItemId) -> Result<Vec<EngagementSnapshot>, StoreError> {
        Ok(self
            .lock()
            .snapshots
            .get(item_id)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
