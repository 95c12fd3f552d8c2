//! Buffered, retrying delivery of trend writes to an [`ArchiveStore`].
//!
//! The aggregation cycle never waits on storage: it enqueues writes here and
//! keeps operating on in-memory state. Writes that still fail after the
//! retry budget stay queued for the next delivery attempt.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use trendscope_core::{EngagementSnapshot, Trend};

use crate::retry::retry_with_backoff;
use crate::{ArchiveStore, PersistOutcome, StoreError};

const DEFAULT_BACKLOG_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
pub enum PendingWrite {
    Persist {
        trend: Trend,
        snapshots: Vec<EngagementSnapshot>,
    },
    Archive(Trend),
    /// Engagement outside any trend, kept for audit.
    Snapshots(Vec<EngagementSnapshot>),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub stored: usize,
    pub duplicates: usize,
    pub archived: usize,
    /// Audit snapshots written.
    pub audited: usize,
    /// Writes left in the backlog because the store stayed unavailable.
    pub pending: usize,
    /// Writes discarded since startup because the backlog was full.
    pub dropped: u64,
}

enum Delivered {
    Persisted(PersistOutcome),
    Archived,
    Audited(usize),
}

pub struct Archiver {
    store: Arc<dyn ArchiveStore>,
    policy: RetryPolicy,
    capacity: usize,
    backlog: VecDeque<PendingWrite>,
    dropped: u64,
}

impl std::fmt::Debug for Archiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archiver")
            .field("policy", &self.policy)
            .field("capacity", &self.capacity)
            .field("backlog", &self.backlog.len())
            .field("dropped", &self.dropped)
            .finish_non_exhaustive()
    }
}

impl Archiver {
    #[must_use]
    pub fn new(store: Arc<dyn ArchiveStore>, policy: RetryPolicy) -> Self {
        Self::with_capacity(store, policy, DEFAULT_BACKLOG_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(store: Arc<dyn ArchiveStore>, policy: RetryPolicy, capacity: usize) -> Self {
        Self {
            store,
            policy,
            capacity: capacity.max(1),
            backlog: VecDeque::new(),
            dropped: 0,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArchiveStore> {
        &self.store
    }

    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn enqueue(&mut self, write: PendingWrite) {
        if self.backlog.len() >= self.capacity {
            if let Some(evicted) = self.backlog.pop_front() {
                self.dropped += 1;
                match &evicted {
                    PendingWrite::Persist { trend, .. } | PendingWrite::Archive(trend) => {
                        tracing::warn!(
                            trend_id = %trend.trend_id,
                            capacity = self.capacity,
                            "archive backlog full, dropping oldest write"
                        );
                    }
                    PendingWrite::Snapshots(snapshots) => {
                        tracing::warn!(
                            snapshots = snapshots.len(),
                            capacity = self.capacity,
                            "archive backlog full, dropping oldest audit write"
                        );
                    }
                }
            }
        }
        self.backlog.push_back(write);
    }

    pub fn enqueue_persist(&mut self, trend: Trend, snapshots: Vec<EngagementSnapshot>) {
        self.enqueue(PendingWrite::Persist { trend, snapshots });
    }

    pub fn enqueue_archive(&mut self, trend: Trend) {
        self.enqueue(PendingWrite::Archive(trend));
    }

    /// Queues trend-less snapshots; an empty set is ignored.
    pub fn enqueue_snapshots(&mut self, snapshots: Vec<EngagementSnapshot>) {
        if !snapshots.is_empty() {
            self.enqueue(PendingWrite::Snapshots(snapshots));
        }
    }

    /// Delivers queued writes in order until the backlog is empty or the
    /// store stays unavailable past the retry budget.
    ///
    /// # Errors
    ///
    /// Returns the first non-retriable error (for example
    /// [`StoreError::ContractViolation`]); the offending write is removed
    /// from the backlog so the rest can still be delivered later.
    pub async fn deliver(&mut self) -> Result<DeliveryReport, StoreError> {
        let mut report = DeliveryReport::default();
        while let Some(write) = self.backlog.front() {
            let store = &self.store;
            let result = match write {
                PendingWrite::Persist { trend, snapshots } => {
                    retry_with_backoff(self.policy.max_retries, self.policy.backoff_base_ms, || {
                        store.persist(trend, snapshots)
                    })
                    .await
                    .map(Delivered::Persisted)
                }
                PendingWrite::Archive(trend) => {
                    retry_with_backoff(self.policy.max_retries, self.policy.backoff_base_ms, || {
                        store.archive(trend)
                    })
                    .await
                    .map(|()| Delivered::Archived)
                }
                PendingWrite::Snapshots(snapshots) => {
                    retry_with_backoff(self.policy.max_retries, self.policy.backoff_base_ms, || {
                        store.record_snapshots(snapshots)
                    })
                    .await
                    .map(Delivered::Audited)
                }
            };
            match result {
                Ok(Delivered::Persisted(PersistOutcome::Stored)) => report.stored += 1,
                Ok(Delivered::Persisted(PersistOutcome::Duplicate)) => report.duplicates += 1,
                Ok(Delivered::Archived) => report.archived += 1,
                Ok(Delivered::Audited(written)) => report.audited += written,
                Err(err) if err.is_retriable() => {
                    tracing::warn!(
                        error = %err,
                        pending = self.backlog.len(),
                        "archive store still unavailable, keeping writes queued"
                    );
                    break;
                }
                Err(err) => {
                    self.backlog.pop_front();
                    tracing::error!(error = %err, "archive write rejected");
                    return Err(err);
                }
            }
            self.backlog.pop_front();
        }
        report.pending = self.backlog.len();
        report.dropped = self.dropped;
        Ok(report)
    }
}
