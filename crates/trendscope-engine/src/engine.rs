//! Shared handle around the pipeline: per-platform intake queues in front,
//! a watch channel of the open-trend view and an alert broadcast behind.
//!
//! Submitting never waits on a running cycle. Batches are normalized on the
//! caller's task and parked in a bounded queue for their platform; the next
//! cycle drains every queue under the pipeline lock.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use trendscope_core::{
    Alert, AlertSeverity, BackpressurePolicy, EngineConfig, Platform, Trend, TrendId,
};
use trendscope_ingest::{normalize_batch, BotScorer, HeuristicBotScorer, IngestBatch, NormalizedRecord};

use crate::classify::SignalInput;
use crate::error::EngineError;
use crate::pipeline::{CycleOutput, FinalFlush, IngestReport, Pipeline};

const ALERT_CHANNEL_CAPACITY: usize = 256;

/// Result of [`TrendEngine::submit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Accepted {
        items: usize,
        /// Older batches evicted from the platform queue to make room.
        dropped_batches: usize,
    },
    Rejected {
        reason: String,
    },
}

/// Read-side snapshot published after every cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineView {
    pub cycle: u64,
    pub updated_at: Option<DateTime<Utc>>,
    pub trends: Vec<Trend>,
}

impl EngineView {
    #[must_use]
    pub fn trend(&self, trend_id: &TrendId) -> Option<&Trend> {
        self.trends.iter().find(|t| &t.trend_id == trend_id)
    }
}

/// Intake counters since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntakeStats {
    pub accepted_batches: u64,
    pub rejected_batches: u64,
    pub dropped_batches: u64,
}

#[derive(Debug)]
struct QueuedBatch {
    records: Vec<NormalizedRecord>,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
}

struct Inner {
    config: EngineConfig,
    scorer: Box<dyn BotScorer>,
    queues: BTreeMap<Platform, Mutex<VecDeque<QueuedBatch>>>,
    signals: Mutex<VecDeque<SignalInput>>,
    pipeline: tokio::sync::Mutex<Pipeline>,
    view: watch::Sender<Arc<EngineView>>,
    alerts: broadcast::Sender<Alert>,
    recent_alerts: Mutex<VecDeque<Alert>>,
    shutting_down: AtomicBool,
    counters: Counters,
}

/// Cheap-to-clone handle to the running engine.
#[derive(Clone)]
pub struct TrendEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TrendEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrendEngine")
            .field("queue_depths", &self.queue_depths())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

impl TrendEngine {
    /// Engine with default classifiers, matcher and bot scorer.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] when the configuration is invalid.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let pipeline = Pipeline::from_config(config)?;
        Ok(Self::with_parts(pipeline, Box::new(HeuristicBotScorer)))
    }

    #[must_use]
    pub fn with_parts(pipeline: Pipeline, scorer: Box<dyn BotScorer>) -> Self {
        let config = pipeline.config().clone();
        let queues = Platform::ALL
            .iter()
            .map(|p| (*p, Mutex::new(VecDeque::new())))
            .collect();
        let (view, _) = watch::channel(Arc::new(EngineView::default()));
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                scorer,
                queues,
                signals: Mutex::new(VecDeque::new()),
                pipeline: tokio::sync::Mutex::new(pipeline),
                view,
                alerts,
                recent_alerts: Mutex::new(VecDeque::new()),
                shutting_down: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Normalize `batch` and park it for the next cycle.
    ///
    /// Malformed batches are rejected whole. When the platform queue is
    /// full the configured backpressure policy applies: `drop_oldest`
    /// evicts the oldest queued batch, `pause` rejects this one.
    pub fn submit(&self, batch: &IngestBatch) -> SubmitOutcome {
        let inner = &self.inner;
        if self.is_shutting_down() {
            return self.reject(batch.platform, "engine is shutting down".to_string());
        }
        let records = match normalize_batch(batch, inner.scorer.as_ref(), inner.config.bot_score_threshold) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(platform = %e.platform, reason = %e.reason, "dropped malformed batch");
                return self.reject(batch.platform, e.to_string());
            }
        };
        let items = records.len();

        let Some(queue) = inner.queues.get(&batch.platform) else {
            return self.reject(batch.platform, format!("no intake queue for {}", batch.platform));
        };
        let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
        let mut dropped_batches = 0;
        while queue.len() >= inner.config.queue_capacity {
            match inner.config.backpressure {
                BackpressurePolicy::DropOldest => {
                    if let Some(evicted) = queue.pop_front() {
                        dropped_batches += 1;
                        tracing::warn!(
                            platform = %batch.platform,
                            items = evicted.records.len(),
                            capacity = inner.config.queue_capacity,
                            "intake queue full, dropped oldest batch"
                        );
                    }
                }
                BackpressurePolicy::Pause => {
                    drop(queue);
                    tracing::warn!(
                        platform = %batch.platform,
                        capacity = inner.config.queue_capacity,
                        "intake queue full, pausing platform"
                    );
                    return self.reject(
                        batch.platform,
                        format!("intake queue for {} is full", batch.platform),
                    );
                }
            }
        }
        queue.push_back(QueuedBatch { records });
        drop(queue);

        inner.counters.accepted.fetch_add(1, Ordering::Relaxed);
        inner
            .counters
            .dropped
            .fetch_add(dropped_batches as u64, Ordering::Relaxed);
        tracing::debug!(platform = %batch.platform, items, "batch accepted");
        SubmitOutcome::Accepted {
            items,
            dropped_batches,
        }
    }

    fn reject(&self, platform: Platform, reason: String) -> SubmitOutcome {
        self.inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(platform = %platform, reason = %reason, "batch rejected");
        SubmitOutcome::Rejected { reason }
    }

    /// Queue an ML collaborator output for the next cycle.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] after [`TrendEngine::shutdown`],
    /// [`EngineError::Signal`] when the payload is unusable and
    /// [`EngineError::SignalQueueFull`] when the queue is full under `pause`.
    pub fn submit_signal(&self, input: SignalInput) -> Result<(), EngineError> {
        if self.is_shutting_down() {
            return Err(EngineError::ShuttingDown);
        }
        input.validate()?;
        let capacity = self.inner.config.signal_queue_capacity;
        let mut queue = self
            .inner
            .signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while queue.len() >= capacity {
            match self.inner.config.backpressure {
                BackpressurePolicy::DropOldest => {
                    if let Some(evicted) = queue.pop_front() {
                        tracing::warn!(
                            item_id = %evicted.item_id,
                            capacity,
                            "signal queue full, dropped oldest signal"
                        );
                    }
                }
                BackpressurePolicy::Pause => {
                    drop(queue);
                    tracing::warn!(capacity, "signal queue full, refusing signal");
                    return Err(EngineError::SignalQueueFull { capacity });
                }
            }
        }
        queue.push_back(input);
        Ok(())
    }

    #[must_use]
    pub fn signal_queue_depth(&self) -> usize {
        self.inner
            .signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drain the intake queues and run one aggregation cycle at `now`.
    ///
    /// The cycle runs to completion once the pipeline lock is held.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] after [`TrendEngine::shutdown`].
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleOutput, EngineError> {
        if self.is_shutting_down() {
            return Err(EngineError::ShuttingDown);
        }
        let mut pipeline = self.inner.pipeline.lock().await;
        if self.is_shutting_down() {
            return Err(EngineError::ShuttingDown);
        }
        let ingested = self.drain_into(&mut pipeline);
        let mut out = pipeline.run_cycle(now);
        out.report.ingested = ingested;

        self.inner.view.send_replace(Arc::new(EngineView {
            cycle: out.report.cycle,
            updated_at: Some(now),
            trends: pipeline.open_trends(),
        }));
        drop(pipeline);

        self.dispatch_alerts(&out.alerts);
        Ok(out)
    }

    fn drain_into(&self, pipeline: &mut Pipeline) -> IngestReport {
        let signals = std::mem::take(
            &mut *self
                .inner
                .signals
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for signal in signals {
            let item_id = signal.item_id.clone();
            if let Err(e) = pipeline.submit_signal(signal) {
                tracing::debug!(item_id = %item_id, error = %e, "signal ignored");
            }
        }

        let mut report = IngestReport::default();
        for (platform, queue) in &self.inner.queues {
            let batches = std::mem::take(&mut *queue.lock().unwrap_or_else(PoisonError::into_inner));
            if batches.is_empty() {
                continue;
            }
            let mut platform_report = IngestReport::default();
            for batch in batches {
                platform_report.absorb(pipeline.ingest(batch.records));
            }
            tracing::debug!(
                platform = %platform,
                items = platform_report.items,
                late_arrivals = platform_report.late_arrivals,
                newly_eligible = platform_report.newly_eligible,
                bot_flagged = platform_report.bot_flagged,
                "drained intake queue"
            );
            report.absorb(platform_report);
        }
        report
    }

    fn dispatch_alerts(&self, alerts: &[Alert]) {
        if alerts.is_empty() {
            return;
        }
        let limit = self.inner.config.recent_alerts_limit;
        let mut recent = self
            .inner
            .recent_alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for alert in alerts {
            match alert.severity {
                AlertSeverity::Watch => tracing::info!(
                    trend_id = %alert.trend_id,
                    kind = ?alert.kind,
                    severity = %alert.severity,
                    metric = %alert.trigger_metric,
                    value = alert.trigger_value,
                    "alert"
                ),
                AlertSeverity::Warning | AlertSeverity::Critical => tracing::warn!(
                    trend_id = %alert.trend_id,
                    kind = ?alert.kind,
                    severity = %alert.severity,
                    metric = %alert.trigger_metric,
                    value = alert.trigger_value,
                    "alert"
                ),
            }
            recent.push_back(alert.clone());
            while recent.len() > limit {
                recent.pop_front();
            }
            // No subscribers is fine; the ring still records it.
            let _ = self.inner.alerts.send(alert.clone());
        }
    }

    /// Stop accepting work, wait for any in-flight cycle, fold whatever is
    /// still queued into the pipeline and return the final persist set along
    /// with any bot-flagged engagement not yet audited.
    pub async fn shutdown(&self, now: DateTime<Utc>) -> FinalFlush {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let mut pipeline = self.inner.pipeline.lock().await;
        let leftover = self.drain_into(&mut pipeline);
        if leftover.items > 0 {
            tracing::info!(items = leftover.items, "folded queued items before shutdown");
        }
        FinalFlush {
            persist: pipeline.flush(now),
            audit: pipeline.drain_audit(),
        }
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn view(&self) -> Arc<EngineView> {
        self.inner.view.borrow().clone()
    }

    #[must_use]
    pub fn watch_view(&self) -> watch::Receiver<Arc<EngineView>> {
        self.inner.view.subscribe()
    }

    #[must_use]
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.inner.alerts.subscribe()
    }

    /// Up to `limit` most recent alerts, newest first.
    #[must_use]
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.inner
            .recent_alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn queue_depths(&self) -> BTreeMap<Platform, usize> {
        self.inner
            .queues
            .iter()
            .map(|(p, q)| (*p, q.lock().unwrap_or_else(PoisonError::into_inner).len()))
            .collect()
    }

    #[must_use]
    pub fn intake_stats(&self) -> IntakeStats {
        let c = &self.inner.counters;
        IntakeStats {
            accepted_batches: c.accepted.load(Ordering::Relaxed),
            rejected_batches: c.rejected.load(Ordering::Relaxed),
            dropped_batches: c.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, TimeZone};
    use trendscope_ingest::RawContentPayload;

    use super::*;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 8, 0, 0).unwrap()
    }

    fn batch(platform: Platform, native_id: &str, likes: i64) -> IngestBatch {
        IngestBatch {
            platform,
            fetched_at: base(),
            raw_items: vec![RawContentPayload {
                native_id: native_id.to_string(),
                author_handle: Some("someone".into()),
                hashtags: vec!["launch".into()],
                created_at: Some(base() - Duration::minutes(5)),
                metrics: BTreeMap::from([("likes".to_string(), likes)]),
                ..RawContentPayload::default()
            }],
        }
    }

    fn engine(config: EngineConfig) -> TrendEngine {
        TrendEngine::new(config).unwrap()
    }

    #[test]
    fn malformed_batch_is_rejected() {
        let engine = engine(EngineConfig::default());
        let out = engine.submit(&batch(Platform::X, "", 10));
        assert!(matches!(out, SubmitOutcome::Rejected { .. }));
        assert_eq!(engine.intake_stats().rejected_batches, 1);
        assert_eq!(engine.queue_depths()[&Platform::X], 0);
    }

    #[test]
    fn full_queue_drops_oldest_by_default() {
        let engine = engine(EngineConfig {
            queue_capacity: 2,
            ..EngineConfig::default()
        });
        for i in 0..3 {
            engine.submit(&batch(Platform::Reddit, &format!("r{i}"), 1));
        }
        assert_eq!(engine.queue_depths()[&Platform::Reddit], 2);
        assert_eq!(engine.intake_stats().dropped_batches, 1);
    }

    #[test]
    fn full_queue_rejects_under_pause() {
        let engine = engine(EngineConfig {
            queue_capacity: 1,
            backpressure: BackpressurePolicy::Pause,
            ..EngineConfig::default()
        });
        assert!(matches!(
            engine.submit(&batch(Platform::Threads, "a", 1)),
            SubmitOutcome::Accepted { .. }
        ));
        assert!(matches!(
            engine.submit(&batch(Platform::Threads, "b", 1)),
            SubmitOutcome::Rejected { .. }
        ));
        // Other platforms are unaffected.
        assert!(matches!(
            engine.submit(&batch(Platform::X, "c", 1)),
            SubmitOutcome::Accepted { .. }
        ));
    }

    #[tokio::test]
    async fn cycle_drains_queues_and_publishes_view() {
        let engine = engine(EngineConfig::default());
        engine.submit(&batch(Platform::X, "x1", 500));
        let out = engine.run_cycle(base()).await.unwrap();
        assert_eq!(out.report.ingested.items, 1);
        assert_eq!(out.report.created, 1);
        assert_eq!(engine.queue_depths()[&Platform::X], 0);

        let view = engine.view();
        assert_eq!(view.cycle, 1);
        assert_eq!(view.trends.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_work_and_flushes() {
        let engine = engine(EngineConfig::default());
        engine.submit(&batch(Platform::X, "x1", 500));
        engine.run_cycle(base()).await.unwrap();
        engine.submit(&batch(Platform::X, "x1", 900));

        let flushed = engine.shutdown(base() + Duration::minutes(5)).await;
        assert_eq!(flushed.persist.len(), 1);
        assert_eq!(flushed.persist[0].snapshots.len(), 1);
        assert!(flushed.audit.is_empty());
        assert!(matches!(
            engine.run_cycle(base()).await,
            Err(EngineError::ShuttingDown)
        ));
        assert!(matches!(
            engine.submit(&batch(Platform::X, "x2", 1)),
            SubmitOutcome::Rejected { .. }
        ));
    }

    fn sentiment_signal(native_id: &str, positive: f64) -> SignalInput {
        use crate::classify::SignalPayload;
        use trendscope_core::{ItemId, SentimentDistribution};

        SignalInput {
            item_id: ItemId::new(Platform::X, native_id),
            payload: SignalPayload::Sentiment(SentimentDistribution {
                positive,
                ..SentimentDistribution::default()
            }),
            confidence: 0.9,
        }
    }

    #[test]
    fn invalid_signal_is_refused_immediately() {
        let engine = engine(EngineConfig::default());
        let err = engine.submit_signal(sentiment_signal("1", 0.0)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Signal(crate::classify::SignalRejection::EmptyDistribution)
        ));
        assert_eq!(engine.signal_queue_depth(), 0);
    }

    #[test]
    fn full_signal_queue_drops_oldest_by_default() {
        let engine = engine(EngineConfig {
            signal_queue_capacity: 2,
            ..EngineConfig::default()
        });
        for i in 0..5 {
            engine.submit_signal(sentiment_signal(&format!("s{i}"), 1.0)).unwrap();
        }
        assert_eq!(engine.signal_queue_depth(), 2);
    }

    #[test]
    fn full_signal_queue_refuses_under_pause() {
        let engine = engine(EngineConfig {
            signal_queue_capacity: 1,
            backpressure: BackpressurePolicy::Pause,
            ..EngineConfig::default()
        });
        engine.submit_signal(sentiment_signal("a", 1.0)).unwrap();
        assert!(matches!(
            engine.submit_signal(sentiment_signal("b", 1.0)),
            Err(EngineError::SignalQueueFull { capacity: 1 })
        ));
        assert_eq!(engine.signal_queue_depth(), 1);
    }

    #[tokio::test]
    async fn signals_are_refused_once_shutting_down() {
        let engine = engine(EngineConfig::default());
        engine.shutdown(base()).await;
        assert!(matches!(
            engine.submit_signal(sentiment_signal("late", 1.0)),
            Err(EngineError::ShuttingDown)
        ));
        assert_eq!(engine.signal_queue_depth(), 0);
    }
}
