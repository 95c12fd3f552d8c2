//! Background aggregation cycle.
//!
//! One repeating job drives [`TrendEngine::run_cycle`] at the configured
//! cadence and hands the cycle's writes to the [`Archiver`]. The engine
//! serialises cycles internally, so an overrunning cycle delays the next
//! one instead of running alongside it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use trendscope_core::Trend;
use trendscope_engine::{AuditRecord, EngineError, PersistRequest, TrendEngine};
use trendscope_store::{Archiver, DeliveryReport, StoreError};

/// Shared by the cycle job and the shutdown path.
pub struct CycleContext {
    engine: TrendEngine,
    archiver: Mutex<Archiver>,
    fatal: watch::Sender<Option<String>>,
}

impl CycleContext {
    pub fn new(
        engine: TrendEngine,
        archiver: Archiver,
        fatal: watch::Sender<Option<String>>,
    ) -> Self {
        Self {
            engine,
            archiver: Mutex::new(archiver),
            fatal,
        }
    }

    /// Runs one cycle at `now` and delivers its writes.
    ///
    /// A storage contract violation is reported through the fatal channel so
    /// the server stops; an unavailable store only leaves writes queued.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let output = match self.engine.run_cycle(now).await {
            Ok(output) => output,
            Err(EngineError::ShuttingDown) => {
                tracing::debug!("scheduler: engine shutting down, skipping cycle");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "scheduler: aggregation cycle failed");
                return;
            }
        };

        let mut archiver = self.archiver.lock().await;
        enqueue_writes(&mut archiver, output.persist, output.archive, output.audit);
        match archiver.deliver().await {
            Ok(report) => log_delivery(&report),
            Err(e) => self.report_fatal(&e),
        }
    }

    /// Stops intake, flushes every open trend and delivers what is left.
    ///
    /// # Errors
    ///
    /// Returns the store error that prevented the final delivery.
    pub async fn drain(&self, now: DateTime<Utc>) -> Result<DeliveryReport, StoreError> {
        let flushed = self.engine.shutdown(now).await;
        let mut archiver = self.archiver.lock().await;
        enqueue_writes(&mut archiver, flushed.persist, Vec::new(), flushed.audit);
        let report = archiver.deliver().await?;
        if report.pending > 0 {
            tracing::warn!(
                pending = report.pending,
                "archive store unavailable at shutdown; unwritten trend versions are lost"
            );
        }
        Ok(report)
    }

    fn report_fatal(&self, error: &StoreError) {
        tracing::error!(error = %error, "archive store contract violation, stopping server");
        self.fatal.send_replace(Some(error.to_string()));
    }
}

fn enqueue_writes(
    archiver: &mut Archiver,
    persist: Vec<PersistRequest>,
    archive: Vec<Trend>,
    audit: Vec<AuditRecord>,
) {
    for request in persist {
        archiver.enqueue_persist(request.trend, request.snapshots);
    }
    for trend in archive {
        archiver.enqueue_archive(trend);
    }
    archiver.enqueue_snapshots(audit.into_iter().flat_map(|r| r.snapshots).collect());
}

fn log_delivery(report: &DeliveryReport) {
    tracing::debug!(
        stored = report.stored,
        duplicates = report.duplicates,
        archived = report.archived,
        audited = report.audited,
        pending = report.pending,
        dropped = report.dropped,
        "archive delivery complete"
    );
}

/// Builds and starts the scheduler with the aggregation cycle job.
///
/// The returned handle must be kept alive for the lifetime of the process.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// the job cannot be registered, or the scheduler fails to start.
pub async fn build_scheduler(
    context: Arc<CycleContext>,
    interval: Duration,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;
    register_cycle_job(&scheduler, context, interval).await?;
    scheduler.start().await?;
    Ok(scheduler)
}

async fn register_cycle_job(
    scheduler: &JobScheduler,
    context: Arc<CycleContext>,
    interval: Duration,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
        let context = Arc::clone(&context);
        Box::pin(async move {
            context.tick(Utc::now()).await;
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(interval_secs = interval.as_secs(), "scheduler: aggregation cycle registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use trendscope_core::{EngineConfig, Platform};
    use trendscope_ingest::{IngestBatch, RawContentPayload};
    use trendscope_store::{MemoryArchive, RetryPolicy};

    use super::*;

    fn context(store: Arc<MemoryArchive>) -> (CycleContext, watch::Receiver<Option<String>>) {
        let engine = TrendEngine::new(EngineConfig::default()).unwrap();
        let archiver = Archiver::new(
            store,
            RetryPolicy {
                max_retries: 0,
                backoff_base_ms: 0,
            },
        );
        let (tx, rx) = watch::channel(None);
        (CycleContext::new(engine, archiver, tx), rx)
    }

    fn batch(now: DateTime<Utc>) -> IngestBatch {
        IngestBatch {
            platform: Platform::Reddit,
            fetched_at: now,
            raw_items: vec![RawContentPayload {
                native_id: "t3_abc".to_string(),
                author_handle: Some("poster".to_string()),
                hashtags: vec!["rustlang".to_string()],
                metrics: BTreeMap::from([("likes".to_string(), 400)]),
                ..RawContentPayload::default()
            }],
        }
    }

    #[tokio::test]
    async fn tick_persists_cycle_output() {
        let store = Arc::new(MemoryArchive::new());
        let (ctx, fatal) = context(Arc::clone(&store));
        let now = Utc::now();
        ctx.engine.submit(&batch(now));

        ctx.tick(now).await;

        let stored = store.latest_versions();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].platforms.contains(&Platform::Reddit));
        assert!(fatal.borrow().is_none());
    }

    #[tokio::test]
    async fn drain_flushes_and_stops_further_cycles() {
        let store = Arc::new(MemoryArchive::new());
        let (ctx, _fatal) = context(Arc::clone(&store));
        let now = Utc::now();
        ctx.engine.submit(&batch(now));
        ctx.tick(now).await;
        let trend_id = store.latest_versions()[0].trend_id;
        assert_eq!(store.version_count(trend_id), 1);

        // A fresh reading that no cycle has seen yet.
        ctx.engine.submit(&batch(now + chrono::Duration::minutes(1)));
        let report = ctx.drain(now + chrono::Duration::minutes(2)).await.unwrap();
        assert_eq!(report.stored, 1);
        assert_eq!(store.version_count(trend_id), 2);

        ctx.tick(now + chrono::Duration::minutes(5)).await;
        assert_eq!(store.version_count(trend_id), 2);
        assert!(ctx.engine.is_shutting_down());
    }
}
