//! Offline engine run shared by `demo` and `replay`: the engine, an
//! in-memory archive and a simulated clock.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use trendscope_core::{Alert, EngineConfig, Trend};
use trendscope_engine::{AuditRecord, CycleReport, TrendEngine};
use trendscope_store::{Archiver, MemoryArchive, RetryPolicy};

pub struct Session {
    engine: TrendEngine,
    archive: Arc<MemoryArchive>,
    archiver: Archiver,
    interval: Duration,
    cycles: u64,
}

/// Final state of an offline run.
#[derive(Debug)]
pub struct Summary {
    pub cycles: u64,
    /// Latest version of every trend seen, strongest first.
    pub trends: Vec<Trend>,
    /// Newest first.
    pub alerts: Vec<Alert>,
}

impl Session {
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        let interval = Duration::seconds(i64::try_from(config.cycle_interval_secs)?);
        let engine = TrendEngine::new(config)?;
        let archive = Arc::new(MemoryArchive::new());
        let archiver = Archiver::new(
            archive.clone(),
            RetryPolicy {
                max_retries: 0,
                backoff_base_ms: 0,
            },
        );
        Ok(Self {
            engine,
            archive,
            archiver,
            interval,
            cycles: 0,
        })
    }

    pub fn engine(&self) -> &TrendEngine {
        &self.engine
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one cycle at `now` and archives its output.
    pub async fn cycle(&mut self, now: DateTime<Utc>) -> anyhow::Result<CycleReport> {
        let output = self.engine.run_cycle(now).await?;
        for request in output.persist {
            self.archiver.enqueue_persist(request.trend, request.snapshots);
        }
        for trend in output.archive {
            self.archiver.enqueue_archive(trend);
        }
        self.enqueue_audit(output.audit);
        self.archiver.deliver().await?;
        self.cycles += 1;
        Ok(output.report)
    }

    fn enqueue_audit(&mut self, audit: Vec<AuditRecord>) {
        self.archiver
            .enqueue_snapshots(audit.into_iter().flat_map(|r| r.snapshots).collect());
    }

    /// Flushes open trends and collects the final picture.
    pub async fn finish(mut self, now: DateTime<Utc>) -> anyhow::Result<Summary> {
        let flushed = self.engine.shutdown(now).await;
        for request in flushed.persist {
            self.archiver.enqueue_persist(request.trend, request.snapshots);
        }
        self.enqueue_audit(flushed.audit);
        self.archiver.deliver().await?;

        let mut trends = self.archive.latest_versions();
        trends.sort_by(|a, b| {
            b.virality_score
                .total_cmp(&a.virality_score)
                .then(a.trend_id.cmp(&b.trend_id))
        });
        Ok(Summary {
            cycles: self.cycles,
            trends,
            alerts: self.engine.recent_alerts(usize::MAX),
        })
    }
}

pub fn print_summary(summary: &Summary) {
    println!(
        "\n{} cycles, {} trends, {} alerts\n",
        summary.cycles,
        summary.trends.len(),
        summary.alerts.len()
    );
    if summary.trends.is_empty() {
        println!("no trends detected");
        return;
    }
    println!(
        "{:<8}  {:<10}  {:<12}  {:>6}  {:>7}  {:>7}  {:<24}  tags",
        "trend", "state", "level", "score", "members", "organic", "platforms"
    );
    for trend in &summary.trends {
        let id = trend.trend_id.to_string();
        let platforms = trend
            .platforms
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:<8}  {:<10}  {:<12}  {:>6.1}  {:>7}  {:>6.0}%  {:<24}  {}",
            &id[..8],
            trend.state.as_str(),
            format!("{:?}", trend.level),
            trend.virality_score,
            trend.member_count(),
            trend.promotion_mix.organic_ratio * 100.0,
            platforms,
            trend.signature_tags.iter().take(4).cloned().collect::<Vec<_>>().join(" "),
        );
    }
    for alert in summary.alerts.iter().take(10) {
        println!(
            "alert {:?}/{:?} on {} ({} = {:.2}) at {}",
            alert.kind,
            alert.severity,
            alert.trend_id,
            alert.trigger_metric,
            alert.trigger_value,
            alert.triggered_at
        );
    }
}

/// Writes the trends as a JSON array to
/// `<dir>/trend_<stem>_<YYYYmmdd_HHMMSS>.json`.
pub fn export_json(summary: &Summary, dir: &Path, stem: &str) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let file_name = format!(
        "trend_{}_{}.json",
        stem.split_whitespace().collect::<Vec<_>>().join("_"),
        Utc::now().format("%Y%m%d_%H%M%S")
    );
    let path = dir.join(file_name);
    let body = serde_json::to_vec_pretty(&summary.trends)?;
    fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
