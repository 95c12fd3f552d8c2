//! Offline replay of recorded ingest batches.
//!
//! The input is JSON Lines, one [`IngestBatch`] per line. Batches are fed in
//! `fetched_at` order and the simulated clock runs a cycle every time it
//! crosses a cycle boundary, so a recording behaves as it did live.

use std::path::Path;

use anyhow::Context;
use trendscope_core::EngineConfig;
use trendscope_engine::SubmitOutcome;
use trendscope_ingest::IngestBatch;

use crate::session::{Session, Summary};

pub fn read_batches(contents: &str) -> anyhow::Result<Vec<IngestBatch>> {
    let mut batches = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let batch: IngestBatch = serde_json::from_str(line)
            .with_context(|| format!("line {}: invalid ingest batch", index + 1))?;
        batches.push(batch);
    }
    batches.sort_by_key(|b| b.fetched_at);
    Ok(batches)
}

pub async fn run_replay(config: EngineConfig, file: &Path) -> anyhow::Result<Summary> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let batches = read_batches(&contents)?;
    let mut session = Session::new(config)?;

    let Some(first) = batches.first() else {
        tracing::warn!(file = %file.display(), "replay file holds no batches");
        return session.finish(chrono::Utc::now()).await;
    };
    let mut boundary = first.fetched_at + session.interval();
    let mut clock = first.fetched_at;

    for batch in &batches {
        while batch.fetched_at >= boundary {
            session.cycle(boundary).await?;
            boundary += session.interval();
        }
        clock = batch.fetched_at;
        if let SubmitOutcome::Rejected { reason } = session.engine().submit(batch) {
            tracing::warn!(
                platform = %batch.platform,
                fetched_at = %batch.fetched_at,
                reason = %reason,
                "replayed batch rejected"
            );
        }
    }

    let last = boundary.max(clock);
    session.cycle(last).await?;
    session.finish(last).await
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Write;

    use chrono::{Duration, TimeZone, Utc};
    use trendscope_core::Platform;
    use trendscope_ingest::RawContentPayload;

    use super::*;

    fn batch(platform: Platform, id: &str, minute: i64, likes: i64) -> IngestBatch {
        let at = Utc.with_ymd_and_hms(2026, 5, 2, 12, 0, 0).unwrap() + Duration::minutes(minute);
        IngestBatch {
            platform,
            fetched_at: at,
            raw_items: vec![RawContentPayload {
                native_id: id.to_string(),
                author_handle: Some(format!("author_{id}")),
                hashtags: vec!["marathon".to_string(), "citylights".to_string()],
                created_at: Some(at - Duration::minutes(10)),
                metrics: BTreeMap::from([("likes".to_string(), likes)]),
                ..RawContentPayload::default()
            }],
        }
    }

    fn write_lines(batches: &[IngestBatch]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for b in batches {
            writeln!(file, "{}", serde_json::to_string(b).unwrap()).unwrap();
            writeln!(file).unwrap();
        }
        file
    }

    #[test]
    fn batches_are_sorted_by_fetch_time() {
        let lines = [batch(Platform::X, "b", 10, 900), batch(Platform::X, "a", 0, 600)]
            .iter()
            .map(|b| serde_json::to_string(b).unwrap())
            .collect::<Vec<_>>()
            .join("\n\n");
        let batches = read_batches(&lines).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].raw_items[0].native_id, "a");
    }

    #[test]
    fn bad_line_is_reported_with_its_number() {
        let good = serde_json::to_string(&batch(Platform::X, "a", 0, 600)).unwrap();
        let err = read_batches(&format!("{good}\nnot json\n")).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[tokio::test]
    async fn replay_clusters_recorded_traffic() {
        let file = write_lines(&[
            batch(Platform::X, "x-1", 0, 600),
            batch(Platform::TikTok, "tt-1", 1, 800),
            batch(Platform::X, "x-1", 6, 1_400),
            batch(Platform::TikTok, "tt-1", 7, 2_000),
        ]);
        let summary = run_replay(EngineConfig::default(), file.path()).await.unwrap();
        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.trends.len(), 1);
        assert_eq!(
            summary.trends[0].platforms.iter().copied().collect::<Vec<_>>(),
            vec![Platform::TikTok, Platform::X]
        );
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = run_replay(EngineConfig::default(), &dir.path().join("absent.jsonl")).await;
        assert!(result.is_err());
    }
}
