//! Synthetic multi-platform traffic for the `demo` command.
//!
//! Each platform gets a feed of posts about one topic: roughly 30% follow a
//! high-engagement pattern and 20% carry promotion markers. Every cycle the
//! feed re-reports all of its posts with grown engagement, so the engine
//! sees real velocity.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use trendscope_core::{EngineConfig, Platform};
use trendscope_engine::SubmitOutcome;
use trendscope_ingest::{IngestBatch, RawContentPayload};

use crate::session::{Session, Summary};

const HIGH_ENGAGEMENT_SHARE: f64 = 0.3;
const PROMOTED_SHARE: f64 = 0.2;
const MAX_POSTS_PER_PLATFORM: usize = 50;

const AUTHORS: [&str; 10] = [
    "tech_insider",
    "daily_digest",
    "trend_watcher",
    "creator_studio",
    "brand_official",
    "news_hub",
    "lifestyle_mag",
    "data_nerd",
    "social_buzz",
    "casual_user",
];
const SPONSOR_MARKERS: [&str; 3] = ["#ad", "#sponsored", "Paid partnership"];

#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub topic: String,
    pub limit: usize,
    pub cycles: u32,
    pub platforms: Vec<Platform>,
    pub seed: u64,
}

#[derive(Debug, Clone)]
struct DemoPost {
    native_id: String,
    author: &'static str,
    text: String,
    created_at: DateTime<Utc>,
    followers: i64,
    business_account: bool,
    sponsor_label: bool,
    high_engagement: bool,
    likes: i64,
    comments: i64,
    shares: i64,
    views: i64,
}

#[derive(Debug)]
pub struct DemoFeed {
    platform: Platform,
    hashtags: Vec<String>,
    rng: StdRng,
    posts: Vec<DemoPost>,
    round: u32,
}

impl DemoFeed {
    pub fn new(
        platform: Platform,
        topic: &str,
        limit: usize,
        start: DateTime<Utc>,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let topic_tag: String = topic.split_whitespace().collect();
        let posts = (0..limit.min(MAX_POSTS_PER_PLATFORM))
            .map(|i| {
                let high_engagement = rng.random_bool(HIGH_ENGAGEMENT_SHARE);
                let promoted = rng.random_bool(PROMOTED_SHARE);
                let likes: i64 = if high_engagement {
                    rng.random_range(500..=10_000)
                } else {
                    rng.random_range(5..=200)
                };
                let mut text = format!("Sharing thoughts on {topic} #{topic_tag}");
                if promoted {
                    text.push(' ');
                    text.push_str(SPONSOR_MARKERS[rng.random_range(0..SPONSOR_MARKERS.len())]);
                }
                #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
                let comments = (likes as f64 * rng.random_range(0.02..0.15)) as i64;
                DemoPost {
                    native_id: format!("demo_{platform}_{i:04}"),
                    author: AUTHORS[rng.random_range(0..AUTHORS.len())],
                    text,
                    created_at: start - Duration::minutes(rng.random_range(0..24 * 60)),
                    followers: if promoted {
                        rng.random_range(1_000..=500_000)
                    } else {
                        rng.random_range(100..=50_000)
                    },
                    business_account: promoted && rng.random_bool(0.7),
                    sponsor_label: promoted && rng.random_bool(0.5),
                    high_engagement,
                    likes,
                    comments,
                    shares: rng.random_range(0..=likes / 5),
                    views: likes * rng.random_range(5..=20),
                }
            })
            .collect();
        Self {
            platform,
            hashtags: vec![topic_tag, "trending".to_string()],
            rng,
            posts,
            round: 0,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Reports every post as of `fetched_at`. From the second call on,
    /// engagement grows first: fast and decaying for high-engagement posts,
    /// slowly for the rest.
    pub fn next_batch(&mut self, fetched_at: DateTime<Utc>) -> IngestBatch {
        if self.round > 0 {
            let decay = 0.8_f64.powf(f64::from(self.round - 1));
            for post in &mut self.posts {
                let rate = if post.high_engagement {
                    self.rng.random_range(0.2..0.5) * decay
                } else {
                    self.rng.random_range(0.0..0.03)
                };
                grow(&mut post.likes, rate);
                grow(&mut post.comments, rate);
                grow(&mut post.shares, rate);
                grow(&mut post.views, rate);
            }
        }
        self.round += 1;

        let raw_items = self
            .posts
            .iter()
            .map(|post| RawContentPayload {
                native_id: post.native_id.clone(),
                author_handle: Some(post.author.to_string()),
                author_reach: Some(post.followers),
                text: Some(post.text.clone()),
                hashtags: self.hashtags.clone(),
                created_at: Some(post.created_at.min(fetched_at)),
                metrics: BTreeMap::from([
                    ("likes".to_string(), post.likes),
                    ("comments".to_string(), post.comments),
                    ("shares".to_string(), post.shares),
                    ("views".to_string(), post.views),
                ]),
                sponsor_label: post.sponsor_label,
                business_account: post.business_account,
                ..RawContentPayload::default()
            })
            .collect();
        IngestBatch {
            platform: self.platform,
            fetched_at,
            raw_items,
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn grow(value: &mut i64, rate: f64) {
    *value += (*value as f64 * rate).round() as i64;
}

/// Feeds every platform concurrently, one task per platform per cycle, and
/// runs an aggregation cycle after each round.
pub async fn run_demo(config: EngineConfig, options: &DemoOptions) -> anyhow::Result<Summary> {
    let mut session = Session::new(config)?;
    let start = Utc::now();
    let mut feeds: Vec<DemoFeed> = options
        .platforms
        .iter()
        .zip(0u64..)
        .map(|(platform, i)| {
            DemoFeed::new(
                *platform,
                &options.topic,
                options.limit,
                start,
                options.seed.wrapping_add(i),
            )
        })
        .collect();

    for cycle in 0..options.cycles {
        let now = start + session.interval() * i32::try_from(cycle)?;
        let tasks = feeds.into_iter().map(|mut feed| {
            let engine = session.engine().clone();
            tokio::spawn(async move {
                let batch = feed.next_batch(now);
                let outcome = engine.submit(&batch);
                (feed, outcome)
            })
        });
        let results = futures::future::join_all(tasks).await;

        feeds = Vec::with_capacity(results.len());
        for joined in results {
            let (feed, outcome) = joined?;
            if let SubmitOutcome::Rejected { reason } = &outcome {
                tracing::warn!(platform = %feed.platform(), reason = %reason, "demo batch rejected");
            }
            feeds.push(feed);
        }

        let report = session.cycle(now).await?;
        println!(
            "cycle {:>2}: {:>3} items, {:>2} open trends, {:>2} transitions, {:>2} alerts",
            report.cycle,
            report.ingested.items,
            report.open_trends,
            report.transitions,
            report.alerts
        );
    }

    let end = start + session.interval() * i32::try_from(options.cycles)?;
    session.finish(end).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn likes(batch: &IngestBatch) -> Vec<i64> {
        batch.raw_items.iter().map(|r| r.metrics["likes"]).collect()
    }

    #[test]
    fn same_seed_produces_same_traffic() {
        let at = Utc::now();
        let mut a = DemoFeed::new(Platform::Instagram, "street food", 20, at, 7);
        let mut b = DemoFeed::new(Platform::Instagram, "street food", 20, at, 7);
        let batch_a = a.next_batch(at);
        let batch_b = b.next_batch(at);
        assert_eq!(likes(&batch_a), likes(&batch_b));
        assert_eq!(batch_a.raw_items[0].hashtags, vec!["streetfood", "trending"]);
    }

    #[test]
    fn engagement_never_shrinks_between_rounds() {
        let at = Utc::now();
        let mut feed = DemoFeed::new(Platform::TikTok, "ai", 30, at, 42);
        let first = feed.next_batch(at);
        let second = feed.next_batch(at + Duration::minutes(5));
        assert_eq!(first.raw_items.len(), 30);
        for (before, after) in first.raw_items.iter().zip(&second.raw_items) {
            assert_eq!(before.native_id, after.native_id);
            for metric in ["likes", "comments", "shares", "views"] {
                assert!(after.metrics[metric] >= before.metrics[metric]);
            }
        }
    }

    #[test]
    fn post_count_is_capped() {
        let at = Utc::now();
        let mut feed = DemoFeed::new(Platform::X, "ai", 500, at, 1);
        assert_eq!(feed.next_batch(at).raw_items.len(), MAX_POSTS_PER_PLATFORM);
    }

    #[test]
    fn promoted_posts_carry_a_sponsor_marker() {
        let at = Utc::now();
        let mut feed = DemoFeed::new(Platform::Instagram, "fashion", 50, at, 3);
        let batch = feed.next_batch(at);
        for raw in &batch.raw_items {
            if raw.sponsor_label || raw.business_account {
                let text = raw.text.as_deref().unwrap_or_default();
                assert!(SPONSOR_MARKERS.iter().any(|m| text.contains(m)));
            }
        }
    }

    #[tokio::test]
    async fn demo_run_detects_trends() {
        let options = DemoOptions {
            topic: "fashion".to_string(),
            limit: 30,
            cycles: 4,
            platforms: vec![Platform::Instagram, Platform::Threads],
            seed: 11,
        };
        let summary = run_demo(EngineConfig::default(), &options).await.unwrap();
        assert_eq!(summary.cycles, 4);
        assert!(!summary.trends.is_empty());
        assert!(summary.trends.iter().all(|t| t.member_count() > 0));
    }
}
