use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::Duration;
use trendscope_core::{
    metric, ContentItem, EngagementSnapshot, ItemId, MediaKind, MediaRef, Platform,
    PromotionLabel,
};

use crate::bot::BotScorer;
use crate::error::NormalizationError;
use crate::promotion::{PromotionDetector, PromotionInput, PromotionSignals};
use crate::text;
use crate::types::{IngestBatch, RawContentPayload, RawMedia};

/// How far past `fetched_at` a `created_at` may lie before the batch is
/// treated as corrupt rather than as ordinary clock skew.
const MAX_CLOCK_SKEW_MINUTES: i64 = 10;

const UNKNOWN_AUTHOR: &str = "unknown";

/// One normalized payload: the item, its engagement reading, and the
/// promotion signals that produced `item.promotion`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub item: ContentItem,
    pub snapshot: EngagementSnapshot,
    pub promotion: PromotionSignals,
}

/// Map a raw adapter batch onto canonical records.
///
/// Items whose bot score exceeds `bot_threshold` are still returned, with
/// `bot_flagged` set.
///
/// # Errors
///
/// Returns [`NormalizationError`] when any payload in the batch is
/// unmappable (empty or duplicate id, negative counts, out-of-range bot
/// score, creation time in the future). The batch is rejected as a whole.
pub fn normalize_batch(
    batch: &IngestBatch,
    scorer: &dyn BotScorer,
    bot_threshold: f64,
) -> Result<Vec<NormalizedRecord>, NormalizationError> {
    let mut seen = HashSet::with_capacity(batch.raw_items.len());
    let mut records = Vec::with_capacity(batch.raw_items.len());

    for (index, raw) in batch.raw_items.iter().enumerate() {
        let native_id = raw.native_id.trim();
        if native_id.is_empty() {
            return Err(NormalizationError::new(
                batch.platform,
                format!("item {index} has an empty native_id"),
            ));
        }
        if !seen.insert(native_id) {
            return Err(NormalizationError::new(
                batch.platform,
                format!("native_id \"{native_id}\" appears more than once"),
            ));
        }
        let record = normalize_item(batch, native_id, raw, scorer, bot_threshold)?;
        if record.item.bot_flagged {
            tracing::debug!(
                item_id = %record.item.item_id,
                bot_score = record.item.bot_score,
                "item flagged as likely bot activity"
            );
        }
        records.push(record);
    }

    Ok(records)
}

fn normalize_item(
    batch: &IngestBatch,
    native_id: &str,
    raw: &RawContentPayload,
    scorer: &dyn BotScorer,
    bot_threshold: f64,
) -> Result<NormalizedRecord, NormalizationError> {
    let platform = batch.platform;
    let fail = |reason: String| NormalizationError::new(platform, reason);

    let item_id = ItemId::new(platform, native_id);
    let metric_values = canonical_metrics(platform, &raw.metrics)
        .map_err(|name| fail(format!("item {item_id} has a negative \"{name}\" count")))?;
    let author_reach = raw
        .author_reach
        .map(u64::try_from)
        .transpose()
        .map_err(|_| fail(format!("item {item_id} has a negative author_reach")))?;

    let observed_at = raw.observed_at.unwrap_or(batch.fetched_at);
    let created_at = raw.created_at.unwrap_or(observed_at);
    if created_at > batch.fetched_at + Duration::minutes(MAX_CLOCK_SKEW_MINUTES) {
        return Err(fail(format!(
            "item {item_id} created_at {created_at} is after fetched_at {}",
            batch.fetched_at
        )));
    }

    let upstream_bot_score = match raw.bot_score {
        Some(score) if !(0.0..=1.0).contains(&score) => {
            return Err(fail(format!(
                "item {item_id} bot_score {score} is outside [0, 1]"
            )));
        }
        other => other,
    };

    let raw_text = raw.text.as_deref().unwrap_or_default();
    let display_text = text::collapse_whitespace(raw_text);
    let match_text = text::match_text(raw_text);
    let tags = collect_tags(raw_text, raw);

    let signals = PromotionDetector.detect(&PromotionInput {
        text: &display_text,
        sponsor_label: raw.sponsor_label,
        business_account: raw.business_account,
        author_reach,
        likes: metric_values.get(metric::LIKES).copied().unwrap_or(0),
        comments: metric_values.get(metric::COMMENTS).copied().unwrap_or(0),
        views: metric_values.get(metric::VIEWS).copied().unwrap_or(0),
    });
    let promotion = signals.label();

    let author_handle = raw
        .author_handle
        .as_deref()
        .map(|h| h.trim().trim_start_matches('@'))
        .filter(|h| !h.is_empty())
        .unwrap_or(UNKNOWN_AUTHOR)
        .to_string();

    let mut item = ContentItem {
        item_id: item_id.clone(),
        author_handle,
        author_reach,
        text: match_text,
        display_text,
        media_refs: raw.media.iter().filter_map(media_ref).collect(),
        tags,
        created_at,
        last_seen_at: observed_at.max(created_at),
        is_promoted: raw
            .is_promoted
            .unwrap_or(promotion == PromotionLabel::Paid),
        promotion,
        promotion_probability: signals.probability,
        bot_score: 0.0,
        bot_flagged: false,
    };

    let bot_score = upstream_bot_score.unwrap_or_else(|| sanitize_score(scorer.score(&item)));
    item.bot_score = bot_score;
    item.bot_flagged = bot_score > bot_threshold;

    Ok(NormalizedRecord {
        item,
        snapshot: EngagementSnapshot {
            item_id,
            observed_at,
            metric_values,
        },
        promotion: signals,
    })
}

fn sanitize_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        tracing::warn!(score, "bot scorer returned a non-finite score; using 0");
        0.0
    }
}

/// Union of inline hashtags, adapter-supplied hashtags and keywords; falls
/// back to frequent words when the item carries no tags at all.
fn collect_tags(raw_text: &str, raw: &RawContentPayload) -> BTreeSet<String> {
    let mut tags = text::extract_hashtags(raw_text);
    tags.extend(
        raw.hashtags
            .iter()
            .chain(raw.keywords.iter())
            .filter_map(|t| text::normalize_tag(t)),
    );
    if tags.is_empty() {
        tags.extend(text::extract_keywords(raw_text, text::MAX_TEXT_KEYWORDS));
    }
    tags
}

fn media_ref(raw: &RawMedia) -> Option<MediaRef> {
    let url = raw.url.trim();
    if url.is_empty() {
        return None;
    }
    let kind = match raw.kind.trim().to_ascii_lowercase().as_str() {
        "image" | "photo" | "gif" => MediaKind::Image,
        "video" | "reel" | "reels" | "short" | "clip" => MediaKind::Video,
        "carousel" | "carousel_album" | "album" => MediaKind::Carousel,
        "audio" => MediaKind::Audio,
        _ => MediaKind::Other,
    };
    Some(MediaRef {
        kind,
        url: url.to_string(),
    })
}

/// Where a platform-native metric field lands.
#[derive(Debug, Clone, Copy)]
struct NativeMetric {
    canonical: &'static str,
    /// Underlying measurement. Fields measuring the same quantity are
    /// aliases and are not added together.
    quantity: &'static str,
    /// Net score that may legitimately go below zero.
    signed: bool,
}

impl NativeMetric {
    const fn plain(canonical: &'static str) -> Self {
        Self {
            canonical,
            quantity: canonical,
            signed: false,
        }
    }

    const fn part(canonical: &'static str, quantity: &'static str) -> Self {
        Self {
            canonical,
            quantity,
            signed: false,
        }
    }

    const fn net(canonical: &'static str) -> Self {
        Self {
            canonical,
            quantity: canonical,
            signed: true,
        }
    }
}

fn canonical_metric(platform: Platform, name: &str) -> Option<NativeMetric> {
    let name = name.trim();
    match name.to_ascii_lowercase().as_str() {
        "likes" => return Some(NativeMetric::plain(metric::LIKES)),
        "shares" => return Some(NativeMetric::plain(metric::SHARES)),
        "comments" => return Some(NativeMetric::plain(metric::COMMENTS)),
        "views" => return Some(NativeMetric::plain(metric::VIEWS)),
        _ => {}
    }
    let mapped = match platform {
        Platform::Threads => match name {
            "like_count" => NativeMetric::plain(metric::LIKES),
            "reply_count" | "replies" => NativeMetric::plain(metric::COMMENTS),
            "repost_count" | "reposts" => NativeMetric::part(metric::SHARES, "reposts"),
            "quote_count" | "quotes" => NativeMetric::part(metric::SHARES, "quotes"),
            "view_count" => NativeMetric::plain(metric::VIEWS),
            _ => return None,
        },
        Platform::Instagram => match name {
            "like_count" => NativeMetric::plain(metric::LIKES),
            "comments_count" => NativeMetric::plain(metric::COMMENTS),
            "plays" | "video_views" | "video_view_count" | "impressions" => {
                NativeMetric::plain(metric::VIEWS)
            }
            "share_count" => NativeMetric::plain(metric::SHARES),
            _ => return None,
        },
        Platform::TikTok => match name {
            "digg_count" | "like_count" => NativeMetric::plain(metric::LIKES),
            "share_count" => NativeMetric::plain(metric::SHARES),
            "comment_count" => NativeMetric::plain(metric::COMMENTS),
            "play_count" | "view_count" => NativeMetric::plain(metric::VIEWS),
            _ => return None,
        },
        Platform::X => match name {
            "favorite_count" | "like_count" => NativeMetric::plain(metric::LIKES),
            "retweet_count" => NativeMetric::part(metric::SHARES, "reposts"),
            "quote_count" => NativeMetric::part(metric::SHARES, "quotes"),
            "reply_count" => NativeMetric::plain(metric::COMMENTS),
            "impression_count" => NativeMetric::plain(metric::VIEWS),
            _ => return None,
        },
        Platform::YouTube => match name {
            "likeCount" | "like_count" => NativeMetric::plain(metric::LIKES),
            "commentCount" | "comment_count" => NativeMetric::plain(metric::COMMENTS),
            "viewCount" | "view_count" => NativeMetric::plain(metric::VIEWS),
            _ => return None,
        },
        Platform::Reddit => match name {
            "ups" => NativeMetric::plain(metric::LIKES),
            // Upvotes minus downvotes; only stands in when `ups` is absent.
            "score" => NativeMetric::net(metric::LIKES),
            "num_comments" => NativeMetric::plain(metric::COMMENTS),
            "num_crossposts" => NativeMetric::plain(metric::SHARES),
            "view_count" => NativeMetric::plain(metric::VIEWS),
            _ => return None,
        },
    };
    Some(mapped)
}

/// Fold raw metric fields into canonical counts. Distinct quantities that
/// map to the same canonical metric (reposts and quotes, for example) are
/// summed; aliases of one quantity contribute their largest value. Net
/// scores below zero count as zero. Unknown fields are ignored.
///
/// Returns the offending field name when a count is negative.
fn canonical_metrics(
    platform: Platform,
    raw: &BTreeMap<String, i64>,
) -> Result<BTreeMap<String, u64>, String> {
    let mut quantities: BTreeMap<(&'static str, &'static str), u64> = BTreeMap::new();
    for (name, value) in raw {
        let Some(native) = canonical_metric(platform, name) else {
            tracing::trace!(%platform, metric = %name, "ignoring unmapped metric");
            continue;
        };
        let value = if native.signed {
            (*value).max(0).unsigned_abs()
        } else {
            u64::try_from(*value).map_err(|_| name.clone())?
        };
        let slot = quantities
            .entry((native.canonical, native.quantity))
            .or_default();
        *slot = (*slot).max(value);
    }

    let mut out: BTreeMap<String, u64> = BTreeMap::new();
    for ((canonical, _), value) in quantities {
        let slot = out.entry(canonical.to_string()).or_default();
        *slot = slot.saturating_add(value);
    }
    Ok(out)
}

#[cfg(test)]
#[path = "normalize_test.rs"]
mod tests;
