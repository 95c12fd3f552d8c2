//! Classifier capabilities consumed by the engine, their rule-based
//! defaults, and the book of externally supplied signals.
//!
//! External payloads always take precedence over the defaults. A missing
//! payload is not an error; it simply contributes zero confidence.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use trendscope_core::{ContentItem, ItemId, SentimentDistribution};
use trendscope_ingest::text;

/// A classifier output together with how much it can be trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classified<T> {
    pub value: T,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicLabel {
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
}

/// Summary of image/video analysis for one item.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MultimediaSummary {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub text_in_media: Option<String>,
}

pub trait SentimentClassifier: Send + Sync {
    fn classify(&self, item: &ContentItem) -> Option<Classified<SentimentDistribution>>;
}

pub trait TopicClassifier: Send + Sync {
    fn classify(&self, item: &ContentItem) -> Option<Classified<TopicLabel>>;
}

// ---------------------------------------------------------------------------
// Lexicon sentiment
// ---------------------------------------------------------------------------

/// General-purpose word weights. Positive values in `(0, 1]`, negative in
/// `[-1, 0)`.
pub(crate) const LEXICON: &[(&str, f64)] = &[
    // Positive signals
    ("love", 0.6),
    ("loved", 0.6),
    ("loving", 0.5),
    ("great", 0.4),
    ("good", 0.3),
    ("excellent", 0.5),
    ("amazing", 0.6),
    ("awesome", 0.5),
    ("best", 0.5),
    ("beautiful", 0.4),
    ("happy", 0.4),
    ("recommend", 0.4),
    ("favorite", 0.4),
    ("fun", 0.3),
    ("win", 0.4),
    ("wow", 0.3),
    ("perfect", 0.5),
    ("좋아요", 0.5),
    ("최고", 0.6),
    ("대박", 0.5),
    ("추천", 0.4),
    ("행복", 0.4),
    // Negative signals
    ("hate", -0.6),
    ("hated", -0.6),
    ("bad", -0.4),
    ("terrible", -0.6),
    ("awful", -0.6),
    ("worst", -0.6),
    ("boycott", -0.7),
    ("scam", -0.7),
    ("fake", -0.5),
    ("broken", -0.4),
    ("recall", -0.6),
    ("lawsuit", -0.5),
    ("angry", -0.5),
    ("disappointed", -0.5),
    ("refund", -0.4),
    ("dangerous", -0.6),
    ("scandal", -0.6),
    ("최악", -0.6),
    ("실망", -0.5),
    ("불매", -0.7),
    ("사기", -0.7),
];

/// Rule-based sentiment: sums lexicon hits into positive and negative mass
/// and converts them into a four-way distribution.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexiconSentimentClassifier;

impl SentimentClassifier for LexiconSentimentClassifier {
    fn classify(&self, item: &ContentItem) -> Option<Classified<SentimentDistribution>> {
        let words = text::words(&item.text);
        if words.is_empty() {
            return None;
        }
        let mut positive = 0.0_f64;
        let mut negative = 0.0_f64;
        let mut hits = 0_u32;
        for word in &words {
            if let Some(&(_, weight)) = LEXICON.iter().find(|(w, _)| w == word) {
                hits += 1;
                if weight > 0.0 {
                    positive += weight;
                } else {
                    negative -= weight;
                }
            }
        }

        let denom = positive + negative + 1.0;
        let mut pos = positive / denom;
        let mut neg = negative / denom;
        let shared = pos.min(neg);
        pos -= shared;
        neg -= shared;
        let distribution = SentimentDistribution {
            positive: pos,
            neutral: 1.0 / denom,
            negative: neg,
            mixed: 2.0 * shared,
        };
        Some(Classified {
            value: distribution,
            confidence: (0.3 + 0.1 * f64::from(hits)).min(0.9),
        })
    }
}

// ---------------------------------------------------------------------------
// Keyword topic classifier
// ---------------------------------------------------------------------------

pub(crate) const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "beauty",
        &["beauty", "makeup", "skincare", "serum", "cosmetics", "lipstick", "뷰티", "화장품", "스킨케어"],
    ),
    (
        "fashion",
        &["fashion", "outfit", "ootd", "style", "streetwear", "sneakers", "패션", "코디"],
    ),
    (
        "food",
        &["food", "recipe", "restaurant", "foodie", "cooking", "dessert", "맛집", "요리", "먹방"],
    ),
    (
        "tech",
        &["tech", "smartphone", "iphone", "android", "gadget", "software", "startup", "테크"],
    ),
    (
        "ai",
        &["chatgpt", "openai", "llm", "machinelearning", "artificialintelligence", "인공지능"],
    ),
    (
        "entertainment",
        &["music", "movie", "kpop", "concert", "drama", "netflix", "celebrity", "아이돌", "드라마"],
    ),
    (
        "gaming",
        &["gaming", "gamer", "esports", "playstation", "xbox", "nintendo", "게임"],
    ),
    (
        "sports",
        &["sports", "football", "soccer", "basketball", "baseball", "olympics", "축구", "야구"],
    ),
    (
        "finance",
        &["finance", "stocks", "crypto", "bitcoin", "investing", "economy", "주식", "코인"],
    ),
    (
        "travel",
        &["travel", "trip", "vacation", "hotel", "wanderlust", "여행"],
    ),
    (
        "health",
        &["health", "fitness", "workout", "wellness", "diet", "yoga", "운동", "건강"],
    ),
];

/// Assigns the category whose keyword list matches the most of an item's
/// tags and words. The strongest matching keyword becomes the subcategory.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordTopicClassifier;

impl TopicClassifier for KeywordTopicClassifier {
    fn classify(&self, item: &ContentItem) -> Option<Classified<TopicLabel>> {
        let words = text::words(&item.text);
        let mut best: Option<(&str, u32, &str)> = None;
        for (category, keywords) in CATEGORY_KEYWORDS {
            let mut hits = 0_u32;
            let mut strongest: Option<(&str, u32)> = None;
            for keyword in *keywords {
                let count = u32::from(item.tags.contains(*keyword)) * 2
                    + u32::try_from(words.iter().filter(|w| w == keyword).count()).unwrap_or(u32::MAX);
                if count > 0 {
                    hits += count;
                    if strongest.is_none_or(|(_, c)| count > c) {
                        strongest = Some((*keyword, count));
                    }
                }
            }
            if let Some((keyword, _)) = strongest {
                if best.is_none_or(|(_, h, _)| hits > h) {
                    best = Some((*category, hits, keyword));
                }
            }
        }
        best.map(|(category, hits, keyword)| Classified {
            value: TopicLabel {
                category: category.to_string(),
                subcategory: (keyword != category).then(|| keyword.to_string()),
            },
            confidence: f64::from(hits) / f64::from(hits + 1),
        })
    }
}

// ---------------------------------------------------------------------------
// External signals
// ---------------------------------------------------------------------------

/// One ML collaborator output for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SignalPayload {
    Sentiment(SentimentDistribution),
    Topic(TopicLabel),
    Multimedia(MultimediaSummary),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalInput {
    pub item_id: ItemId,
    pub payload: SignalPayload,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default)]
struct ItemSignals {
    sentiment: Option<Classified<SentimentDistribution>>,
    topic: Option<Classified<TopicLabel>>,
    multimedia: Option<Classified<MultimediaSummary>>,
}

/// Why a signal was ignored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalRejection {
    #[error("confidence must be in [0, 1]")]
    ConfidenceOutOfRange,
    #[error("sentiment distribution is empty, negative or non-finite")]
    EmptyDistribution,
}

impl SignalInput {
    /// Check the payload without recording it.
    ///
    /// # Errors
    ///
    /// Same rejections as [`SignalBook::record`].
    pub fn validate(&self) -> Result<(), SignalRejection> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(SignalRejection::ConfidenceOutOfRange);
        }
        if let SignalPayload::Sentiment(dist) = &self.payload {
            if dist.normalized().is_none() {
                return Err(SignalRejection::EmptyDistribution);
            }
        }
        Ok(())
    }
}

/// Latest external signal per item and concern.
#[derive(Debug, Default)]
pub struct SignalBook {
    entries: HashMap<ItemId, ItemSignals>,
}

impl SignalBook {
    /// Record `input`, replacing any earlier payload of the same kind.
    ///
    /// # Errors
    ///
    /// Rejects confidences outside `[0, 1]` and sentiment distributions
    /// that cannot be normalized.
    pub fn record(&mut self, input: SignalInput) -> Result<(), SignalRejection> {
        input.validate()?;
        let entry = self.entries.entry(input.item_id).or_default();
        let confidence = input.confidence;
        match input.payload {
            SignalPayload::Sentiment(dist) => {
                let value = dist.normalized().ok_or(SignalRejection::EmptyDistribution)?;
                entry.sentiment = Some(Classified { value, confidence });
            }
            SignalPayload::Topic(label) => entry.topic = Some(Classified { value: label, confidence }),
            SignalPayload::Multimedia(summary) => {
                entry.multimedia = Some(Classified {
                    value: summary,
                    confidence,
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn sentiment(&self, item_id: &ItemId) -> Option<&Classified<SentimentDistribution>> {
        self.entries.get(item_id).and_then(|e| e.sentiment.as_ref())
    }

    #[must_use]
    pub fn topic(&self, item_id: &ItemId) -> Option<&Classified<TopicLabel>> {
        self.entries.get(item_id).and_then(|e| e.topic.as_ref())
    }

    #[must_use]
    pub fn multimedia(&self, item_id: &ItemId) -> Option<&Classified<MultimediaSummary>> {
        self.entries.get(item_id).and_then(|e| e.multimedia.as_ref())
    }

    pub fn forget(&mut self, item_id: &ItemId) {
        self.entries.remove(item_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves the effective classifier output for an item: external signal
/// first, rule-based default second.
pub struct Classifiers {
    pub sentiment: Box<dyn SentimentClassifier>,
    pub topic: Box<dyn TopicClassifier>,
}

impl Default for Classifiers {
    fn default() -> Self {
        Self {
            sentiment: Box::new(LexiconSentimentClassifier),
            topic: Box::new(KeywordTopicClassifier),
        }
    }
}

impl std::fmt::Debug for Classifiers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifiers").finish_non_exhaustive()
    }
}

impl Classifiers {
    #[must_use]
    pub fn sentiment_for(
        &self,
        book: &SignalBook,
        item: &ContentItem,
    ) -> Option<Classified<SentimentDistribution>> {
        book.sentiment(&item.item_id)
            .cloned()
            .or_else(|| self.sentiment.classify(item))
            .filter(|c| c.confidence > 0.0)
    }

    #[must_use]
    pub fn topic_for(&self, book: &SignalBook, item: &ContentItem) -> Option<Classified<TopicLabel>> {
        book.topic(&item.item_id)
            .cloned()
            .or_else(|| self.topic.classify(item))
            .filter(|c| c.confidence > 0.0)
    }

    /// Fraction of the signals expected for `item` that are present with
    /// non-zero confidence. Multimedia analysis is expected only for items
    /// carrying media.
    #[must_use]
    pub fn coverage(&self, book: &SignalBook, item: &ContentItem) -> f64 {
        let mut expected = 2.0;
        let mut present = 0.0;
        if self.sentiment_for(book, item).is_some() {
            present += 1.0;
        }
        if self.topic_for(book, item).is_some() {
            present += 1.0;
        }
        if !item.media_refs.is_empty() {
            expected += 1.0;
            if book.multimedia(&item.item_id).is_some_and(|m| m.confidence > 0.0) {
                present += 1.0;
            }
        }
        present / expected
    }
}
