use trendscope_core::ContentItem;
use trendscope_ingest::text;

use crate::signature::token_hash;

/// Tags kept in a topic key.
const KEY_TAGS: usize = 3;

/// Coarse first-pass grouping hint: an item's leading tags, or, for an
/// untagged item, a hash of its opening words. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicKey {
    tags: Vec<String>,
    opening: Option<u64>,
}

impl TopicKey {
    #[must_use]
    pub fn derive(item: &ContentItem) -> Self {
        if !item.tags.is_empty() {
            return Self::from_tags(item.tags.iter().take(KEY_TAGS));
        }
        let words = text::words(&item.text);
        let opening = (!words.is_empty()).then(|| token_hash(&words[..words.len().min(KEY_TAGS)]));
        Self {
            tags: Vec::new(),
            opening,
        }
    }

    #[must_use]
    pub fn from_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tags: Vec<String> = tags.into_iter().map(|t| t.as_ref().to_string()).collect();
        tags.sort();
        tags.dedup();
        Self {
            tags,
            opening: None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.opening.is_none()
    }
}

impl std::fmt::Display for TopicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.tags.is_empty() {
            match self.opening {
                Some(hash) => write!(f, "text:{hash:016x}"),
                None => f.write_str("empty"),
            }
        } else {
            write!(f, "#{}", self.tags.join("+#"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;
    use trendscope_core::{ItemId, Platform, PromotionLabel};

    use super::*;

    fn item(tags: &[&str], text: &str) -> ContentItem {
        let now = Utc::now();
        ContentItem {
            item_id: ItemId::new(Platform::Reddit, "1"),
            author_handle: "a".into(),
            author_reach: None,
            text: text.into(),
            display_text: text.into(),
            media_refs: Vec::new(),
            tags: tags.iter().map(|t| (*t).to_string()).collect::<BTreeSet<_>>(),
            created_at: now,
            last_seen_at: now,
            is_promoted: false,
            promotion: PromotionLabel::Organic,
            promotion_probability: 0.0,
            bot_score: 0.0,
            bot_flagged: false,
        }
    }

    #[test]
    fn tagged_items_key_on_leading_tags() {
        let a = TopicKey::derive(&item(&["b", "a", "c", "d"], "x"));
        assert_eq!(a, TopicKey::from_tags(["a", "b", "c"]));
        assert_eq!(a.to_string(), "#a+#b+#c");
    }

    #[test]
    fn untagged_items_key_on_opening_words() {
        let a = TopicKey::derive(&item(&[], "big storm hits coast tonight"));
        let b = TopicKey::derive(&item(&[], "big storm hits the north"));
        let c = TopicKey::derive(&item(&[], "small storm hits coast"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(TopicKey::derive(&item(&[], "")).is_empty());
    }
}
