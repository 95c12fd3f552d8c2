//! Windowed engagement aggregation.
//!
//! Every tracked item owns one fixed-capacity ring buffer of
//! `(observed_at, weighted value)` points, stored in a slot arena indexed by
//! [`ItemId`]. Velocity is the EMA-smoothed first difference of the weighted
//! value between the two newest points.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use trendscope_core::{metric, EngagementSnapshot, EngineConfig, ItemId, MetricWeights};

use crate::topic::TopicKey;

/// Fixed-capacity ring buffer. Pushing into a full buffer overwrites the
/// oldest element.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    len: usize,
}

impl<T: Copy> RingBuffer<T> {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, value: T) {
        let tail = (self.head + self.len) % self.capacity();
        self.slots[tail] = Some(value);
        if self.len == self.capacity() {
            self.head = (self.head + 1) % self.capacity();
        } else {
            self.len += 1;
        }
    }

    pub fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        value
    }

    #[must_use]
    pub fn front(&self) -> Option<&T> {
        self.get(0)
    }

    #[must_use]
    pub fn back(&self) -> Option<&T> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    pub fn back_mut(&mut self) -> Option<&mut T> {
        let i = self.len.checked_sub(1)?;
        let idx = (self.head + i) % self.capacity();
        self.slots[idx].as_mut()
    }

    /// Element `i` counted from the oldest.
    #[must_use]
    pub fn get(&self, i: usize) -> Option<&T> {
        if i >= self.len {
            return None;
        }
        self.slots[(self.head + i) % self.capacity()].as_ref()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPoint {
    pub observed_at: DateTime<Utc>,
    pub value: f64,
}

/// Result of [`Aggregator::record`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordOutcome {
    Accepted {
        velocity: f64,
        /// The item crossed its platform volume threshold with this snapshot.
        newly_eligible: bool,
    },
    /// `observed_at` was earlier than the newest point already recorded. The
    /// snapshot is kept for archival but does not affect velocity.
    LateArrival,
}

#[derive(Debug, Clone)]
struct ItemWindow {
    item_id: ItemId,
    points: RingBuffer<WindowPoint>,
    velocity: Option<f64>,
    /// Velocity before the newest point was applied, so a same-timestamp
    /// correction can be recomputed.
    previous_velocity: Option<f64>,
    eligible: bool,
    topic: Option<TopicKey>,
}

/// Composite engagement value used for velocity.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn weighted_value(weights: &MetricWeights, snapshot: &EngagementSnapshot) -> f64 {
    weights.likes * snapshot.metric(metric::LIKES) as f64
        + weights.shares * snapshot.metric(metric::SHARES) as f64
        + weights.comments * snapshot.metric(metric::COMMENTS) as f64
        + weights.views * snapshot.metric(metric::VIEWS) as f64
}

/// Per-item sliding windows plus per-topic membership.
#[derive(Debug)]
pub struct Aggregator {
    config: EngineConfig,
    slots: Vec<Option<ItemWindow>>,
    index: HashMap<ItemId, usize>,
    free: Vec<usize>,
    topics: HashMap<TopicKey, HashSet<ItemId>>,
}

impl Aggregator {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.clone(),
            slots: Vec::new(),
            index: HashMap::new(),
            free: Vec::new(),
            topics: HashMap::new(),
        }
    }

    #[must_use]
    pub fn tracked_items(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn contains(&self, item_id: &ItemId) -> bool {
        self.index.contains_key(item_id)
    }

    fn slot_for(&mut self, item_id: &ItemId) -> usize {
        if let Some(&slot) = self.index.get(item_id) {
            return slot;
        }
        let window = ItemWindow {
            item_id: item_id.clone(),
            points: RingBuffer::with_capacity(self.config.window_capacity),
            velocity: None,
            previous_velocity: None,
            eligible: false,
            topic: None,
        };
        let slot = if let Some(slot) = self.free.pop() {
            self.slots[slot] = Some(window);
            slot
        } else {
            self.slots.push(Some(window));
            self.slots.len() - 1
        };
        self.index.insert(item_id.clone(), slot);
        slot
    }

    fn window(&self, item_id: &ItemId) -> Option<&ItemWindow> {
        self.index
            .get(item_id)
            .and_then(|&slot| self.slots.get(slot))
            .and_then(Option::as_ref)
    }

    /// Fold one snapshot into the item's window.
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&mut self, snapshot: &EngagementSnapshot) -> RecordOutcome {
        let value = weighted_value(&self.config.metric_weights, snapshot);
        let threshold = self.config.volume_threshold(snapshot.item_id.platform);
        let alpha = self.config.ema_alpha;
        let window_span = Duration::seconds(i64::try_from(self.config.window_secs).unwrap_or(i64::MAX));

        let slot = self.slot_for(&snapshot.item_id);
        let Some(window) = self.slots[slot].as_mut() else {
            return RecordOutcome::LateArrival;
        };

        let point = WindowPoint {
            observed_at: snapshot.observed_at,
            value,
        };
        match window.points.back().copied() {
            Some(last) if point.observed_at < last.observed_at => {
                tracing::debug!(
                    item_id = %snapshot.item_id,
                    observed_at = %snapshot.observed_at,
                    latest = %last.observed_at,
                    "late-arriving snapshot excluded from velocity"
                );
                return RecordOutcome::LateArrival;
            }
            Some(last) if point.observed_at == last.observed_at => {
                // Same reading reported twice: the newer report wins.
                if let Some(back) = window.points.back_mut() {
                    *back = point;
                }
                let before = window.points.len().checked_sub(2).and_then(|i| window.points.get(i)).copied();
                window.velocity = match before {
                    Some(prev) => Some(smooth(window.previous_velocity, rate(prev, point), alpha)),
                    None => window.previous_velocity,
                };
            }
            Some(last) => {
                window.previous_velocity = window.velocity;
                window.velocity = Some(smooth(window.velocity, rate(last, point), alpha));
                window.points.push(point);
            }
            None => window.points.push(point),
        }

        let cutoff = point.observed_at - window_span;
        while window.points.len() > 1
            && window.points.front().is_some_and(|p| p.observed_at < cutoff)
        {
            window.points.pop_front();
        }

        let interactions = snapshot.interactions() as f64;
        let newly_eligible = !window.eligible && interactions >= threshold as f64;
        if newly_eligible {
            window.eligible = true;
        }

        RecordOutcome::Accepted {
            velocity: window.velocity.unwrap_or(0.0),
            newly_eligible,
        }
    }

    /// Smoothed velocity in weighted engagement per second, or `0.0` when
    /// the item is unknown or its newest snapshot is stale at `now`.
    #[must_use]
    pub fn current_velocity(&self, item_id: &ItemId, now: DateTime<Utc>) -> f64 {
        let Some(window) = self.window(item_id) else {
            return 0.0;
        };
        let Some(last) = window.points.back() else {
            return 0.0;
        };
        let stale_after =
            Duration::seconds(i64::try_from(self.config.stale_after_secs).unwrap_or(i64::MAX));
        if now - last.observed_at > stale_after {
            return 0.0;
        }
        window.velocity.unwrap_or(0.0)
    }

    /// Newest weighted engagement value recorded for the item.
    #[must_use]
    pub fn latest_value(&self, item_id: &ItemId) -> Option<f64> {
        self.window(item_id)
            .and_then(|w| w.points.back())
            .map(|p| p.value)
    }

    /// Points currently held for the item, oldest first.
    #[must_use]
    pub fn points(&self, item_id: &ItemId) -> Vec<WindowPoint> {
        self.window(item_id)
            .map(|w| w.points.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Attach the item to a topic key, moving it out of its previous one.
    pub fn assign_topic(&mut self, item_id: &ItemId, key: TopicKey) {
        let Some(&slot) = self.index.get(item_id) else {
            return;
        };
        let Some(window) = self.slots[slot].as_mut() else {
            return;
        };
        if window.topic.as_ref() == Some(&key) {
            return;
        }
        if let Some(old) = window.topic.replace(key.clone()) {
            remove_member(&mut self.topics, &old, item_id);
        }
        self.topics.entry(key).or_default().insert(item_id.clone());
    }

    #[must_use]
    pub fn topic_of(&self, item_id: &ItemId) -> Option<&TopicKey> {
        self.window(item_id).and_then(|w| w.topic.as_ref())
    }

    /// Summed velocity of every item currently attached to `key`.
    #[must_use]
    pub fn topic_velocity(&self, key: &TopicKey, now: DateTime<Utc>) -> f64 {
        self.topics
            .get(key)
            .map(|members| members.iter().map(|id| self.current_velocity(id, now)).sum())
            .unwrap_or(0.0)
    }

    /// Drop windows whose newest point has left the window, except those in
    /// `retain`. Returns the evicted item ids.
    pub fn evict_expired(
        &mut self,
        now: DateTime<Utc>,
        retain: impl Fn(&ItemId) -> bool,
    ) -> Vec<ItemId> {
        let cutoff = now - Duration::seconds(i64::try_from(self.config.window_secs).unwrap_or(i64::MAX));
        let mut evicted = Vec::new();
        for slot in 0..self.slots.len() {
            let expired = self.slots[slot].as_ref().is_some_and(|w| {
                w.points.back().is_none_or(|p| p.observed_at < cutoff) && !retain(&w.item_id)
            });
            if !expired {
                continue;
            }
            if let Some(window) = self.slots[slot].take() {
                self.index.remove(&window.item_id);
                if let Some(topic) = &window.topic {
                    remove_member(&mut self.topics, topic, &window.item_id);
                }
                self.free.push(slot);
                evicted.push(window.item_id);
            }
        }
        evicted
    }
}

fn remove_member(topics: &mut HashMap<TopicKey, HashSet<ItemId>>, key: &TopicKey, item_id: &ItemId) {
    if let Some(members) = topics.get_mut(key) {
        members.remove(item_id);
        if members.is_empty() {
            topics.remove(key);
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn rate(from: WindowPoint, to: WindowPoint) -> f64 {
    let secs = (to.observed_at - from.observed_at).num_milliseconds() as f64 / 1000.0;
    if secs <= 0.0 {
        return 0.0;
    }
    (to.value - from.value) / secs
}

fn smooth(previous: Option<f64>, sample: f64, alpha: f64) -> f64 {
    match previous {
        Some(prev) => alpha * sample + (1.0 - alpha) * prev,
        None => sample,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;
    use trendscope_core::Platform;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
    }

    fn snap(native: &str, secs: i64, likes: u64) -> EngagementSnapshot {
        EngagementSnapshot {
            item_id: ItemId::new(Platform::X, native),
            observed_at: at(secs),
            metric_values: BTreeMap::from([(metric::LIKES.to_string(), likes)]),
        }
    }

    fn aggregator() -> Aggregator {
        Aggregator::new(&EngineConfig::default())
    }

    #[test]
    fn ring_buffer_overwrites_oldest() {
        let mut ring = RingBuffer::with_capacity(3);
        for i in 0..5 {
            ring.push(i);
        }
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(ring.front(), Some(&2));
        assert_eq!(ring.back(), Some(&4));
        assert_eq!(ring.pop_front(), Some(2));
        ring.push(5);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[test]
    fn first_snapshot_has_zero_velocity() {
        let mut agg = aggregator();
        let outcome = agg.record(&snap("a", 0, 10));
        assert_eq!(
            outcome,
            RecordOutcome::Accepted {
                velocity: 0.0,
                newly_eligible: false
            }
        );
    }

    #[test]
    fn velocity_is_ema_of_first_difference() {
        let mut agg = aggregator();
        agg.record(&snap("a", 0, 0));
        agg.record(&snap("a", 100, 100)); // 1.0/s
        let RecordOutcome::Accepted { velocity, .. } = agg.record(&snap("a", 200, 400)) else {
            panic!("expected accepted");
        };
        // 0.3 * 3.0 + 0.7 * 1.0
        assert!((velocity - 1.6).abs() < 1e-9, "velocity {velocity}");
        assert!((agg.current_velocity(&ItemId::new(Platform::X, "a"), at(200)) - 1.6).abs() < 1e-9);
    }

    #[test]
    fn late_snapshot_is_excluded_from_velocity() {
        let mut agg = aggregator();
        agg.record(&snap("a", 0, 0));
        agg.record(&snap("a", 100, 100));
        assert_eq!(agg.record(&snap("a", 50, 999)), RecordOutcome::LateArrival);
        let id = ItemId::new(Platform::X, "a");
        assert!((agg.current_velocity(&id, at(100)) - 1.0).abs() < 1e-9);
        assert_eq!(agg.points(&id).len(), 2);
    }

    #[test]
    fn same_timestamp_replaces_reading() {
        let mut agg = aggregator();
        agg.record(&snap("a", 0, 0));
        agg.record(&snap("a", 100, 100));
        agg.record(&snap("a", 100, 200));
        let id = ItemId::new(Platform::X, "a");
        assert_eq!(agg.points(&id).len(), 2);
        assert!((agg.current_velocity(&id, at(100)) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn stale_items_report_zero_velocity() {
        let mut agg = aggregator();
        agg.record(&snap("a", 0, 0));
        agg.record(&snap("a", 100, 100));
        let id = ItemId::new(Platform::X, "a");
        assert!(agg.current_velocity(&id, at(100 + 901)).abs() < f64::EPSILON);
    }

    #[test]
    fn eligibility_fires_once_at_threshold() {
        let mut agg = aggregator();
        let first = agg.record(&snap("a", 0, 49));
        let second = agg.record(&snap("a", 60, 50));
        let third = agg.record(&snap("a", 120, 80));
        assert!(matches!(first, RecordOutcome::Accepted { newly_eligible: false, .. }));
        assert!(matches!(second, RecordOutcome::Accepted { newly_eligible: true, .. }));
        assert!(matches!(third, RecordOutcome::Accepted { newly_eligible: false, .. }));
    }

    #[test]
    fn points_outside_window_are_evicted() {
        let mut agg = aggregator();
        agg.record(&snap("a", 0, 0));
        agg.record(&snap("a", 3_600, 10));
        agg.record(&snap("a", 7 * 3_600, 20));
        let points = agg.points(&ItemId::new(Platform::X, "a"));
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].observed_at, at(3_600));
    }

    #[test]
    fn capacity_bounds_window_length() {
        let config = EngineConfig {
            window_capacity: 4,
            ..EngineConfig::default()
        };
        let mut agg = Aggregator::new(&config);
        for i in 0..10 {
            agg.record(&snap("a", i * 10, u64::try_from(i).unwrap()));
        }
        assert_eq!(agg.points(&ItemId::new(Platform::X, "a")).len(), 4);
    }

    #[test]
    fn expired_windows_free_their_slots() {
        let mut agg = aggregator();
        agg.record(&snap("old", 0, 1));
        agg.record(&snap("kept", 0, 1));
        agg.record(&snap("fresh", 7 * 3_600, 1));
        let kept = ItemId::new(Platform::X, "kept");
        let evicted = agg.evict_expired(at(7 * 3_600), |id| *id == kept);
        assert_eq!(evicted, vec![ItemId::new(Platform::X, "old")]);
        assert_eq!(agg.tracked_items(), 2);
        agg.record(&snap("new", 7 * 3_600, 1));
        assert_eq!(agg.tracked_items(), 3);
        assert_eq!(agg.slots.len(), 3);
    }

    #[test]
    fn topic_velocity_sums_members() {
        let mut agg = aggregator();
        for name in ["a", "b"] {
            agg.record(&snap(name, 0, 0));
            agg.record(&snap(name, 100, 100));
        }
        let key = TopicKey::from_tags(["rust"]);
        agg.assign_topic(&ItemId::new(Platform::X, "a"), key.clone());
        agg.assign_topic(&ItemId::new(Platform::X, "b"), key.clone());
        assert!((agg.topic_velocity(&key, at(100)) - 2.0).abs() < 1e-9);

        let other = TopicKey::from_tags(["go"]);
        agg.assign_topic(&ItemId::new(Platform::X, "b"), other.clone());
        assert!((agg.topic_velocity(&key, at(100)) - 1.0).abs() < 1e-9);
        assert_eq!(agg.topic_of(&ItemId::new(Platform::X, "b")), Some(&other));
    }
}
