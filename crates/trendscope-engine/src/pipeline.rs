//! The single-writer aggregation cycle.
//!
//! [`Pipeline`] owns every piece of state a cycle mutates: the aggregator
//! windows, the open-trend arena, category history and classifier signals.
//! It is driven from one task at a time; see [`crate::TrendEngine`] for the
//! concurrent front door.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use trendscope_core::{
    Alert, ContentItem, EngagementSnapshot, EngineConfig, ItemId, Trend, TrendId, TrendLevel,
    TrendState,
};
use trendscope_ingest::NormalizedRecord;

use crate::alerts::{crisis_alert, spike_alert};
use crate::classify::{Classifiers, SignalBook, SignalInput, SignalRejection};
use crate::cluster::{Assignment, Candidate, Clusterer};
use crate::error::EngineError;
use crate::lifecycle::{CycleObservation, Transition};
use crate::pattern::{load_pattern_library, CosineCurveMatcher, PatternMatcher};
use crate::scoring::{
    aggregate_sentiment, influence_term, pattern_term, promotion_mix, spread_term, top_sources,
    velocity_term, virality, CategoryHistory, MemberStats,
};
use crate::topic::TopicKey;
use crate::window::{weighted_value, Aggregator, RecordOutcome};

/// Trend state plus the member snapshots not yet handed to storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistRequest {
    pub trend: Trend,
    /// Sorted by `observed_at`.
    pub snapshots: Vec<EngagementSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub items: usize,
    pub late_arrivals: usize,
    pub newly_eligible: usize,
    pub bot_flagged: usize,
}

impl IngestReport {
    pub fn absorb(&mut self, other: IngestReport) {
        self.items += other.items;
        self.late_arrivals += other.late_arrivals;
        self.newly_eligible += other.newly_eligible;
        self.bot_flagged += other.bot_flagged;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub at: DateTime<Utc>,
    pub ingested: IngestReport,
    pub created: usize,
    pub joined: usize,
    pub open_trends: usize,
    pub transitions: usize,
    pub archived: usize,
    pub alerts: usize,
    pub persisted: usize,
    pub evicted: usize,
    pub tracked_items: usize,
    /// Bot-flagged items whose snapshots were handed over for audit.
    pub audited: usize,
}

/// Everything one cycle hands to its collaborators.
#[derive(Debug, Clone)]
pub struct CycleOutput {
    pub report: CycleReport,
    pub transitions: Vec<(TrendId, Transition)>,
    pub persist: Vec<PersistRequest>,
    /// Final state of trends that left the open set this cycle. Each also
    /// appears in `persist`.
    pub archive: Vec<Trend>,
    pub alerts: Vec<Alert>,
    /// Engagement of bot-flagged items, which never reach a trend.
    pub audit: Vec<AuditRecord>,
}

/// Snapshots of a bot-flagged item kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub item: ContentItem,
    /// Sorted by `observed_at`.
    pub snapshots: Vec<EngagementSnapshot>,
}

/// Writes left over when the engine stops.
#[derive(Debug, Clone, Default)]
pub struct FinalFlush {
    pub persist: Vec<PersistRequest>,
    pub audit: Vec<AuditRecord>,
}

#[derive(Debug, Clone)]
struct TrackedItem {
    item: ContentItem,
    latest: EngagementSnapshot,
    /// Snapshots recorded since the item's trend was last persisted.
    unpersisted: Vec<EngagementSnapshot>,
}

/// Owned state of the aggregation cycle. Not shared; callers serialize
/// access.
pub struct Pipeline {
    config: EngineConfig,
    aggregator: Aggregator,
    clusterer: Clusterer,
    signals: SignalBook,
    classifiers: Classifiers,
    matcher: Box<dyn PatternMatcher>,
    history: CategoryHistory,
    items: HashMap<ItemId, TrackedItem>,
    /// Eligible items not yet placed in a trend.
    pending: BTreeSet<ItemId>,
    cycle: u64,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("cycle", &self.cycle)
            .field("open_trends", &self.clusterer.len())
            .field("tracked_items", &self.items.len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new(
        config: EngineConfig,
        classifiers: Classifiers,
        matcher: Box<dyn PatternMatcher>,
    ) -> Self {
        Self {
            aggregator: Aggregator::new(&config),
            clusterer: Clusterer::new(),
            signals: SignalBook::default(),
            classifiers,
            matcher,
            history: CategoryHistory::new(config.category_history_len),
            items: HashMap::new(),
            pending: BTreeSet::new(),
            cycle: 0,
            config,
        }
    }

    /// Pipeline with the rule-based classifiers and the cosine matcher,
    /// loading the growth-curve library when one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if the configuration is invalid or
    /// the pattern library cannot be loaded.
    pub fn from_config(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let matcher = match &config.pattern_library_path {
            Some(path) => {
                let library = load_pattern_library(path)?;
                tracing::info!(
                    path = %path.display(),
                    curves = library.curves.len(),
                    "loaded growth-curve library"
                );
                CosineCurveMatcher::from_library(&library)
            }
            None => CosineCurveMatcher::with_builtin_curves(),
        };
        Ok(Self::new(config, Classifiers::default(), Box::new(matcher)))
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn cycles_run(&self) -> u64 {
        self.cycle
    }

    /// Fold normalized records into the aggregator. Items crossing their
    /// platform's volume threshold are queued for clustering at the next
    /// cycle; bot-flagged items are recorded but never clustered.
    pub fn ingest(&mut self, records: Vec<NormalizedRecord>) -> IngestReport {
        let mut report = IngestReport::default();
        let cap = self.config.window_capacity;
        for NormalizedRecord { item, snapshot, .. } in records {
            report.items += 1;
            if item.bot_flagged {
                report.bot_flagged += 1;
            }
            let outcome = self.aggregator.record(&snapshot);
            let late = matches!(outcome, RecordOutcome::LateArrival);
            if late {
                report.late_arrivals += 1;
            }

            let item_id = item.item_id.clone();
            let tracked = match self.items.entry(item_id.clone()) {
                Entry::Occupied(entry) => {
                    let tracked = entry.into_mut();
                    if late {
                        tracked.item.last_seen_at = tracked.item.last_seen_at.max(item.last_seen_at);
                    } else {
                        tracked.item.merge_observation(item);
                        if snapshot.observed_at >= tracked.latest.observed_at {
                            tracked.latest = snapshot.clone();
                        }
                    }
                    tracked.unpersisted.push(snapshot);
                    if tracked.unpersisted.len() > cap && !self.clusterer.is_member(&item_id) {
                        tracked.unpersisted.remove(0);
                    }
                    tracked
                }
                Entry::Vacant(entry) => entry.insert(TrackedItem {
                    item,
                    latest: snapshot.clone(),
                    unpersisted: vec![snapshot],
                }),
            };
            self.aggregator
                .assign_topic(&item_id, TopicKey::derive(&tracked.item));

            if let RecordOutcome::Accepted {
                newly_eligible: true,
                ..
            } = outcome
            {
                report.newly_eligible += 1;
                self.pending.insert(item_id);
            }
        }
        report
    }

    /// Record one classifier output.
    ///
    /// # Errors
    ///
    /// Propagates the [`SignalRejection`] from validation.
    pub fn submit_signal(&mut self, input: SignalInput) -> Result<(), SignalRejection> {
        self.signals.record(input)
    }

    /// Run one cluster, score and transition pass over the open set.
    pub fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleOutput {
        self.cycle += 1;
        let mut out = CycleOutput {
            report: CycleReport {
                cycle: self.cycle,
                at: now,
                ingested: IngestReport::default(),
                created: 0,
                joined: 0,
                open_trends: 0,
                transitions: 0,
                archived: 0,
                alerts: 0,
                persisted: 0,
                evicted: 0,
                tracked_items: 0,
                audited: 0,
            },
            transitions: Vec::new(),
            persist: Vec::new(),
            archive: Vec::new(),
            alerts: Vec::new(),
            audit: Vec::new(),
        };

        self.cluster_pending(now, &mut out.report);

        let mut samples = Vec::new();
        for trend_id in self.clusterer.trend_ids() {
            self.evaluate_trend(trend_id, now, &mut out, &mut samples);
        }
        // Percentiles for this cycle were taken before these samples landed.
        for (category, velocity) in samples {
            self.history.push(category.as_deref(), velocity);
        }

        // Before eviction, so flagged engagement reaches storage first.
        out.audit = self.drain_audit();

        let clusterer = &self.clusterer;
        let evicted = self.aggregator.evict_expired(now, |id| clusterer.is_member(id));
        for item_id in &evicted {
            self.items.remove(item_id);
            self.pending.remove(item_id);
            self.signals.forget(item_id);
        }

        let report = &mut out.report;
        report.open_trends = self.clusterer.len();
        report.transitions = out.transitions.len();
        report.archived = out.archive.len();
        report.alerts = out.alerts.len();
        report.persisted = out.persist.len();
        report.evicted = evicted.len();
        report.tracked_items = self.items.len();
        report.audited = out.audit.len();
        tracing::info!(
            cycle = report.cycle,
            created = report.created,
            joined = report.joined,
            open_trends = report.open_trends,
            transitions = report.transitions,
            archived = report.archived,
            alerts = report.alerts,
            persisted = report.persisted,
            evicted = report.evicted,
            tracked_items = report.tracked_items,
            audited = report.audited,
            "aggregation cycle complete"
        );
        out
    }

    fn cluster_pending(&mut self, now: DateTime<Utc>, report: &mut CycleReport) {
        let mut groups: BTreeMap<TopicKey, Vec<ItemId>> = BTreeMap::new();
        for item_id in &self.pending {
            let Some(tracked) = self.items.get(item_id) else {
                continue;
            };
            if tracked.item.bot_flagged {
                continue;
            }
            let key = self
                .aggregator
                .topic_of(item_id)
                .cloned()
                .unwrap_or_else(|| TopicKey::derive(&tracked.item));
            groups.entry(key).or_default().push(item_id.clone());
        }

        // Hottest topics first so their trends form before quieter ones.
        let mut ordered: Vec<(TopicKey, f64, Vec<ItemId>)> = groups
            .into_iter()
            .map(|(key, ids)| {
                let velocity = self.aggregator.topic_velocity(&key, now);
                (key, velocity, ids)
            })
            .collect();
        ordered.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        for (_, _, mut ids) in ordered {
            let aggregator = &self.aggregator;
            ids.sort_by(|a, b| {
                aggregator
                    .current_velocity(b, now)
                    .total_cmp(&aggregator.current_velocity(a, now))
                    .then_with(|| a.cmp(b))
            });
            for item_id in ids {
                self.pending.remove(&item_id);
                let Some(tracked) = self.items.get(&item_id) else {
                    continue;
                };
                let topic = self.classifiers.topic_for(&self.signals, &tracked.item);
                let engagement = self
                    .aggregator
                    .latest_value(&item_id)
                    .unwrap_or_else(|| weighted_value(&self.config.metric_weights, &tracked.latest));
                let assignment = self.clusterer.assign(
                    Candidate {
                        item: &tracked.item,
                        engagement,
                        topic: topic.as_ref().map(|t| &t.value),
                    },
                    &self.config,
                    now,
                );
                match assignment {
                    Assignment::Created { .. } => report.created += 1,
                    Assignment::Joined { .. } => report.joined += 1,
                    Assignment::AlreadyMember { .. } => {}
                }
            }
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::too_many_lines)]
    fn evaluate_trend(
        &mut self,
        trend_id: TrendId,
        now: DateTime<Utc>,
        out: &mut CycleOutput,
        samples: &mut Vec<(Option<String>, f64)>,
    ) {
        let Some(record) = self.clusterer.get(&trend_id) else {
            return;
        };
        let category = record.trend.category.clone();

        let velocity: f64 = record
            .trend
            .member_item_ids
            .iter()
            .map(|id| self.aggregator.current_velocity(id, now))
            .sum();

        let (sentiment, sources, mix, coverage) = {
            let members: Vec<MemberStats<'_>> = record
                .trend
                .member_item_ids
                .iter()
                .filter_map(|id| self.items.get(id))
                .map(|tracked| MemberStats {
                    item: &tracked.item,
                    engagement: self
                        .aggregator
                        .latest_value(&tracked.item.item_id)
                        .unwrap_or_else(|| {
                            weighted_value(&self.config.metric_weights, &tracked.latest)
                        }),
                    total_engagement: tracked.latest.total_engagement(),
                    interactions: tracked.latest.interactions(),
                    sentiment: self.classifiers.sentiment_for(&self.signals, &tracked.item),
                })
                .collect();
            let coverage = if members.is_empty() {
                0.0
            } else {
                members
                    .iter()
                    .map(|m| self.classifiers.coverage(&self.signals, m.item))
                    .sum::<f64>()
                    / members.len() as f64
            };
            (
                aggregate_sentiment(&members),
                top_sources(&members, self.config.top_sources_limit),
                promotion_mix(members.iter().map(|m| m.item)),
                coverage,
            )
        };

        let hot = self.is_hot(category.as_deref(), velocity);

        let Some(record) = self.clusterer.get_mut(&trend_id) else {
            return;
        };
        let transition = record.tracker.evaluate(
            CycleObservation {
                now,
                velocity,
                hot,
                first_seen_at: record.trend.first_seen_at,
            },
            &self.config,
        );
        let matched = self
            .matcher
            .match_pattern(category.as_deref(), record.tracker.curve());

        let velocity_score = velocity_term(velocity, category.as_deref(), &self.history, &self.config);
        let breakdown = virality(
            velocity_score,
            spread_term(record.trend.platforms.len(), &self.config),
            influence_term(&sources, &self.config),
            pattern_term(matched.as_ref(), &self.config),
            coverage,
        );

        let previous = record.trend.clone();
        let mut next = previous.clone();
        next.state = record.tracker.state();
        next.velocity = velocity;
        next.acceleration = record.tracker.acceleration();
        next.velocity_score = velocity_score.value;
        next.virality_score = breakdown.score;
        next.virality = breakdown;
        next.level = TrendLevel::from_score(breakdown.score);
        next.sentiment_breakdown = sentiment;
        next.top_sources = sources;
        next.promotion_mix = mix;
        next.signature_tags = record.signature.strongest_tags(self.config.signature_max_tags);
        next.signal_coverage = coverage;

        if let Some(t) = transition {
            if t.to == TrendState::Peaked {
                next.peak_observed_at = record.tracker.peak_at();
                self.matcher
                    .learn(category.as_deref(), record.tracker.curve());
            }
            tracing::info!(
                trend_id = %trend_id,
                from = %t.from,
                to = %t.to,
                velocity,
                virality = breakdown.score,
                "trend state transition"
            );
            out.transitions.push((trend_id, t));
            if t.is_spike() {
                out.alerts.push(spike_alert(&next, now));
            }
        }
        if let Some(alert) = crisis_alert(
            &next,
            &record.signature,
            &previous.sentiment_breakdown,
            &next.sentiment_breakdown,
            &self.config.crisis_bands,
            &self.config.branded_keywords,
            now,
        ) {
            out.alerts.push(alert);
        }

        let content_changed = {
            let mut probe = next.clone();
            probe.last_updated_at = previous.last_updated_at;
            probe != previous
        };
        let has_unpersisted = next
            .member_item_ids
            .iter()
            .any(|id| self.items.get(id).is_some_and(|t| !t.unpersisted.is_empty()));
        let dirty = content_changed || has_unpersisted || record.persisted_version.is_none();

        if dirty {
            next.last_updated_at = fresh_version(now, record.persisted_version);
            let snapshots = drain_snapshots(&mut self.items, &next.member_item_ids);
            record.persisted_version = Some(next.last_updated_at);
            out.persist.push(PersistRequest {
                trend: next.clone(),
                snapshots,
            });
        }
        record.trend = next;
        samples.push((category, velocity));

        if record.trend.state == TrendState::Archived {
            let archived = record.trend.clone();
            tracing::info!(
                trend_id = %trend_id,
                members = archived.member_count(),
                reason = ?transition.and_then(|t| t.archive_reason),
                "trend archived"
            );
            self.clusterer.remove(&trend_id);
            out.archive.push(archived);
        }
    }

    /// Velocity at or above the category's emerging percentile. Until the
    /// category has enough history any non-quiet velocity qualifies.
    fn is_hot(&self, category: Option<&str>, velocity: f64) -> bool {
        if velocity <= self.config.quiet_velocity_epsilon {
            return false;
        }
        if self.history.len(category) < self.config.min_category_samples {
            return true;
        }
        self.history
            .percentile(category, self.config.emerging_percentile)
            .is_none_or(|threshold| velocity >= threshold)
    }

    /// Persist requests for every open trend with state or snapshots not
    /// yet handed to storage. Used at shutdown.
    pub fn flush(&mut self, now: DateTime<Utc>) -> Vec<PersistRequest> {
        let mut requests = Vec::new();
        for trend_id in self.clusterer.trend_ids() {
            let Some(record) = self.clusterer.get_mut(&trend_id) else {
                continue;
            };
            let has_unpersisted = record
                .trend
                .member_item_ids
                .iter()
                .any(|id| self.items.get(id).is_some_and(|t| !t.unpersisted.is_empty()));
            if !has_unpersisted && record.persisted_version == Some(record.trend.last_updated_at) {
                continue;
            }
            record.trend.last_updated_at = fresh_version(now, record.persisted_version);
            record.persisted_version = Some(record.trend.last_updated_at);
            let snapshots = drain_snapshots(&mut self.items, &record.trend.member_item_ids);
            requests.push(PersistRequest {
                trend: record.trend.clone(),
                snapshots,
            });
        }
        tracing::info!(trends = requests.len(), "flushed open trends");
        requests
    }

    /// Hands over the unpersisted snapshots of every bot-flagged item that
    /// is not a trend member. Such items never reach a trend, so this is the
    /// only path their engagement takes to storage.
    pub fn drain_audit(&mut self) -> Vec<AuditRecord> {
        let clusterer = &self.clusterer;
        let mut records: Vec<AuditRecord> = self
            .items
            .values_mut()
            .filter(|t| t.item.bot_flagged && !t.unpersisted.is_empty())
            .filter(|t| !clusterer.is_member(&t.item.item_id))
            .map(|t| {
                let mut snapshots = std::mem::take(&mut t.unpersisted);
                snapshots.sort_by_key(|s| s.observed_at);
                AuditRecord {
                    item: t.item.clone(),
                    snapshots,
                }
            })
            .collect();
        records.sort_by(|a, b| a.item.item_id.cmp(&b.item.item_id));
        if !records.is_empty() {
            tracing::debug!(items = records.len(), "drained bot-flagged engagement for audit");
        }
        records
    }

    /// Open trends in creation order.
    #[must_use]
    pub fn open_trends(&self) -> Vec<Trend> {
        self.clusterer.records().map(|r| r.trend.clone()).collect()
    }

    #[must_use]
    pub fn trend(&self, trend_id: &TrendId) -> Option<Trend> {
        self.clusterer.get(trend_id).map(|r| r.trend.clone())
    }

    #[must_use]
    pub fn trend_of(&self, item_id: &ItemId) -> Option<TrendId> {
        self.clusterer.trend_of(item_id)
    }

    /// Latest view of a tracked item and its newest snapshot, including
    /// bot-flagged items kept for audit.
    #[must_use]
    pub fn tracked_item(&self, item_id: &ItemId) -> Option<(&ContentItem, &EngagementSnapshot)> {
        self.items.get(item_id).map(|t| (&t.item, &t.latest))
    }

    #[must_use]
    pub fn tracked_items(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn current_velocity(&self, item_id: &ItemId, now: DateTime<Utc>) -> f64 {
        self.aggregator.current_velocity(item_id, now)
    }
}

/// Storage versions must strictly increase per trend.
fn fresh_version(now: DateTime<Utc>, persisted: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match persisted {
        Some(previous) if now <= previous => previous + Duration::microseconds(1),
        _ => now,
    }
}

fn drain_snapshots(
    items: &mut HashMap<ItemId, TrackedItem>,
    members: &BTreeSet<ItemId>,
) -> Vec<EngagementSnapshot> {
    let mut snapshots = Vec::new();
    for id in members {
        if let Some(tracked) = items.get_mut(id) {
            snapshots.append(&mut tracked.unpersisted);
        }
    }
    snapshots.sort_by(|a, b| {
        a.observed_at
            .cmp(&b.observed_at)
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
    snapshots
}

