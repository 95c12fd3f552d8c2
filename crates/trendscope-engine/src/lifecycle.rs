//! Per-trend lifecycle state machine.
//!
//! Evaluated once per aggregation cycle from the trend's summed velocity and
//! its change since the previous cycle (acceleration):
//!
//! * `candidate -> emerging`: velocity reaches the category's emerging
//!   percentile.
//! * `emerging -> trending`: hot for `trending_cycles` consecutive cycles.
//! * `trending | emerging -> peaked`: after rising, acceleration stays
//!   negative for `peak_confirm_cycles` consecutive cycles. A single-cycle
//!   dip is ignored.
//! * `peaked -> declining`: the negative run reaches `declining_cycles`.
//! * `declining -> trending`: re-ignition on positive acceleration while hot.
//! * any open state `-> archived`: quiet for the cool-down period, or older
//!   than the maximum trend age.

use chrono::{DateTime, Duration, Utc};
use trendscope_core::{EngineConfig, TrendState};

/// Inputs for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleObservation {
    pub now: DateTime<Utc>,
    pub velocity: f64,
    /// Velocity at or above the category's emerging percentile.
    pub hot: bool,
    pub first_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveReason {
    CooledDown,
    MaxAge,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub from: TrendState,
    pub to: TrendState,
    pub at: DateTime<Utc>,
    pub archive_reason: Option<ArchiveReason>,
}

impl Transition {
    /// Entering `trending`, either for the first time or by re-ignition.
    #[must_use]
    pub fn is_spike(&self) -> bool {
        self.to == TrendState::Trending
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleTracker {
    state: TrendState,
    previous_velocity: Option<f64>,
    acceleration: f64,
    hot_run: u32,
    falling_run: u32,
    has_risen: bool,
    max_velocity: f64,
    max_velocity_at: Option<DateTime<Utc>>,
    quiet_since: Option<DateTime<Utc>>,
    /// One velocity sample per evaluated cycle, oldest first.
    curve: Vec<f64>,
}

impl Default for LifecycleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: TrendState::Candidate,
            previous_velocity: None,
            acceleration: 0.0,
            hot_run: 0,
            falling_run: 0,
            has_risen: false,
            max_velocity: 0.0,
            max_velocity_at: None,
            quiet_since: None,
            curve: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> TrendState {
        self.state
    }

    #[must_use]
    pub fn acceleration(&self) -> f64 {
        self.acceleration
    }

    /// When the highest velocity so far was observed.
    #[must_use]
    pub fn peak_at(&self) -> Option<DateTime<Utc>> {
        self.max_velocity_at
    }

    #[must_use]
    pub fn curve(&self) -> &[f64] {
        &self.curve
    }

    /// Advance one cycle. Returns the transition taken, if any.
    pub fn evaluate(&mut self, obs: CycleObservation, config: &EngineConfig) -> Option<Transition> {
        if self.state == TrendState::Archived {
            return None;
        }

        let acceleration = obs.velocity - self.previous_velocity.unwrap_or(0.0);
        self.previous_velocity = Some(obs.velocity);
        self.acceleration = acceleration;
        self.curve.push(obs.velocity);
        if self.curve.len() > config.category_history_len {
            self.curve.remove(0);
        }

        if obs.velocity > self.max_velocity || self.max_velocity_at.is_none() {
            self.max_velocity = obs.velocity.max(self.max_velocity);
            self.max_velocity_at = Some(obs.now);
        }

        let eps = config.acceleration_epsilon;
        if acceleration > eps {
            self.falling_run = 0;
            if obs.velocity > config.quiet_velocity_epsilon {
                self.has_risen = true;
            }
        } else if acceleration < -eps {
            self.falling_run += 1;
        }
        self.hot_run = if obs.hot { self.hot_run + 1 } else { 0 };

        if obs.velocity.abs() <= config.quiet_velocity_epsilon {
            self.quiet_since.get_or_insert(obs.now);
        } else {
            self.quiet_since = None;
        }

        if let Some(reason) = self.archive_reason(&obs, config) {
            return Some(self.move_to(TrendState::Archived, obs.now, Some(reason)));
        }

        let next = match self.state {
            TrendState::Candidate if obs.hot => Some(TrendState::Emerging),
            TrendState::Emerging if self.peak_confirmed(config) => Some(TrendState::Peaked),
            TrendState::Emerging if self.hot_run >= config.trending_cycles => {
                Some(TrendState::Trending)
            }
            TrendState::Trending if self.peak_confirmed(config) => Some(TrendState::Peaked),
            TrendState::Peaked if self.falling_run >= config.declining_cycles => {
                Some(TrendState::Declining)
            }
            TrendState::Declining if acceleration > eps && obs.hot => Some(TrendState::Trending),
            _ => None,
        }?;
        Some(self.move_to(next, obs.now, None))
    }

    fn peak_confirmed(&self, config: &EngineConfig) -> bool {
        self.has_risen && self.falling_run >= config.peak_confirm_cycles
    }

    fn archive_reason(&self, obs: &CycleObservation, config: &EngineConfig) -> Option<ArchiveReason> {
        let max_age = Duration::seconds(i64::try_from(config.max_trend_age_secs).unwrap_or(i64::MAX));
        if obs.now - obs.first_seen_at >= max_age {
            return Some(ArchiveReason::MaxAge);
        }
        let cooldown = Duration::seconds(i64::try_from(config.cooldown_secs).unwrap_or(i64::MAX));
        match self.quiet_since {
            Some(since) if obs.now - since >= cooldown => Some(ArchiveReason::CooledDown),
            _ => None,
        }
    }

    fn move_to(
        &mut self,
        to: TrendState,
        at: DateTime<Utc>,
        archive_reason: Option<ArchiveReason>,
    ) -> Transition {
        debug_assert!(self.state.can_transition_to(to), "{} -> {to}", self.state);
        let from = self.state;
        self.state = to;
        if to == TrendState::Trending && from == TrendState::Declining {
            // A new wave needs its own peak.
            self.has_risen = true;
            self.falling_run = 0;
        }
        Transition {
            from,
            to,
            at,
            archive_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    fn obs(cycle: i64, velocity: f64, hot: bool) -> CycleObservation {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        CycleObservation {
            now: start + Duration::minutes(5 * cycle),
            velocity,
            hot,
            first_seen_at: start,
        }
    }

    /// Drive a tracker through `(velocity, hot)` pairs and collect the states.
    fn run(steps: &[(f64, bool)]) -> (LifecycleTracker, Vec<TrendState>) {
        let cfg = config();
        let mut tracker = LifecycleTracker::new();
        let mut states = Vec::new();
        for (i, (v, hot)) in steps.iter().enumerate() {
            tracker.evaluate(obs(i64::try_from(i).unwrap(), *v, *hot), &cfg);
            states.push(tracker.state());
        }
        (tracker, states)
    }

    #[test]
    fn rises_through_emerging_to_trending() {
        let (_, states) = run(&[(1.0, true), (2.0, true), (3.0, true)]);
        assert_eq!(
            states,
            vec![TrendState::Emerging, TrendState::Trending, TrendState::Trending]
        );
    }

    #[test]
    fn cold_candidate_stays_candidate() {
        let (_, states) = run(&[(0.5, false), (0.6, false)]);
        assert_eq!(states, vec![TrendState::Candidate, TrendState::Candidate]);
    }

    #[test]
    fn single_cycle_dip_stays_trending() {
        let (_, states) = run(&[(1.0, true), (2.0, true), (3.0, true), (2.5, true), (4.0, true)]);
        assert_eq!(states.last(), Some(&TrendState::Trending));
        assert!(!states.contains(&TrendState::Peaked));
    }

    #[test]
    fn sustained_fall_peaks_then_declines() {
        let (tracker, states) = run(&[
            (1.0, true),
            (2.0, true),
            (3.0, true),
            (2.5, true),
            (2.0, true),
            (1.5, false),
        ]);
        assert_eq!(states[4], TrendState::Peaked);
        assert_eq!(states[5], TrendState::Declining);
        assert_eq!(tracker.peak_at(), Some(obs(2, 0.0, false).now));
    }

    #[test]
    fn declining_reignites_on_renewed_growth() {
        let (_, states) = run(&[
            (1.0, true),
            (2.0, true),
            (3.0, true),
            (2.5, true),
            (2.0, true),
            (1.5, true),
            (3.5, true),
        ]);
        assert_eq!(states[5], TrendState::Declining);
        assert_eq!(states[6], TrendState::Trending);
    }

    #[test]
    fn peaked_never_returns_to_emerging_or_trending() {
        let (_, states) = run(&[
            (1.0, true),
            (2.0, true),
            (3.0, true),
            (2.0, true),
            (1.0, true),
            (5.0, true),
            (9.0, true),
        ]);
        assert_eq!(states[4], TrendState::Peaked);
        assert_eq!(states[5], TrendState::Peaked);
        assert_eq!(states[6], TrendState::Peaked);
    }

    #[test]
    fn quiet_trend_archives_after_cooldown() {
        let cfg = config();
        let mut tracker = LifecycleTracker::new();
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let at = |mins: i64| CycleObservation {
            now: start + Duration::minutes(mins),
            velocity: 0.0,
            hot: false,
            first_seen_at: start,
        };
        assert!(tracker.evaluate(at(0), &cfg).is_none());
        assert!(tracker.evaluate(at(60), &cfg).is_none());
        let t = tracker.evaluate(at(120), &cfg).unwrap();
        assert_eq!(t.to, TrendState::Archived);
        assert_eq!(t.archive_reason, Some(ArchiveReason::CooledDown));
        assert!(tracker.evaluate(at(125), &cfg).is_none());
    }

    #[test]
    fn old_trend_is_force_archived() {
        let cfg = config();
        let mut tracker = LifecycleTracker::new();
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let t = tracker
            .evaluate(
                CycleObservation {
                    now: start + Duration::days(30),
                    velocity: 5.0,
                    hot: true,
                    first_seen_at: start,
                },
                &cfg,
            )
            .unwrap();
        assert_eq!(t.archive_reason, Some(ArchiveReason::MaxAge));
    }

    #[test]
    fn spike_transitions_are_entries_into_trending() {
        let cfg = config();
        let mut tracker = LifecycleTracker::new();
        let first = tracker.evaluate(obs(0, 1.0, true), &cfg).unwrap();
        assert!(!first.is_spike());
        let second = tracker.evaluate(obs(1, 2.0, true), &cfg).unwrap();
        assert!(second.is_spike());
    }
}
