//! Shared breaker record and its transition rules
//!
//! A [`BreakerState`] is an immutable snapshot: every rule below takes the
//! loaded snapshot and returns the snapshot to write back. Nothing is mutated
//! in place, so a decision is always made against exactly what was read.

use crate::config::{Config, ProbePolicy};
use crate::errors::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Health classification of a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted record shared by every caller of one breaker id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerState {
    pub state: CircuitState,

    /// Consecutive failures
    pub failure_count: u32,

    /// Consecutive successes while half-open
    pub success_count: u32,

    pub failure_threshold: u32,
    pub success_threshold: u32,

    /// While open, the earliest time a probe is allowed
    pub next_attempt_at: DateTime<Utc>,

    pub timeout_ms: u64,

    /// Expiry of the half-open probe lease, if one is held
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_deadline: Option<DateTime<Utc>>,

    /// Optimistic concurrency token; 0 means never persisted
    #[serde(default)]
    pub version: u64,

    pub updated_at: DateTime<Utc>,
}

/// Why a call was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Open { next_attempt_at: DateTime<Utc> },
    ProbeInFlight,
}

/// Admission decision for one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Run the call against the loaded snapshot
    Admit,
    /// Run the call as a half-open probe based on `next`. When `lease` is set,
    /// `next` carries a probe lease and must be written before the call.
    Probe { next: BreakerState, lease: bool },
    Reject(Rejection),
}

impl BreakerState {
    /// Default record for a breaker that has never been persisted
    pub fn new(config: &Config, now: DateTime<Utc>) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            next_attempt_at: now,
            timeout_ms: config.timeout_ms,
            probe_deadline: None,
            version: 0,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state == CircuitState::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.state == CircuitState::HalfOpen
    }

    /// Whether a half-open probe lease is still live at `now`
    pub fn probe_in_flight(&self, now: DateTime<Utc>) -> bool {
        self.probe_deadline.is_some_and(|deadline| now < deadline)
    }

    /// Decide whether a call may proceed
    pub fn admit(&self, config: &Config, now: DateTime<Utc>) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Admit,
            CircuitState::Open if now < self.next_attempt_at => {
                Admission::Reject(Rejection::Open {
                    next_attempt_at: self.next_attempt_at,
                })
            }
            CircuitState::Open => {
                let lease = config.probe_policy == ProbePolicy::Single;
                let mut next = self.stamped(config, now);
                next.state = CircuitState::HalfOpen;
                next.success_count = 0;
                next.probe_deadline = lease.then(|| Self::lease_until(config, now));
                Admission::Probe { next, lease }
            }
            CircuitState::HalfOpen => match config.probe_policy {
                ProbePolicy::Concurrent => Admission::Admit,
                ProbePolicy::Single if self.probe_in_flight(now) => {
                    Admission::Reject(Rejection::ProbeInFlight)
                }
                ProbePolicy::Single => {
                    let mut next = self.stamped(config, now);
                    next.probe_deadline = Some(Self::lease_until(config, now));
                    Admission::Probe { next, lease: true }
                }
            },
        }
    }

    /// Apply a successful outcome
    pub fn record_success(&self, config: &Config, now: DateTime<Utc>) -> Self {
        let mut next = self.stamped(config, now);

        match self.state {
            CircuitState::HalfOpen => {
                next.success_count = self.success_count.saturating_add(1);
                next.probe_deadline = None;
                if next.success_count >= config.success_threshold {
                    next.close();
                }
            }
            CircuitState::Closed => {
                next.failure_count = 0;
            }
            // Admitted under a view that has since been tripped by someone else
            CircuitState::Open => {}
        }

        next
    }

    /// Apply a failed outcome
    pub fn record_failure(&self, config: &Config, now: DateTime<Utc>) -> Self {
        let mut next = self.stamped(config, now);

        match self.state {
            CircuitState::HalfOpen => {
                next.failure_count = self.failure_count.saturating_add(1);
                next.trip(config, now);
            }
            CircuitState::Closed => {
                next.failure_count = self.failure_count.saturating_add(1);
                if next.failure_count >= config.failure_threshold {
                    next.trip(config, now);
                }
            }
            // Already open; the window keeps its deadline
            CircuitState::Open => {}
        }

        next
    }

    /// Give up a probe lease without recording an outcome
    pub fn release_probe(&self, config: &Config, now: DateTime<Utc>) -> Self {
        let mut next = self.stamped(config, now);
        next.probe_deadline = None;
        next
    }

    /// Force back to a fresh closed record
    pub fn reset(&self, config: &Config, now: DateTime<Utc>) -> Self {
        let mut next = self.stamped(config, now);
        next.close();
        next.next_attempt_at = now;
        next
    }

    /// Same health data, ignoring `version` and `updated_at`
    pub fn same_state(&self, other: &BreakerState) -> bool {
        self.state == other.state
            && self.failure_count == other.failure_count
            && self.success_count == other.success_count
            && self.failure_threshold == other.failure_threshold
            && self.success_threshold == other.success_threshold
            && self.next_attempt_at == other.next_attempt_at
            && self.timeout_ms == other.timeout_ms
            && self.probe_deadline == other.probe_deadline
    }

    /// Encode for backends that persist opaque documents
    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(raw)?)
    }

    fn stamped(&self, config: &Config, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.failure_threshold = config.failure_threshold;
        next.success_threshold = config.success_threshold;
        next.timeout_ms = config.timeout_ms;
        next.updated_at = now;
        next
    }

    fn trip(&mut self, config: &Config, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.success_count = 0;
        self.probe_deadline = None;
        self.next_attempt_at = now
            .checked_add_signed(config.open_window())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.probe_deadline = None;
    }

    fn lease_until(config: &Config, now: DateTime<Utc>) -> DateTime<Utc> {
        let timeout =
            chrono::Duration::milliseconds(i64::try_from(config.timeout_ms).unwrap_or(i64::MAX));
        now.checked_add_signed(timeout)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn config(failure_threshold: u32, success_threshold: u32, timeout_ms: u64) -> Config {
        Config {
            failure_threshold,
            success_threshold,
            timeout_ms,
            ..Default::default()
        }
    }

    fn tripped(config: &Config, now: DateTime<Utc>) -> BreakerState {
        let mut state = BreakerState::new(config, now);
        for _ in 0..config.failure_threshold {
            state = state.record_failure(config, now);
        }
        state
    }

    #[test]
    fn test_default_record() {
        let now = Utc::now();
        let state = BreakerState::new(&Config::default(), now);

        assert!(state.is_closed());
        assert_eq!(state.failure_count, 0);
        assert_eq!(state.success_count, 0);
        assert_eq!(state.next_attempt_at, now);
        assert_eq!(state.version, 0);
    }

    #[test]
    fn test_trips_exactly_at_threshold() {
        let cfg = config(3, 2, 1000);
        let now = Utc::now();
        let mut state = BreakerState::new(&cfg, now);

        state = state.record_failure(&cfg, now);
        state = state.record_failure(&cfg, now);
        assert!(state.is_closed());
        assert_eq!(state.failure_count, 2);

        state = state.record_failure(&cfg, now);
        assert!(state.is_open());
        assert_eq!(state.failure_count, 3);
        assert_eq!(state.next_attempt_at, now + Duration::milliseconds(1000));
    }

    #[test]
    fn test_threshold_of_one_flips_immediately() {
        let cfg = config(1, 1, 1000);
        let now = Utc::now();

        let state = BreakerState::new(&cfg, now).record_failure(&cfg, now);
        assert!(state.is_open());

        let later = now + Duration::milliseconds(1000);
        let Admission::Probe { next, .. } = state.admit(&cfg, later) else {
            panic!("expected probe admission");
        };
        let closed = next.record_success(&cfg, later);
        assert!(closed.is_closed());
    }

    #[test]
    fn test_success_resets_failures_while_closed() {
        let cfg = config(5, 2, 1000);
        let now = Utc::now();
        let mut state = BreakerState::new(&cfg, now);
        for _ in 0..4 {
            state = state.record_failure(&cfg, now);
        }
        assert_eq!(state.failure_count, 4);

        let state = state.record_success(&cfg, now);
        assert!(state.is_closed());
        assert_eq!(state.failure_count, 0);
    }

    #[test]
    fn test_open_rejects_until_next_attempt() {
        let cfg = config(2, 1, 1000);
        let now = Utc::now();
        let state = tripped(&cfg, now);

        assert_eq!(
            state.admit(&cfg, now + Duration::milliseconds(500)),
            Admission::Reject(Rejection::Open {
                next_attempt_at: now + Duration::milliseconds(1000)
            })
        );
        assert!(matches!(
            state.admit(&cfg, now + Duration::milliseconds(1000)),
            Admission::Probe { .. }
        ));
    }

    #[test]
    fn test_probe_takes_lease_under_single_policy() {
        let cfg = config(2, 2, 1000);
        let now = Utc::now();
        let later = now + Duration::milliseconds(1500);

        let Admission::Probe { next, lease } = tripped(&cfg, now).admit(&cfg, later) else {
            panic!("expected probe admission");
        };
        assert!(lease);
        assert!(next.is_half_open());
        assert_eq!(next.success_count, 0);
        assert_eq!(next.probe_deadline, Some(later + Duration::milliseconds(1000)));

        // Lease holder blocks others until it expires
        assert_eq!(
            next.admit(&cfg, later + Duration::milliseconds(10)),
            Admission::Reject(Rejection::ProbeInFlight)
        );
        assert!(matches!(
            next.admit(&cfg, later + Duration::milliseconds(1000)),
            Admission::Probe { lease: true, .. }
        ));
    }

    #[test]
    fn test_concurrent_policy_admits_everyone_half_open() {
        let cfg = Config {
            probe_policy: ProbePolicy::Concurrent,
            ..config(2, 2, 1000)
        };
        let now = Utc::now();
        let later = now + Duration::milliseconds(1000);

        let Admission::Probe { next, lease } = tripped(&cfg, now).admit(&cfg, later) else {
            panic!("expected probe admission");
        };
        assert!(!lease);
        assert_eq!(next.probe_deadline, None);
        assert_eq!(next.admit(&cfg, later), Admission::Admit);
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let cfg = config(1, 2, 1000);
        let now = Utc::now();
        let later = now + Duration::milliseconds(1000);
        let Admission::Probe { next, .. } = tripped(&cfg, now).admit(&cfg, later) else {
            panic!("expected probe admission");
        };

        let one = next.record_success(&cfg, later);
        assert!(one.is_half_open());
        assert_eq!(one.success_count, 1);
        assert_eq!(one.probe_deadline, None);

        let two = one.record_success(&cfg, later);
        assert!(two.is_closed());
        assert_eq!(two.failure_count, 0);
        assert_eq!(two.success_count, 0);
    }

    #[test]
    fn test_half_open_failure_reopens_with_fresh_window() {
        let cfg = config(3, 2, 1000);
        let now = Utc::now();
        let later = now + Duration::milliseconds(2500);
        let Admission::Probe { next, .. } = tripped(&cfg, now).admit(&cfg, later) else {
            panic!("expected probe admission");
        };
        let half = next.record_success(&cfg, later);

        let reopened = half.record_failure(&cfg, later);
        assert!(reopened.is_open());
        assert_eq!(reopened.success_count, 0);
        assert_eq!(reopened.probe_deadline, None);
        assert_eq!(
            reopened.next_attempt_at,
            later + Duration::milliseconds(1000)
        );
    }

    #[test]
    fn test_outcomes_against_open_record_change_nothing() {
        let cfg = config(1, 1, 1000);
        let now = Utc::now();
        let open = tripped(&cfg, now);

        let after_success = open.record_success(&cfg, now);
        let after_failure = open.record_failure(&cfg, now + Duration::milliseconds(300));
        assert!(after_success.same_state(&open));
        assert!(after_failure.same_state(&open));
    }

    #[test]
    fn test_release_probe_clears_lease_only() {
        let cfg = config(1, 2, 1000);
        let now = Utc::now();
        let Admission::Probe { next, .. } = tripped(&cfg, now).admit(&cfg, now + Duration::seconds(1))
        else {
            panic!("expected probe admission");
        };

        let released = next.release_probe(&cfg, now);
        assert!(released.is_half_open());
        assert_eq!(released.probe_deadline, None);
    }

    #[test]
    fn test_reset_returns_to_closed() {
        let cfg = config(1, 1, 1000);
        let now = Utc::now();
        let reset = tripped(&cfg, now).reset(&cfg, now);

        assert!(reset.is_closed());
        assert_eq!(reset.failure_count, 0);
        assert_eq!(reset.next_attempt_at, now);
    }

    #[test]
    fn test_overrides_are_stamped_on_the_record() {
        let now = Utc::now();
        let state = BreakerState::new(&Config::default(), now);
        let cfg = config(2, 1, 750);

        let next = state.record_success(&cfg, now);
        assert_eq!(next.failure_threshold, 2);
        assert_eq!(next.success_threshold, 1);
        assert_eq!(next.timeout_ms, 750);
    }

    #[test]
    fn test_huge_timeout_saturates_open_window() {
        let cfg = config(1, 1, 10_000_000_000_000_000);
        let now = Utc::now();

        let open = BreakerState::new(&cfg, now).record_failure(&cfg, now);
        assert!(open.is_open());
        assert_eq!(open.next_attempt_at, DateTime::<Utc>::MAX_UTC);
        assert!(matches!(
            open.admit(&cfg, now + Duration::days(365)),
            Admission::Reject(Rejection::Open { .. })
        ));
    }

    #[test]
    fn test_huge_timeout_saturates_probe_lease() {
        let cfg = config(1, 1, 10_000_000_000_000_000);
        let now = Utc::now();
        let mut open = BreakerState::new(&cfg, now);
        open.state = CircuitState::Open;

        let Admission::Probe { next, lease: true } = open.admit(&cfg, now) else {
            panic!("expected leased probe admission");
        };
        assert_eq!(next.probe_deadline, Some(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn test_json_round_trip() {
        let cfg = config(2, 1, 1000);
        let now = Utc::now();
        let mut state = tripped(&cfg, now);
        state.version = 7;

        let raw = state.to_json().unwrap();
        assert!(raw.contains("\"state\":\"open\""));
        assert_eq!(BreakerState::from_json(&raw).unwrap(), state);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            BreakerState::from_json("{\"state\":\"sideways\"}"),
            Err(StoreError::Serialization(_))
        ));
    }
}
