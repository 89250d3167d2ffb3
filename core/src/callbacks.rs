//! Callback system for circuit breaker state transitions
//!
//! Callbacks only ever see transitions that were persisted. A caller whose
//! write lost the race never reports the transition it tried to make.

use crate::CircuitState;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A persisted change of breaker state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionEvent {
    pub breaker: String,
    pub previous: CircuitState,
    pub current: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub at: DateTime<Utc>,
}

type NameCallback = Arc<dyn Fn(&str) + Send + Sync>;
type TransitionCallback = Arc<dyn Fn(&TransitionEvent) + Send + Sync>;

/// Callbacks for circuit breaker events
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<NameCallback>,
    pub on_close: Option<NameCallback>,
    pub on_half_open: Option<NameCallback>,
    pub on_transition: Option<TransitionCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log a transition and fan it out to the registered callbacks
    pub fn emit(&self, event: &TransitionEvent) {
        tracing::info!(
            breaker = %event.breaker,
            from = %event.previous,
            to = %event.current,
            failure_count = event.failure_count,
            success_count = event.success_count,
            "circuit state changed"
        );

        if let Some(ref callback) = self.on_transition {
            callback(event);
        }

        match event.current {
            CircuitState::Open => self.trigger_open(&event.breaker),
            CircuitState::Closed => self.trigger_close(&event.breaker),
            CircuitState::HalfOpen => self.trigger_half_open(&event.breaker),
        }
    }

    pub fn trigger_open(&self, breaker: &str) {
        if let Some(ref callback) = self.on_open {
            callback(breaker);
        }
    }

    pub fn trigger_close(&self, breaker: &str) {
        if let Some(ref callback) = self.on_close {
            callback(breaker);
        }
    }

    pub fn trigger_half_open(&self, breaker: &str) {
        if let Some(ref callback) = self.on_half_open {
            callback(breaker);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .field("on_transition", &self.on_transition.is_some())
            .finish()
    }
}
