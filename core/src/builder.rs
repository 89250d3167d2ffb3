//! Builder API for ergonomic circuit breaker configuration

use crate::{
    BreakerId, ConfigError, MemoryStore, StateStore, TransitionEvent,
    callbacks::Callbacks,
    circuit::{CircuitBreaker, CircuitContext},
    classifier::FailureClassifier,
    clock::{Clock, SystemClock},
    config::{Config, ProbePolicy, UnavailablePolicy},
};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating circuit breakers with fluent API
pub struct CircuitBuilder {
    id: String,
    config: Config,
    store: Option<Arc<dyn StateStore>>,
    clock: Option<Arc<dyn Clock>>,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    callbacks: Callbacks,
}

impl CircuitBuilder {
    /// Create a new builder for the breaker with the given id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            config: Config::default(),
            store: None,
            clock: None,
            failure_classifier: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Replace the whole config, e.g. one loaded with [`Config::from_env`]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the number of consecutive failures that opens the circuit
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set the success threshold (successes needed to close from half-open)
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Set how long the circuit stays open before a probe is allowed
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: timeout * (1 - jitter + rand * jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    pub fn probe_policy(mut self, policy: ProbePolicy) -> Self {
        self.config.probe_policy = policy;
        self
    }

    pub fn unavailable_policy(mut self, policy: UnavailablePolicy) -> Self {
        self.config.unavailable_policy = policy;
        self
    }

    /// Set how many load/decide/write cycles are tried before reporting contention
    pub fn max_cas_attempts(mut self, attempts: u32) -> Self {
        self.config.max_cas_attempts = attempts;
        self
    }

    /// Set the shared state store
    ///
    /// Without one, the breaker keeps its record in a private [`MemoryStore`]
    /// and shares state with nobody.
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the time source used for open windows and probe leases
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set a failure classifier to filter which errors should trip the circuit
    ///
    /// The classifier determines whether a given error should count toward
    /// opening the circuit. Use this to ignore "expected" errors like validation
    /// failures or client errors (4xx), while still tripping on server errors (5xx).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use shared_breaker::{CircuitBreaker, PredicateClassifier};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let breaker = CircuitBreaker::builder("api")
    ///     .failure_classifier(Arc::new(PredicateClassifier::new(|ctx| {
    ///         // Only trip on slow errors
    ///         ctx.duration > Duration::from_secs(1)
    ///     })))
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.failure_classifier = Some(classifier);
        self
    }

    /// Set callback for when circuit opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Set callback receiving every persisted transition
    pub fn on_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(&TransitionEvent) + Send + Sync + 'static,
    {
        self.callbacks.on_transition = Some(Arc::new(f));
        self
    }

    /// Build the circuit breaker
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        let id = BreakerId::new(self.id)?;
        self.config.validate()?;

        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let context = CircuitContext {
            id,
            config: self.config,
            store,
            clock,
            failure_classifier: self.failure_classifier,
        };

        Ok(CircuitBreaker::with_context_and_callbacks(
            context,
            self.callbacks,
        ))
    }
}

impl std::fmt::Debug for CircuitBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBuilder")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("store", &self.store)
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let breaker = CircuitBuilder::new("test").build().unwrap();

        assert_eq!(breaker.id().as_str(), "test");
        assert_eq!(breaker.config(), &Config::default());
    }

    #[test]
    fn test_builder_custom_config() {
        let breaker = CircuitBuilder::new("test")
            .failure_threshold(10)
            .success_threshold(3)
            .timeout(Duration::from_secs(60))
            .jitter_factor(0.25)
            .probe_policy(ProbePolicy::Concurrent)
            .unavailable_policy(UnavailablePolicy::FailOpen)
            .max_cas_attempts(7)
            .build()
            .unwrap();

        let config = breaker.config();
        assert_eq!(config.failure_threshold, 10);
        assert_eq!(config.success_threshold, 3);
        assert_eq!(config.timeout_ms, 60_000);
        assert_eq!(config.jitter_factor, 0.25);
        assert_eq!(config.probe_policy, ProbePolicy::Concurrent);
        assert_eq!(config.unavailable_policy, UnavailablePolicy::FailOpen);
        assert_eq!(config.max_cas_attempts, 7);
    }

    #[test]
    fn test_builder_rejects_invalid_settings() {
        assert_eq!(
            CircuitBuilder::new("  ").build().unwrap_err(),
            ConfigError::EmptyBreakerId
        );
        assert_eq!(
            CircuitBuilder::new("api")
                .failure_threshold(0)
                .build()
                .unwrap_err(),
            ConfigError::NotPositive {
                field: "failure_threshold"
            }
        );
        assert!(matches!(
            CircuitBuilder::new("api")
                .jitter_factor(1.5)
                .build()
                .unwrap_err(),
            ConfigError::JitterOutOfRange(_)
        ));
    }

    #[test]
    fn test_builder_takes_whole_config() {
        let config = Config {
            failure_threshold: 1,
            timeout_ms: 250,
            ..Config::default()
        };

        let breaker = CircuitBuilder::new("api")
            .config(config.clone())
            .build()
            .unwrap();
        assert_eq!(breaker.config(), &config);
    }

    #[tokio::test]
    async fn test_builder_with_callbacks() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let opened = Arc::new(AtomicBool::new(false));
        let opened_clone = opened.clone();

        let breaker = CircuitBuilder::new("test")
            .failure_threshold(2)
            .on_open(move |_name| {
                opened_clone.store(true, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        // Trigger failures to open circuit
        let _ = breaker.call(|| async { Err::<(), _>("error 1") }).await;
        let _ = breaker.call(|| async { Err::<(), _>("error 2") }).await;

        // Callback should have been triggered
        assert!(opened.load(Ordering::SeqCst));
    }
}
