//! Breaker configuration and per-call overrides

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// How callers are admitted while the circuit is half-open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbePolicy {
    /// One caller at a time holds a probe lease written through the store
    #[default]
    Single,
    /// Every caller is admitted and the counters decide
    Concurrent,
}

/// What to do when the state store cannot be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailablePolicy {
    /// Block the call: without a decision, protect the dependency
    #[default]
    FailClosed,
    /// Let the call through unguarded and leave the record untouched
    FailOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Consecutive failures tolerated before the circuit opens
    pub failure_threshold: u32,

    /// Consecutive half-open successes required to close the circuit
    pub success_threshold: u32,

    /// How long the circuit stays open before a probe is allowed (milliseconds)
    pub timeout_ms: u64,

    /// Jitter factor for the open window (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: timeout * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,

    pub probe_policy: ProbePolicy,

    pub unavailable_policy: UnavailablePolicy,

    /// Load/decide/write cycles attempted before giving up on contention
    pub max_cas_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 5_000,
            jitter_factor: 0.0,
            probe_policy: ProbePolicy::Single,
            unavailable_policy: UnavailablePolicy::FailClosed,
            max_cas_attempts: 3,
        }
    }
}

impl Config {
    pub const ENV_PREFIX: &'static str = "BREAKER_";

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::NotPositive {
                field: "failure_threshold",
            });
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::NotPositive {
                field: "success_threshold",
            });
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::NotPositive { field: "timeout_ms" });
        }
        if self.max_cas_attempts == 0 {
            return Err(ConfigError::NotPositive {
                field: "max_cas_attempts",
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::JitterOutOfRange(self.jitter_factor.to_string()));
        }
        Ok(())
    }

    /// Length of the next open window, with jitter applied when configured
    pub fn open_window(&self) -> chrono::Duration {
        let timeout_ms = if self.jitter_factor > 0.0 {
            let policy = chrono_machines::Policy {
                max_attempts: 1,
                base_delay_ms: self.timeout_ms,
                multiplier: 1.0,
                max_delay_ms: self.timeout_ms,
            };
            policy.calculate_delay(1, self.jitter_factor) as u64
        } else {
            self.timeout_ms
        };

        chrono::Duration::milliseconds(i64::try_from(timeout_ms).unwrap_or(i64::MAX))
    }

    /// Load from `BREAKER_*` environment variables on top of the defaults
    ///
    /// Recognised keys: `BREAKER_FAILURE_THRESHOLD`, `BREAKER_SUCCESS_THRESHOLD`,
    /// `BREAKER_TIMEOUT_MS`, `BREAKER_JITTER_FACTOR`, `BREAKER_PROBE_POLICY`
    /// (`single` | `concurrent`), `BREAKER_UNAVAILABLE_POLICY`
    /// (`fail_closed` | `fail_open`) and `BREAKER_MAX_CAS_ATTEMPTS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |name: &str| {
            let key = format!("{}{}", Self::ENV_PREFIX, name);
            lookup(&key).map(|value| (key, value))
        };

        if let Some((key, value)) = var("FAILURE_THRESHOLD") {
            config.failure_threshold = parse_env(key, value)?;
        }
        if let Some((key, value)) = var("SUCCESS_THRESHOLD") {
            config.success_threshold = parse_env(key, value)?;
        }
        if let Some((key, value)) = var("TIMEOUT_MS") {
            config.timeout_ms = parse_env(key, value)?;
        }
        if let Some((key, value)) = var("JITTER_FACTOR") {
            config.jitter_factor = parse_env(key, value)?;
        }
        if let Some((key, value)) = var("MAX_CAS_ATTEMPTS") {
            config.max_cas_attempts = parse_env(key, value)?;
        }
        if let Some((key, value)) = var("PROBE_POLICY") {
            let normalized = value.trim().to_ascii_lowercase();
            config.probe_policy = match normalized.as_str() {
                "single" => ProbePolicy::Single,
                "concurrent" => ProbePolicy::Concurrent,
                _ => return Err(ConfigError::InvalidEnv { key, value }),
            };
        }
        if let Some((key, value)) = var("UNAVAILABLE_POLICY") {
            let normalized = value.trim().to_ascii_lowercase();
            config.unavailable_policy = match normalized.as_str() {
                "fail_closed" | "closed" => UnavailablePolicy::FailClosed,
                "fail_open" | "open" => UnavailablePolicy::FailOpen,
                _ => return Err(ConfigError::InvalidEnv { key, value }),
            };
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_env<T: FromStr>(key: String, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}

/// Per-call overrides layered on top of the breaker's [`Config`]
///
/// ```rust
/// use shared_breaker::CallOptions;
/// use std::time::Duration;
///
/// let options = CallOptions::new()
///     .failure_threshold(2)
///     .timeout(Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub failure_threshold: Option<u32>,
    pub success_threshold: Option<u32>,
    pub timeout: Option<Duration>,
}

impl CallOptions {
    /// Create call options with no overrides
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = Some(threshold);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Merge onto a base config and validate the result
    pub fn apply(&self, base: &Config) -> Result<Config, ConfigError> {
        let mut config = base.clone();
        if let Some(threshold) = self.failure_threshold {
            config.failure_threshold = threshold;
        }
        if let Some(threshold) = self.success_threshold {
            config.success_threshold = threshold;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        }
        config.validate()?;
        Ok(config)
    }
}
