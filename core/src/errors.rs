//! Error types for circuit breaker operations

use chrono::{DateTime, Utc};
use std::error::Error as StdError;
use thiserror::Error;

/// Errors that can occur during circuit breaker operations
///
/// Only the rejection, contention and store variants are defined by the
/// breaker. Whatever the wrapped operation fails with is handed back untouched
/// inside [`CircuitError::Execution`].
#[derive(Debug, Error)]
pub enum CircuitError<E = Box<dyn StdError + Send + Sync>> {
    /// Circuit is open, calls are being rejected until `next_attempt_at`
    #[error("circuit '{breaker}' is open (next attempt at {next_attempt_at})")]
    Open {
        breaker: String,
        next_attempt_at: DateTime<Utc>,
    },

    /// Another caller holds the half-open probe lease
    #[error("circuit '{breaker}' half-open probe already in flight")]
    HalfOpenLimitReached { breaker: String },

    /// The shared record kept changing under us
    #[error("circuit '{breaker}' state store contention after {attempts} attempts")]
    Contention { breaker: String, attempts: u32 },

    /// The state store could not be reached, so no admission decision was made
    #[error("circuit '{breaker}' state store unavailable: {source}")]
    StoreUnavailable {
        breaker: String,
        #[source]
        source: StoreError,
    },

    /// Per-call overrides produced an invalid configuration
    #[error("invalid breaker configuration: {0}")]
    InvalidConfig(#[source] ConfigError),

    /// The wrapped operation failed
    #[error("circuit execution failed: {0}")]
    Execution(#[source] E),
}

impl<E> CircuitError<E> {
    /// True when the call was rejected without reaching the downstream dependency
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CircuitError::Open { .. } | CircuitError::HalfOpenLimitReached { .. }
        )
    }

    /// True for breaker infrastructure failures (contention or unreachable store)
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            CircuitError::Contention { .. } | CircuitError::StoreUnavailable { .. }
        )
    }

    /// Get the downstream error, if that is what failed
    pub fn into_execution(self) -> Option<E> {
        match self {
            CircuitError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors reported by a [`StateStore`](crate::StateStore) backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// The stored version no longer matches the one the write was based on
    #[error("version conflict on '{breaker}' (expected {expected:?}, found {actual:?})")]
    VersionConflict {
        breaker: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// A versioned write targeted a record that does not exist
    #[error("no breaker record for '{breaker}'")]
    NotFound { breaker: String },

    /// Record could not be encoded or decoded
    #[error("breaker record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend is unreachable or failed for reasons of its own
    #[error("state store unavailable: {0}")]
    Unavailable(#[source] Box<dyn StdError + Send + Sync>),
}

impl StoreError {
    /// Wrap any backend failure as [`StoreError::Unavailable`]
    pub fn unavailable(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        StoreError::Unavailable(err.into())
    }

    /// Conflicts and vanished records mean "reload and try again"
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::VersionConflict { .. } | StoreError::NotFound { .. }
        )
    }
}

/// Invalid breaker configuration or identity
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("breaker id must not be empty")]
    EmptyBreakerId,

    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("jitter_factor must be within 0.0..=1.0, got {0}")]
    JitterOutOfRange(String),

    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: String, value: String },
}
