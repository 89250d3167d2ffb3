//! Failure classification for exception filtering
//!
//! This module provides traits and types for determining which errors
//! should count against the shared record vs. being passed through untallied.

use crate::BreakerId;
use std::any::Any;
use std::time::Duration;

/// Context provided to failure classifiers for error evaluation
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Breaker the failed call went through
    pub breaker: &'a BreakerId,
    /// The error that occurred (can be downcast to specific types)
    pub error: &'a dyn Any,
    /// How long the failed call took
    pub duration: Duration,
}

/// Trait for classifying failures - determines if an error should trip the circuit
///
/// Errors the classifier rejects are still returned to the caller unchanged;
/// they just do not move the failure counter.
///
/// # Examples
///
/// ```rust
/// use shared_breaker::{FailureClassifier, FailureContext};
///
/// #[derive(Debug)]
/// struct ServerErrorClassifier;
///
/// impl FailureClassifier for ServerErrorClassifier {
///     fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
///         ctx.error
///             .downcast_ref::<u16>()
///             .map(|status| *status >= 500)
///             .unwrap_or(true)
///     }
/// }
/// ```
pub trait FailureClassifier: Send + Sync + std::fmt::Debug {
    /// Returns `true` if the error should count as a failure, `false` to ignore it.
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Default classifier that trips on all errors
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn should_trip(&self, _ctx: &FailureContext<'_>) -> bool {
        true
    }
}

/// Predicate-based classifier using a closure
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> BreakerId {
        BreakerId::new("test").unwrap()
    }

    #[test]
    fn test_default_classifier_trips_all() {
        let id = breaker();
        let ctx = FailureContext {
            breaker: &id,
            error: &"any error" as &dyn Any,
            duration: Duration::from_millis(100),
        };

        assert!(DefaultClassifier.should_trip(&ctx));
    }

    #[test]
    fn test_predicate_on_duration() {
        let id = breaker();
        let classifier = PredicateClassifier::new(|ctx| ctx.duration > Duration::from_secs(1));

        let fast = FailureContext {
            breaker: &id,
            error: &"fast error" as &dyn Any,
            duration: Duration::from_millis(500),
        };
        let slow = FailureContext {
            breaker: &id,
            error: &"slow error" as &dyn Any,
            duration: Duration::from_secs(2),
        };

        assert!(!classifier.should_trip(&fast));
        assert!(classifier.should_trip(&slow));
    }

    #[test]
    fn test_error_type_downcast() {
        #[derive(Debug)]
        enum ApiError {
            Status(u16),
        }

        let id = breaker();
        let classifier = PredicateClassifier::new(|ctx| {
            ctx.error
                .downcast_ref::<ApiError>()
                .map(|ApiError::Status(code)| *code >= 500)
                .unwrap_or(true)
        });

        let server = ApiError::Status(503);
        let client = ApiError::Status(404);
        let server_ctx = FailureContext {
            breaker: &id,
            error: &server as &dyn Any,
            duration: Duration::ZERO,
        };
        let client_ctx = FailureContext {
            breaker: &id,
            error: &client as &dyn Any,
            duration: Duration::ZERO,
        };

        assert!(classifier.should_trip(&server_ctx));
        assert!(!classifier.should_trip(&client_ctx));
    }
}
