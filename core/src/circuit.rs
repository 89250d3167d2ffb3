//! Distributed circuit breaker
//!
//! Every call runs the same protocol against the shared record: load it,
//! decide admission, write a probe lease when one is needed, run the call,
//! then write the outcome back with a versioned compare-and-swap. A lost
//! write means another caller changed the record in the meantime, so the
//! outcome is re-applied to a fresh load. The downstream call never reruns.

use crate::{
    BreakerId,
    callbacks::{Callbacks, TransitionEvent},
    classifier::{FailureClassifier, FailureContext},
    clock::{Clock, SystemClock},
    config::{CallOptions, Config, UnavailablePolicy},
    errors::{CircuitError, StoreError},
    executor::RequestExecutor,
    state::{Admission, BreakerState, CircuitState, Rejection},
    storage::StateStore,
};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker context - shared data across all calls
#[derive(Clone)]
pub struct CircuitContext {
    pub id: BreakerId,
    pub config: Config,
    pub store: Arc<dyn StateStore>,
    pub clock: Arc<dyn Clock>,
    pub failure_classifier: Option<Arc<dyn FailureClassifier>>,
}

impl std::fmt::Debug for CircuitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitContext")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("store", &self.store)
            .field("clock", &self.clock)
            .field(
                "failure_classifier",
                &self
                    .failure_classifier
                    .as_ref()
                    .map(|_| "<dyn FailureClassifier>"),
            )
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success,
    Failure,
    /// Error the classifier chose not to count
    Ignored,
    Reset,
}

/// How an outcome came to be recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Call admitted against a closed record
    Closed,
    /// Half-open call that holds no lease (concurrent probing)
    Probe,
    /// Half-open call holding the lease that expires at this instant
    Leased(DateTime<Utc>),
    /// `record_success`, `record_failure` or `reset`
    Manual,
}

/// An admitted call and the record it was admitted against
#[derive(Debug)]
struct Ticket {
    role: Role,
    /// State that was persisted when the decision was made
    persisted: CircuitState,
    /// Record as last read from (or written to) the store
    stored: Option<BreakerState>,
    /// Snapshot the outcome is applied to
    base: BreakerState,
}

impl Ticket {
    fn from_stored(
        role: Role,
        stored: Option<BreakerState>,
        config: &Config,
        now: DateTime<Utc>,
    ) -> Self {
        let base = stored
            .clone()
            .unwrap_or_else(|| BreakerState::new(config, now));
        Self {
            role,
            persisted: base.state,
            stored,
            base,
        }
    }

    fn expected_version(&self) -> Option<u64> {
        self.stored.as_ref().map(|s| s.version)
    }

    /// Whether this call's outcome may move a half-open `base`
    ///
    /// A half-open record belongs to its probes. A call admitted while closed,
    /// or a probe whose lease has since been replaced, must leave it alone.
    fn owns_half_open(&self) -> bool {
        match self.role {
            Role::Closed => false,
            Role::Leased(lease) => self.base.probe_deadline == Some(lease),
            Role::Probe | Role::Manual => true,
        }
    }

    fn holds_lease(&self) -> bool {
        matches!(self.role, Role::Leased(lease) if self.base.probe_deadline == Some(lease))
    }
}

enum Gate {
    Guarded(Ticket),
    /// Store unreachable under fail-open
    Unguarded,
}

/// Why a call did not get a normal guarded run
#[derive(Debug)]
enum Denied {
    Rejected(Rejection),
    Contention(u32),
    Unavailable(StoreError),
}

impl Denied {
    fn into_error<E>(self, id: &BreakerId) -> CircuitError<E> {
        let breaker = id.to_string();
        match self {
            Denied::Rejected(Rejection::Open { next_attempt_at }) => CircuitError::Open {
                breaker,
                next_attempt_at,
            },
            Denied::Rejected(Rejection::ProbeInFlight) => {
                CircuitError::HalfOpenLimitReached { breaker }
            }
            Denied::Contention(attempts) => CircuitError::Contention { breaker, attempts },
            Denied::Unavailable(source) => CircuitError::StoreUnavailable { breaker, source },
        }
    }
}

/// Circuit breaker public API
///
/// Instances are cheap handles over the shared record: any number of them,
/// in any number of processes, may guard the same breaker id as long as they
/// point at the same [`StateStore`].
pub struct CircuitBreaker {
    context: CircuitContext,
    callbacks: Callbacks,
}

impl CircuitBreaker {
    /// Create a breaker with the default config (use builder() for more options)
    pub fn new(id: BreakerId, store: Arc<dyn StateStore>) -> Self {
        let context = CircuitContext {
            id,
            config: Config::default(),
            store,
            clock: Arc::new(SystemClock),
            failure_classifier: None,
        };

        Self {
            context,
            callbacks: Callbacks::new(),
        }
    }

    /// Create a circuit breaker with custom context and callbacks (used by builder)
    pub(crate) fn with_context_and_callbacks(
        context: CircuitContext,
        callbacks: Callbacks,
    ) -> Self {
        Self { context, callbacks }
    }

    /// Create a new circuit breaker builder
    pub fn builder(id: impl Into<String>) -> crate::builder::CircuitBuilder {
        crate::builder::CircuitBuilder::new(id)
    }

    pub fn id(&self) -> &BreakerId {
        &self.context.id
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    /// Execute a fallible async operation with circuit breaker protection
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: 'static,
    {
        self.call_with(&CallOptions::default(), f).await
    }

    /// Hand `request` to `executor` under breaker protection
    pub async fn execute<X>(
        &self,
        executor: &X,
        request: X::Request,
        options: &CallOptions,
    ) -> Result<X::Response, CircuitError<X::Error>>
    where
        X: RequestExecutor + ?Sized,
    {
        self.call_with(options, move || executor.invoke(request))
            .await
    }

    /// [`call`](Self::call) with per-call threshold and timeout overrides
    ///
    /// Overrides only drive the decisions made for this call. They are stamped
    /// into the record it writes so the stored thresholds show what produced
    /// the last transition, but every other call still decides with its own
    /// config and stamps its own values on its next write.
    ///
    /// # Unrecorded outcomes
    ///
    /// The outcome is written after `f` has finished. If that write gives up
    /// ([`CircuitError::Contention`], or [`CircuitError::StoreUnavailable`]
    /// under [`UnavailablePolicy::FailClosed`]) the error is returned and the
    /// result of `f` is dropped, even though the downstream request already
    /// ran. Requests with side effects should be idempotent or carry their own
    /// deduplication. Under [`UnavailablePolicy::FailOpen`] an unreachable
    /// store is logged and the result is returned; contention is still
    /// reported as an error.
    pub async fn call_with<F, Fut, T, E>(
        &self,
        options: &CallOptions,
        f: F,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: 'static,
    {
        let config = match options.apply(&self.context.config) {
            Ok(config) => config,
            Err(err) => return Err(CircuitError::InvalidConfig(err)),
        };

        let ticket = match self.admit(&config).await {
            Ok(Gate::Guarded(ticket)) => ticket,
            Ok(Gate::Unguarded) => return f().await.map_err(CircuitError::Execution),
            Err(denied) => return Err(denied.into_error(&self.context.id)),
        };

        let started = Instant::now();
        let result = f().await;
        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) if self.should_trip(e, started.elapsed()) => Outcome::Failure,
            Err(_) => Outcome::Ignored,
        };

        match self.settle(&config, ticket, outcome).await {
            Ok(()) => {}
            Err(Denied::Unavailable(err))
                if config.unavailable_policy == UnavailablePolicy::FailOpen =>
            {
                warn!(
                    breaker = %self.context.id,
                    error = %err,
                    "state store unavailable, call outcome not recorded"
                );
            }
            Err(denied) => {
                warn!(
                    breaker = %self.context.id,
                    succeeded = result.is_ok(),
                    "call outcome could not be recorded"
                );
                return Err(denied.into_error(&self.context.id));
            }
        }

        result.map_err(CircuitError::Execution)
    }

    /// Current shared record, or a fresh closed one if none was written yet
    pub async fn state(&self) -> Result<BreakerState, CircuitError> {
        match self.context.store.load(&self.context.id).await {
            Ok(Some(state)) => Ok(state),
            Ok(None) => Ok(BreakerState::new(
                &self.context.config,
                self.context.clock.now(),
            )),
            Err(err) => Err(Denied::Unavailable(err).into_error(&self.context.id)),
        }
    }

    pub async fn is_open(&self) -> Result<bool, CircuitError> {
        Ok(self.state().await?.is_open())
    }

    pub async fn is_closed(&self) -> Result<bool, CircuitError> {
        Ok(self.state().await?.is_closed())
    }

    /// Record a success that happened outside of [`call`](Self::call)
    pub async fn record_success(&self) -> Result<(), CircuitError> {
        self.record(Outcome::Success).await
    }

    /// Record a failure that happened outside of [`call`](Self::call)
    pub async fn record_failure(&self) -> Result<(), CircuitError> {
        self.record(Outcome::Failure).await
    }

    /// Force the shared record back to closed with zeroed counters
    pub async fn reset(&self) -> Result<(), CircuitError> {
        self.record(Outcome::Reset).await?;
        info!(breaker = %self.context.id, "circuit reset");
        Ok(())
    }

    async fn record(&self, outcome: Outcome) -> Result<(), CircuitError> {
        let config = &self.context.config;
        let stored = match self.context.store.load(&self.context.id).await {
            Ok(stored) => stored,
            Err(err) => return Err(Denied::Unavailable(err).into_error(&self.context.id)),
        };
        let ticket = Ticket::from_stored(Role::Manual, stored, config, self.context.clock.now());

        self.settle(config, ticket, outcome)
            .await
            .map_err(|denied| denied.into_error(&self.context.id))
    }

    /// Load the record and decide whether the call may run
    async fn admit(&self, config: &Config) -> Result<Gate, Denied> {
        let id = &self.context.id;

        for attempt in 1..=config.max_cas_attempts {
            let stored = match self.context.store.load(id).await {
                Ok(stored) => stored,
                Err(err) => return self.store_unavailable(config, err),
            };
            let now = self.context.clock.now();
            let ticket = Ticket::from_stored(Role::Closed, stored, config, now);

            match ticket.base.admit(config, now) {
                Admission::Admit if ticket.base.is_half_open() => {
                    return Ok(Gate::Guarded(Ticket {
                        role: Role::Probe,
                        ..ticket
                    }));
                }
                Admission::Admit => return Ok(Gate::Guarded(ticket)),
                Admission::Reject(rejection) => {
                    debug!(breaker = %id, state = %ticket.persisted, "call rejected");
                    return Err(Denied::Rejected(rejection));
                }
                Admission::Probe { next, lease: false } => {
                    debug!(breaker = %id, "admitting half-open probe");
                    return Ok(Gate::Guarded(Ticket {
                        role: Role::Probe,
                        base: next,
                        ..ticket
                    }));
                }
                Admission::Probe { next, lease: true } => {
                    match self
                        .context
                        .store
                        .compare_and_swap(id, ticket.expected_version(), next)
                        .await
                    {
                        Ok(written) => {
                            debug!(breaker = %id, attempt, "probe lease acquired");
                            self.announce(ticket.persisted, &written, &written);
                            return Ok(Gate::Guarded(Ticket {
                                role: written.probe_deadline.map_or(Role::Probe, Role::Leased),
                                persisted: written.state,
                                stored: Some(written.clone()),
                                base: written,
                            }));
                        }
                        Err(err) if err.is_retryable() => {
                            debug!(breaker = %id, attempt, "probe lease race lost, reloading");
                        }
                        Err(err) => return self.store_unavailable(config, err),
                    }
                }
            }
        }

        warn!(
            breaker = %id,
            attempts = config.max_cas_attempts,
            "gave up acquiring probe lease"
        );
        Err(Denied::Contention(config.max_cas_attempts))
    }

    /// Write the outcome of a finished call back to the shared record
    async fn settle(&self, config: &Config, ticket: Ticket, outcome: Outcome) -> Result<(), Denied> {
        let id = &self.context.id;
        let mut ticket = ticket;

        for attempt in 1..=config.max_cas_attempts {
            let now = self.context.clock.now();
            let base = &ticket.base;
            if base.is_half_open() && !ticket.owns_half_open() {
                debug!(
                    breaker = %id,
                    role = ?ticket.role,
                    ?outcome,
                    "half-open record belongs to another probe, outcome dropped"
                );
                return Ok(());
            }
            let next = match outcome {
                Outcome::Success => base.record_success(config, now),
                Outcome::Failure => base.record_failure(config, now),
                Outcome::Reset => base.reset(config, now),
                // Only hand back a lease that is still ours
                Outcome::Ignored if ticket.holds_lease() => base.release_probe(config, now),
                Outcome::Ignored => return Ok(()),
            };

            if ticket
                .stored
                .as_ref()
                .is_some_and(|stored| next.same_state(stored))
            {
                return Ok(());
            }

            match self
                .context
                .store
                .compare_and_swap(id, ticket.expected_version(), next)
                .await
            {
                Ok(written) => {
                    self.announce(ticket.persisted, &ticket.base, &written);
                    return Ok(());
                }
                Err(err) if err.is_retryable() => {
                    debug!(breaker = %id, attempt, ?outcome, "record changed during call, re-applying outcome");
                    let stored = self.context.store.load(id).await.map_err(Denied::Unavailable)?;
                    ticket = Ticket::from_stored(ticket.role, stored, config, self.context.clock.now());
                }
                Err(err) => return Err(Denied::Unavailable(err)),
            }
        }

        warn!(
            breaker = %id,
            attempts = config.max_cas_attempts,
            ?outcome,
            "gave up recording call outcome"
        );
        Err(Denied::Contention(config.max_cas_attempts))
    }

    fn store_unavailable(&self, config: &Config, err: StoreError) -> Result<Gate, Denied> {
        match config.unavailable_policy {
            UnavailablePolicy::FailOpen => {
                warn!(
                    breaker = %self.context.id,
                    error = %err,
                    "state store unavailable, admitting call unguarded"
                );
                Ok(Gate::Unguarded)
            }
            UnavailablePolicy::FailClosed => {
                warn!(
                    breaker = %self.context.id,
                    error = %err,
                    "state store unavailable, rejecting call"
                );
                Err(Denied::Unavailable(err))
            }
        }
    }

    fn should_trip<E: 'static>(&self, error: &E, duration: Duration) -> bool {
        match &self.context.failure_classifier {
            Some(classifier) => classifier.should_trip(&FailureContext {
                breaker: &self.context.id,
                error: error as &dyn Any,
                duration,
            }),
            // No classifier - every error counts
            None => true,
        }
    }

    /// Emit events for a persisted write. `base` may hold a local
    /// open-to-half-open promotion that was never written on its own.
    fn announce(&self, persisted: CircuitState, base: &BreakerState, written: &BreakerState) {
        if persisted != base.state {
            self.emit(persisted, base);
        }
        if base.state != written.state {
            self.emit(base.state, written);
        }
    }

    fn emit(&self, previous: CircuitState, state: &BreakerState) {
        self.callbacks.emit(&TransitionEvent {
            breaker: self.context.id.to_string(),
            previous,
            current: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            at: state.updated_at,
        });
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("context", &self.context)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}
