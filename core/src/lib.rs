//! SharedBreaker - circuit breaker whose state lives in a shared store
//!
//! Many short-lived instances (serverless functions, replicas behind a load
//! balancer) protecting the same dependency all read and write one breaker
//! record, so a failure seen by one of them protects all of them:
//! - Versioned record updated with compare-and-swap, never blind overwrites
//! - Pure transition rules over immutable snapshots (Closed → Open → HalfOpen)
//! - Single-probe half-open admission through a self-expiring lease
//! - Bounded retries on contention and an explicit policy for store outages
//!
//! # Example
//!
//! ```rust
//! use shared_breaker::{CircuitBreaker, CircuitError, MemoryStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Arc::new(MemoryStore::new());
//!
//! let breaker = CircuitBreaker::builder("payment_api")
//!     .store(store.clone())
//!     .failure_threshold(2)
//!     .success_threshold(1)
//!     .timeout(Duration::from_secs(30))
//!     .on_open(|name| println!("Circuit {} opened!", name))
//!     .build()
//!     .unwrap();
//!
//! // Execute with circuit protection
//! let result = breaker.call(|| async { Ok::<_, String>("charged") }).await;
//! assert_eq!(result.unwrap(), "charged");
//!
//! for _ in 0..2 {
//!     let _ = breaker.call(|| async { Err::<(), _>("gateway timeout".to_string()) }).await;
//! }
//!
//! // Another instance pointed at the same store sees the open circuit
//! let replica = CircuitBreaker::builder("payment_api")
//!     .store(store)
//!     .build()
//!     .unwrap();
//! let rejected = replica.call(|| async { Ok::<_, String>("charged") }).await;
//! assert!(matches!(rejected, Err(CircuitError::Open { .. })));
//! # }
//! ```

pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod errors;
pub mod executor;
pub mod identity;
pub mod state;
pub mod storage;

pub use builder::CircuitBuilder;
pub use callbacks::{Callbacks, TransitionEvent};
pub use circuit::{CircuitBreaker, CircuitContext};
pub use classifier::{DefaultClassifier, FailureClassifier, FailureContext, PredicateClassifier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CallOptions, Config, ProbePolicy, UnavailablePolicy};
pub use errors::{CircuitError, ConfigError, StoreError};
#[cfg(feature = "http")]
pub use executor::HttpExecutor;
pub use executor::{FnExecutor, RequestExecutor};
pub use identity::BreakerId;
pub use state::{Admission, BreakerState, CircuitState, Rejection};
pub use storage::{MemoryStore, StateStore};
