//! Two replicas sharing one breaker record
//!
//! Run with `RUST_LOG=shared_breaker=debug cargo run --example basic` to see
//! the admission and write decisions.

use shared_breaker::{CircuitBreaker, MemoryStore, StateStore};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn replica(name: &'static str, store: Arc<dyn StateStore>) -> CircuitBreaker {
    CircuitBreaker::builder("payment_api")
        .store(store)
        .failure_threshold(3)
        .success_threshold(1)
        .timeout(Duration::from_millis(500))
        .on_open(move |id| println!("🔴 [{name}] circuit '{id}' opened"))
        .on_half_open(move |id| println!("🟡 [{name}] circuit '{id}' half-open, probing"))
        .on_close(move |id| println!("🟢 [{name}] circuit '{id}' closed"))
        .build()
        .expect("valid breaker config")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Shared Circuit Breaker Example ===\n");

    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let east = replica("east", Arc::clone(&store));
    let west = replica("west", Arc::clone(&store));

    println!("--- Failures spread across replicas ---");
    for (i, breaker) in [&east, &west, &east].into_iter().enumerate() {
        match breaker
            .call(|| async move { Err::<String, _>(format!("Payment failed {}", i + 1)) })
            .await
        {
            Ok(_) => println!("✓ Success"),
            Err(e) => println!("✗ {}", e),
        }
    }
    let state = west.state().await.expect("store reachable");
    println!("State: {} after {} failures\n", state.state, state.failure_count);

    println!("--- West is blocked by what East saw ---");
    match west.call(|| async { Ok::<_, String>("Should be rejected") }).await {
        Ok(_) => println!("✓ Success"),
        Err(e) => println!("✗ {}", e),
    }
    println!();

    println!("--- Waiting out the open window ---");
    tokio::time::sleep(Duration::from_millis(600)).await;
    match west.call(|| async { Ok::<_, String>("Payment successful") }).await {
        Ok(result) => println!("✓ {}", result),
        Err(e) => println!("✗ {}", e),
    }
    let state = east.state().await.expect("store reachable");
    println!("State seen by east: {}", state.state);
}
