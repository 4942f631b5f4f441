//! Basic breaker usage example
//!
//! Run with `RUST_LOG=windowed_breaker=debug` to see the breaker's own logs.

use std::time::Duration;
use tracing_subscriber::EnvFilter;
use windowed_breaker::{Breaker, CallError, Outcome};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== Windowed Breaker Basic Example ===\n");

    let breaker = Breaker::builder("payment_api")
        .window(Duration::from_secs(10))
        .cool_down(Duration::from_millis(200))
        .half_open_max_calls(2)
        .failure_threshold(3)
        .on_open(|c| println!("🔴 Breaker '{}' opened!", c.breaker))
        .on_close(|c| println!("🟢 Breaker '{}' closed!", c.breaker))
        .on_half_open(|c| println!("🟡 Breaker '{}' half-open, testing...", c.breaker))
        .build()
        .expect("valid breaker configuration");

    println!("Initial state: {}\n", breaker.state());

    println!("--- Successful calls ---");
    for i in 1..=2 {
        match breaker.execute(move || Ok::<_, String>(format!("Payment {}", i))) {
            Ok(result) => println!("✓ {}", result),
            Err(e) => println!("✗ Error: {}", e),
        }
    }
    println!("State: {}\n", breaker.state());

    println!("--- Triggering failures ---");
    for i in 1..=3 {
        match breaker.execute(move || Err::<String, _>(format!("Payment failed {}", i))) {
            Ok(_) => println!("✓ Success"),
            Err(e) => println!("✗ {}", e),
        }
    }
    println!("State: {} (breaker opened)\n", breaker.state());

    println!("--- Attempting call while open ---");
    match breaker.execute(|| Ok::<_, String>("Should be rejected")) {
        Err(CallError::Rejected(rejection)) => println!("✗ {}", rejection),
        other => println!("? {:?}", other),
    }
    println!();

    println!("--- Waiting for the cool-down ---");
    std::thread::sleep(Duration::from_millis(250));

    // Admission and reporting can also be split around the call
    for i in 1..=2 {
        match breaker.admit() {
            Ok(ticket) => {
                println!("✓ Trial call {} admitted", i);
                breaker.record_outcome(ticket, Outcome::Success);
            }
            Err(rejection) => println!("✗ {}", rejection),
        }
    }
    println!("State: {}\n", breaker.state());

    let metrics = breaker.metrics();
    println!(
        "Window #{}: {} requests, {} successes, {} failures",
        metrics.batch, metrics.total_requests, metrics.total_successes, metrics.total_failures
    );
}
