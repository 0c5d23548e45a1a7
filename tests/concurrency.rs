use std::sync::Arc;
use std::thread;

use apihub::{CircuitState, CoordinationHub, ServiceConfig, TokenBucket};

const THREADS: usize = 8;
const CALLS_PER_THREAD: usize = 250;

/// Every call lands in exactly one metrics bucket, whatever the interleaving.
#[test]
fn test_concurrent_calls_are_all_accounted_for() {
    let hub = Arc::new(CoordinationHub::new());
    hub.register(
        "bulk",
        ServiceConfig {
            rate_limit: 1_000_000,
            time_window_secs: 1.0,
            circuit_breaker_threshold: 1_000_000,
            ..Default::default()
        },
    )
    .unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let handle = hub.coordinate("bulk");
            thread::spawn(move || {
                for i in 0..CALLS_PER_THREAD {
                    let _ = handle.call(|| {
                        if (t + i) % 5 == 0 {
                            Err("flaky")
                        } else {
                            Ok(())
                        }
                    });
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let metrics = hub.metrics("bulk").unwrap();
    let expected_failures = (0..THREADS)
        .flat_map(|t| (0..CALLS_PER_THREAD).map(move |i| (t + i) % 5 == 0))
        .filter(|failed| *failed)
        .count() as u64;

    assert_eq!(metrics.total_requests, (THREADS * CALLS_PER_THREAD) as u64);
    assert_eq!(metrics.failed_requests, expected_failures);
    assert_eq!(
        metrics.successful_requests + metrics.failed_requests + metrics.rate_limited_requests,
        metrics.total_requests
    );
    assert_eq!(hub.circuit_state("bulk").unwrap(), CircuitState::Closed);
}

/// A shared bucket never admits more than its capacity inside one window.
#[test]
fn test_concurrent_rate_limit_never_over_admits() {
    let hub = Arc::new(CoordinationHub::new());
    hub.register(
        "scarce",
        ServiceConfig {
            rate_limit: 50,
            time_window_secs: 3600.0,
            ..Default::default()
        },
    )
    .unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let hub = Arc::clone(&hub);
            thread::spawn(move || {
                (0..40)
                    .filter(|_| hub.execute("scarce", || Ok::<_, String>(())).is_ok())
                    .count()
            })
        })
        .collect();
    let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(admitted, 50);
    let metrics = hub.metrics("scarce").unwrap();
    assert_eq!(metrics.successful_requests, 50);
    assert_eq!(metrics.rate_limited_requests, (THREADS * 40 - 50) as u64);
}

#[test]
fn test_registration_races_admit_exactly_one_winner() {
    let hub = Arc::new(CoordinationHub::new());

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let hub = Arc::clone(&hub);
            thread::spawn(move || hub.register("shared", ServiceConfig::default()).is_ok())
        })
        .collect();
    let winners = handles
        .into_iter()
        .filter_map(|h| h.join().ok())
        .filter(|won| *won)
        .count();

    assert_eq!(winners, 1);
    assert_eq!(hub.len(), 1);
}

#[test]
fn test_bucket_is_shareable_across_threads() {
    let bucket = Arc::new(TokenBucket::new(20.0, 0.001).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let bucket = Arc::clone(&bucket);
            thread::spawn(move || (0..10).filter(|_| bucket.try_consume(1)).count())
        })
        .collect();
    let consumed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(consumed, 20);
}
