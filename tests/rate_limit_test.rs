use chatrelay::security::rate_limit::{RateLimitConfig, RateLimiter};
use chrono::{TimeDelta, TimeZone, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn limiter(max_requests: u32) -> RateLimiter {
    RateLimiter::new(RateLimitConfig {
        window: Duration::from_secs(60),
        max_requests,
    })
}

#[test]
fn test_default_config() {
    let config = RateLimitConfig::default();
    assert_eq!(config.window, Duration::from_secs(60));
    assert_eq!(config.max_requests, 10);
}

#[test]
fn test_capacity_is_inclusive() {
    let limiter = limiter(10);
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

    for expected_remaining in (0..10).rev() {
        let decision = limiter.admit_at("1.2.3.4", now);
        assert!(!decision.limited);
        assert_eq!(decision.remaining, expected_remaining);
        assert_eq!(decision.limit, 10);
    }

    let denied = limiter.admit_at("1.2.3.4", now + TimeDelta::seconds(5));
    assert!(denied.limited);
    assert_eq!(denied.remaining, 0);
    assert_eq!(denied.reset_at, now + TimeDelta::seconds(60));
}

#[test]
fn test_identities_are_independent() {
    let limiter = limiter(1);
    let now = Utc::now();

    assert!(!limiter.admit_at("a", now).limited);
    assert!(limiter.admit_at("a", now).limited);
    assert!(!limiter.admit_at("b", now).limited);
    assert_eq!(limiter.tracked_identities(), 2);
}

#[test]
fn test_window_restarts_after_reset() {
    let limiter = limiter(2);
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

    limiter.admit_at("c", start);
    limiter.admit_at("c", start);
    assert!(limiter.admit_at("c", start).limited);

    // Still inside the window at exactly reset_at.
    let reset_at = start + TimeDelta::seconds(60);
    assert!(limiter.admit_at("c", reset_at).limited);

    let later = reset_at + TimeDelta::milliseconds(1);
    let decision = limiter.admit_at("c", later);
    assert!(!decision.limited);
    assert_eq!(decision.remaining, 1);
    assert_eq!(decision.reset_at, later + TimeDelta::seconds(60));
}

#[test]
fn test_sweep_removes_only_expired_entries() {
    let limiter = limiter(5);
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

    limiter.admit_at("old", start);
    limiter.admit_at("new", start + TimeDelta::seconds(30));

    assert_eq!(limiter.sweep_at(start + TimeDelta::seconds(60)), 0);
    assert_eq!(limiter.sweep_at(start + TimeDelta::seconds(61)), 1);
    assert_eq!(limiter.tracked_identities(), 1);

    let decision = limiter.admit_at("new", start + TimeDelta::seconds(61));
    assert_eq!(decision.remaining, 3);
}

#[test]
fn test_concurrent_admits_never_exceed_capacity() {
    let limiter = Arc::new(limiter(10));
    let admitted = Arc::new(AtomicU32::new(0));
    let now = Utc::now();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            let admitted = Arc::clone(&admitted);
            thread::spawn(move || {
                for _ in 0..25 {
                    if !limiter.admit_at("shared", now).limited {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 10);
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper_reclaims_entries() {
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        window: Duration::from_millis(50),
        max_requests: 3,
    }));

    limiter.admit_at("gone", Utc::now() - TimeDelta::seconds(10));
    assert_eq!(limiter.tracked_identities(), 1);

    let sweeper = limiter.spawn_sweeper();
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(limiter.tracked_identities(), 0);
    sweeper.abort();
}
