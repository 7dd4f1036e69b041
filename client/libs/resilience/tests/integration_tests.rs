/// Integration tests for resilience library
use resilience::{
    presets,
    retry::{with_retry, Backoff, RetryConfig, RetryError},
    timeout::{with_timeout_result, TimeoutError},
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ==================== Timeout + Retry Composition ====================

#[tokio::test(start_paused = true)]
async fn test_retry_over_timed_out_attempts() {
    let config = RetryConfig {
        max_retries: 3,
        initial_backoff: Duration::from_millis(10),
        jitter: false,
        ..Default::default()
    };

    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_clone = attempts.clone();

    // First two attempts hang past the deadline, the third answers immediately
    let result = with_retry(config, move || {
        let n = attempts_clone.fetch_add(1, Ordering::SeqCst);
        with_timeout_result(Duration::from_millis(50), async move {
            if n < 2 {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok::<_, String>(n)
        })
    })
    .await;

    assert_eq!(result.unwrap(), 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_reports_timeout() {
    let config = RetryConfig {
        max_retries: 1,
        initial_backoff: Duration::from_millis(10),
        jitter: false,
        ..Default::default()
    };

    let result = with_retry(config, || {
        with_timeout_result(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<(), String>(())
        })
    })
    .await;

    match result {
        Err(RetryError::MaxRetriesExceeded { attempts, last_error }) => {
            assert_eq!(attempts, 2);
            assert!(matches!(last_error, TimeoutError::Elapsed(_)));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

// ==================== Presets ====================

#[test]
fn test_resubscribe_preset_schedule_grows_then_caps() {
    let mut config = presets::realtime_resubscribe_config();
    config.jitter = false;

    let delays: Vec<_> = Backoff::new(&config).take(10).collect();

    assert_eq!(delays[0], Duration::from_millis(500));
    assert_eq!(delays[1], Duration::from_secs(1));
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*delays.last().unwrap(), Duration::from_secs(30));
}
