/// Preset configurations for the backend collaborators of the chat client
use crate::retry::RetryConfig;
use crate::timeout::TimeoutConfig;
use std::time::Duration;

/// Configuration bundle for a call site
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub timeout: TimeoutConfig,
    pub retry: Option<RetryConfig>,
}

/// Record queries, inserts, storage uploads and auth calls
///
/// - Timeout: 10s (surface a failure rather than hang)
/// - No retry (inserts are not idempotent; the user retries)
pub fn backend_request_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(10),
        },
        retry: None,
    }
}

/// Realtime channel resubscription after the channel dropped
///
/// - Retry: forever (until the owning conversation is closed), 500ms doubling to 30s
pub fn realtime_resubscribe_config() -> RetryConfig {
    RetryConfig {
        max_retries: u32::MAX,
        initial_backoff: Duration::from_millis(500),
        max_backoff: Duration::from_secs(30),
        backoff_multiplier: 2.0,
        jitter: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_request_config() {
        let config = backend_request_config();
        assert_eq!(config.timeout.duration, Duration::from_secs(10));
        assert!(config.retry.is_none());
    }

    #[test]
    fn test_realtime_resubscribe_config() {
        let config = realtime_resubscribe_config();
        assert_eq!(config.max_retries, u32::MAX);
        assert!(config.initial_backoff < config.max_backoff);
    }
}
