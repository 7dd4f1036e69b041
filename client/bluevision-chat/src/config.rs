use crate::error::AppError;
use dotenvy::dotenv;
use resilience::RetryConfig;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL of the hosted backend (e.g. "https://project.supabase.co")
    pub url: String,
    /// Public (anon) API key sent with every request
    pub anon_key: String,
    /// Storage bucket holding profile avatars
    pub avatar_bucket: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    /// Upper bound for every request against the backend
    pub request_timeout: Duration,
    /// How long the "peer is composing" indicator stays up after a signal
    pub composing_ttl: Duration,
    /// Minimum spacing between two outgoing composing signals
    pub composing_throttle: Duration,
    /// Backoff schedule used to rejoin a dropped realtime channel
    pub resubscribe: RetryConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("BLUEVISION_BACKEND_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::Config("BLUEVISION_BACKEND_URL missing".into()))?;
        let anon_key = lookup("BLUEVISION_ANON_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::Config("BLUEVISION_ANON_KEY missing".into()))?;

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(AppError::Config(format!(
                "BLUEVISION_BACKEND_URL must be an http(s) URL, got {url}"
            )));
        }

        let avatar_bucket =
            lookup("BLUEVISION_AVATAR_BUCKET").unwrap_or_else(|| "avatars".to_string());

        let millis = |key: &str, default: u64| -> Result<Duration, AppError> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|e| AppError::Config(format!("{key}: {e}"))),
                None => Ok(Duration::from_millis(default)),
            }
        };

        let request_timeout = millis(
            "BLUEVISION_REQUEST_TIMEOUT_MS",
            resilience::backend_request_config().timeout.duration.as_millis() as u64,
        )?;
        let composing_ttl = millis("BLUEVISION_COMPOSING_TTL_MS", 3_000)?;
        let composing_throttle = millis("BLUEVISION_COMPOSING_THROTTLE_MS", 1_000)?;

        let mut resubscribe = resilience::realtime_resubscribe_config();
        resubscribe.initial_backoff = millis(
            "BLUEVISION_RESUBSCRIBE_INITIAL_MS",
            resubscribe.initial_backoff.as_millis() as u64,
        )?;
        resubscribe.max_backoff = millis(
            "BLUEVISION_RESUBSCRIBE_MAX_MS",
            resubscribe.max_backoff.as_millis() as u64,
        )?;

        if request_timeout.is_zero() {
            return Err(AppError::Config(
                "BLUEVISION_REQUEST_TIMEOUT_MS must be positive".into(),
            ));
        }

        Ok(Self {
            backend: BackendConfig {
                url: url.trim_end_matches('/').to_string(),
                anon_key,
                avatar_bucket,
            },
            request_timeout,
            composing_ttl,
            composing_throttle,
            resubscribe,
        })
    }

    /// Configuration for tests and in-process backends
    pub fn test_defaults() -> Self {
        Self {
            backend: BackendConfig {
                url: "http://localhost:54321".to_string(),
                anon_key: "test-anon-key".to_string(),
                avatar_bucket: "avatars".to_string(),
            },
            request_timeout: Duration::from_secs(10),
            composing_ttl: Duration::from_secs(3),
            composing_throttle: Duration::from_secs(1),
            resubscribe: RetryConfig {
                max_retries: u32::MAX,
                initial_backoff: Duration::from_millis(50),
                max_backoff: Duration::from_millis(400),
                backoff_multiplier: 2.0,
                jitter: false,
            },
        }
    }
}
