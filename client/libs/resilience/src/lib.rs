/// Resilience primitives for the chat client
///
/// This library provides the small set of patterns the client needs when
/// talking to the hosted backend:
/// - **Timeout**: every request against the backend is bounded
/// - **Retry**: exponential backoff with jitter for transient failures
/// - **Backoff**: a reusable delay schedule (used for realtime resubscription)
/// - **Presets**: pre-tuned settings for backend requests and realtime channels
///
/// # Example: bounded backend request
///
/// ```rust,no_run
/// use resilience::{presets, timeout::with_timeout_result};
///
/// #[tokio::main]
/// async fn main() {
///     let config = presets::backend_request_config();
///
///     let result = with_timeout_result(config.timeout.duration, async {
///         // Your backend call
///         Ok::<_, String>(())
///     })
///     .await;
/// }
/// ```
///
/// # Example: resubscribe until the channel is back
///
/// ```rust,no_run
/// use resilience::{presets, with_retry};
///
/// #[tokio::main]
/// async fn main() {
///     let config = presets::realtime_resubscribe_config();
///
///     let channel = with_retry(config, || async {
///         // Your subscribe call
///         Ok::<_, String>("channel")
///     })
///     .await;
/// }
/// ```

pub mod presets;
pub mod retry;
pub mod timeout;

pub use presets::{backend_request_config, realtime_resubscribe_config, ServiceConfig};
pub use retry::{with_retry, with_retry_if, Backoff, RetryConfig, RetryError};
pub use timeout::{with_timeout, with_timeout_result, Elapsed, TimeoutConfig, TimeoutError};
