/// Resilience helpers shared by the asset services
///
/// This library provides the small set of patterns the lifecycle code relies on:
/// - **Timeout**: Every call to a remote store carries a deadline
/// - **Backoff**: Exponential backoff with optional jitter for background retries
/// - **Presets**: Default deadlines per kind of remote store
///
/// # Example: Blob upload with a deadline
///
/// ```rust,no_run
/// use resilience::{presets, timeout::with_deadline};
///
/// #[tokio::main]
/// async fn main() {
///     let config = presets::object_storage_timeout();
///
///     let result = with_deadline("blob.put", config.duration, async {
///         // Your HTTP PUT here
///         Ok::<_, String>(())
///     })
///     .await;
/// }
/// ```

pub mod backoff;
pub mod presets;
pub mod timeout;

pub use backoff::{exponential_backoff, BackoffConfig};
pub use presets::{database_timeout, object_storage_timeout};
pub use timeout::{with_deadline, TimeoutConfig, TimeoutError};
