/// Deadline wrapper for calls to remote stores
///
/// A call that runs past its deadline is reported as `Elapsed`. The remote side
/// may still have applied the request, so callers must treat the outcome as
/// unknown rather than as a definite failure.
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    pub duration: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimeoutError<E> {
    #[error("{operation} timed out after {after:?}")]
    Elapsed {
        operation: &'static str,
        after: Duration,
    },
    #[error("{0}")]
    Inner(E),
}

impl<E> TimeoutError<E> {
    /// Collapse both variants into the caller's error type.
    pub fn fold(self, elapsed: impl FnOnce(&'static str, Duration) -> E) -> E {
        match self {
            TimeoutError::Elapsed { operation, after } => elapsed(operation, after),
            TimeoutError::Inner(e) => e,
        }
    }

    pub fn is_elapsed(&self) -> bool {
        matches!(self, TimeoutError::Elapsed { .. })
    }
}

/// Execute a fallible future under a deadline, keeping the inner error intact.
pub async fn with_deadline<F, T, E>(
    operation: &'static str,
    duration: Duration,
    future: F,
) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match timeout(duration, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TimeoutError::Inner(e)),
        Err(_) => {
            debug!(operation, after_ms = duration.as_millis() as u64, "deadline elapsed");
            Err(TimeoutError::Elapsed {
                operation,
                after: duration,
            })
        }
    }
}
