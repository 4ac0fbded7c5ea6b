//! Timeout handling for wrapped operations, recovery actions and health checks.
//!
//! Every call races the work against a timer. Work that overruns is abandoned so a
//! hung collaborator cannot stall the evaluation loop.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Timeout-related errors
#[derive(Debug, Error)]
pub enum OperationTimeoutError {
    #[error("Operation '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Operation '{operation}' panicked: {reason}")]
    Panicked { operation: String, reason: String },
}

/// Race `future` against `timeout`; the future is dropped when the timer wins
pub async fn run_with_timeout<T, Fut>(
    operation: &str,
    timeout: Duration,
    future: Fut,
) -> Result<T, OperationTimeoutError>
where
    Fut: Future<Output = T>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(value) => Ok(value),
        Err(_) => {
            warn!(operation, timeout_ms = timeout.as_millis() as u64, "Operation timed out");
            Err(OperationTimeoutError::Timeout {
                operation: operation.to_string(),
                timeout,
            })
        }
    }
}

/// Run `future` on its own task so a panic is contained, abandoning it on timeout
pub async fn spawn_with_timeout<T, Fut>(
    operation: &str,
    timeout: Duration,
    future: Fut,
) -> Result<T, OperationTimeoutError>
where
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::spawn(future);

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join_error)) => {
            let reason = if join_error.is_panic() {
                "task panicked".to_string()
            } else {
                join_error.to_string()
            };
            warn!(operation, %reason, "Operation task failed");
            Err(OperationTimeoutError::Panicked {
                operation: operation.to_string(),
                reason,
            })
        }
        Err(_) => {
            handle.abort();
            debug!(operation, "Abandoned timed out task");
            warn!(operation, timeout_ms = timeout.as_millis() as u64, "Operation timed out");
            Err(OperationTimeoutError::Timeout {
                operation: operation.to_string(),
                timeout,
            })
        }
    }
}
