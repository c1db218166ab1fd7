//! Bounded retry with exponential backoff.

use crate::config::BackoffPolicy;
use crate::error::{EngineError, EngineResult};

/// Runs `op` up to `policy.max_attempts` times, sleeping the policy's
/// backoff delay between attempts.
///
/// Only errors for which [`EngineError::is_retryable`] returns true are
/// retried; authentication failures in particular pass straight through on
/// the first occurrence. After the final attempt the last error is
/// returned.
pub fn with_backoff<T>(
    policy: &BackoffPolicy,
    label: &str,
    mut op: impl FnMut() -> EngineResult<T>,
) -> EngineResult<T> {
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        if attempt > 1 {
            let delay = policy.delay_for_attempt(attempt - 1);
            tracing::warn!(label, attempt, delay_ms = delay.as_millis() as u64, "retrying");
            std::thread::sleep(delay);
        }

        match op() {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt < policy.max_attempts => {
                last_error = Some(error);
            }
            Err(error) => return Err(error),
        }
    }

    // unreachable unless max_attempts raced to zero; surface something sane
    Err(last_error.unwrap_or_else(|| EngineError::transport_fatal("no attempts made")))
}
