//! Retry of single control-plane calls on transient failures.

use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::{CoreError, Sleeper};

/// Run `op`, retrying transient failures according to `policy`.
///
/// Non-transient errors are returned on first occurrence. Once attempts or the
/// time budget are exhausted the last transient error is returned unchanged so
/// the caller still sees what went wrong.
pub fn with_retry<T, F>(
    policy: &BackoffPolicy,
    sleeper: &dyn Sleeper,
    mut op: F,
) -> Result<T, CoreError>
where
    F: FnMut() -> Result<T, CoreError>,
{
    let mut waited = Duration::ZERO;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                if attempt >= policy.max_attempts {
                    return Err(e);
                }
                let delay = policy.delay_for_attempt(attempt);
                if waited + delay > policy.timeout {
                    return Err(e);
                }
                sleeper.sleep(delay);
                waited += delay;
            }
        }
    }
}
