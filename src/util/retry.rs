//! Bounded retry with a fixed delay between attempts

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Outcome of a single attempt
#[derive(Debug)]
pub(crate) enum Attempt<E> {
    /// The attempt failed but another one may succeed
    Retry(E),
    /// The attempt failed in a way that retrying cannot fix
    Abort(E),
}

/// Why [`retry`] gave up
#[derive(Debug)]
pub(crate) enum RetryError<E> {
    /// Every attempt failed; carries the last error
    Exhausted(E),
    /// An attempt reported an unretryable failure
    Aborted(E),
}

/// Run `op` up to `max_attempts` times with `delay` between attempts
///
/// The delay is skipped as soon as `cancel` fires; the cancellation itself
/// is surfaced by the next attempt, which is expected to observe the token
/// and return [`Attempt::Abort`]. An aborted attempt does not consume one
/// of the `max_attempts`.
pub(crate) async fn retry<T, E, F, Fut>(
    max_attempts: u32,
    delay: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Attempt<E>>>,
{
    let mut failures = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(Attempt::Abort(err)) => return Err(RetryError::Aborted(err)),
            Err(Attempt::Retry(err)) => {
                failures += 1;
                if failures >= max_attempts {
                    return Err(RetryError::Exhausted(err));
                }
            }
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
