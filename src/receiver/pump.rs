//! Pump and dispatch tasks backing [`Receiver::listen`](super::Receiver::listen)
//!
//! The pump pulls transfers off the link and forwards them through the
//! hand-off channel; the dispatcher drains the channel and runs each
//! message through the shared pipeline. Backpressure comes from the
//! channel bound alone: the pump cannot outrun the dispatcher, and the
//! dispatcher cannot outrun the handler it awaits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::error::Error;
use crate::handler::Handler;
use crate::message::RawMessage;
use crate::transport::Transport;
use crate::util::{retry, Attempt, RetryError};

use super::ReceiverInner;

/// How often a failed pump tries to rebuild the transport chain
pub(super) const RECOVERY_ATTEMPTS: u32 = 10;

/// Spacing between recovery attempts
pub(super) const RECOVERY_DELAY: Duration = Duration::from_secs(10);

/// Pull transfers off the link until cancelled or recovery is exhausted
///
/// A receive failure first checks for cancellation (a clean stop), then
/// enters bounded recovery. If recovery fails the error is recorded as the
/// receiver's terminal error and the receiver is force-closed. The hand-off
/// channel closes when this task drops its sender, which is what stops the
/// dispatcher.
pub(super) async fn pump<T: Transport>(
    inner: Arc<ReceiverInner<T>>,
    handoff: mpsc::Sender<RawMessage>,
    cancel: CancellationToken,
) {
    loop {
        match inner.pull_one(&cancel).await {
            Ok(raw) => {
                if handoff.send(raw).await.is_err() {
                    debug!("dispatcher went away, stopping pump");
                    return;
                }
            }
            Err(_) if cancel.is_cancelled() => {
                debug!("listening cancelled, stopping pump");
                return;
            }
            Err(err) => {
                warn!(error = %err, "receive failed, recovering transport chain");
                match recover_with_retry(&inner, &cancel).await {
                    Ok(()) => continue,
                    Err(err) => {
                        error!(error = %err, "recovery failed, stopping listener");
                        inner.record_terminal(err);
                        if let Err(close_err) = inner.close().await {
                            error!(
                                error = %close_err,
                                "failed to close receiver after unrecoverable error",
                            );
                        }
                        return;
                    }
                }
            }
        }
    }
}

/// Rebuild the transport chain with bounded, cancellation-aware retry
///
/// Cancellation aborts immediately and is not counted as one of the
/// attempts.
async fn recover_with_retry<T: Transport>(
    inner: &Arc<ReceiverInner<T>>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let outcome = retry(RECOVERY_ATTEMPTS, RECOVERY_DELAY, cancel, move || {
        async move {
            if cancel.is_cancelled() {
                return Err(Attempt::Abort(Error::Cancelled));
            }
            debug!("recovering connection");
            match inner.recover(Some(cancel)).await {
                Ok(()) => {
                    debug!("recovered connection");
                    Ok(())
                }
                Err(err @ (Error::Cancelled | Error::ReceiverClosed)) => Err(Attempt::Abort(err)),
                Err(err) => Err(Attempt::Retry(err)),
            }
        }
    })
    .await;

    match outcome {
        Ok(()) => Ok(()),
        Err(RetryError::Aborted(err)) => Err(err),
        Err(RetryError::Exhausted(err)) => Err(Error::RecoveryExhausted {
            attempts: RECOVERY_ATTEMPTS,
            source: Box::new(err),
        }),
    }
}

/// Drain the hand-off channel until the pump closes it
///
/// After a terminal error, remaining messages are drained without being
/// dispatched so that nothing enqueued after the failing message reaches
/// the handler. A plain cancellation is not terminal: whatever is already
/// in the channel is still dispatched.
pub(super) async fn dispatch<T: Transport, H: Handler>(
    inner: Arc<ReceiverInner<T>>,
    mut handoff: mpsc::Receiver<RawMessage>,
    mut handler: H,
    cancel: CancellationToken,
) {
    while let Some(raw) = handoff.recv().await {
        if inner.terminal_error().is_some() {
            trace!("draining message received after terminal error");
            continue;
        }
        if let Err(err) = inner.handle_message(raw, &mut handler, &cancel).await {
            error!(error = %err, "message handling failed, stopping listener");
            inner.record_terminal(err);
        }
    }
}
