//! Handle to a running listening session

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Control surface a [`ListenerHandle`] uses to reach its receiver without
/// carrying the receiver's transport type
#[async_trait]
pub(crate) trait ListenerControl: Send + Sync {
    /// Close the owning receiver
    async fn close_receiver(&self) -> Result<(), Error>;

    /// The terminal error recorded for the session, if any
    fn terminal_error(&self) -> Option<Arc<Error>>;
}

/// Token returned by [`Receiver::listen`](crate::Receiver::listen)
///
/// Lets the caller await completion of the listening session or read its
/// terminal error without holding the receiver itself.
pub struct ListenerHandle {
    receiver: Arc<dyn ListenerControl>,
    cancel: CancellationToken,
    stopped: CancellationToken,
}

impl ListenerHandle {
    pub(crate) fn new(
        receiver: Arc<dyn ListenerControl>,
        cancel: CancellationToken,
        stopped: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            cancel,
            stopped,
        }
    }

    /// Close the receiver that owns this listening session
    ///
    /// Cancels the session and tears down the transport chain; see
    /// [`Receiver::close`](crate::Receiver::close).
    pub async fn close(&self) -> Result<(), Error> {
        self.receiver.close_receiver().await
    }

    /// Resolves once the listening session has stopped: the hand-off
    /// channel is closed and both background tasks have exited
    pub async fn done(&self) {
        self.stopped.cancelled().await;
    }

    /// Whether the listening session has stopped
    pub fn is_done(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// The terminal error of the session, if one was recorded, otherwise
    /// the cancellation cause
    ///
    /// Returns `None` while the session is healthy and was never
    /// cancelled.
    pub fn err(&self) -> Option<Arc<Error>> {
        if let Some(error) = self.receiver.terminal_error() {
            return Some(error);
        }
        if self.cancel.is_cancelled() {
            return Some(Arc::new(Error::Cancelled));
        }
        None
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("done", &self.is_done())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
