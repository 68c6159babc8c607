//! Receiving client for a single broker entity
//!
//! A [`Receiver`] owns at most one transport chain (connection, session,
//! receiving link) at a time. The chain is built once at attach time,
//! replaced wholesale by [`Receiver::recover`] and torn down by
//! [`Receiver::close`]. Messages are consumed either one at a time with
//! [`Receiver::receive_one`] or continuously with [`Receiver::listen`],
//! which runs a pump task and a dispatch task connected by a bounded
//! hand-off channel.

pub mod builder;
mod pump;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn, Instrument};

use crate::disposition::Disposition;
use crate::error::Error;
use crate::handler::Handler;
use crate::listener::{ListenerControl, ListenerHandle};
use crate::message::RawMessage;
use crate::transport::{Link, LinkConfig, SessionFilter, Transport, TransportError};

pub use builder::Builder;

/// How long each step of a recovery teardown may take before it is abandoned
const CLOSE_GRACE: Duration = Duration::from_secs(10);

/// Hand-off channel capacity between pump and dispatcher; the smallest
/// bound tokio offers, so the pump can be at most one message ahead of the
/// dispatcher
const HANDOFF_CAPACITY: usize = 1;

/// How received messages are settled with the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveMode {
    /// Messages are locked on receipt and must be settled explicitly,
    /// either by the handler or by the receiver's default disposition
    #[default]
    PeekLock,

    /// Messages are settled by the broker on receipt; no disposition is
    /// ever sent by the receiver
    ReceiveAndDelete,
}

/// Validated receiver configuration, immutable after attach
#[derive(Debug, Clone)]
pub(crate) struct ReceiverConfig {
    pub(crate) entity_path: String,
    pub(crate) name: String,
    pub(crate) mode: ReceiveMode,
    pub(crate) prefetch: u32,
    pub(crate) session_filter: Option<SessionFilter>,
    pub(crate) default_disposition: Option<Disposition>,
}

/// The transport chain currently serving this receiver
struct Chain<T: Transport> {
    connection: T::Connection,
    session: T::Session,
    link: T::Link,
}

/// State shared between the caller, the pump and the dispatcher
#[derive(Default)]
struct Shared {
    last_error: Option<Arc<Error>>,
    closed: bool,
    /// Cancellation trigger of the active listening session
    active: Option<CancellationToken>,
}

/// A receiving client bound to one entity path
///
/// Supports at most one consumer at a time: either one [`listen`] session
/// or one [`receive_one`] call. Cheap to share with the background tasks it
/// spawns; dropped state is torn down by [`close`].
///
/// [`listen`]: Receiver::listen
/// [`receive_one`]: Receiver::receive_one
/// [`close`]: Receiver::close
pub struct Receiver<T: Transport> {
    inner: Arc<ReceiverInner<T>>,
}

pub(crate) struct ReceiverInner<T: Transport> {
    transport: T,
    config: ReceiverConfig,
    chain: AsyncMutex<Option<Chain<T>>>,
    state: Mutex<Shared>,
}

impl Receiver<crate::transport::amqp::AmqpTransport> {
    /// Create a builder for a [`Receiver`]
    ///
    /// The transport type is determined later by the value passed to
    /// [`Builder::attach`], so this entry point is anchored to a concrete
    /// `Receiver` instantiation purely to give the call a name.
    pub fn builder() -> Builder {
        Builder::new()
    }
}

impl<T: Transport> Receiver<T> {

    /// Attach a receiver to `entity_path` with the default configuration
    ///
    /// Defaults: `PeekLock` mode, prefetch 1, no session affinity and no
    /// default disposition. The transport chain is established once;
    /// attach failures are returned without retrying.
    pub async fn attach(transport: T, entity_path: impl Into<String>) -> Result<Self, Error> {
        Builder::new()
            .entity_path(entity_path)
            .attach(transport)
            .await
    }

    pub(crate) async fn attach_with_config(
        transport: T,
        config: ReceiverConfig,
    ) -> Result<Self, Error> {
        let inner = Arc::new(ReceiverInner {
            transport,
            config,
            chain: AsyncMutex::new(None),
            state: Mutex::new(Shared::default()),
        });
        let chain = inner.establish(None).await?;
        *inner.chain.lock().await = Some(chain);
        Ok(Self { inner })
    }

    /// The entity path this receiver consumes from
    pub fn entity_path(&self) -> &str {
        &self.inner.config.entity_path
    }

    /// The client-assigned receiver name, also used as the link name
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// The configured receive mode
    pub fn mode(&self) -> ReceiveMode {
        self.inner.config.mode
    }

    /// Whether [`close`](Receiver::close) has been called
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// The last terminal error recorded by a listening session, if any
    pub fn last_error(&self) -> Option<Arc<Error>> {
        self.inner.terminal_error()
    }

    /// Receive and handle exactly one message
    ///
    /// Blocks until a message arrives, the transport fails or `cancel`
    /// fires. The message runs through the same pipeline as
    /// [`listen`](Receiver::listen): decode failures are logged and
    /// skipped, handler and default-disposition errors are returned.
    #[instrument(skip_all, fields(entity_path = %self.inner.config.entity_path))]
    pub async fn receive_one<H: Handler>(
        &self,
        cancel: &CancellationToken,
        mut handler: H,
    ) -> Result<(), Error> {
        if self.inner.is_closed() {
            return Err(Error::ReceiverClosed);
        }
        let raw = self.inner.pull_one(cancel).await?;
        let scope = cancel.child_token();
        self.inner
            .handle_message(raw, &mut handler, &scope)
            .await
            .map(|_| ())
    }

    /// Start listening for messages sent to the entity path
    ///
    /// Spawns the pump and dispatch tasks and returns immediately. The
    /// session runs until `cancel` fires, the handler returns an error or
    /// recovery is exhausted; [`ListenerHandle::done`] resolves once both
    /// tasks have stopped.
    pub fn listen<H>(&self, cancel: CancellationToken, handler: H) -> ListenerHandle
    where
        H: Handler + 'static,
    {
        let session = cancel.child_token();
        self.inner.state.lock().active = Some(session.clone());

        let stopped = CancellationToken::new();
        let (handoff_tx, handoff_rx) = mpsc::channel(HANDOFF_CAPACITY);

        let pump_span =
            tracing::info_span!("pump", entity_path = %self.inner.config.entity_path);
        let pump_task = tokio::spawn(
            pump::pump(self.inner.clone(), handoff_tx, session.clone()).instrument(pump_span),
        );

        let dispatch_span =
            tracing::info_span!("dispatch", entity_path = %self.inner.config.entity_path);
        let inner = self.inner.clone();
        let dispatch_cancel = session.clone();
        let stopped_signal = stopped.clone();
        tokio::spawn(
            async move {
                pump::dispatch(inner, handoff_rx, handler, dispatch_cancel).await;
                // The pump owns the only sender, so a closed channel means it
                // is already on its way out.
                let _ = pump_task.await;
                stopped_signal.cancel();
            }
            .instrument(dispatch_span),
        );

        ListenerHandle::new(self.inner.clone(), session, stopped)
    }

    /// Tear down the current transport chain and rebuild it
    ///
    /// Close errors on the old chain are ignored; the premise for calling
    /// this is that some layer of it is already unusable. Returns the error
    /// from rebuilding, if any.
    #[instrument(skip_all, fields(entity_path = %self.inner.config.entity_path))]
    pub async fn recover(&self) -> Result<(), Error> {
        self.inner.recover(None).await
    }

    /// Close the link, session and connection, in that order
    ///
    /// Cancels any active listening session first. Every step is attempted
    /// even if an earlier one fails; the first error is returned. Closing
    /// an already closed receiver is a no-op.
    #[instrument(skip_all, fields(entity_path = %self.inner.config.entity_path))]
    pub async fn close(&self) -> Result<(), Error> {
        self.inner.close().await
    }
}

impl<T: Transport> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("entity_path", &self.inner.config.entity_path)
            .field("name", &self.inner.config.name)
            .field("mode", &self.inner.config.mode)
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

/// What the shared pipeline did with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handled {
    /// Decoded, handled and settled as configured
    Dispatched,
    /// Dropped because it could not be decoded
    SkippedDecode,
}

impl<T: Transport> ReceiverInner<T> {
    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn terminal_error(&self) -> Option<Arc<Error>> {
        self.state.lock().last_error.clone()
    }

    /// Record `error` as the terminal error of the current session
    pub(crate) fn record_terminal(&self, error: Error) {
        self.state.lock().last_error = Some(Arc::new(error));
    }

    fn link_config(&self) -> LinkConfig {
        LinkConfig {
            name: self.config.name.clone(),
            entity_path: self.config.entity_path.clone(),
            mode: self.config.mode,
            credit: self.config.prefetch,
            session_filter: self.config.session_filter.clone(),
        }
    }

    /// Build the full transport chain: connection, claim, session, link
    ///
    /// Fails fast if `cancel` has already fired. On failure nothing is
    /// retained; the layers opened so far are dropped.
    async fn establish(&self, cancel: Option<&CancellationToken>) -> Result<Chain<T>, Error> {
        if cancel.is_some_and(|token| token.is_cancelled()) {
            return Err(Error::Cancelled);
        }
        debug!(entity_path = %self.config.entity_path, "building connection, session and link");
        let mut connection = self.transport.open_connection().await?;
        self.transport
            .negotiate_claim(&mut connection, &self.config.entity_path)
            .await?;
        let mut session = self.transport.open_session(&mut connection).await?;
        let link = self
            .transport
            .open_link(&mut session, &self.link_config())
            .await?;
        Ok(Chain {
            connection,
            session,
            link,
        })
    }

    /// Wait for the next transfer on the current link
    pub(crate) async fn pull_one(&self, cancel: &CancellationToken) -> Result<RawMessage, Error> {
        let mut guard = self.chain.lock().await;
        let chain = guard.as_mut().ok_or(Error::ReceiverClosed)?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            received = chain.link.receive() => match received {
                Ok(raw) => Ok(raw),
                Err(err) => {
                    debug!(error = %err, "receive failed");
                    Err(Error::Transport(err))
                }
            },
        }
    }

    pub(crate) async fn recover(&self, cancel: Option<&CancellationToken>) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::ReceiverClosed);
        }
        if cancel.is_some_and(|token| token.is_cancelled()) {
            return Err(Error::Cancelled);
        }
        let mut guard = self.chain.lock().await;
        if let Some(chain) = guard.take() {
            if let Err(err) = self.teardown(chain, Some(CLOSE_GRACE)).await {
                debug!(error = %err, "ignoring teardown error during recovery");
            }
        }
        let chain = self.establish(cancel).await?;
        *guard = Some(chain);
        Ok(())
    }

    pub(crate) async fn close(&self) -> Result<(), Error> {
        {
            let mut shared = self.state.lock();
            shared.closed = true;
            if let Some(active) = shared.active.take() {
                active.cancel();
            }
        }
        let chain = self.chain.lock().await.take();
        match chain {
            None => Ok(()),
            Some(chain) => self.teardown(chain, None).await.map_err(Error::from),
        }
    }

    /// Close link, session and connection in order, attempting every step
    ///
    /// Returns the first error encountered; later errors are logged only.
    async fn teardown(
        &self,
        chain: Chain<T>,
        grace: Option<Duration>,
    ) -> Result<(), TransportError> {
        let Chain {
            mut connection,
            mut session,
            mut link,
        } = chain;
        let mut first_error = None;

        if let Err(err) = close_with_grace(grace, link.close()).await {
            debug!(error = %err, "link close failed");
            first_error.get_or_insert(err);
        }
        if let Err(err) = close_with_grace(grace, self.transport.close_session(&mut session)).await
        {
            debug!(error = %err, "session close failed");
            first_error.get_or_insert(err);
        }
        if let Err(err) =
            close_with_grace(grace, self.transport.close_connection(&mut connection)).await
        {
            debug!(error = %err, "connection close failed");
            first_error.get_or_insert(err);
        }

        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Decode, dispatch and settle one message
    ///
    /// Decode failures are skipped. A handler or default-disposition error
    /// cancels `cancel` and is returned; the caller decides whether to
    /// record it as the session's terminal error.
    pub(crate) async fn handle_message<H: Handler>(
        &self,
        raw: RawMessage,
        handler: &mut H,
        cancel: &CancellationToken,
    ) -> Result<Handled, Error> {
        let settlement = raw.settlement.clone();
        let message = match raw.decode() {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "failed to decode message, skipping");
                return Ok(Handled::SkippedDecode);
            }
        };

        let span = tracing::info_span!(
            "handle_message",
            message_id = ?message.message_id(),
            trace_parent = message.trace_parent().unwrap_or(""),
        );
        if let Err(err) = handler.handle(message).instrument(span).await {
            cancel.cancel();
            return Err(Error::Handler(err));
        }

        // Settled on receipt, nothing further to do.
        if self.config.mode == ReceiveMode::ReceiveAndDelete {
            return Ok(Handled::Dispatched);
        }
        // Settlement is entirely the handler's responsibility.
        let Some(default) = self.config.default_disposition.clone() else {
            return Ok(Handled::Dispatched);
        };

        // The handler may already have settled the message; the settlement
        // handle applies only the first disposition.
        match settlement.settle(default).await {
            Ok(_) => Ok(Handled::Dispatched),
            Err(err) => {
                error!(error = %err, "default disposition failed");
                cancel.cancel();
                Err(Error::Transport(err))
            }
        }
    }
}

#[async_trait]
impl<T: Transport> ListenerControl for ReceiverInner<T> {
    async fn close_receiver(&self) -> Result<(), Error> {
        self.close().await
    }

    fn terminal_error(&self) -> Option<Arc<Error>> {
        self.terminal_error()
    }
}

async fn close_with_grace<F>(grace: Option<Duration>, close: F) -> Result<(), TransportError>
where
    F: Future<Output = Result<(), TransportError>>,
{
    match grace {
        None => close.await,
        Some(limit) => match tokio::time::timeout(limit, close).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Close("close timed out".into())),
        },
    }
}
