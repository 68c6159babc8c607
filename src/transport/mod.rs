//! Transport collaborator boundary
//!
//! The receiver drives its transport through the [`Transport`] and [`Link`]
//! traits rather than a concrete protocol client, which keeps the layered
//! handshake (connection, security negotiation, session, link) explicit and
//! lets tests substitute a scripted transport. The default implementation
//! backed by `fe2o3-amqp` lives in [`amqp`].

pub mod amqp;

use async_trait::async_trait;

use crate::error::BoxError;
use crate::message::RawMessage;
use crate::receiver::ReceiveMode;

/// Factory for every layer of the broker conversation
///
/// Implementations open each layer on demand; the receiver owns the opened
/// values and calls the matching `close_*` method during teardown. A failed
/// `open_*` call must not leave anything for the caller to clean up beyond
/// dropping the values it already holds.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// An open connection to the broker
    type Connection: Send + 'static;
    /// A session multiplexed on a connection
    type Session: Send + 'static;
    /// A receiving link scoped to one entity path
    type Link: Link;

    /// Open a connection to the broker
    async fn open_connection(&self) -> Result<Self::Connection, TransportError>;

    /// Perform security negotiation for `entity_path` on an open connection
    async fn negotiate_claim(
        &self,
        connection: &mut Self::Connection,
        entity_path: &str,
    ) -> Result<(), TransportError>;

    /// Open a session on the connection
    async fn open_session(
        &self,
        connection: &mut Self::Connection,
    ) -> Result<Self::Session, TransportError>;

    /// Attach a receiving link on the session
    async fn open_link(
        &self,
        session: &mut Self::Session,
        config: &LinkConfig,
    ) -> Result<Self::Link, TransportError>;

    /// End the session
    async fn close_session(&self, session: &mut Self::Session) -> Result<(), TransportError>;

    /// Close the connection
    async fn close_connection(
        &self,
        connection: &mut Self::Connection,
    ) -> Result<(), TransportError>;
}

/// A receiving link
///
/// `receive` must be cancel safe: dropping its future must not lose a
/// message that the broker already considers delivered. Dispositions are
/// routed through the [`Settlement`](crate::Settlement) handle attached to
/// each [`RawMessage`] and must remain usable while a `receive` is in
/// flight.
#[async_trait]
pub trait Link: Send + 'static {
    /// Wait for the next transfer on the link
    async fn receive(&mut self) -> Result<RawMessage, TransportError>;

    /// Close the link
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Configuration for attaching a receiving link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Client-assigned link name
    pub name: String,
    /// Source address of the link, the entity path
    pub entity_path: String,
    /// Receive mode, which the transport maps onto settlement modes
    pub mode: ReceiveMode,
    /// Credit the transport may buffer ahead of consumption
    pub credit: u32,
    /// Broker-side session to bind to, if any
    pub session_filter: Option<SessionFilter>,
}

/// Selects the broker-side message session a link binds to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFilter {
    /// Let the broker pick any session with available messages
    Any,
    /// Bind to one specific session
    Id(String),
}

/// Error reported by the transport collaborator
///
/// Each variant corresponds to one operation at the collaborator boundary;
/// the source is the underlying protocol error.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Opening the connection failed
    #[error("failed to open connection")]
    OpenConnection(#[source] BoxError),

    /// Security negotiation for the entity path failed
    #[error("security negotiation failed")]
    Negotiate(#[source] BoxError),

    /// Beginning the session failed
    #[error("failed to begin session")]
    OpenSession(#[source] BoxError),

    /// Attaching the receiving link failed
    #[error("failed to attach link")]
    AttachLink(#[source] BoxError),

    /// Waiting for the next transfer failed
    #[error("receive failed")]
    Receive(#[source] BoxError),

    /// Sending a disposition failed
    #[error("disposition failed")]
    Disposition(#[source] BoxError),

    /// Closing a link, session or connection failed
    #[error("close failed")]
    Close(#[source] BoxError),
}
