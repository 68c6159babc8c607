//! Error types for the receiving client

use crate::receiver::builder::ConfigError;
use crate::transport::TransportError;

/// A type-erased error returned by message handlers and authorizers
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error associated with the [`Receiver`](crate::Receiver)
///
/// The `Transport` variant wraps failures reported by the transport
/// collaborator. `RecoveryExhausted` and `Handler` are terminal for a
/// listening session and are what [`ListenerHandle::err`](crate::ListenerHandle::err)
/// surfaces after the session stops.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// One of the configuration options failed validation
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The transport collaborator reported an error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The receiver has already been closed
    #[error("receiver is already closed")]
    ReceiverClosed,

    /// The operation was cancelled by the caller
    #[error("operation was cancelled")]
    Cancelled,

    /// Recovery was attempted but the transport chain could not be rebuilt
    #[error("recovery failed after {attempts} attempts")]
    RecoveryExhausted {
        /// Number of rebuild attempts that were made
        attempts: u32,
        /// The error returned by the last attempt
        #[source]
        source: Box<Error>,
    },

    /// The message handler returned an error, which ends the listening session
    #[error("message handler failed")]
    Handler(#[source] BoxError),
}
