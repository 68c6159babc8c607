//! Message disposition variants

use std::fmt;

/// The outcome reported back to the broker for a received message
///
/// A disposition is applied through [`Message::settle`](crate::Message::settle),
/// either explicitly by the handler or automatically by the receiver when a
/// default disposition is configured. Only the first application takes
/// effect; later ones observe [`Settled::AlreadySettled`](crate::Settled).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The message was processed and can be removed from the entity
    Accept,

    /// The message cannot be processed and should be dead-lettered by the
    /// broker
    Reject,

    /// The message was not processed and should be redelivered to any
    /// consumer
    Release,

    /// The message should be set aside on the broker until it is explicitly
    /// retrieved again
    Defer {
        /// Optional reason recorded with the deferral
        reason: Option<String>,
    },
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Accept => write!(f, "accept"),
            Disposition::Reject => write!(f, "reject"),
            Disposition::Release => write!(f, "release"),
            Disposition::Defer { reason: None } => write!(f, "defer"),
            Disposition::Defer { reason: Some(reason) } => write!(f, "defer ({})", reason),
        }
    }
}
