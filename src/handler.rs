//! Application message handler

use async_trait::async_trait;
use std::future::Future;

use crate::error::BoxError;
use crate::message::Message;

/// Callback invoked for every decoded message
///
/// Returning an error is terminal for the listening session: the receiver
/// records it, cancels the session and stops dispatching further messages.
/// The handler may settle the message itself through
/// [`Message::settle`]; under `PeekLock` with a configured default
/// disposition the receiver settles any message the handler left
/// unsettled.
///
/// Any `FnMut(Message) -> impl Future<Output = Result<(), BoxError>>`
/// closure is a handler:
///
/// ```rust,ignore
/// let handle = receiver.listen(token, |message: Message| async move {
///     println!("received {:?}", message.data());
///     Ok(())
/// });
/// ```
#[async_trait]
pub trait Handler: Send {
    /// Process one message
    async fn handle(&mut self, message: Message) -> Result<(), BoxError>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: FnMut(Message) -> Fut + Send,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    async fn handle(&mut self, message: Message) -> Result<(), BoxError> {
        (self)(message).await
    }
}
