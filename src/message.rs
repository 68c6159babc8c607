//! Application-level message representation and wire-message decoding
//!
//! The transport hands every transfer over as a [`RawMessage`]: the wire
//! message together with a one-shot [`Settlement`] handle that routes a
//! [`Disposition`] back to the link that produced the transfer. Decoding a
//! raw message into a [`Message`] is a separate step so that a decode
//! failure can be skipped without losing the ability to settle later
//! transfers.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use fe2o3_amqp_types::messaging::{ApplicationProperties, Body, MessageId};
use fe2o3_amqp_types::primitives::{SimpleValue, Value};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use crate::disposition::Disposition;
use crate::transport::TransportError;

/// The wire-level representation of a received message
pub type WireMessage = fe2o3_amqp_types::messaging::Message<Body<Value>>;

/// W3C trace context propagation header carried in application properties
const TRACEPARENT_PROPERTY: &str = "traceparent";

/// Legacy propagation header used by some brokers and older SDKs
const DIAGNOSTIC_ID_PROPERTY: &str = "Diagnostic-Id";

/// A message as produced by the transport, before decoding
#[derive(Debug)]
pub struct RawMessage {
    /// The undecoded wire message
    pub message: WireMessage,
    /// Settlement handle bound to the delivery that carried this message
    pub settlement: Settlement,
}

impl RawMessage {
    /// Decode the wire message into its application-level representation
    ///
    /// The settlement handle is carried over onto the decoded [`Message`].
    pub fn decode(self) -> Result<Message, DecodeError> {
        let RawMessage { message, settlement } = self;

        let data = match message.body {
            Body::Data(batch) => {
                let mut buf = BytesMut::new();
                for section in batch.iter() {
                    buf.extend_from_slice(&section.0);
                }
                buf.freeze()
            }
            Body::Value(value) => match value.0 {
                Value::Binary(binary) => Bytes::from(binary.into_vec()),
                Value::String(text) => Bytes::from(text.into_bytes()),
                _ => return Err(DecodeError::UnsupportedBody),
            },
            Body::Sequence(_) => return Err(DecodeError::UnsupportedBody),
            Body::Empty => return Err(DecodeError::EmptyBody),
        };

        let (message_id, session_id, subject) = match message.properties {
            Some(properties) => (properties.message_id, properties.group_id, properties.subject),
            None => (None, None, None),
        };

        Ok(Message {
            message_id,
            session_id,
            subject,
            data,
            application_properties: message.application_properties,
            settlement,
        })
    }
}

/// Failure to decode a wire message into a [`Message`]
///
/// Decode failures are not fatal to a receive loop; the affected message is
/// logged and skipped and the next one is processed.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The message carried no body section
    #[error("message has an empty body")]
    EmptyBody,

    /// The body section is not a data section or a binary/string value
    #[error("message body section is not supported")]
    UnsupportedBody,
}

/// A decoded message handed to the application handler
///
/// Dropping a message without settling it leaves the settlement to the
/// broker's lock timeout; under `ReceiveAndDelete` the transfer was already
/// settled at the transport.
#[derive(Debug)]
pub struct Message {
    message_id: Option<MessageId>,
    session_id: Option<String>,
    subject: Option<String>,
    data: Bytes,
    application_properties: Option<ApplicationProperties>,
    settlement: Settlement,
}

impl Message {
    /// The broker-assigned or sender-assigned message identifier
    pub fn message_id(&self) -> Option<&MessageId> {
        self.message_id.as_ref()
    }

    /// The session this message belongs to, when the entity is session-aware
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// The application-defined subject (label) of the message
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// The message payload
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Look up an application property by name
    pub fn property(&self, key: &str) -> Option<&SimpleValue> {
        self.application_properties.as_ref()?.0.get(key)
    }

    /// The propagated trace parent, if the sender attached one
    ///
    /// Reads the `traceparent` application property and falls back to the
    /// `Diagnostic-Id` property. Absence is not an error.
    pub fn trace_parent(&self) -> Option<&str> {
        self.string_property(TRACEPARENT_PROPERTY)
            .or_else(|| self.string_property(DIAGNOSTIC_ID_PROPERTY))
    }

    /// Settle this message with the given disposition
    ///
    /// The first settlement wins; any later attempt, from the handler or
    /// from the receiver's default disposition, returns
    /// [`Settled::AlreadySettled`] without touching the transport.
    pub async fn settle(&self, disposition: Disposition) -> Result<Settled, TransportError> {
        self.settlement.settle(disposition).await
    }

    fn string_property(&self, key: &str) -> Option<&str> {
        match self.property(key)? {
            SimpleValue::String(value) => Some(value),
            _ => None,
        }
    }
}

/// Outcome of applying a disposition through a [`Settlement`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// The disposition was sent to the broker
    Applied,
    /// The delivery had already been settled; the disposition was ignored
    AlreadySettled,
}

type SettleFn = Box<dyn FnOnce(Disposition) -> BoxFuture<'static, Result<(), TransportError>> + Send>;

/// One-shot handle that applies a [`Disposition`] to a single delivery
///
/// Cloning the handle shares the same one-shot slot, which is what makes a
/// default disposition safe to apply after a handler that may have settled
/// the message itself.
#[derive(Clone)]
pub struct Settlement {
    inner: Arc<SettlementInner>,
}

struct SettlementInner {
    apply: Mutex<Option<SettleFn>>,
}

impl Settlement {
    /// Create a settlement handle from the transport's disposition routine
    pub fn new<F, Fut>(apply: F) -> Self
    where
        F: FnOnce(Disposition) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TransportError>> + Send + 'static,
    {
        Self {
            inner: Arc::new(SettlementInner {
                apply: Mutex::new(Some(Box::new(move |disposition| Box::pin(apply(disposition))))),
            }),
        }
    }

    /// Apply `disposition` unless the delivery was already settled
    pub async fn settle(&self, disposition: Disposition) -> Result<Settled, TransportError> {
        let apply = self.inner.apply.lock().take();
        match apply {
            Some(apply) => apply(disposition).await.map(|_| Settled::Applied),
            None => Ok(Settled::AlreadySettled),
        }
    }

    /// Whether a disposition has been applied through this handle
    pub fn is_settled(&self) -> bool {
        self.inner.apply.lock().is_none()
    }
}

impl fmt::Debug for Settlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settlement")
            .field("settled", &self.is_settled())
            .finish()
    }
}
