//! Scripted in-memory transport for exercising the receiver without a broker
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fe2o3_amqp_types::messaging::{AmqpValue, Body, MessageId, Properties};
use fe2o3_amqp_types::primitives::Value;
use magnetite::{
    BoxError, Disposition, Link, LinkConfig, Message, RawMessage, Settlement, Transport,
    TransportError, WireMessage,
};

/// One scripted behaviour of a link for a single `receive` call
pub enum Step {
    /// Yield a message whose body and message id are this tag
    Deliver(&'static str),
    /// Yield a message whose settlement fails at the transport
    DeliverBadSettle(&'static str),
    /// Yield a message with an empty body, which fails decoding
    DeliverUndecodable,
    /// Fail the receive call with a transport error
    Fail(&'static str),
    /// Block forever (until the pump is cancelled)
    Idle,
}

/// Script for one link attach attempt
pub enum LinkScript {
    /// Attach succeeds; the link serves these steps and then idles
    Attach(Vec<Step>),
    /// Attach fails
    Refuse(&'static str),
}

/// Everything observable the transport did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ConnectionOpened,
    ClaimNegotiated(String),
    SessionOpened,
    LinkAttached(LinkConfig),
    Settled(String, Disposition),
    SettleFailed(String, Disposition),
    LinkClosed,
    SessionClosed,
    ConnectionClosed,
}

#[derive(Clone)]
pub struct MockTransport {
    shared: Arc<MockShared>,
}

pub struct MockShared {
    scripts: Mutex<VecDeque<LinkScript>>,
    connect_failures: AtomicU32,
    events: Mutex<Vec<Event>>,
}

impl MockTransport {
    pub fn new(scripts: Vec<LinkScript>) -> Self {
        Self {
            shared: Arc::new(MockShared {
                scripts: Mutex::new(scripts.into()),
                connect_failures: AtomicU32::new(0),
                events: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Make the next `count` connection attempts fail
    pub fn fail_connects(&self, count: u32) {
        self.shared.connect_failures.store(count, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Event> {
        self.shared.events.lock().unwrap().clone()
    }

    /// Dispositions applied through settlement handles, in order
    pub fn settled(&self) -> Vec<(String, Disposition)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Settled(tag, disposition) => Some((tag, disposition)),
                _ => None,
            })
            .collect()
    }

    /// Link configurations seen by successful attaches, in order
    pub fn attach_configs(&self) -> Vec<LinkConfig> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::LinkAttached(config) => Some(config),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Event) -> usize {
        self.events().iter().filter(|event| event == &wanted).count()
    }

    fn push(&self, event: Event) {
        self.shared.events.lock().unwrap().push(event);
    }
}

pub struct MockConnection;
pub struct MockSession;

pub struct MockLink {
    steps: VecDeque<Step>,
    shared: Arc<MockShared>,
}

#[async_trait]
impl Transport for MockTransport {
    type Connection = MockConnection;
    type Session = MockSession;
    type Link = MockLink;

    async fn open_connection(&self) -> Result<MockConnection, TransportError> {
        if self.shared.connect_failures.load(Ordering::SeqCst) > 0 {
            self.shared.connect_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::OpenConnection(
                "scripted connect failure".into(),
            ));
        }
        self.push(Event::ConnectionOpened);
        Ok(MockConnection)
    }

    async fn negotiate_claim(
        &self,
        _connection: &mut MockConnection,
        entity_path: &str,
    ) -> Result<(), TransportError> {
        self.push(Event::ClaimNegotiated(entity_path.to_string()));
        Ok(())
    }

    async fn open_session(
        &self,
        _connection: &mut MockConnection,
    ) -> Result<MockSession, TransportError> {
        self.push(Event::SessionOpened);
        Ok(MockSession)
    }

    async fn open_link(
        &self,
        _session: &mut MockSession,
        config: &LinkConfig,
    ) -> Result<MockLink, TransportError> {
        match self.shared.scripts.lock().unwrap().pop_front() {
            Some(LinkScript::Attach(steps)) => {
                self.push(Event::LinkAttached(config.clone()));
                Ok(MockLink {
                    steps: steps.into(),
                    shared: self.shared.clone(),
                })
            }
            Some(LinkScript::Refuse(reason)) => Err(TransportError::AttachLink(reason.into())),
            None => Err(TransportError::AttachLink("no link script remaining".into())),
        }
    }

    async fn close_session(&self, _session: &mut MockSession) -> Result<(), TransportError> {
        self.push(Event::SessionClosed);
        Ok(())
    }

    async fn close_connection(
        &self,
        _connection: &mut MockConnection,
    ) -> Result<(), TransportError> {
        self.push(Event::ConnectionClosed);
        Ok(())
    }
}

#[async_trait]
impl Link for MockLink {
    async fn receive(&mut self) -> Result<RawMessage, TransportError> {
        match self.steps.pop_front() {
            None | Some(Step::Idle) => std::future::pending().await,
            Some(Step::Deliver(tag)) => Ok(self.deliver(tag, true)),
            Some(Step::DeliverBadSettle(tag)) => Ok(self.deliver(tag, false)),
            Some(Step::DeliverUndecodable) => Ok(RawMessage {
                message: wire_message_with_body(Body::Empty, "undecodable"),
                settlement: Settlement::new(|_| async { Ok(()) }),
            }),
            Some(Step::Fail(reason)) => Err(TransportError::Receive(reason.into())),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.shared.events.lock().unwrap().push(Event::LinkClosed);
        Ok(())
    }
}

impl MockLink {
    fn deliver(&self, tag: &'static str, settles: bool) -> RawMessage {
        let shared = self.shared.clone();
        let settlement = Settlement::new(move |disposition| async move {
            if settles {
                shared
                    .events
                    .lock()
                    .unwrap()
                    .push(Event::Settled(tag.to_string(), disposition));
                Ok(())
            } else {
                shared
                    .events
                    .lock()
                    .unwrap()
                    .push(Event::SettleFailed(tag.to_string(), disposition));
                Err(TransportError::Disposition(
                    "scripted disposition failure".into(),
                ))
            }
        });
        RawMessage {
            message: wire_message(tag),
            settlement,
        }
    }
}

pub fn wire_message(tag: &str) -> WireMessage {
    wire_message_with_body(Body::Value(AmqpValue(Value::String(tag.to_string()))), tag)
}

fn wire_message_with_body(body: Body<Value>, tag: &str) -> WireMessage {
    WireMessage {
        header: None,
        delivery_annotations: None,
        message_annotations: None,
        properties: Some(
            Properties::builder()
                .message_id(MessageId::String(tag.to_string()))
                .build(),
        ),
        application_properties: None,
        body,
        footer: None,
    }
}

/// Payload of a decoded message as text
pub fn body_text(message: &Message) -> String {
    String::from_utf8_lossy(message.data()).into_owned()
}

/// Shorthand for the handler success type
pub fn ok() -> Result<(), BoxError> {
    Ok(())
}

/// Future type returned by [`collector`] handlers
pub type HandlerFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), BoxError>> + Send>>;

/// A handler that records the payload of every message it sees
pub fn collector() -> (
    Arc<Mutex<Vec<String>>>,
    impl FnMut(Message) -> HandlerFuture + Send + 'static,
) {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let seen = seen.clone();
        move |message: Message| -> HandlerFuture {
            let seen = seen.clone();
            Box::pin(async move {
                seen.lock().unwrap().push(body_text(&message));
                ok()
            })
        }
    };
    (seen, handler)
}

/// Poll `condition` until it holds; panics after a generous paused-time
/// budget so a broken test fails instead of hanging
pub async fn wait_for(condition: impl Fn() -> bool) {
    tokio::time::timeout(std::time::Duration::from_secs(600), async {
        while !condition() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition was not reached in time");
}
