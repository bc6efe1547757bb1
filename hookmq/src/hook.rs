use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{ClientView, ConnectInfo, Message, QoS, TopicFilter};
use crate::{HookResult, MqttError};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

pub type MessageHookFn = dyn Fn(ClientView, Message) -> BoxFuture<HookResult> + Send + Sync;
pub type ErrorHookFn = dyn Fn(ClientView, MqttError) -> BoxFuture<()> + Send + Sync;
pub type ConnectHookFn = dyn Fn(ClientView, ConnectInfo) -> BoxFuture<()> + Send + Sync;
pub type DisconnectHookFn = dyn Fn(ClientView, Option<MqttError>) -> BoxFuture<()> + Send + Sync;
pub type SubscribeHookFn = dyn Fn(TopicFilter, ClientView, QoS) -> BoxFuture<()> + Send + Sync;
pub type UnsubscribeHookFn = dyn Fn(TopicFilter, ClientView) -> BoxFuture<()> + Send + Sync;

type Slot<F> = RwLock<Option<Arc<F>>>;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    ProcessMessage,
    Message,
    Error,
    Connect,
    Disconnect,
    Subscribe,
    Unsubscribe,
}

impl Type {
    pub const ALL: [Type; 7] = [
        Type::ProcessMessage,
        Type::Message,
        Type::Error,
        Type::Connect,
        Type::Disconnect,
        Type::Subscribe,
        Type::Unsubscribe,
    ];

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Type::ProcessMessage => "process_message",
            Type::Message => "message",
            Type::Error => "error",
            Type::Connect => "connect",
            Type::Disconnect => "disconnect",
            Type::Subscribe => "subscribe",
            Type::Unsubscribe => "unsubscribe",
        }
    }
}

impl FromStr for Type {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Type::ALL.into_iter().find(|t| t.as_str() == s).ok_or_else(|| anyhow!("unknown hook type, {}", s))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The hook registry. One optional callback per [`Type`].
///
/// Hooks are normally bound once before the server accepts connections. Binding later
/// is allowed: every slot is swapped as a whole, but which in-flight message is the
/// first to see a new binding is unspecified.
///
/// ```rust
/// use hookmq::hook::{Events, Type};
/// use hookmq::HookError;
///
/// let events = Events::default();
/// events
///     .on_message(|_client, mut msg| async move {
///         if msg.payload.as_ref() == b"hello" {
///             msg.payload = "hello world".into();
///         }
///         Ok(msg)
///     })
///     .on_process_message(|_client, msg| async move {
///         if msg.topic.starts_with("blocked/") {
///             return Err(HookError::Reject);
///         }
///         Ok(msg)
///     });
/// assert!(events.is_bound(Type::Message));
/// assert!(!events.is_bound(Type::Connect));
/// ```
#[derive(Default)]
pub struct Events {
    process_message: Slot<MessageHookFn>,
    message: Slot<MessageHookFn>,
    error: Slot<ErrorHookFn>,
    connect: Slot<ConnectHookFn>,
    disconnect: Slot<DisconnectHookFn>,
    subscribe: Slot<SubscribeHookFn>,
    unsubscribe: Slot<UnsubscribeHookFn>,
}

impl Events {
    ///Called after the publish ACL check passed and before anything else looks at the message.
    ///`HookError::Reject` drops the message, any other error keeps the original.
    pub fn on_process_message<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(ClientView, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        let f: Arc<MessageHookFn> =
            Arc::new(move |c: ClientView, m: Message| -> BoxFuture<HookResult> { Box::pin(f(c, m)) });
        *self.process_message.write() = Some(f);
        self
    }

    ///Same contract as `on_process_message`, on the message that stage produced.
    pub fn on_message<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(ClientView, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        let f: Arc<MessageHookFn> =
            Arc::new(move |c: ClientView, m: Message| -> BoxFuture<HookResult> { Box::pin(f(c, m)) });
        *self.message.write() = Some(f);
        self
    }

    ///Broker errors that do not end the session, and hook faults.
    pub fn on_error<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(ClientView, MqttError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let f: Arc<ErrorHookFn> =
            Arc::new(move |c: ClientView, e: MqttError| -> BoxFuture<()> { Box::pin(f(c, e)) });
        *self.error.write() = Some(f);
        self
    }

    pub fn on_connect<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(ClientView, ConnectInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let f: Arc<ConnectHookFn> =
            Arc::new(move |c: ClientView, i: ConnectInfo| -> BoxFuture<()> { Box::pin(f(c, i)) });
        *self.connect.write() = Some(f);
        self
    }

    ///`None` for a graceful disconnect.
    pub fn on_disconnect<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(ClientView, Option<MqttError>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let f: Arc<DisconnectHookFn> =
            Arc::new(move |c: ClientView, e: Option<MqttError>| -> BoxFuture<()> { Box::pin(f(c, e)) });
        *self.disconnect.write() = Some(f);
        self
    }

    pub fn on_subscribe<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(TopicFilter, ClientView, QoS) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let f: Arc<SubscribeHookFn> =
            Arc::new(move |t: TopicFilter, c: ClientView, q: QoS| -> BoxFuture<()> { Box::pin(f(t, c, q)) });
        *self.subscribe.write() = Some(f);
        self
    }

    pub fn on_unsubscribe<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(TopicFilter, ClientView) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let f: Arc<UnsubscribeHookFn> =
            Arc::new(move |t: TopicFilter, c: ClientView| -> BoxFuture<()> { Box::pin(f(t, c)) });
        *self.unsubscribe.write() = Some(f);
        self
    }

    pub fn unbind(&self, typ: Type) -> &Self {
        match typ {
            Type::ProcessMessage => *self.process_message.write() = None,
            Type::Message => *self.message.write() = None,
            Type::Error => *self.error.write() = None,
            Type::Connect => *self.connect.write() = None,
            Type::Disconnect => *self.disconnect.write() = None,
            Type::Subscribe => *self.subscribe.write() = None,
            Type::Unsubscribe => *self.unsubscribe.write() = None,
        }
        self
    }

    pub fn is_bound(&self, typ: Type) -> bool {
        match typ {
            Type::ProcessMessage => self.process_message.read().is_some(),
            Type::Message => self.message.read().is_some(),
            Type::Error => self.error.read().is_some(),
            Type::Connect => self.connect.read().is_some(),
            Type::Disconnect => self.disconnect.read().is_some(),
            Type::Subscribe => self.subscribe.read().is_some(),
            Type::Unsubscribe => self.unsubscribe.read().is_some(),
        }
    }

    #[inline]
    pub(crate) fn process_message(&self) -> Option<Arc<MessageHookFn>> {
        self.process_message.read().clone()
    }

    #[inline]
    pub(crate) fn message(&self) -> Option<Arc<MessageHookFn>> {
        self.message.read().clone()
    }

    #[inline]
    pub(crate) fn error(&self) -> Option<Arc<ErrorHookFn>> {
        self.error.read().clone()
    }

    #[inline]
    pub(crate) fn connect(&self) -> Option<Arc<ConnectHookFn>> {
        self.connect.read().clone()
    }

    #[inline]
    pub(crate) fn disconnect(&self) -> Option<Arc<DisconnectHookFn>> {
        self.disconnect.read().clone()
    }

    #[inline]
    pub(crate) fn subscribe(&self) -> Option<Arc<SubscribeHookFn>> {
        self.subscribe.read().clone()
    }

    #[inline]
    pub(crate) fn unsubscribe(&self) -> Option<Arc<UnsubscribeHookFn>> {
        self.unsubscribe.read().clone()
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = Type::ALL.into_iter().filter(|t| self.is_bound(*t)).map(|t| t.as_str()).collect::<Vec<_>>();
        f.debug_struct("Events").field("bound", &bound).finish()
    }
}
