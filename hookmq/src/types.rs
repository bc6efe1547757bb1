use std::any::Any;
use std::convert::TryFrom;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use bytes::Bytes;
use bytestring::ByteString;
use serde::{Deserialize, Serialize};

use hookmq_utils::{timestamp_millis, TimestampMillis};

use crate::MqttError;

pub type DashMap<K, V> = dashmap::DashMap<K, V, ahash::RandomState>;
pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

pub type ClientId = ByteString;
pub type ListenerId = ByteString;
pub type UserName = Bytes;
pub type Password = Bytes;
pub type TopicName = ByteString;
pub type TopicFilter = ByteString;
pub type SessionId = uuid::Uuid;
pub type IsWrite = bool;
pub type Admitted = bool;

/// Opaque handle to whatever the transport layer uses for the connection.
pub type ConnHandle = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    #[inline]
    pub fn value(&self) -> u8 {
        *self as u8
    }

    #[inline]
    pub fn less_value(&self, other: QoS) -> QoS {
        if *self < other {
            *self
        } else {
            other
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = MqttError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(MqttError::InvalidQoS(v)),
        }
    }
}

impl From<QoS> for u8 {
    #[inline]
    fn from(q: QoS) -> Self {
        q.value()
    }
}

/// Where a message entered the broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    Client(ClientId),
    System,
}

impl Origin {
    #[inline]
    pub fn client_id(&self) -> Option<&ClientId> {
        match self {
            Origin::Client(id) => Some(id),
            Origin::System => None,
        }
    }

    #[inline]
    pub fn is_system(&self) -> bool {
        matches!(self, Origin::System)
    }
}

/// A published unit in flight.
///
/// Each pipeline stage receives the message by value and hands back the one the next
/// stage sees, so a hook never observes a half-applied change from another stage.
#[derive(Clone)]
pub struct Message {
    pub topic: TopicName,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    /// Empty means every matched subscriber. Otherwise only matched subscribers listed here.
    pub allow_clients: Vec<ClientId>,
    pub origin: Origin,
    pub create_time: TimestampMillis,
}

impl Message {
    #[inline]
    pub fn new<T: Into<TopicName>, P: Into<Bytes>>(topic: T, payload: P) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            allow_clients: Vec::new(),
            origin: Origin::System,
            create_time: timestamp_millis(),
        }
    }

    #[inline]
    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    #[inline]
    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    #[inline]
    pub fn allow_clients<I, C>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ClientId>,
    {
        self.allow_clients = ids.into_iter().map(Into::into).collect();
        self
    }

    #[inline]
    pub fn origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// Whether `id` may receive this message once topic matching selected it.
    #[inline]
    pub fn allows(&self, id: &str) -> bool {
        self.allow_clients.is_empty() || self.allow_clients.iter().any(|c| &**c == id)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("topic", &self.topic)
            .field("payload_len", &self.payload.len())
            .field("qos", &self.qos)
            .field("retain", &self.retain)
            .field("allow_clients", &self.allow_clients)
            .field("origin", &self.origin)
            .field("create_time", &self.create_time)
            .finish()
    }
}

/// Handshake data of a connection that is not admitted yet.
///
/// This is what the authorization controller sees, and the only place where the
/// username can still change.
#[derive(Clone)]
pub struct ConnectInfo {
    pub client_id: ClientId,
    pub username: UserName,
    ///Set by `MqttServer::connect` to the credential the connection authenticates with
    pub password: Password,
    pub remote_addr: String,
    pub listener: ListenerId,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub proto_ver: u8,
    pub conn: Option<ConnHandle>,
}

impl ConnectInfo {
    pub fn new<C: Into<ClientId>, L: Into<ListenerId>>(client_id: C, listener: L) -> Self {
        Self {
            client_id: client_id.into(),
            username: Bytes::new(),
            password: Bytes::new(),
            remote_addr: String::new(),
            listener: listener.into(),
            clean_session: true,
            keep_alive: 60,
            proto_ver: 4,
            conn: None,
        }
    }

    #[inline]
    pub fn username<U: Into<UserName>>(mut self, username: U) -> Self {
        self.username = username.into();
        self
    }

    #[inline]
    pub fn password<P: Into<Password>>(mut self, password: P) -> Self {
        self.password = password.into();
        self
    }

    #[inline]
    pub fn remote_addr<A: Into<String>>(mut self, addr: A) -> Self {
        self.remote_addr = addr.into();
        self
    }

    #[inline]
    pub fn clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    #[inline]
    pub fn keep_alive(mut self, keep_alive: u16) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    #[inline]
    pub fn conn(mut self, conn: ConnHandle) -> Self {
        self.conn = Some(conn);
        self
    }
}

impl fmt::Debug for ConnectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectInfo")
            .field("client_id", &self.client_id)
            .field("username", &String::from_utf8_lossy(&self.username))
            .field("remote_addr", &self.remote_addr)
            .field("listener", &self.listener)
            .field("clean_session", &self.clean_session)
            .field("keep_alive", &self.keep_alive)
            .field("proto_ver", &self.proto_ver)
            .finish()
    }
}

/// Identity and connection metadata of an admitted session.
#[derive(Clone)]
pub struct ClientView(Arc<ClientViewInner>);

pub struct ClientViewInner {
    id: ClientId,
    remote_addr: String,
    listener: ListenerId,
    username: UserName,
    password: Password,
    clean_session: bool,
    proto_ver: u8,
    conn: Option<ConnHandle>,
}

impl ClientView {
    #[inline]
    pub fn id(&self) -> &ClientId {
        &self.0.id
    }

    #[inline]
    pub fn remote_addr(&self) -> &str {
        &self.0.remote_addr
    }

    #[inline]
    pub fn listener(&self) -> &ListenerId {
        &self.0.listener
    }

    #[inline]
    pub fn username(&self) -> &UserName {
        &self.0.username
    }

    #[inline]
    pub fn username_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0.username).ok()
    }

    ///The credential this session was admitted with
    #[inline]
    pub fn password(&self) -> &Password {
        &self.0.password
    }

    #[inline]
    pub fn clean_session(&self) -> bool {
        self.0.clean_session
    }

    ///MQTT protocol version, 3=MQTT 3.1, 4=MQTT 3.1.1, 5=MQTT 5.0
    #[inline]
    pub fn proto_ver(&self) -> u8 {
        self.0.proto_ver
    }

    #[inline]
    pub fn conn(&self) -> Option<&ConnHandle> {
        self.0.conn.as_ref()
    }

    #[inline]
    pub fn conn_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.conn.as_ref().and_then(|c| c.downcast_ref::<T>())
    }
}

impl From<&ConnectInfo> for ClientView {
    fn from(info: &ConnectInfo) -> Self {
        ClientView(Arc::new(ClientViewInner {
            id: info.client_id.clone(),
            remote_addr: info.remote_addr.clone(),
            listener: info.listener.clone(),
            username: info.username.clone(),
            password: info.password.clone(),
            clean_session: info.clean_session,
            proto_ver: info.proto_ver,
            conn: info.conn.clone(),
        }))
    }
}

impl fmt::Display for ClientView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.0.id, self.0.remote_addr, self.0.listener)
    }
}

impl fmt::Debug for ClientView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientView")
            .field("id", &self.0.id)
            .field("remote_addr", &self.0.remote_addr)
            .field("listener", &self.0.listener)
            .field("username", &String::from_utf8_lossy(&self.0.username))
            .field("clean_session", &self.0.clean_session)
            .finish()
    }
}

/// One message on its way to one subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic_filter: TopicFilter,
    pub qos: QoS,
    pub message: Message,
}

impl Deref for Delivery {
    type Target = Message;
    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.message
    }
}

/// Outcome of a client publish. Informational only, nothing here is an error for the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Published {
    /// Queued for this many subscribers.
    Delivered(usize),
    /// The ACL refused the write.
    Refused,
    /// A hook abandoned the message.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeReply {
    Granted(QoS),
    NotAuthorized,
}

impl SubscribeReply {
    #[inline]
    pub fn is_granted(&self) -> bool {
        matches!(self, SubscribeReply::Granted(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeReply {
    Removed,
    NoSubscriptionExisted,
    NotAuthorized,
}
