use crate::hook::Type;
use crate::types::Message;

/// Broker-level errors.
///
/// This is the value handed to the error hook, and to the disconnect hook when a
/// session ends abnormally.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MqttError {
    #[error("{0} hook fault, {1}")]
    Hook(Type, String),
    #[error("malformed packet, {0}")]
    MalformedPacket(String),
    #[error("protocol violation, {0}")]
    ProtocolViolation(String),
    #[error("transport error, {0}")]
    Transport(String),
    #[error("keep alive timeout")]
    KeepaliveTimeout,
    #[error("session taken over")]
    SessionTakenOver,
    #[error("server closed")]
    ServerClosed,
    #[error("listener not found, {0}")]
    ListenerNotFound(String),
    #[error("listener already exists, {0}")]
    ListenerExists(String),
    #[error("not authorized")]
    NotAuthorized,
    #[error("session closed")]
    SessionClosed,
    #[error("invalid QoS value, {0}")]
    InvalidQoS(u8),
}

/// Error returned by the message hooks.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// Abandon this message. Nothing is delivered and nothing is reported.
    #[error("packet rejected")]
    Reject,
    /// The hook malfunctioned. The message continues as it entered the stage.
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

impl HookError {
    #[inline]
    pub fn fault<E: std::fmt::Display>(e: E) -> Self {
        HookError::Fault(anyhow::Error::msg(e.to_string()))
    }

    #[inline]
    pub fn is_reject(&self) -> bool {
        matches!(self, HookError::Reject)
    }
}

pub type HookResult = std::result::Result<Message, HookError>;
