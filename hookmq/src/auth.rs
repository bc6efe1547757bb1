use async_trait::async_trait;

use crate::types::{Admitted, ClientView, ConnectInfo, IsWrite, UserName};

/// Connection admission and topic access control for one listener.
///
/// One controller is bound per listener and is shared by every session accepted there,
/// so implementations are called concurrently and must not rely on call order.
/// A refusal is a plain `false`, never an error.
#[async_trait]
pub trait AuthController: Send + Sync {
    ///Called once per new connection, before the session is admitted.
    ///A returned username replaces the one the client sent.
    async fn authenticate(&self, connect_info: &ConnectInfo, password: &[u8]) -> (Option<UserName>, Admitted);

    ///Publish (write) and subscribe (read) access to a concrete topic or filter
    async fn acl(&self, client: &ClientView, topic: &str, write: IsWrite) -> bool;

    #[inline]
    fn name(&self) -> &str {
        "custom"
    }
}

/// Admits every connection and allows every topic.
#[derive(Debug, Clone, Copy, Default)]
pub struct Allow;

#[async_trait]
impl AuthController for Allow {
    #[inline]
    async fn authenticate(&self, _connect_info: &ConnectInfo, _password: &[u8]) -> (Option<UserName>, Admitted) {
        (None, true)
    }

    #[inline]
    async fn acl(&self, _client: &ClientView, _topic: &str, _write: IsWrite) -> bool {
        true
    }

    #[inline]
    fn name(&self) -> &str {
        "allow"
    }
}

/// Refuses every connection and denies every topic.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disallow;

#[async_trait]
impl AuthController for Disallow {
    #[inline]
    async fn authenticate(&self, _connect_info: &ConnectInfo, _password: &[u8]) -> (Option<UserName>, Admitted) {
        (None, false)
    }

    #[inline]
    async fn acl(&self, _client: &ClientView, _topic: &str, _write: IsWrite) -> bool {
        false
    }

    #[inline]
    fn name(&self) -> &str {
        "disallow"
    }
}
