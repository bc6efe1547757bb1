//! Server facade
//!
//! [`MqttServer`] is what the transport and protocol layers talk to: they hand it the
//! handshake of a new connection and get back a [`Connection`] whose [`Session`] takes the
//! client's publishes and subscriptions, and whose receiver yields the deliveries for it.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hookmq::auth::Allow;
//! use hookmq::context::ServerContext;
//! use hookmq::server::MqttServer;
//! use hookmq::types::{ConnectInfo, Message, QoS};
//! use hookmq::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = MqttServer::new(ServerContext::new().build()?);
//!     server.add_listener("t1", Arc::new(Allow))?;
//!     server.events().on_message(|_client, msg| async move { Ok(msg) });
//!
//!     let mut conn = server.connect(ConnectInfo::new("c1", "t1"), b"").await?;
//!     conn.subscribe("a/#", QoS::AtLeastOnce).await?;
//!     conn.publish(Message::new("a/b", "hello")).await?;
//!     if let Some(delivery) = conn.recv().await {
//!         println!("{:?}", delivery);
//!     }
//!
//!     server.close().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use tokio::sync::oneshot;

use crate::auth::AuthController;
use crate::context::ServerContext;
use crate::hook::Events;
use crate::session::{Command, Connection, Session};
use crate::types::*;
use crate::{MqttError, Result};

#[derive(Clone)]
pub struct MqttServer {
    scx: ServerContext,
}

impl MqttServer {
    #[inline]
    pub fn new(scx: ServerContext) -> Self {
        Self { scx }
    }

    #[inline]
    pub fn context(&self) -> &ServerContext {
        &self.scx
    }

    #[inline]
    pub fn events(&self) -> &Events {
        &self.scx.events
    }

    #[inline]
    pub fn add_listener<N: Into<ListenerId>>(&self, name: N, auth: Arc<dyn AuthController>) -> Result<()> {
        self.scx.add_listener(name, auth)
    }

    /// Admit a connection.
    ///
    /// The listener's controller decides. A refused connection fails with
    /// `MqttError::NotAuthorized` and no hook runs for it. An admitted one is announced
    /// to the connect hook with the username the controller settled on.
    pub async fn connect(&self, mut connect_info: ConnectInfo, password: &[u8]) -> Result<Connection> {
        if self.scx.is_closed() {
            return Err(MqttError::ServerClosed.into());
        }

        let auth = self
            .scx
            .listener_auth(&connect_info.listener)
            .ok_or_else(|| MqttError::ListenerNotFound(connect_info.listener.to_string()))?;

        connect_info.password = Password::copy_from_slice(password);
        let (username, admitted) = auth.authenticate(&connect_info, password).await;
        if !admitted {
            log::info!(
                "{} connection refused by {} auth, listener: {}, remote_addr: {}",
                connect_info.client_id,
                auth.name(),
                connect_info.listener,
                connect_info.remote_addr
            );
            return Err(MqttError::NotAuthorized.into());
        }

        if let Some(username) = username {
            log::debug!(
                "{} username rewritten, {:?} -> {:?}",
                connect_info.client_id,
                String::from_utf8_lossy(&connect_info.username),
                String::from_utf8_lossy(&username)
            );
            connect_info.username = username;
        }

        Session::start(self.scx.clone(), connect_info).await
    }

    /// Publish from the server itself, at QoS 0. Client hooks and ACLs do not apply.
    #[inline]
    pub async fn publish<T, P>(&self, topic: T, payload: P, retain: bool) -> Result<usize>
    where
        T: Into<TopicName>,
        P: Into<Bytes>,
    {
        self.publish_message(Message::new(topic, payload).retain(retain)).await
    }

    pub async fn publish_message(&self, msg: Message) -> Result<usize> {
        if self.scx.is_closed() {
            return Err(MqttError::ServerClosed.into());
        }
        crate::topic::check_topic_name(&msg.topic)?;
        Ok(self.scx.dispatcher().publish_direct(msg).await)
    }

    #[inline]
    pub fn clients(&self) -> usize {
        self.scx.shared.clients()
    }

    /// Stop admitting connections and end every live session with `MqttError::ServerClosed`.
    pub async fn close(&self) {
        if !self.scx.set_closed() {
            return;
        }

        let mut waits = Vec::new();
        for (id, tx) in self.scx.shared.command_senders() {
            if let Some(tx) = tx.upgrade() {
                let (done_tx, done_rx) = oneshot::channel();
                if tx.send(Command::Disconnect(Some(MqttError::ServerClosed), Some(done_tx))).await.is_ok() {
                    waits.push(done_rx);
                } else {
                    log::debug!("{} session already closed", id);
                }
            }
        }
        let n = waits.len();
        join_all(waits).await;
        log::info!("server closed, {} sessions disconnected", n);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;
    use crate::auth::{Allow, Disallow};
    use crate::HookError;

    const QUIET: Duration = Duration::from_millis(200);

    fn server() -> MqttServer {
        let server = MqttServer::new(ServerContext::new().build().expect("context"));
        server.add_listener("t1", Arc::new(Allow)).expect("listener");
        server
    }

    async fn connect(server: &MqttServer, id: &str) -> Connection {
        server.connect(ConnectInfo::new(id, "t1"), b"").await.expect("connect")
    }

    async fn nothing(conn: &mut Connection) -> bool {
        timeout(QUIET, conn.recv()).await.is_err()
    }

    /// Denies writes to `private/...`, allows everything else.
    struct PrivateTopics;

    #[async_trait]
    impl AuthController for PrivateTopics {
        async fn authenticate(&self, _: &ConnectInfo, _: &[u8]) -> (Option<UserName>, Admitted) {
            (None, true)
        }

        async fn acl(&self, _: &ClientView, topic: &str, write: IsWrite) -> bool {
            !(write && topic.starts_with("private/"))
        }
    }

    /// Admits only password "secret", and renames the user to "operator".
    struct Rename;

    #[async_trait]
    impl AuthController for Rename {
        async fn authenticate(&self, _: &ConnectInfo, password: &[u8]) -> (Option<UserName>, Admitted) {
            if password == b"secret" {
                (Some(Bytes::from_static(b"operator")), true)
            } else {
                (None, false)
            }
        }

        async fn acl(&self, _: &ClientView, _: &str, _: IsWrite) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_acl_refused_publish_never_reaches_hooks_or_subscribers() {
        let server = server();
        server.add_listener("t2", Arc::new(PrivateTopics)).expect("listener");
        let calls = Arc::new(AtomicUsize::new(0));
        let (c1, c2) = (calls.clone(), calls.clone());
        server
            .events()
            .on_process_message(move |_, msg| {
                c1.fetch_add(1, Ordering::SeqCst);
                async move { Ok(msg) }
            })
            .on_message(move |_, msg| {
                c2.fetch_add(1, Ordering::SeqCst);
                async move { Ok(msg) }
            });

        let mut sub = connect(&server, "sub").await;
        sub.subscribe("#", QoS::AtMostOnce).await.expect("subscribe");
        let publisher = server.connect(ConnectInfo::new("c1", "t2"), b"").await.expect("connect");

        for topic in ["private/a", "private/b/c", "private/"] {
            let res = publisher.publish(Message::new(topic, "x")).await.expect("publish");
            assert_eq!(res, Published::Refused);
        }
        assert!(nothing(&mut sub).await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let res = publisher.publish(Message::new("public/a", "x")).await.expect("publish");
        assert_eq!(res, Published::Delivered(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_message_hook_payload_is_delivered() {
        let server = server();
        server.events().on_message(|_, mut msg| async move {
            msg.payload = Bytes::from(format!("{}!", String::from_utf8_lossy(&msg.payload)));
            Ok(msg)
        });

        let mut subs = Vec::new();
        for id in ["s1", "s2", "s3"] {
            let sub = connect(&server, id).await;
            sub.subscribe("greet/+", QoS::AtMostOnce).await.expect("subscribe");
            subs.push(sub);
        }

        let publisher = connect(&server, "c1").await;
        let res = publisher.publish(Message::new("greet/all", "hi")).await.expect("publish");
        assert_eq!(res, Published::Delivered(3));
        for sub in subs.iter_mut() {
            let d = sub.recv().await.expect("delivery");
            assert_eq!(d.payload.as_ref(), b"hi!");
            assert_eq!(d.topic, "greet/all");
        }
    }

    #[tokio::test]
    async fn test_reject_stops_pipeline() {
        let server = server();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        server
            .events()
            .on_process_message(|_, msg| async move {
                if msg.topic.starts_with("drop/") {
                    Err(HookError::Reject)
                } else {
                    Ok(msg)
                }
            })
            .on_message(move |_, msg| {
                c.fetch_add(1, Ordering::SeqCst);
                async move { Ok(msg) }
            });

        let mut sub = connect(&server, "sub").await;
        sub.subscribe("#", QoS::AtMostOnce).await.expect("subscribe");
        let publisher = connect(&server, "c1").await;

        let res = publisher.publish(Message::new("drop/me", "x")).await.expect("publish");
        assert_eq!(res, Published::Rejected);
        assert!(nothing(&mut sub).await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let res = publisher.publish(Message::new("keep/me", "x")).await.expect("publish");
        assert_eq!(res, Published::Delivered(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_message_hook_fault_falls_back_and_keeps_session() {
        let server = server();
        server
            .events()
            .on_process_message(|_, mut msg| async move {
                msg.payload = "processed".into();
                Ok(msg)
            })
            .on_message(|_, mut msg| async move {
                msg.payload = "broken".into();
                msg.allow_clients = vec!["nobody".into()];
                Err(HookError::fault("message hook failed"))
            });

        let mut sub = connect(&server, "sub").await;
        sub.subscribe("a/b", QoS::AtMostOnce).await.expect("subscribe");
        let publisher = connect(&server, "c1").await;

        for _ in 0..2 {
            let res = publisher.publish(Message::new("a/b", "original")).await.expect("publish");
            assert_eq!(res, Published::Delivered(1));
            let d = sub.recv().await.expect("delivery");
            //the message as it entered the failing stage
            assert_eq!(d.payload.as_ref(), b"processed");
        }
        assert!(!publisher.is_closed());
        assert_eq!(server.clients(), 2);
    }

    #[tokio::test]
    async fn test_allow_clients_restricts_delivery() {
        let server = server();
        server.events().on_message(|_, msg| async move { Ok(msg.allow_clients(["X"])) });

        let mut subs = Vec::new();
        for id in ["X", "Y", "Z"] {
            let sub = connect(&server, id).await;
            sub.subscribe("t", QoS::AtMostOnce).await.expect("subscribe");
            subs.push(sub);
        }

        let publisher = connect(&server, "c1").await;
        let res = publisher.publish(Message::new("t", "m")).await.expect("publish");
        assert_eq!(res, Published::Delivered(1));

        let d = subs[0].recv().await.expect("delivery for X");
        assert_eq!(d.payload.as_ref(), b"m");
        assert!(nothing(&mut subs[1]).await);
        assert!(nothing(&mut subs[2]).await);
    }

    #[tokio::test]
    async fn test_restricted_hello_world_scenario() {
        let server = server();
        server.events().on_message(|_, mut msg| async move {
            if msg.payload.as_ref() == b"hello" {
                msg.payload = Bytes::from_static(b"hello world");
            }
            if msg.topic == "a/b/restricted" {
                msg.allow_clients = vec!["allowed-client".into()];
            }
            Ok(msg)
        });

        let mut allowed = connect(&server, "allowed-client").await;
        allowed.subscribe("a/b/restricted", QoS::AtMostOnce).await.expect("subscribe");
        let mut other = connect(&server, "other-client").await;
        other.subscribe("a/b/restricted", QoS::AtMostOnce).await.expect("subscribe");

        let c1 = connect(&server, "c1").await;
        c1.publish(Message::new("a/b/restricted", "hello")).await.expect("publish");

        let d = allowed.recv().await.expect("delivery");
        assert_eq!(d.topic, "a/b/restricted");
        assert_eq!(d.payload.as_ref(), b"hello world");
        assert!(nothing(&mut other).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slow_hook_does_not_block_other_sessions() {
        let server = server();
        server.events().on_message(|cl, msg| async move {
            if cl.id() == "slow" {
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
            Ok(msg)
        });

        let mut sub = connect(&server, "sub").await;
        sub.subscribe("+/topic", QoS::AtMostOnce).await.expect("subscribe");

        let slow = connect(&server, "slow").await;
        let slow_publish = tokio::spawn(async move { slow.publish(Message::new("slow/topic", "s")).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut fast = Vec::new();
        for i in 0..8 {
            let conn = connect(&server, &format!("fast{i}")).await;
            fast.push(tokio::spawn(async move { conn.publish(Message::new(format!("fast{i}/topic"), "f")).await }));
        }
        for h in fast {
            let res = timeout(Duration::from_secs(1), h).await.expect("fast publish blocked");
            assert!(matches!(res, Ok(Ok(Published::Delivered(1)))));
        }
        for _ in 0..8 {
            let d = timeout(Duration::from_secs(1), sub.recv()).await.expect("delivery blocked");
            assert!(d.map(|d| d.topic.starts_with("fast")).unwrap_or_default());
        }
        assert!(!slow_publish.is_finished());
    }

    #[tokio::test]
    async fn test_session_order_is_kept() {
        let server = server();
        server.events().on_process_message(|_, msg| async move {
            if msg.payload.as_ref() == b"1" {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Ok(msg)
        });

        let mut sub = connect(&server, "sub").await;
        sub.subscribe("seq", QoS::AtMostOnce).await.expect("subscribe");
        let publisher = connect(&server, "c1").await;
        for n in ["1", "2", "3"] {
            publisher.publish_nowait(Message::new("seq", n)).await.expect("publish");
        }
        for n in ["1", "2", "3"] {
            let d = sub.recv().await.expect("delivery");
            assert_eq!(d.payload.as_ref(), n.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_refused_connection_fires_no_hooks() {
        let server = server();
        server.add_listener("locked", Arc::new(Disallow)).expect("listener");
        let calls = Arc::new(AtomicUsize::new(0));
        let (c1, c2) = (calls.clone(), calls.clone());
        server
            .events()
            .on_connect(move |_, _| {
                c1.fetch_add(1, Ordering::SeqCst);
                async {}
            })
            .on_disconnect(move |_, _| {
                c2.fetch_add(1, Ordering::SeqCst);
                async {}
            });

        let err = server.connect(ConnectInfo::new("c1", "locked"), b"").await.expect_err("refused");
        assert!(matches!(err.downcast_ref::<MqttError>(), Some(MqttError::NotAuthorized)));
        let err = server.connect(ConnectInfo::new("c1", "nowhere"), b"").await.expect_err("unknown listener");
        assert!(matches!(err.downcast_ref::<MqttError>(), Some(MqttError::ListenerNotFound(_))));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(server.clients(), 0);
    }

    #[tokio::test]
    async fn test_username_rewrite_before_hooks() {
        let server = server();
        server.add_listener("ops", Arc::new(Rename)).expect("listener");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tx2 = tx.clone();
        server
            .events()
            .on_connect(move |cl, info| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(("connect", cl.username().clone(), info.username));
                }
            })
            .on_message(move |cl, msg| {
                let tx = tx2.clone();
                async move {
                    let _ = tx.send(("message", cl.username().clone(), msg.payload.clone()));
                    Ok(msg)
                }
            });

        assert!(server.connect(ConnectInfo::new("c1", "ops").username("guest"), b"wrong").await.is_err());

        let conn = server.connect(ConnectInfo::new("c1", "ops").username("guest"), b"secret").await.expect("connect");
        assert_eq!(conn.client().username().as_ref(), b"operator");
        conn.publish(Message::new("a", "p")).await.expect("publish");

        let (kind, view_name, info_name) = rx.recv().await.expect("connect hook");
        assert_eq!(kind, "connect");
        assert_eq!(view_name.as_ref(), b"operator");
        assert_eq!(info_name.as_ref(), b"operator");
        let (kind, view_name, _) = rx.recv().await.expect("message hook");
        assert_eq!(kind, "message");
        assert_eq!(view_name.as_ref(), b"operator");
    }

    #[tokio::test]
    async fn test_lifecycle_hooks() {
        let server = server();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let (t1, t2, t3, t4, t5) = (tx.clone(), tx.clone(), tx.clone(), tx.clone(), tx);
        server
            .events()
            .on_connect(move |cl, _| {
                let tx = t1.clone();
                async move {
                    let _ = tx.send(format!("connect {}", cl.id()));
                }
            })
            .on_subscribe(move |tf, cl, qos| {
                let tx = t2.clone();
                async move {
                    let _ = tx.send(format!("subscribe {} {} {}", cl.id(), tf, qos.value()));
                }
            })
            .on_unsubscribe(move |tf, cl| {
                let tx = t3.clone();
                async move {
                    let _ = tx.send(format!("unsubscribe {} {}", cl.id(), tf));
                }
            })
            .on_error(move |cl, err| {
                let tx = t4.clone();
                async move {
                    let _ = tx.send(format!("error {} {}", cl.id(), err));
                }
            })
            .on_disconnect(move |cl, err| {
                let tx = t5.clone();
                async move {
                    let _ = tx.send(format!("disconnect {} {:?}", cl.id(), err.map(|e| e.to_string())));
                }
            });

        let conn = connect(&server, "c1").await;
        assert_eq!(conn.subscribe("a/#", QoS::AtLeastOnce).await.expect("subscribe"), SubscribeReply::Granted(QoS::AtLeastOnce));
        assert_eq!(conn.unsubscribe("a/#").await.expect("unsubscribe"), UnsubscribeReply::Removed);
        assert_eq!(conn.unsubscribe("a/#").await.expect("unsubscribe"), UnsubscribeReply::NoSubscriptionExisted);
        assert!(conn.subscribe("a/#/b", QoS::AtMostOnce).await.is_err());
        conn.error(MqttError::MalformedPacket("bad remaining length".into())).await.expect("error");
        conn.disconnect(None).await.expect("disconnect");
        assert!(conn.publish(Message::new("a", "x")).await.is_err());

        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        assert_eq!(
            events,
            vec![
                "connect c1".to_owned(),
                "subscribe c1 a/# 1".into(),
                "unsubscribe c1 a/#".into(),
                "error c1 malformed packet, invalid topic filter, a/#/b".into(),
                "error c1 malformed packet, bad remaining length".into(),
                "disconnect c1 None".into(),
            ]
        );
        assert_eq!(server.clients(), 0);
        assert_eq!(server.context().router.relations(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_acl() {
        let server = server();
        server.add_listener("locked", Arc::new(Disallow)).expect("listener");
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        server.events().on_subscribe(move |_, _, _| {
            c.fetch_add(1, Ordering::SeqCst);
            async {}
        });

        let conn = connect(&server, "c1").await;
        assert!(conn.subscribe("a", QoS::AtMostOnce).await.expect("subscribe").is_granted());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        //a session on a deny-all listener, admitted before the policy applies
        let scx = server.context().clone();
        let info = ConnectInfo::new("c2", "locked");
        let conn = Session::start(scx, info).await.expect("start");
        assert_eq!(conn.subscribe("a", QoS::AtMostOnce).await.expect("subscribe"), SubscribeReply::NotAuthorized);
        assert_eq!(conn.unsubscribe("a").await.expect("unsubscribe"), UnsubscribeReply::NotAuthorized);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(server.context().router.relations(), 1);
    }

    #[tokio::test]
    async fn test_abnormal_disconnect_and_cleanup() {
        let server = server();
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.events().on_disconnect(move |cl, err| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((cl.id().clone(), err));
            }
        });

        let conn = connect(&server, "c1").await;
        conn.subscribe("a", QoS::AtMostOnce).await.expect("subscribe");
        assert_eq!(server.context().router.relations(), 1);
        drop(conn);

        let (id, err) = rx.recv().await.expect("disconnect hook");
        assert_eq!(id, "c1");
        assert!(matches!(err, Some(MqttError::Transport(_))));
        assert_eq!(server.context().router.relations(), 0);
        assert_eq!(server.clients(), 0);

        let conn = connect(&server, "c2").await;
        conn.disconnect(Some(MqttError::KeepaliveTimeout)).await.expect("disconnect");
        let (id, err) = rx.recv().await.expect("disconnect hook");
        assert_eq!(id, "c2");
        assert!(matches!(err, Some(MqttError::KeepaliveTimeout)));
    }

    #[tokio::test]
    async fn test_session_takeover() {
        let server = server();
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.events().on_disconnect(move |cl, err| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((cl.id().clone(), err));
            }
        });

        let mut old = connect(&server, "c1").await;
        old.subscribe("a", QoS::AtMostOnce).await.expect("subscribe");

        let new = connect(&server, "c1").await;
        let (id, err) = rx.try_recv().expect("old session disconnected");
        assert_eq!(id, "c1");
        assert!(matches!(err, Some(MqttError::SessionTakenOver)));
        assert!(old.recv().await.is_none());
        assert!(old.publish(Message::new("a", "x")).await.is_err());

        //clean session, nothing inherited
        assert_eq!(server.context().router.relations(), 0);
        assert_eq!(server.clients(), 1);

        let mut watcher = connect(&server, "w").await;
        watcher.subscribe("a", QoS::AtMostOnce).await.expect("subscribe");
        new.publish(Message::new("a", "from new")).await.expect("publish");
        assert_eq!(watcher.recv().await.map(|d| d.payload.clone()), Some(Bytes::from_static(b"from new")));
    }

    #[tokio::test]
    async fn test_takeover_without_clean_session_keeps_subscriptions() {
        let server = server();
        let old = connect(&server, "c1").await;
        old.subscribe("a", QoS::AtLeastOnce).await.expect("subscribe");

        let mut new =
            server.connect(ConnectInfo::new("c1", "t1").clean_session(false), b"").await.expect("connect");
        assert_eq!(server.context().router.relations(), 1);

        let n = server.publish("a", "kept", false).await.expect("publish");
        assert_eq!(n, 1);
        assert_eq!(new.recv().await.map(|d| d.payload.clone()), Some(Bytes::from_static(b"kept")));
    }

    #[tokio::test]
    async fn test_server_publish_and_close() {
        let server = server();
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.events().on_disconnect(move |cl, err| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((cl.id().clone(), err));
            }
        });

        let mut sub = connect(&server, "sub").await;
        sub.subscribe("direct/publish", QoS::AtLeastOnce).await.expect("subscribe");
        assert_eq!(server.publish("direct/publish", "scheduled message", false).await.expect("publish"), 1);
        let d = sub.recv().await.expect("delivery");
        assert_eq!(d.payload.as_ref(), b"scheduled message");
        assert!(!d.retain);
        assert_eq!(d.qos, QoS::AtMostOnce);

        assert!(server.publish("direct/+", "x", false).await.is_err());

        server.close().await;
        let (id, err) = rx.try_recv().expect("disconnect hook");
        assert_eq!(id, "sub");
        assert!(matches!(err, Some(MqttError::ServerClosed)));
        assert!(sub.recv().await.is_none());
        assert!(server.connect(ConnectInfo::new("late", "t1"), b"").await.is_err());
        assert!(server.publish("direct/publish", "x", false).await.is_err());
    }

    #[tokio::test]
    async fn test_outbox_overflow_drops() {
        let settings = hookmq_conf::Settings::from_toml("[task]\noutbox_max = 2").expect("settings");
        let server = MqttServer::new(ServerContext::new().settings(settings).build().expect("context"));
        server.add_listener("t1", Arc::new(Allow)).expect("listener");

        let mut sub = connect(&server, "sub").await;
        sub.subscribe("t", QoS::AtMostOnce).await.expect("subscribe");
        let publisher = connect(&server, "c1").await;

        let mut delivered = 0;
        for _ in 0..5 {
            if let Published::Delivered(n) = publisher.publish(Message::new("t", "x")).await.expect("publish") {
                delivered += n;
            }
        }
        assert_eq!(delivered, 2);
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_some());
        assert!(nothing(&mut sub).await);
    }

    /// Reports that authentication started, then admits once `open` is notified.
    struct Gated {
        entered: mpsc::UnboundedSender<()>,
        open: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl AuthController for Gated {
        async fn authenticate(&self, _: &ConnectInfo, _: &[u8]) -> (Option<UserName>, Admitted) {
            let _ = self.entered.send(());
            self.open.notified().await;
            (None, true)
        }

        async fn acl(&self, _: &ClientView, _: &str, _: IsWrite) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_admitted_while_closing_is_disconnected() {
        let server = server();
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        let open = Arc::new(tokio::sync::Notify::new());
        server.add_listener("gated", Arc::new(Gated { entered: entered_tx, open: open.clone() })).expect("listener");
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.events().on_disconnect(move |cl, err| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((cl.id().clone(), err));
            }
        });

        let s = server.clone();
        let pending = tokio::spawn(async move { s.connect(ConnectInfo::new("late", "gated"), b"").await });
        entered_rx.recv().await.expect("authenticating");
        server.close().await;
        open.notify_one();

        let err = pending.await.expect("join").err().expect("refused");
        assert!(matches!(err.downcast_ref::<MqttError>(), Some(MqttError::ServerClosed)));
        let (id, err) = rx.recv().await.expect("disconnect hook");
        assert_eq!(id, "late");
        assert!(matches!(err, Some(MqttError::ServerClosed)));
        assert_eq!(server.clients(), 0);
    }
}
