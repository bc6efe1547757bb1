//! The hook pipeline
//!
//! A client publish runs through four stages, in order:
//!
//! 1. the listener's ACL write check. A refusal drops the message silently.
//! 2. the process-message hook.
//! 3. the message hook.
//! 4. delivery: topic matching, narrowed by `Message::allow_clients`.
//!
//! `HookError::Reject` from stage 2 or 3 abandons the message. Any other hook error is
//! reported through the error hook and the stage is skipped, i.e. the message continues
//! exactly as it entered that stage. Server publishes start at stage 4.
//!
//! All calls run inline on the caller's task: a hook blocks its own session and
//! nobody else's.

use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Instant;

use crate::auth::AuthController;
use crate::context::ServerContext;
use crate::hook::{MessageHookFn, Type};
use crate::types::*;
use crate::{HookError, MqttError, Result};

#[derive(Clone)]
pub struct Dispatcher {
    scx: ServerContext,
}

impl Dispatcher {
    #[inline]
    pub fn new(scx: ServerContext) -> Self {
        Self { scx }
    }

    /// A publish from a connected client.
    pub async fn publish(&self, client: &ClientView, mut msg: Message) -> Published {
        if !self.acl(client, &msg.topic, true).await {
            log::debug!("{} publish refused by acl, topic: {}", client.id(), msg.topic);
            return Published::Refused;
        }

        msg.origin = Origin::Client(client.id().clone());

        let msg = match self.message_hook(Type::ProcessMessage, self.scx.events.process_message(), client, msg).await
        {
            Some(msg) => msg,
            None => return Published::Rejected,
        };

        let msg = match self.message_hook(Type::Message, self.scx.events.message(), client, msg).await {
            Some(msg) => msg,
            None => return Published::Rejected,
        };

        Published::Delivered(self.forwards(&msg).await)
    }

    /// A publish made by the server itself. No ACL, no message hooks.
    #[inline]
    pub async fn publish_direct(&self, mut msg: Message) -> usize {
        msg.origin = Origin::System;
        self.forwards(&msg).await
    }

    pub async fn subscribe(&self, client: &ClientView, topic_filter: TopicFilter, qos: QoS) -> Result<SubscribeReply> {
        if !self.acl(client, &topic_filter, false).await {
            log::debug!("{} subscribe refused by acl, topic_filter: {}", client.id(), topic_filter);
            return Ok(SubscribeReply::NotAuthorized);
        }

        if let Err(e) = self.scx.router.add(&topic_filter, client.id().clone(), qos).await {
            let err = MqttError::MalformedPacket(e.to_string());
            self.error(client, err.clone()).await;
            return Err(err.into());
        }

        if let Some(hook) = self.scx.events.subscribe() {
            let now = Instant::now();
            hook(topic_filter, client.clone(), qos).await;
            self.slow_check(Type::Subscribe, client, now);
        }
        Ok(SubscribeReply::Granted(qos))
    }

    pub async fn unsubscribe(&self, client: &ClientView, topic_filter: TopicFilter) -> UnsubscribeReply {
        if !self.acl(client, &topic_filter, false).await {
            log::debug!("{} unsubscribe refused by acl, topic_filter: {}", client.id(), topic_filter);
            return UnsubscribeReply::NotAuthorized;
        }

        if !self.scx.router.remove(&topic_filter, client.id()).await {
            return UnsubscribeReply::NoSubscriptionExisted;
        }

        if let Some(hook) = self.scx.events.unsubscribe() {
            let now = Instant::now();
            hook(topic_filter, client.clone()).await;
            self.slow_check(Type::Unsubscribe, client, now);
        }
        UnsubscribeReply::Removed
    }

    pub async fn connected(&self, client: &ClientView, connect_info: ConnectInfo) {
        if let Some(hook) = self.scx.events.connect() {
            let now = Instant::now();
            hook(client.clone(), connect_info).await;
            self.slow_check(Type::Connect, client, now);
        }
    }

    pub async fn disconnected(&self, client: &ClientView, reason: Option<MqttError>) {
        if let Some(hook) = self.scx.events.disconnect() {
            let now = Instant::now();
            hook(client.clone(), reason).await;
            self.slow_check(Type::Disconnect, client, now);
        }
    }

    pub async fn error(&self, client: &ClientView, err: MqttError) {
        if let Some(hook) = self.scx.events.error() {
            let now = Instant::now();
            hook(client.clone(), err).await;
            self.slow_check(Type::Error, client, now);
        }
    }

    #[inline]
    fn auth(&self, client: &ClientView) -> Option<Arc<dyn AuthController>> {
        self.scx.listener_auth(client.listener())
    }

    #[inline]
    async fn acl(&self, client: &ClientView, topic: &str, write: IsWrite) -> bool {
        match self.auth(client) {
            Some(auth) => auth.acl(client, topic, write).await,
            None => {
                log::warn!("{} listener {} has no auth controller", client.id(), client.listener());
                false
            }
        }
    }

    async fn message_hook(
        &self,
        typ: Type,
        hook: Option<Arc<MessageHookFn>>,
        client: &ClientView,
        msg: Message,
    ) -> Option<Message> {
        let hook = match hook {
            Some(hook) => hook,
            None => return Some(msg),
        };

        let now = Instant::now();
        let res = hook(client.clone(), msg.clone()).await;
        self.slow_check(typ, client, now);

        match res {
            Ok(msg) => Some(msg),
            Err(HookError::Reject) => {
                log::debug!("{} {} hook rejected the message, topic: {}", client.id(), typ, msg.topic);
                None
            }
            Err(HookError::Fault(e)) => {
                log::warn!("{} {} hook fault, the message is kept as is, {:?}", client.id(), typ, e);
                self.error(client, MqttError::Hook(typ, e.to_string())).await;
                Some(msg)
            }
        }
    }

    async fn forwards(&self, msg: &Message) -> usize {
        let mut targets: HashMap<ClientId, (TopicFilter, QoS)> = HashMap::default();
        for rel in self.scx.router.matches(&msg.topic).await {
            if !msg.allows(&rel.client_id) {
                continue;
            }
            match targets.entry(rel.client_id) {
                Entry::Occupied(mut e) => {
                    if rel.qos > e.get().1 {
                        e.insert((rel.topic_filter, rel.qos));
                    }
                }
                Entry::Vacant(e) => {
                    e.insert((rel.topic_filter, rel.qos));
                }
            }
        }

        if targets.is_empty() {
            log::debug!("no subscribers, topic: {}, origin: {:?}", msg.topic, msg.origin);
            return 0;
        }

        self.scx.shared.forwards(targets.into_iter().map(|(id, (tf, qos))| (id, tf, qos)).collect(), msg)
    }

    #[inline]
    fn slow_check(&self, typ: Type, client: &ClientView, start: Instant) {
        let cost = start.elapsed();
        if cost > self.scx.settings.hook.slow_warn {
            log::warn!("{} {} hook is slow, cost: {:?}", client.id(), typ, cost);
        }
    }
}
