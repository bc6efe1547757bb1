use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::session::Command;
use crate::types::*;

/// Registry entry of one live session.
pub(crate) struct Entry {
    pub(crate) session_id: SessionId,
    pub(crate) client: ClientView,
    pub(crate) outbox: mpsc::Sender<Delivery>,
    pub(crate) tx: mpsc::WeakSender<Command>,
}

/// Live sessions by client id, and the fan-out onto their outbound queues.
///
/// The registry only holds weak command senders, so a session whose handles were all
/// dropped still ends on its own.
#[derive(Default)]
pub struct DefaultShared {
    peers: DashMap<ClientId, Entry>,
}

impl DefaultShared {
    #[inline]
    pub(crate) fn insert(&self, entry: Entry) -> Option<Entry> {
        self.peers.insert(entry.client.id().clone(), entry)
    }

    ///Remove the entry only while it still belongs to `session_id`
    #[inline]
    pub(crate) fn remove(&self, id: &str, session_id: SessionId) -> bool {
        self.peers.remove_if(id, |_, e| e.session_id == session_id).is_some()
    }

    #[inline]
    pub(crate) fn command_senders(&self) -> Vec<(ClientId, mpsc::WeakSender<Command>)> {
        self.peers.iter().map(|e| (e.key().clone(), e.value().tx.clone())).collect()
    }

    #[inline]
    pub fn is_online(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    #[inline]
    pub fn client(&self, id: &str) -> Option<ClientView> {
        self.peers.get(id).map(|e| e.client.clone())
    }

    #[inline]
    pub fn clients(&self) -> usize {
        self.peers.len()
    }

    /// Queue `msg` for each target without waiting. Returns how many deliveries were queued.
    ///
    /// A full outbound queue drops that one delivery.
    pub fn forwards(&self, targets: Vec<(ClientId, TopicFilter, QoS)>, msg: &Message) -> usize {
        let mut queued = 0;
        for (id, topic_filter, qos) in targets {
            let outbox = if let Some(entry) = self.peers.get(&id) {
                entry.outbox.clone()
            } else {
                log::debug!("{} is not online, topic: {}", id, msg.topic);
                continue;
            };
            let delivery = Delivery { topic_filter, qos: qos.less_value(msg.qos), message: msg.clone() };
            match outbox.try_send(delivery) {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(d)) => {
                    log::warn!("{} outbound queue is full, message dropped, topic: {}", id, d.message.topic);
                }
                Err(TrySendError::Closed(d)) => {
                    log::debug!("{} outbound queue is closed, topic: {}", id, d.message.topic);
                }
            }
        }
        queued
    }
}
