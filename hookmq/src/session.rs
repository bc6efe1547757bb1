use std::fmt;
use std::ops::Deref;

use tokio::sync::{mpsc, oneshot};

use crate::context::ServerContext;
use crate::dispatcher::Dispatcher;
use crate::shared::Entry;
use crate::types::*;
use crate::{MqttError, Result};

pub(crate) enum Command {
    Publish(Message, Option<oneshot::Sender<Published>>),
    Subscribe(TopicFilter, QoS, oneshot::Sender<Result<SubscribeReply>>),
    Unsubscribe(TopicFilter, oneshot::Sender<UnsubscribeReply>),
    Error(MqttError),
    Disconnect(Option<MqttError>, Option<oneshot::Sender<()>>),
}

/// Handle to the worker of one admitted session.
///
/// Every command is processed by the session's own task, one at a time and in the order
/// it was sent, so a slow hook holds up this session only. Handles are cheap to clone;
/// when the last one is dropped the session ends as if the transport had closed.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    client: ClientView,
    tx: mpsc::Sender<Command>,
}

impl Session {
    /// Register and spawn the worker of an admitted connection.
    ///
    /// A live session with the same client id is closed first, its disconnect hook has
    /// run when this returns. A session registered after the server started closing is
    /// ended with `MqttError::ServerClosed` right away.
    pub(crate) async fn start(scx: ServerContext, connect_info: ConnectInfo) -> Result<Connection> {
        let client = ClientView::from(&connect_info);
        let id = SessionId::new_v4();
        let (tx, rx) = mpsc::channel(scx.settings.task.session_queue_max.max(1));
        let (outbox, deliveries) = mpsc::channel(scx.settings.task.outbox_max.max(1));

        let entry = Entry { session_id: id, client: client.clone(), outbox, tx: tx.downgrade() };
        if let Some(old) = scx.shared.insert(entry) {
            log::info!("{} session taken over, old: {}, new: {}", client.id(), old.session_id, id);
            if let Some(old_tx) = old.tx.upgrade() {
                let (done_tx, done_rx) = oneshot::channel();
                if old_tx.send(Command::Disconnect(Some(MqttError::SessionTakenOver), Some(done_tx))).await.is_ok() {
                    let _ = done_rx.await;
                }
            }
            if connect_info.clean_session {
                let n = scx.router.remove_all(client.id()).await;
                log::debug!("{} clean session, {} inherited subscriptions removed", client.id(), n);
            }
        }

        log::debug!("{} session admitted, {:?}", client.id(), connect_info);

        let closed = scx.clone();
        let worker = SessionWorker { dispatcher: scx.dispatcher(), scx, id, client: client.clone(), rx };
        tokio::spawn(worker.run(connect_info));

        let session = Session { id, client, tx };
        //close() may have listed the live sessions before this one was inserted
        if closed.is_closed() {
            log::info!("{} admitted while the server was closing, disconnected", session.client.id());
            let _ = session.disconnect(Some(MqttError::ServerClosed)).await;
            return Err(MqttError::ServerClosed.into());
        }

        Ok(Connection { session, deliveries })
    }

    #[inline]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[inline]
    pub fn client(&self) -> &ClientView {
        &self.client
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Run the publish pipeline and wait for its outcome.
    pub async fn publish(&self, msg: Message) -> Result<Published> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Publish(msg, Some(tx))).await?;
        Ok(rx.await.map_err(|_| MqttError::SessionClosed)?)
    }

    /// Queue a publish without waiting for the pipeline.
    pub async fn publish_nowait(&self, msg: Message) -> Result<()> {
        self.send(Command::Publish(msg, None)).await
    }

    pub async fn subscribe<T: Into<TopicFilter>>(&self, topic_filter: T, qos: QoS) -> Result<SubscribeReply> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Subscribe(topic_filter.into(), qos, tx)).await?;
        rx.await.map_err(|_| MqttError::SessionClosed)?
    }

    pub async fn unsubscribe<T: Into<TopicFilter>>(&self, topic_filter: T) -> Result<UnsubscribeReply> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Unsubscribe(topic_filter.into(), tx)).await?;
        Ok(rx.await.map_err(|_| MqttError::SessionClosed)?)
    }

    /// Report a broker error that does not end the session.
    pub async fn error(&self, err: MqttError) -> Result<()> {
        self.send(Command::Error(err)).await
    }

    /// End the session. `None` is a graceful disconnect. Returns once the disconnect hook has run.
    pub async fn disconnect(&self, reason: Option<MqttError>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Disconnect(reason, Some(tx))).await?;
        rx.await.map_err(|_| MqttError::SessionClosed)?;
        Ok(())
    }

    #[inline]
    async fn send(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).await.map_err(|_| MqttError::SessionClosed)?;
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.id).field("client", &self.client).finish()
    }
}

/// An admitted session together with its outbound deliveries.
#[derive(Debug)]
pub struct Connection {
    pub session: Session,
    pub deliveries: mpsc::Receiver<Delivery>,
}

impl Connection {
    /// Next delivery, `None` once the session has ended and the queue is drained.
    #[inline]
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.deliveries.recv().await
    }

    #[inline]
    pub fn split(self) -> (Session, mpsc::Receiver<Delivery>) {
        (self.session, self.deliveries)
    }
}

impl Deref for Connection {
    type Target = Session;
    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

struct SessionWorker {
    scx: ServerContext,
    dispatcher: Dispatcher,
    id: SessionId,
    client: ClientView,
    rx: mpsc::Receiver<Command>,
}

impl SessionWorker {
    async fn run(mut self, connect_info: ConnectInfo) {
        self.dispatcher.connected(&self.client, connect_info).await;

        let (reason, done) = loop {
            match self.rx.recv().await {
                Some(Command::Publish(msg, reply)) => {
                    let res = self.dispatcher.publish(&self.client, msg).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(res);
                    }
                }
                Some(Command::Subscribe(topic_filter, qos, reply)) => {
                    let res = self.dispatcher.subscribe(&self.client, topic_filter, qos).await;
                    let _ = reply.send(res);
                }
                Some(Command::Unsubscribe(topic_filter, reply)) => {
                    let res = self.dispatcher.unsubscribe(&self.client, topic_filter).await;
                    let _ = reply.send(res);
                }
                Some(Command::Error(err)) => {
                    log::debug!("{} {}", self.client.id(), err);
                    self.dispatcher.error(&self.client, err).await;
                }
                Some(Command::Disconnect(reason, done)) => break (reason, done),
                None => break (Some(MqttError::Transport("connection closed".into())), None),
            }
        };

        self.rx.close();

        match &reason {
            None => log::debug!("{} disconnected", self.client.id()),
            Some(r) => log::info!("{} disconnected, reason: {}", self.client.id(), r),
        }

        //A session that was taken over no longer owns the subscriptions of its client id
        if self.scx.shared.remove(self.client.id(), self.id) {
            let n = self.scx.router.remove_all(self.client.id()).await;
            log::debug!("{} {} subscriptions removed", self.client.id(), n);
        }

        self.dispatcher.disconnected(&self.client, reason).await;

        if let Some(done) = done {
            let _ = done.send(());
        }
    }
}
