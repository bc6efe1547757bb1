use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use dashmap::mapref::entry::Entry;

use hookmq_conf::{AuthKind, Settings};

use crate::auth::{Allow, AuthController, Disallow};
use crate::dispatcher::Dispatcher;
use crate::hook::Events;
use crate::router::{DefaultRouter, Router};
use crate::shared::DefaultShared;
use crate::types::*;
use crate::{MqttError, Result};

/// Everything the sessions of one server share.
#[derive(Clone)]
pub struct ServerContext {
    inner: Arc<ServerContextInner>,
}

pub struct ServerContextInner {
    pub settings: Settings,
    pub events: Events,
    pub router: Box<dyn Router>,
    pub shared: DefaultShared,
    listeners: DashMap<ListenerId, Arc<dyn AuthController>>,
    closed: AtomicBool,
}

impl Deref for ServerContext {
    type Target = ServerContextInner;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl ServerContext {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> ServerContextBuilder {
        ServerContextBuilder::default()
    }

    /// Bind `auth` to the listener `name`. A listener keeps its controller for its whole lifetime.
    pub fn add_listener<N: Into<ListenerId>>(&self, name: N, auth: Arc<dyn AuthController>) -> Result<()> {
        let name = name.into();
        match self.listeners.entry(name) {
            Entry::Occupied(e) => Err(MqttError::ListenerExists(e.key().to_string()).into()),
            Entry::Vacant(e) => {
                log::info!("listener {} bound, auth: {}", e.key(), auth.name());
                e.insert(auth);
                Ok(())
            }
        }
    }

    #[inline]
    pub fn listener_auth(&self, name: &str) -> Option<Arc<dyn AuthController>> {
        self.listeners.get(name).map(|a| a.value().clone())
    }

    #[inline]
    pub fn listeners(&self) -> Vec<ListenerId> {
        let mut names = self.listeners.iter().map(|e| e.key().clone()).collect::<Vec<_>>();
        names.sort_by(|a, b| (**a).cmp(&**b));
        names
    }

    #[inline]
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.clone())
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn set_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerContext")
            .field("listeners", &self.listeners())
            .field("events", &self.events)
            .field("clients", &self.shared.clients())
            .field("relations", &self.router.relations())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[derive(Default)]
pub struct ServerContextBuilder {
    settings: Option<Settings>,
    router: Option<Box<dyn Router>>,
    providers: HashMap<String, Arc<dyn AuthController>>,
}

impl ServerContextBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn router(mut self, router: Box<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    /// Controller used by `[listener.<name>]` sections whose `auth` is `provider`.
    pub fn auth_provider<N: Into<String>>(mut self, provider: N, auth: Arc<dyn AuthController>) -> Self {
        self.providers.insert(provider.into(), auth);
        self
    }

    pub fn build(self) -> Result<ServerContext> {
        let settings = self.settings.or_else(|| Settings::instance().ok().cloned()).unwrap_or_default();

        let scx = ServerContext {
            inner: Arc::new(ServerContextInner {
                settings,
                events: Events::default(),
                router: self.router.unwrap_or_else(|| Box::new(DefaultRouter::new())),
                shared: DefaultShared::default(),
                listeners: DashMap::default(),
                closed: AtomicBool::new(false),
            }),
        };

        for (name, listener) in scx.settings.listeners.enabled() {
            let auth: Arc<dyn AuthController> = match &listener.auth {
                AuthKind::Allow => Arc::new(Allow),
                AuthKind::Disallow => Arc::new(Disallow),
                AuthKind::Custom(provider) => self
                    .providers
                    .get(provider)
                    .cloned()
                    .ok_or_else(|| anyhow!("listener {}, auth provider not found, {}", name, provider))?,
            };
            scx.add_listener(name, auth)?;
        }

        Ok(scx)
    }
}
