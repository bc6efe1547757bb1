use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::de::{Deserialize, Deserializer};

type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

/// Listener sections, `[listener.<name>]`.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(transparent)]
pub struct Listeners {
    inner: HashMap<String, ListenerInner>,
}

impl Listeners {
    /// Enabled listeners, keyed and ordered by name.
    #[inline]
    pub fn enabled(&self) -> BTreeMap<String, Listener> {
        self.inner
            .iter()
            .filter(|(_, inner)| inner.enable)
            .map(|(name, inner)| {
                let mut inner = inner.clone();
                inner.name.clone_from(name);
                (name.clone(), Listener::new(inner))
            })
            .collect()
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<Listener> {
        self.inner.get(name).filter(|inner| inner.enable).map(|inner| {
            let mut inner = inner.clone();
            inner.name = name.into();
            Listener::new(inner)
        })
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Listener {
    inner: Arc<ListenerInner>,
}

impl Listener {
    #[inline]
    fn new(inner: ListenerInner) -> Self {
        Self { inner: Arc::new(inner) }
    }
}

impl Deref for Listener {
    type Target = ListenerInner;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ListenerInner {
    #[serde(default)]
    pub name: String,
    #[serde(default = "ListenerInner::enable_default")]
    pub enable: bool,
    #[serde(default)]
    pub auth: AuthKind,
}

impl Default for ListenerInner {
    #[inline]
    fn default() -> Self {
        Self { name: Default::default(), enable: Self::enable_default(), auth: AuthKind::default() }
    }
}

impl ListenerInner {
    fn enable_default() -> bool {
        true
    }
}

/// Which authorization controller guards a listener.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum AuthKind {
    #[default]
    Allow,
    Disallow,
    /// Name of a controller supplied by the embedding code.
    Custom(String),
}

impl fmt::Debug for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthKind::Allow => write!(f, "allow"),
            AuthKind::Disallow => write!(f, "disallow"),
            AuthKind::Custom(name) => write!(f, "custom({name})"),
        }
    }
}

impl From<&str> for AuthKind {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "allow" => AuthKind::Allow,
            "disallow" | "deny" => AuthKind::Disallow,
            _ => AuthKind::Custom(s.into()),
        }
    }
}

impl<'de> Deserialize<'de> for AuthKind {
    #[inline]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(AuthKind::from(String::deserialize(deserializer)?.as_str()))
    }
}
