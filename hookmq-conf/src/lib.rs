#![deny(unsafe_code)]

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use config::{Config, File, FileFormat, Source};
use once_cell::sync::OnceCell;
use serde::Deserialize;

use hookmq_utils::deserialize_duration;

pub use self::listener::{AuthKind, Listener, Listeners};
pub use self::logging::Log;
pub use self::options::Options;

pub mod listener;
pub mod logging;
pub mod options;

pub type Result<T> = anyhow::Result<T>;

static SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub task: Task,
    #[serde(default)]
    pub hook: Hook,
    #[serde(default)]
    pub log: Log,
    #[serde(rename = "listener")]
    #[serde(default)]
    pub listeners: Listeners,
    #[serde(default)]
    pub plugins: Plugins,
    #[serde(default, skip)]
    pub opts: Options,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self(Arc::new(Inner::default()))
    }
}

impl Settings {
    /// Settings from an inline TOML document, on top of the built-in defaults only.
    pub fn from_toml(text: &str) -> Result<Self> {
        let inner: Inner =
            Config::builder().add_source(File::from_str(text, FileFormat::Toml)).build()?.try_deserialize()?;
        Ok(Self(Arc::new(inner)))
    }

    pub fn new(opts: Options) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/hookmq/hookmq").required(false))
            .add_source(File::with_name("hookmq").required(false))
            .add_source(config::Environment::with_prefix("hookmq").separator("__").try_parsing(true));

        if let Some(cfg) = opts.cfg_name.as_ref() {
            builder = builder.add_source(File::with_name(cfg).required(false));
        }

        let mut inner: Inner = builder.build()?.try_deserialize()?;

        //Command line configuration overriding file configuration
        if let Some(dir) = opts.plugins_dir.as_ref() {
            inner.plugins.dir.clone_from(dir);
        }

        inner.opts = opts;
        Ok(Self(Arc::new(inner)))
    }

    #[inline]
    pub fn instance() -> Result<&'static Self> {
        SETTINGS.get().ok_or_else(|| anyhow!("Settings not initialized"))
    }

    #[inline]
    pub fn init(opts: Options) -> Result<&'static Self> {
        SETTINGS.set(Settings::new(opts)?).map_err(|_| anyhow!("Settings init failed"))?;
        SETTINGS.get().ok_or_else(|| anyhow!("Settings init failed"))
    }

    #[inline]
    pub fn logs(&self) {
        log::debug!("Config info is {:?}", self.0);
        log::info!("session_queue_max is {}", self.task.session_queue_max);
        log::info!("outbox_max is {}", self.task.outbox_max);
        log::info!("hook.slow_warn is {:?}", self.hook.slow_warn);
        for (name, l) in self.listeners.enabled() {
            log::info!("listener {} auth is {:?}", name, l.auth);
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    //Inbound command queue capacity, per session.
    #[serde(default = "Task::session_queue_max_default")]
    pub session_queue_max: usize,

    //Outbound delivery queue capacity, per session. Deliveries beyond it are dropped.
    #[serde(default = "Task::outbox_max_default")]
    pub outbox_max: usize,
}

impl Default for Task {
    #[inline]
    fn default() -> Self {
        Self {
            session_queue_max: Self::session_queue_max_default(),
            outbox_max: Self::outbox_max_default(),
        }
    }
}

impl Task {
    fn session_queue_max_default() -> usize {
        1000
    }
    fn outbox_max_default() -> usize {
        10_000
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hook {
    //Hook calls running longer than this are logged. Nothing is cancelled.
    #[serde(default = "Hook::slow_warn_default", deserialize_with = "deserialize_duration")]
    pub slow_warn: Duration,
}

impl Default for Hook {
    #[inline]
    fn default() -> Self {
        Self { slow_warn: Self::slow_warn_default() }
    }
}

impl Hook {
    fn slow_warn_default() -> Duration {
        Duration::from_secs(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Plugins {
    #[serde(default = "Plugins::dir_default")]
    pub dir: String,
}

impl Default for Plugins {
    fn default() -> Self {
        Self { dir: Self::dir_default() }
    }
}

impl Plugins {
    fn dir_default() -> String {
        "./hookmq-plugins/".into()
    }

    pub fn load_config<'de, T: serde::Deserialize<'de>>(&self, name: &str) -> Result<T> {
        let (cfg, _) = self.load_config_with_required(name, true)?;
        Ok(cfg)
    }

    pub fn load_config_default<'de, T: serde::Deserialize<'de>>(&self, name: &str) -> Result<T> {
        let (cfg, def) = self.load_config_with_required(name, false)?;
        if def {
            log::warn!("The configuration for plugin '{name}' does not exist, default values will be used!");
        }
        Ok(cfg)
    }

    /// Plugin configuration from an inline TOML document.
    pub fn load_config_str<'de, T: serde::Deserialize<'de>>(text: &str) -> Result<T> {
        Ok(Config::builder().add_source(File::from_str(text, FileFormat::Toml)).build()?.try_deserialize()?)
    }

    fn load_config_with_required<'de, T: serde::Deserialize<'de>>(
        &self,
        name: &str,
        required: bool,
    ) -> Result<(T, bool)> {
        let dir = self.dir.trim_end_matches(['/', '\\']);
        let builder = Config::builder()
            .add_source(File::with_name(&format!("{dir}/{name}")).required(required))
            .add_source(
                config::Environment::with_prefix(&format!("hookmq_plugin_{}", name.replace('-', "_")))
                    .separator("__"),
            );

        let s = builder.build()?;
        let count = s.collect()?.len();
        Ok((s.try_deserialize::<T>()?, count == 0))
    }
}
