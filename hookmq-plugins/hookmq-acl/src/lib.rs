#![deny(unsafe_code)]

//! Rule based [`AuthController`] for hookmq listeners.
//!
//! Rules are `[access, user, control, topics]` quadruples, checked top down, the first hit
//! decides. Anything no rule hits is refused.
//!
//! ```toml
//! rules = [
//!     ["allow", { user = "dashboard", password = "123456", superuser = true }, "connect"],
//!     ["allow", { user = "device", password = "abc", alias = "sensors" }, "connect"],
//!     ["allow", "all", "connect"],
//!     ["deny", "all", "subscribe", ["$SYS/#", { eq = "#" }]],
//!     ["allow", { user = "sensors" }, "publish", ["sensor/%c/#"]],
//!     ["allow", "all", "subscribe", ["sensor/#"]],
//!     ["deny", "all"],
//! ]
//! ```

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use hookmq::auth::AuthController;
use hookmq::conf::Plugins;
use hookmq::topic::Topic;
use hookmq::types::{Admitted, ClientView, ConnectInfo, IsWrite, UserName};
use hookmq::Result;

pub use config::{Access, Control, PluginConfig, Rule, Topics, User, PH_C, PH_U};

mod config;

pub const NAME: &str = "hookmq-acl";

pub struct AclAuth {
    name: String,
    cfg: Arc<RwLock<PluginConfig>>,
}

impl AclAuth {
    #[inline]
    pub fn new(cfg: PluginConfig) -> Self {
        Self { name: NAME.into(), cfg: Arc::new(RwLock::new(cfg)) }
    }

    ///Rules from `<plugins.dir>/hookmq-acl.toml`.
    #[inline]
    pub fn from_plugins(plugins: &Plugins) -> Result<Self> {
        let cfg = plugins.load_config::<PluginConfig>(NAME)?;
        log::debug!("{} AclAuth cfg: {:?}", NAME, cfg);
        Ok(Self::new(cfg))
    }

    #[inline]
    pub async fn get_config(&self) -> Result<serde_json::Value> {
        self.cfg.read().await.to_json()
    }

    ///Swap in a freshly read rule set. Sessions already admitted keep their username.
    #[inline]
    pub async fn load_config(&self, plugins: &Plugins) -> Result<()> {
        let new_cfg = plugins.load_config::<PluginConfig>(NAME)?;
        *self.cfg.write().await = new_cfg;
        log::debug!("load_config ok, {:?}", self.cfg);
        Ok(())
    }
}

#[async_trait]
impl AuthController for AclAuth {
    async fn authenticate(&self, connect_info: &ConnectInfo, password: &[u8]) -> (Option<UserName>, Admitted) {
        let cfg = self.cfg.read().await;
        for (idx, rule) in cfg.rules().iter().enumerate() {
            if !matches!(rule.control, Control::Connect | Control::All) {
                continue;
            }
            if rule.hit_connect(connect_info, password) {
                log::debug!("{:?} authenticate, rule#{} hit, access: {:?}", connect_info.client_id, idx, rule.access);
                return if rule.is_allow() { (rule.alias(), true) } else { (None, false) };
            }
        }
        log::debug!("{:?} authenticate, no rule hit", connect_info.client_id);
        (None, false)
    }

    async fn acl(&self, client: &ClientView, topic: &str, write: IsWrite) -> bool {
        let t = match Topic::from_str(topic) {
            Ok(t) => t,
            Err(e) => {
                log::debug!("{} acl, {}", client, e);
                return false;
            }
        };

        let cfg = self.cfg.read().await;
        if cfg.rules().iter().any(|rule| rule.is_superuser(client)) {
            return true;
        }

        for (idx, rule) in cfg.rules().iter().enumerate() {
            if !rule.controls(write) || !rule.hit_client(client) {
                continue;
            }
            if rule.topics.is_match(client, &t, topic) {
                log::debug!("{} acl, topic: {}, write: {}, rule#{} hit, access: {:?}", client, topic, write, idx, rule.access);
                return rule.is_allow();
            }
        }
        false
    }

    #[inline]
    fn name(&self) -> &str {
        &self.name
    }
}
