use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use anyhow::anyhow;
use serde::de::{self, Deserializer};
use serde::ser;
use serde::{Deserialize, Serialize};
use serde_json::{self, Value};

use hookmq::topic::Topic;
use hookmq::types::{ClientId, ClientView, ConnectInfo, Password, UserName};
use hookmq::{Error, Result};

type HashSet<V> = std::collections::HashSet<V, ahash::RandomState>;

pub type Superuser = bool;

pub const PH_C: &str = "%c";
pub const PH_U: &str = "%u";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PluginConfig {
    #[serde(
        default,
        serialize_with = "PluginConfig::serialize_rules",
        deserialize_with = "PluginConfig::deserialize_rules"
    )]
    rules: (Vec<Rule>, serde_json::Value),
}

impl PluginConfig {
    #[inline]
    pub fn rules(&self) -> &Vec<Rule> {
        let (rules, _) = &self.rules;
        rules
    }

    #[inline]
    fn serialize_rules<S>(rules: &(Vec<Rule>, serde_json::Value), s: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        let (_, rules) = rules;
        rules.serialize(s)
    }

    #[inline]
    pub fn deserialize_rules<'de, D>(deserializer: D) -> std::result::Result<(Vec<Rule>, serde_json::Value), D::Error>
    where
        D: Deserializer<'de>,
    {
        let json_rules = serde_json::Value::deserialize(deserializer)?;
        let mut rules = Vec::new();
        if let Some(rules_cfg) = json_rules.as_array() {
            for rule_cfg in rules_cfg {
                let r = Rule::try_from(rule_cfg).map_err(de::Error::custom)?;
                rules.push(r);
            }
        }
        Ok((rules, json_rules))
    }

    #[inline]
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// One `[access, user, control, topics]` quadruple.
#[derive(Debug, Clone)]
pub struct Rule {
    pub access: Access,
    pub users: Vec<User>,
    pub control: Control,
    pub topics: Topics,
}

impl Rule {
    #[inline]
    pub fn is_allow(&self) -> bool {
        matches!(self.access, Access::Allow)
    }

    ///Every selector of the rule must hit the connecting client.
    #[inline]
    pub fn hit_connect(&self, info: &ConnectInfo, password: &[u8]) -> bool {
        let allow = self.is_allow();
        self.users.iter().all(|user| user.hit_connect(info, password, allow))
    }

    #[inline]
    pub fn hit_client(&self, client: &ClientView) -> bool {
        self.users.iter().all(|user| user.hit_client(client))
    }

    ///The client was admitted by this rule as a superuser and skips topic checks.
    #[inline]
    pub fn is_superuser(&self, client: &ClientView) -> Superuser {
        self.is_allow()
            && matches!(self.control, Control::Connect | Control::All)
            && self.users.iter().any(|user| matches!(user, User::Username { superuser: true, .. }))
            && self.hit_client(client)
    }

    ///Username assigned to clients admitted by this rule.
    #[inline]
    pub fn alias(&self) -> Option<UserName> {
        self.users.iter().find_map(|user| match user {
            User::Username { alias, .. } => alias.clone(),
            _ => None,
        })
    }

    #[inline]
    pub fn controls(&self, write: bool) -> bool {
        match self.control {
            Control::All | Control::Pubsub => true,
            Control::Publish => write,
            Control::Subscribe => !write,
            Control::Connect => false,
        }
    }
}

impl std::convert::TryFrom<&serde_json::Value> for Rule {
    type Error = Error;
    #[inline]
    fn try_from(rule_cfg: &serde_json::Value) -> std::result::Result<Self, Self::Error> {
        let err_msg = format!("ACL Rule config error, rule config is {:?}", rule_cfg);
        if let Some(cfg_items) = rule_cfg.as_array() {
            let access_cfg = cfg_items.first().ok_or_else(|| anyhow!(err_msg.clone()))?;
            let user_cfg = cfg_items.get(1).ok_or_else(|| anyhow!(err_msg))?;
            let control_cfg = cfg_items.get(2);
            let topics_cfg = cfg_items.get(3);

            let access = Access::try_from(access_cfg)?;
            let users = users_try_from(user_cfg, access)?;
            let control = Control::try_from(control_cfg)?;
            let topics = Topics::try_from(topics_cfg)?;
            if topics_cfg.is_some() && matches!(control, Control::Connect) {
                log::warn!("ACL Rule config, the third column of a quadruple is Connect, but the fourth column is not empty! topics config is {:?}", topics_cfg);
            }
            Ok(Rule { access, users, control, topics })
        } else {
            Err(anyhow!(err_msg))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    Deny,
}

#[derive(Debug, Clone)]
pub enum User {
    Username { name: UserName, password: Option<Password>, superuser: Superuser, alias: Option<UserName> },
    Clientid(ClientId),
    Ipaddr(String),
    Protocol(u8), //MQTT Protocol Ver, 3=MQTT 3.1, 4=MQTT 3.11, 5=MQTT 5.0
    All,
}

impl User {
    #[inline]
    pub fn hit_connect(&self, info: &ConnectInfo, password: &[u8], allow: bool) -> bool {
        match self {
            User::Username { name, password: expected, .. } => {
                if info.username.is_empty() || *name != info.username {
                    false
                } else {
                    match (expected, allow) {
                        (Some(expected), true) => expected.as_ref() == password,
                        _ => true,
                    }
                }
            }
            User::Clientid(clientid) => info.client_id == *clientid,
            User::Ipaddr(ipaddr) => ip_of(&info.remote_addr) == *ipaddr,
            User::Protocol(protocol) => info.proto_ver == *protocol,
            User::All => true,
        }
    }

    ///`client` carries the username it was admitted under, an alias included, and its
    ///connect password, which must match a configured one.
    #[inline]
    pub fn hit_client(&self, client: &ClientView) -> bool {
        match self {
            User::Username { name, password, alias, .. } => {
                let username = client.username();
                !username.is_empty()
                    && (name == username || alias.as_ref() == Some(username))
                    && password.as_ref().is_none_or(|p| p == client.password())
            }
            User::Clientid(clientid) => client.id() == clientid,
            User::Ipaddr(ipaddr) => ip_of(client.remote_addr()) == *ipaddr,
            User::Protocol(protocol) => client.proto_ver() == *protocol,
            User::All => true,
        }
    }
}

fn ip_of(remote_addr: &str) -> String {
    if let Ok(addr) = SocketAddr::from_str(remote_addr) {
        addr.ip().to_string()
    } else if let Ok(ip) = IpAddr::from_str(remote_addr) {
        ip.to_string()
    } else {
        remote_addr.to_owned()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Control {
    ///ALL
    All,
    ///CONNECT
    Connect,
    ///PUBLISH
    Publish,
    ///SUBSCRIBE
    Subscribe,
    ///PUBLISH and SUBSCRIBE
    Pubsub,
}

#[derive(Debug, Clone, Default)]
pub struct Topics {
    pub all: bool,
    pub eqs: HashSet<String>,
    pub eq_placeholders: Vec<String>,
    pub filters: Vec<Topic>,
    pub placeholders: Vec<String>, //"sensor/%u/ctrl", "sensor/%c/ctrl"
}

impl Topics {
    /// `topic` is the requested topic name or subscription filter. A filter rule matches
    /// a requested filter only when it selects everything the requested one does.
    pub fn is_match(&self, client: &ClientView, topic: &Topic, topic_str: &str) -> bool {
        if self.all || self.eqs.contains(topic_str) {
            return true;
        }
        if self.filters.iter().any(|f| f.covers(topic)) {
            return true;
        }
        if self.eq_placeholders.iter().any(|eq| fill_placeholders(eq, client).as_deref() == Some(topic_str)) {
            return true;
        }
        self.placeholders
            .iter()
            .filter_map(|p| fill_placeholders(p, client))
            .filter_map(|p| Topic::from_str(&p).ok())
            .any(|f| f.covers(topic))
    }
}

///None when the template needs a username and the client has none.
fn fill_placeholders(template: &str, client: &ClientView) -> Option<String> {
    let mut filled = template.replace(PH_C, client.id());
    if filled.contains(PH_U) {
        let username = client.username_str().filter(|u| !u.is_empty())?;
        filled = filled.replace(PH_U, username);
    }
    Some(filled)
}

impl std::convert::TryFrom<&serde_json::Value> for Access {
    type Error = Error;
    #[inline]
    fn try_from(access_cfg: &serde_json::Value) -> std::result::Result<Self, Self::Error> {
        let err_msg = format!("ACL Rule config error, access config is {:?}", access_cfg);
        match access_cfg.as_str().ok_or_else(|| anyhow!(err_msg.clone()))?.to_lowercase().as_str() {
            "allow" => Ok(Access::Allow),
            "deny" => Ok(Access::Deny),
            _ => Err(anyhow!(err_msg)),
        }
    }
}

fn users_try_from(user_cfg: &Value, access: Access) -> Result<Vec<User>> {
    let err_msg = format!("ACL Rule config error, user config is {:?}", user_cfg);
    match user_cfg {
        Value::String(all) => {
            if all.to_lowercase() == "all" {
                Ok(vec![User::All])
            } else {
                Err(anyhow!(err_msg))
            }
        }
        Value::Object(map) => {
            let name = map.get("user").and_then(|v| v.as_str());
            let clientid = map.get("clientid").and_then(|v| v.as_str());
            let ipaddr = map.get("ipaddr").and_then(|v| v.as_str());
            let protocol = map.get("protocol").and_then(|v| v.as_u64());

            let mut users = Vec::new();
            if let Some(name) = name {
                let name = UserName::from(name.to_owned());
                match access {
                    Access::Allow => {
                        let password = match map.get("password") {
                            Some(Value::String(p)) => Some(Password::from(p.to_owned())),
                            None => None,
                            _ => return Err(anyhow!(err_msg)),
                        };
                        let alias = match map.get("alias") {
                            Some(Value::String(a)) => Some(UserName::from(a.to_owned())),
                            None => None,
                            _ => return Err(anyhow!(err_msg)),
                        };
                        let superuser = map.get("superuser").and_then(|v| v.as_bool()).unwrap_or_default();
                        users.push(User::Username { name, password, superuser, alias });
                    }
                    Access::Deny => {
                        users.push(User::Username { name, password: None, superuser: false, alias: None });
                    }
                }
            }

            if let Some(clientid) = clientid {
                users.push(User::Clientid(ClientId::from(clientid)));
            }

            if let Some(ipaddr) = ipaddr {
                users.push(User::Ipaddr(String::from(ipaddr)));
            }

            if let Some(protocol) = protocol {
                let protocol = u8::try_from(protocol).map_err(|_| anyhow!(err_msg.clone()))?;
                users.push(User::Protocol(protocol));
            }

            if users.is_empty() {
                Err(anyhow!(err_msg))
            } else {
                Ok(users)
            }
        }
        _ => Err(anyhow!(err_msg)),
    }
}

impl std::convert::TryFrom<Option<&serde_json::Value>> for Control {
    type Error = Error;
    #[inline]
    fn try_from(control_cfg: Option<&serde_json::Value>) -> std::result::Result<Self, Self::Error> {
        let err_msg = format!("ACL Rule config error, control config is {:?}", control_cfg);
        match control_cfg {
            None => Ok(Control::All),
            Some(Value::String(control)) => match control.to_lowercase().as_str() {
                "connect" => Ok(Control::Connect),
                "publish" => Ok(Control::Publish),
                "subscribe" => Ok(Control::Subscribe),
                "pubsub" => Ok(Control::Pubsub),
                "all" => Ok(Control::All),
                _ => Err(anyhow!(err_msg)),
            },
            _ => Err(anyhow!(err_msg)),
        }
    }
}

impl std::convert::TryFrom<Option<&serde_json::Value>> for Topics {
    type Error = Error;
    #[inline]
    fn try_from(topics_cfg: Option<&serde_json::Value>) -> std::result::Result<Self, Self::Error> {
        let err_msg = format!("ACL Rule config error, topics config is {:?}", topics_cfg);
        let mut topics = Topics::default();
        match topics_cfg {
            None => topics.all = true,
            Some(Value::Array(items)) => {
                for item in items.iter() {
                    match item {
                        Value::String(topic) => {
                            if topic.contains(PH_U) || topic.contains(PH_C) {
                                topics.placeholders.push(topic.clone());
                            } else {
                                topics.filters.push(Topic::from_str(topic.as_str())?);
                            }
                        }
                        Value::Object(eq_map) => match eq_map.get("eq") {
                            Some(Value::String(eq)) => {
                                if eq.contains(PH_U) || eq.contains(PH_C) {
                                    topics.eq_placeholders.push(eq.clone());
                                } else {
                                    topics.eqs.insert(eq.clone());
                                }
                            }
                            _ => return Err(anyhow!(err_msg)),
                        },
                        _ => return Err(anyhow!(err_msg)),
                    }
                }
            }
            _ => return Err(anyhow!(err_msg)),
        }
        Ok(topics)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_rule_parse() {
        let rule = Rule::try_from(&json!(["allow", {"user": "dashboard", "password": "123", "alias": "ops"}, "connect"]))
            .expect("rule");
        assert!(rule.is_allow());
        assert!(matches!(rule.control, Control::Connect));
        assert!(rule.topics.all);
        assert_eq!(rule.alias().as_deref(), Some(&b"ops"[..]));

        let rule = Rule::try_from(&json!(["deny", "all", "subscribe", ["$SYS/#", {"eq": "#"}]])).expect("rule");
        assert_eq!(rule.access, Access::Deny);
        assert_eq!(rule.topics.filters.len(), 1);
        assert!(rule.topics.eqs.contains("#"));
        assert!(!rule.controls(true));
        assert!(rule.controls(false));

        let rule =
            Rule::try_from(&json!(["allow", {"clientid": "c1", "ipaddr": "127.0.0.1"}, "pubsub", ["a/%c/#"]]))
                .expect("rule");
        assert_eq!(rule.users.len(), 2);
        assert_eq!(rule.topics.placeholders, vec!["a/%c/#".to_owned()]);
    }

    #[test]
    fn test_rule_parse_errors() {
        assert!(Rule::try_from(&json!("allow")).is_err());
        assert!(Rule::try_from(&json!(["maybe", "all"])).is_err());
        assert!(Rule::try_from(&json!(["allow", "somebody"])).is_err());
        assert!(Rule::try_from(&json!(["allow", {}])).is_err());
        assert!(Rule::try_from(&json!(["allow", "all", "read"])).is_err());
        assert!(Rule::try_from(&json!(["allow", "all", "publish", ["a/#/b"]])).is_err());
        assert!(Rule::try_from(&json!(["allow", "all", "publish", [{"neq": "a"}]])).is_err());
        assert!(Rule::try_from(&json!(["allow", {"user": "u", "password": 1}])).is_err());
    }

    #[test]
    fn test_user_hit() {
        let info = ConnectInfo::new("c1", "t1").username("dashboard").remote_addr("10.0.0.7:5100");
        let user = User::Username {
            name: UserName::from_static(b"dashboard"),
            password: Some(Password::from_static(b"123")),
            superuser: false,
            alias: None,
        };
        assert!(user.hit_connect(&info, b"123", true));
        assert!(!user.hit_connect(&info, b"456", true));
        assert!(user.hit_connect(&info, b"456", false));
        assert!(!user.hit_connect(&ConnectInfo::new("c1", "t1"), b"123", true));

        assert!(User::Ipaddr("10.0.0.7".into()).hit_connect(&info, b"", true));
        assert!(User::Clientid("c1".into()).hit_connect(&info, b"", true));
        assert!(User::Protocol(4).hit_connect(&info, b"", true));
        assert!(!User::Protocol(5).hit_connect(&info, b"", true));

        assert!(!user.hit_client(&ClientView::from(&info)));
        assert!(!user.hit_client(&ClientView::from(&info.clone().password("456"))));
        let cl = ClientView::from(&info.clone().password("123"));
        assert!(user.hit_client(&cl));
        assert!(User::Ipaddr("10.0.0.7".into()).hit_client(&cl));
        assert!(!User::Clientid("c2".into()).hit_client(&cl));
    }

    #[test]
    fn test_topics_match() {
        let topics = Topics::try_from(Some(&json!(["sensor/+/data", {"eq": "a/#"}, "home/%u/#", {"eq": "box/%c"}])))
            .expect("topics");
        let cl = ClientView::from(&ConnectInfo::new("c1", "t1").username("alice"));
        let anon = ClientView::from(&ConnectInfo::new("c2", "t1"));
        let is_match = |cl: &ClientView, t: &str| topics.is_match(cl, &Topic::from_str(t).expect("topic"), t);

        assert!(is_match(&cl, "sensor/1/data"));
        assert!(!is_match(&cl, "sensor/1/temp"));
        assert!(is_match(&cl, "a/#"));
        assert!(!is_match(&cl, "a/b"));
        assert!(is_match(&cl, "home/alice/kitchen"));
        assert!(!is_match(&cl, "home/bob/kitchen"));
        assert!(!is_match(&anon, "home/alice/kitchen"));
        assert!(is_match(&cl, "box/c1"));
        assert!(!is_match(&anon, "box/c1"));
        assert!(is_match(&anon, "box/c2"));
    }

    #[test]
    fn test_config_to_json() {
        let cfg: PluginConfig =
            serde_json::from_value(json!({"rules": [["allow", "all", "publish", ["a/b"]]]})).expect("config");
        assert_eq!(cfg.rules().len(), 1);
        assert_eq!(cfg.to_json().expect("json"), json!({"rules": [["allow", "all", "publish", ["a/b"]]]}));
    }
}
