#![deny(unsafe_code)]

//! # Overall Example
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hookmq::auth::Allow;
//! use hookmq::context::ServerContext;
//! use hookmq::server::MqttServer;
//! use hookmq::types::{ConnectInfo, Message};
//! use hookmq::{HookError, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let scx = ServerContext::new().build()?;
//!     let server = MqttServer::new(scx);
//!     server.add_listener("t1", Arc::new(Allow))?;
//!
//!     server
//!         .events()
//!         .on_connect(|cl, _| async move { log::info!("client connected {}", cl.id()) })
//!         .on_process_message(|_, msg| async move {
//!             if msg.topic.starts_with("internal/") {
//!                 return Err(HookError::Reject);
//!             }
//!             Ok(msg)
//!         });
//!
//!     let conn = server.connect(ConnectInfo::new("c1", "t1"), b"").await?;
//!     conn.publish(Message::new("a/b", "hello")).await?;
//!     Ok(())
//! }
//! ```

/// Authorization controllers
pub mod auth;
/// Shared server state
pub mod context;
/// The publish pipeline and lifecycle notifications
pub mod dispatcher;
pub mod error;
/// Hook registry
pub mod hook;
pub mod logger;
/// Subscription relations
pub mod router;
pub mod server;
/// Per-session workers
pub mod session;
/// Live session registry and fan-out
pub mod shared;
/// Topic filter parsing and matching
pub mod topic;
pub mod types;

pub use hookmq_conf as conf;
pub use hookmq_utils as utils;

pub use crate::error::{HookError, HookResult, MqttError};

pub type Error = anyhow::Error;
pub type Result<T, E = anyhow::Error> = anyhow::Result<T, E>;
