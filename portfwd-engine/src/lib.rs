//! # portfwd-engine
//!
//! Rule-driven local port forwarding over TCP and UDP.
//!
//! Each [`ForwardRule`] maps a local port to a remote `host:port`. Starting a
//! rule binds the local port immediately and hands it to a worker:
//!
//! - **TCP**: every accepted connection is dialed through to the target and
//!   relayed in both directions until either side closes.
//! - **UDP**: every datagram is sent on to the target, one way. Replies are
//!   not routed back to the sender.
//!
//! Stopping a rule closes its socket and every connection it owns before
//! [`Engine::stop_rule`] returns.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use portfwd_engine::{Engine, EngineConfig, ForwardRule};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::new(EngineConfig::default());
//! engine
//!     .start_rule(ForwardRule::tcp("web", 8080, "192.168.1.10", 80))
//!     .await?;
//!
//! // ... later
//! engine.stop_rule("web").await?;
//! # Ok(())
//! # }
//! ```
//!
//! Rules are persisted through a [`RuleStore`]; [`JsonRuleStore`] keeps them
//! in a single JSON file.

pub mod config;
pub mod engine;
pub mod errors;
pub mod graceful;
pub mod relay;
pub mod rule;
pub mod store;
pub mod target;
mod tcp;
mod udp;
pub mod worker;

pub use config::EngineConfig;
pub use engine::{Engine, RuleStatus};
pub use errors::{
    ConfigError, DialError, DrainTimeout, InvalidRule, RelayError, StartRuleError, StopRuleError,
    StoreError,
};
pub use graceful::Graceful;
pub use relay::{Direction, DirectionEnd, RelayReport, relay};
pub use rule::{ForwardRule, Protocol};
pub use store::{JsonRuleStore, MemoryRuleStore, RuleStore};
pub use worker::{ConnectionInfo, ConnectionRegistry, WorkerState};
