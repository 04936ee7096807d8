//! Error types for the forwarding engine
//!
//! Only start/stop misuse and bind conflicts ever reach a caller of the
//! [`Engine`](crate::Engine). Dial and relay failures stay inside the
//! connection that produced them and are only logged.

use std::net::SocketAddr;
use std::time::Duration;

/// Errors returned by [`Engine::start_rule`](crate::Engine::start_rule)
#[derive(Debug, thiserror::Error)]
pub enum StartRuleError {
    #[error("rule '{name}' is already running")]
    AlreadyRunning { name: String },

    #[error("rule '{name}' is invalid: {source}")]
    InvalidRule {
        name: String,
        #[source]
        source: InvalidRule,
    },

    #[error("rule '{name}' failed to bind {protocol} {addr}: {source}")]
    Bind {
        name: String,
        protocol: crate::Protocol,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Errors returned by [`Engine::stop_rule`](crate::Engine::stop_rule)
#[derive(Debug, thiserror::Error)]
pub enum StopRuleError {
    #[error("no running rule named '{name}'")]
    NoSuchRule { name: String },
}

/// Reasons a [`ForwardRule`](crate::ForwardRule) is rejected before binding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidRule {
    #[error("rule name is empty")]
    EmptyName,

    #[error("local port must be between 1 and 65535")]
    ZeroLocalPort,

    #[error("target port must be between 1 and 65535")]
    ZeroTargetPort,

    #[error("target address is empty")]
    EmptyTargetAddress,
}

/// Failure to reach the target for a single accepted connection
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("failed to resolve {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{target} resolved to no addresses")]
    NoAddress { target: String },

    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {target} after {after:?}")]
    Timeout { target: String, after: Duration },
}

/// Read/write failure in one relay direction
#[derive(Debug, thiserror::Error)]
#[error("{direction} relay failed after {bytes} bytes: {source}")]
pub struct RelayError {
    pub direction: crate::relay::Direction,
    pub bytes: u64,
    #[source]
    pub source: std::io::Error,
}

/// Tracked tasks were still running when the drain period ran out
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{remaining} tasks still running after {after:?}")]
pub struct DrainTimeout {
    pub remaining: usize,
    pub after: Duration,
}

/// Errors reading or writing a rule store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("rule store I/O error at {}: {source}", .path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rule store at {} is not valid JSON: {source}", .path.display())]
    Json {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no rule named '{name}'")]
    UnknownRule { name: String },
}

/// Errors loading or validating an [`EngineConfig`](crate::EngineConfig)
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config {} is not valid JSON: {source}", .path.display())]
    Json {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}
