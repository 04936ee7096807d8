//! Error types for portfwd-client

use std::path::PathBuf;

/// Client operation errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("daemon not running (no socket at {}); start it with: portfwd daemon", .socket.display())]
    DaemonNotRunning { socket: PathBuf },

    #[error("daemon closed the connection without replying")]
    NoResponse,

    #[error("daemon error: {0}")]
    Daemon(String),

    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}
