//! # portfwd-client
//!
//! Talks to a running `portfwd daemon` over its Unix control socket.
//!
//! ```text
//! ┌────────────────┐   $PORTFWD_HOME/control.sock   ┌────────────────┐
//! │ portfwd-client │◄──────────────────────────────►│ portfwd daemon │
//! └────────────────┘      one JSON line each way     └────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), portfwd_client::ClientError> {
//! let home = std::path::Path::new("/home/me/.portfwd");
//! portfwd_client::start_rule(home, "web").await?;
//! for rule in portfwd_client::status(home).await? {
//!     println!("{} {} {}", rule.name, rule.local_addr, rule.state);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod protocol;

// Status rows come straight from the engine
pub use portfwd_engine::RuleStatus;

pub use client::{is_daemon_running, reload, send, start_rule, status, stop_rule};
pub use error::ClientError;
pub use protocol::{CONTROL_SOCKET, ControlRequest, ControlResponse, socket_path};
