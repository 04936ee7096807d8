//! portfwd: local TCP/UDP port forwarding
//!
//! `portfwd daemon` runs the forwarding engine in the foreground. Every other
//! command edits the rule store and, when a daemon is running, tells it
//! about the change over the control socket.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod cli;

#[derive(Parser)]
#[command(name = "portfwd")]
#[command(about = "Forward local TCP/UDP ports to remote hosts")]
struct Cli {
    /// Custom PORTFWD_HOME directory (defaults to PORTFWD_HOME env var or ~/.portfwd)
    #[arg(long, env = "PORTFWD_HOME", global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the forwarding daemon in the foreground
    Daemon {
        /// Interface every rule binds to (overrides config.json)
        #[arg(long, env = "PORTFWD_BIND")]
        bind: Option<IpAddr>,
        /// Target connect timeout in milliseconds (overrides config.json)
        #[arg(long, env = "PORTFWD_CONNECT_TIMEOUT_MS")]
        connect_timeout_ms: Option<u64>,
        /// How long a stopping rule waits for its connections (overrides config.json)
        #[arg(long, env = "PORTFWD_DRAIN_TIMEOUT_MS")]
        drain_timeout_ms: Option<u64>,
    },
    /// Add a rule, or replace the rule with the same name
    Add {
        /// Unique rule name
        name: String,
        /// Local port to listen on
        local_port: u16,
        /// Target host name or IP address
        target_address: String,
        /// Target port
        target_port: u16,
        #[arg(long, value_enum, default_value_t = cli::rules::ProtocolArg::Tcp)]
        protocol: cli::rules::ProtocolArg,
        /// Save the rule without starting it
        #[arg(long)]
        inactive: bool,
    },
    /// Delete a rule, stopping it first if it is running
    Remove { name: String },
    /// Mark a rule active and start it
    Enable { name: String },
    /// Mark a rule inactive and stop it
    Disable { name: String },
    /// List stored rules
    List,
    /// Show daemon status and running rules
    Status,
    /// Make the daemon restart every rule from the store
    Reload,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let home = cli::get_portfwd_home(cli.home)?;

    match cli.command {
        Commands::Daemon {
            bind,
            connect_timeout_ms,
            drain_timeout_ms,
        } => {
            let overrides = cli::daemon::ConfigOverrides {
                bind_address: bind,
                connect_timeout_ms,
                drain_timeout_ms,
            };
            println!("🚀 Starting portfwd daemon");
            println!("📁 PORTFWD_HOME: {}", home.display());
            cli::daemon::run(home, overrides).await
        }
        Commands::Add {
            name,
            local_port,
            target_address,
            target_port,
            protocol,
            inactive,
        } => {
            let rule = portfwd_engine::ForwardRule {
                name,
                local_port,
                target_address,
                target_port,
                protocol: protocol.into(),
                active: !inactive,
            };
            cli::rules::add(&home, rule).await
        }
        Commands::Remove { name } => cli::rules::remove(&home, &name).await,
        Commands::Enable { name } => cli::rules::set_active(&home, &name, true).await,
        Commands::Disable { name } => cli::rules::set_active(&home, &name, false).await,
        Commands::List => cli::rules::list(&home).await,
        Commands::Status => cli::status::show_status(&home).await,
        Commands::Reload => cli::status::reload(&home).await,
    }
}
