//! Status and reload commands

use std::path::Path;

use portfwd_client::ClientError;
use portfwd_engine::{RuleStatus, RuleStore};

/// Show daemon state, running rules, and stored rules that are not running
pub async fn show_status(home: &Path) -> eyre::Result<()> {
    println!("📊 portfwd Status");
    println!("📁 PORTFWD_HOME: {}", home.display());
    println!();

    let running = match portfwd_client::status(home).await {
        Ok(running) => {
            println!("🚀 Daemon: 🟢 Running");
            running
        }
        Err(ClientError::DaemonNotRunning { .. }) => {
            println!("🚀 Daemon: 🔴 Not running");
            Vec::new()
        }
        Err(e) => return Err(e.into()),
    };
    println!();

    for status in &running {
        println!("{}", format_status(status));
        for conn in &status.open {
            println!("     🔗 #{} {} → {} ({}s)", conn.id, conn.peer, conn.target, conn.open_ms / 1000);
        }
    }

    let stored = super::rule_store(home).load().await?;
    let stopped: Vec<_> = stored
        .iter()
        .filter(|rule| !running.iter().any(|s| s.name == rule.name))
        .collect();

    if running.is_empty() && stopped.is_empty() {
        println!("📭 No rules configured");
        return Ok(());
    }
    for rule in stopped {
        let note = if rule.active { "not running" } else { "disabled" };
        println!("⏸️  {rule} - {note}");
    }
    Ok(())
}

pub async fn reload(home: &Path) -> eyre::Result<()> {
    let summary = portfwd_client::reload(home).await?;
    println!("🔄 Reloaded rules");
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn format_status(status: &RuleStatus) -> String {
    format!(
        "▶️  {} ({} {} → {}) {} - {} connections",
        status.name,
        status.protocol,
        status.local_addr,
        status.target,
        status.state,
        status.connections
    )
}
