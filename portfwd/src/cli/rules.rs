//! Rule editing commands
//!
//! The store is always updated first. A running daemon is then told about
//! the change; if none is running the edit simply takes effect on its next
//! start.

use std::path::Path;

use portfwd_client::ClientError;
use portfwd_engine::{ForwardRule, Protocol, RuleStore, store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProtocolArg {
    Tcp,
    Udp,
}

impl From<ProtocolArg> for Protocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Tcp => Protocol::Tcp,
            ProtocolArg::Udp => Protocol::Udp,
        }
    }
}

/// Add a rule, or replace the stored rule with the same name
pub async fn add(home: &Path, rule: ForwardRule) -> eyre::Result<()> {
    rule.validate()?;

    let rule_store = super::rule_store(home);
    let mut rules = rule_store.load().await?;
    let replaced = store::upsert_rule(&mut rules, rule.clone());
    rule_store.save(&rules).await?;

    if replaced {
        println!("✏️  Updated rule: {rule}");
        // It may still be running with its old definition
        notify(home, stop(home, &rule.name)).await;
    } else {
        println!("➕ Added rule: {rule}");
    }
    if rule.active {
        notify(home, portfwd_client::start_rule(home, &rule.name)).await;
    }
    Ok(())
}

pub async fn remove(home: &Path, name: &str) -> eyre::Result<()> {
    let rule_store = super::rule_store(home);
    let mut rules = rule_store.load().await?;
    let removed = store::remove_rule(&mut rules, name)?;
    rule_store.save(&rules).await?;

    println!("🗑️  Removed rule: {removed}");
    notify(home, stop(home, name)).await;
    Ok(())
}

/// Flip a rule's active flag and start or stop it to match
pub async fn set_active(home: &Path, name: &str, active: bool) -> eyre::Result<()> {
    let rule_store = super::rule_store(home);
    let mut rules = rule_store.load().await?;
    let rule = store::set_rule_active(&mut rules, name, active)?;
    rule_store.save(&rules).await?;

    if active {
        println!("🟢 Enabled rule: {rule}");
        notify(home, portfwd_client::start_rule(home, name)).await;
    } else {
        println!("🔴 Disabled rule: {rule}");
        notify(home, stop(home, name)).await;
    }
    Ok(())
}

pub async fn list(home: &Path) -> eyre::Result<()> {
    let rules = super::rule_store(home).load().await?;

    if rules.is_empty() {
        println!("📭 No rules configured");
        println!("   Add one with: portfwd add <name> <local-port> <target-address> <target-port>");
        return Ok(());
    }

    for rule in &rules {
        let icon = if rule.active { "🟢" } else { "🔴" };
        println!("{icon} {rule}");
    }
    Ok(())
}

/// Stop a rule, treating "not running" as done
async fn stop(home: &Path, name: &str) -> Result<(), ClientError> {
    match portfwd_client::stop_rule(home, name).await {
        // stop-rule only fails for a rule that is not running
        Err(ClientError::Daemon(_)) => Ok(()),
        other => other,
    }
}

/// Report the outcome of telling the daemon about an edit
async fn notify(home: &Path, result: impl std::future::Future<Output = Result<(), ClientError>>) {
    match result.await {
        Ok(()) => {}
        Err(ClientError::DaemonNotRunning { .. }) => {
            tracing::debug!(home = %home.display(), "No daemon running, change applies on next start");
        }
        Err(e) => eprintln!("⚠️  Saved, but the daemon could not apply it: {e}"),
    }
}
