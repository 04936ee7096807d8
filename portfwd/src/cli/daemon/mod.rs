//! Daemon lifecycle
//!
//! 1. Take the singleton lock in PORTFWD_HOME
//! 2. Build the engine from layered configuration
//! 3. Start every active rule from the store
//! 4. Serve the control socket until Ctrl-C / SIGTERM
//! 5. Stop every rule and remove the socket

use std::fs::OpenOptions;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use portfwd_engine::{Engine, EngineConfig, RuleStore};

pub mod control;

/// Daemon flags that take precedence over config.json
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub bind_address: Option<IpAddr>,
    pub connect_timeout_ms: Option<u64>,
    pub drain_timeout_ms: Option<u64>,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(bind_address) = self.bind_address {
            config.bind_address = bind_address;
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.connect_timeout_ms = ms;
        }
        if let Some(ms) = self.drain_timeout_ms {
            config.drain_timeout_ms = ms;
        }
    }
}

/// Defaults, then config.json, then flags and environment
pub async fn load_config(home: &Path, overrides: &ConfigOverrides) -> eyre::Result<EngineConfig> {
    let mut config = EngineConfig::load(&super::config_path(home)).await?;
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// Run the daemon until a shutdown signal arrives
pub async fn run(home: PathBuf, overrides: ConfigOverrides) -> eyre::Result<()> {
    // Held for the daemon's lifetime; released when dropped
    let _lock_file = acquire_lock(&home).await?;

    let config = load_config(&home, &overrides).await?;
    tracing::info!(
        bind = %config.bind_address,
        connect_timeout_ms = config.connect_timeout_ms,
        drain_timeout_ms = config.drain_timeout_ms,
        "Engine configured"
    );

    let engine = Engine::new(config);
    let store: Arc<dyn RuleStore> = Arc::new(super::rule_store(&home));

    on_startup(&engine, store.as_ref()).await?;

    let socket_path = portfwd_client::socket_path(&home);
    let listener = control::bind(&socket_path).await?;
    println!("🎧 Control socket listening on: {}", socket_path.display());

    let state = control::ControlState {
        engine: engine.clone(),
        store,
    };

    tokio::select! {
        result = control::serve(listener, state) => result?,
        _ = shutdown_signal() => tracing::info!("Shutdown signal received"),
    }

    on_shutdown(&engine, &socket_path).await;
    Ok(())
}

async fn acquire_lock(home: &Path) -> eyre::Result<std::fs::File> {
    tokio::fs::create_dir_all(home).await?;

    let lock_path = super::lock_path(home);
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&lock_path)?;

    // Fail immediately if another daemon holds the lock
    if let Err(e) = lock_file.try_lock_exclusive() {
        eyre::bail!(
            "another daemon is already running (lock file: {}): {e}",
            lock_path.display()
        );
    }

    println!("🔒 Acquired exclusive daemon lock: {}", lock_path.display());
    Ok(lock_file)
}

/// Start every active rule; failures are reported and skipped
async fn on_startup(engine: &Engine, store: &dyn RuleStore) -> eyre::Result<()> {
    let rules = store.load().await?;
    let active = rules.iter().filter(|r| r.active).count();

    let failures = engine.start_all(rules).await;
    for (name, error) in &failures {
        eprintln!("⚠️  Rule '{name}' not started: {error}");
    }

    println!(
        "▶️  Started {} of {} active rules",
        active - failures.len(),
        active
    );
    Ok(())
}

async fn on_shutdown(engine: &Engine, socket_path: &Path) {
    engine.stop_all().await;

    if let Err(e) = tokio::fs::remove_file(socket_path).await {
        tracing::warn!(socket = %socket_path.display(), error = %e, "Failed to remove control socket");
    }
    println!("👋 Daemon stopped");
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = sigterm => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flags_override_config_file() {
        let home = tempfile::tempdir().unwrap();
        tokio::fs::write(
            super::super::config_path(home.path()),
            r#"{"bind_address": "127.0.0.1", "connect_timeout_ms": 1000}"#,
        )
        .await
        .unwrap();

        let overrides = ConfigOverrides {
            connect_timeout_ms: Some(250),
            ..Default::default()
        };
        let config = load_config(home.path(), &overrides).await.unwrap();

        assert_eq!(config.bind_address.to_string(), "127.0.0.1");
        assert_eq!(config.connect_timeout_ms, 250);
        assert_eq!(
            config.drain_timeout_ms,
            portfwd_engine::config::DEFAULT_DRAIN_TIMEOUT_MS
        );
    }

    #[tokio::test]
    async fn test_invalid_override_is_rejected() {
        let home = tempfile::tempdir().unwrap();
        let overrides = ConfigOverrides {
            connect_timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(load_config(home.path(), &overrides).await.is_err());
    }

    #[tokio::test]
    async fn test_second_lock_fails() {
        let home = tempfile::tempdir().unwrap();
        let _held = acquire_lock(home.path()).await.unwrap();
        assert!(acquire_lock(home.path()).await.is_err());
    }
}
