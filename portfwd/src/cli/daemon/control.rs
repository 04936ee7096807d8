//! Control socket server
//!
//! Each client connection sends one JSON request line and gets one JSON
//! response line back.

use std::path::Path;
use std::sync::Arc;

use portfwd_client::{ControlRequest, ControlResponse};
use portfwd_engine::{Engine, RuleStore, store};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Everything a control request may touch
#[derive(Clone)]
pub struct ControlState {
    pub engine: Engine,
    pub store: Arc<dyn RuleStore>,
}

/// Bind the control socket, replacing a stale one left by a crashed daemon
///
/// Only called while holding the daemon lock, so an existing socket file
/// cannot belong to a live daemon.
pub async fn bind(socket_path: &Path) -> eyre::Result<UnixListener> {
    match tokio::fs::remove_file(socket_path).await {
        Ok(()) => tracing::debug!(socket = %socket_path.display(), "Removed stale control socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(UnixListener::bind(socket_path)?)
}

/// Accept control clients forever
pub async fn serve(listener: UnixListener, state: ControlState) -> eyre::Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, &state).await {
                        tracing::warn!(error = %e, "Control client failed");
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "Control socket accept failed");
            }
        }
    }
}

async fn handle_client(stream: UnixStream, state: &ControlState) -> eyre::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut line = String::new();

    if BufReader::new(reader).read_line(&mut line).await? == 0 {
        tracing::debug!("Control client disconnected without a request");
        return Ok(());
    }

    let response = match serde_json::from_str::<ControlRequest>(line.trim()) {
        Ok(request) => {
            tracing::info!(?request, "Control request");
            dispatch(state, request).await
        }
        Err(e) => ControlResponse::error(format!("invalid request: {e}")),
    };

    let mut reply = serde_json::to_string(&response)?;
    reply.push('\n');
    writer.write_all(reply.as_bytes()).await?;
    writer.shutdown().await?;
    Ok(())
}

/// Run one request against the engine
pub async fn dispatch(state: &ControlState, request: ControlRequest) -> ControlResponse {
    match handle(state, request).await {
        Ok(data) => ControlResponse::ok(data),
        Err(e) => {
            tracing::warn!(error = %e, "Control request failed");
            ControlResponse::error(e)
        }
    }
}

async fn handle(state: &ControlState, request: ControlRequest) -> eyre::Result<serde_json::Value> {
    match request {
        ControlRequest::StartRule { name } => {
            let rules = state.store.load().await?;
            let rule = store::find_rule(&rules, &name)?.clone();
            state.engine.start_rule(rule).await?;
            Ok(serde_json::json!({ "started": name }))
        }
        ControlRequest::StopRule { name } => {
            state.engine.stop_rule(&name).await?;
            Ok(serde_json::json!({ "stopped": name }))
        }
        ControlRequest::Status => Ok(serde_json::to_value(state.engine.status().await)?),
        ControlRequest::Reload => {
            state.engine.stop_all().await;
            let rules = state.store.load().await?;
            let failures = state.engine.start_all(rules).await;

            let running: Vec<_> = state
                .engine
                .status()
                .await
                .into_iter()
                .map(|s| s.name)
                .collect();
            let failed: Vec<_> = failures
                .iter()
                .map(|(name, error)| serde_json::json!({ "name": name, "error": error.to_string() }))
                .collect();
            Ok(serde_json::json!({ "running": running, "failed": failed }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portfwd_engine::{EngineConfig, ForwardRule, MemoryRuleStore};

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn state(rules: Vec<ForwardRule>) -> ControlState {
        let config = EngineConfig {
            bind_address: std::net::Ipv4Addr::LOCALHOST.into(),
            drain_timeout_ms: 500,
            ..Default::default()
        };
        ControlState {
            engine: Engine::new(config),
            store: Arc::new(MemoryRuleStore::new(rules)),
        }
    }

    #[tokio::test]
    async fn test_start_and_stop_by_name() {
        let state = state(vec![
            ForwardRule::tcp("web", free_port(), "127.0.0.1", 80).with_active(false),
        ]);

        let response = dispatch(
            &state,
            ControlRequest::StartRule {
                name: "web".to_string(),
            },
        )
        .await;
        assert!(response.success, "{response:?}");
        assert!(state.engine.is_running("web").await);

        let response = dispatch(
            &state,
            ControlRequest::StopRule {
                name: "web".to_string(),
            },
        )
        .await;
        assert!(response.success, "{response:?}");
        assert!(!state.engine.is_running("web").await);
    }

    #[tokio::test]
    async fn test_unknown_rule_is_an_error_response() {
        let state = state(vec![]);
        let response = dispatch(
            &state,
            ControlRequest::StartRule {
                name: "ghost".to_string(),
            },
        )
        .await;
        assert!(!response.success);
        assert_eq!(response.data, "no rule named 'ghost'");

        let response = dispatch(
            &state,
            ControlRequest::StopRule {
                name: "ghost".to_string(),
            },
        )
        .await;
        assert!(!response.success);
    }

    #[tokio::test]
    async fn test_reload_restarts_active_rules() {
        let state = state(vec![
            ForwardRule::tcp("a", free_port(), "127.0.0.1", 80),
            ForwardRule::udp("b", free_port(), "127.0.0.1", 53).with_active(false),
        ]);

        let response = dispatch(&state, ControlRequest::Reload).await;
        assert!(response.success, "{response:?}");
        assert_eq!(response.data["running"], serde_json::json!(["a"]));
        assert_eq!(response.data["failed"], serde_json::json!([]));

        state.engine.stop_all().await;
    }

    #[tokio::test]
    async fn test_serves_client_over_socket() {
        let home = tempfile::tempdir().unwrap();
        let state = state(vec![]);
        state
            .engine
            .start_rule(ForwardRule::tcp("web", free_port(), "127.0.0.1", 80))
            .await
            .unwrap();

        let listener = bind(&portfwd_client::socket_path(home.path())).await.unwrap();
        let server = tokio::spawn(serve(listener, state.clone()));

        let rules = portfwd_client::status(home.path()).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "web");

        server.abort();
        state.engine.stop_all().await;
    }
}
