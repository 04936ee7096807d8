//! The rule-name → worker registry and its start/stop operations
//!
//! All mutations go through one async mutex, held for the whole of a start
//! or stop. Two starts of the same name can therefore never race, and a start
//! issued while the same name is stopping waits until the old port has been
//! released.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::errors::{StartRuleError, StopRuleError};
use crate::graceful::Graceful;
use crate::rule::{ForwardRule, Protocol};
use crate::tcp::TcpWorker;
use crate::udp::UdpWorker;
use crate::worker::{ConnectionInfo, ConnectionRegistry, WorkerState};

/// Extra time a worker gets to return after its own drain period
const STOP_SLACK: Duration = Duration::from_millis(500);

/// Runtime state of one running rule, as reported by [`Engine::status`]
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RuleStatus {
    pub name: String,
    pub protocol: Protocol,
    pub local_addr: SocketAddr,
    pub target: String,
    pub state: WorkerState,
    pub connections: usize,
    pub tasks: usize,
    /// Live connections ordered by id
    #[serde(default)]
    pub open: Vec<ConnectionInfo>,
}

struct WorkerHandle {
    rule: Arc<ForwardRule>,
    local_addr: SocketAddr,
    graceful: Graceful,
    connections: ConnectionRegistry,
    state: watch::Receiver<WorkerState>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Cancel the worker and wait for its loop and every child to finish
    async fn shutdown(self, drain_timeout: Duration) {
        let WorkerHandle {
            rule,
            graceful,
            connections,
            mut task,
            ..
        } = self;

        graceful.cancel();

        match tokio::time::timeout(drain_timeout + STOP_SLACK, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(rule = %rule.name, error = %e, "Worker task failed");
            }
            Err(_) => {
                tracing::warn!(rule = %rule.name, "Worker did not stop in time, aborting");
                task.abort();
                let _ = task.await;
            }
        }

        // No-op after a normal exit; closes stragglers if the loop was aborted
        connections.close_all();
    }

    fn status(&self) -> RuleStatus {
        let open = self.connections.snapshot();
        RuleStatus {
            name: self.rule.name.clone(),
            protocol: self.rule.protocol,
            local_addr: self.local_addr,
            target: self.rule.target(),
            state: *self.state.borrow(),
            connections: open.len(),
            tasks: self.graceful.task_count(),
            open,
        }
    }
}

struct Inner {
    config: Arc<EngineConfig>,
    workers: Mutex<HashMap<String, WorkerHandle>>,
}

/// Owns one worker per running rule
///
/// Cheap to clone; clones share the same registry. Dropping the last clone
/// does not stop running workers; call [`stop_all`](Self::stop_all) first.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                workers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Bind the rule's local port and start its worker
    ///
    /// Returns once the port is bound; the worker loop keeps running in the
    /// background until [`stop_rule`](Self::stop_rule).
    pub async fn start_rule(&self, rule: ForwardRule) -> Result<(), StartRuleError> {
        let mut workers = self.inner.workers.lock().await;

        if workers.contains_key(&rule.name) {
            return Err(StartRuleError::AlreadyRunning { name: rule.name });
        }
        if let Err(source) = rule.validate() {
            return Err(StartRuleError::InvalidRule {
                name: rule.name,
                source,
            });
        }

        let config = self.inner.config.clone();
        let addr = SocketAddr::new(config.bind_address, rule.local_port);
        let rule = Arc::new(rule);
        let bind_error = |source: std::io::Error| StartRuleError::Bind {
            name: rule.name.clone(),
            protocol: rule.protocol,
            addr,
            source,
        };

        let graceful = Graceful::new();
        let connections = ConnectionRegistry::new();
        let (state_tx, state_rx) = watch::channel(WorkerState::Listening);

        let (local_addr, task) = match rule.protocol {
            Protocol::Tcp => {
                let listener = TcpWorker::bind(addr).await.map_err(bind_error)?;
                let local_addr = listener.local_addr().map_err(bind_error)?;
                let worker = TcpWorker::new(
                    rule.clone(),
                    config,
                    listener,
                    graceful.clone(),
                    connections.clone(),
                    state_tx,
                );
                (local_addr, tokio::spawn(worker.run()))
            }
            Protocol::Udp => {
                let socket = UdpWorker::bind(addr).await.map_err(bind_error)?;
                let local_addr = socket.local_addr().map_err(bind_error)?;
                let worker = UdpWorker::new(rule.clone(), config, socket, graceful.clone(), state_tx);
                (local_addr, tokio::spawn(worker.run()))
            }
        };

        tracing::info!(rule = %rule, %local_addr, "Rule started");

        workers.insert(
            rule.name.clone(),
            WorkerHandle {
                rule,
                local_addr,
                graceful,
                connections,
                state: state_rx,
                task,
            },
        );
        Ok(())
    }

    /// Stop a running rule, closing its socket and every open connection
    pub async fn stop_rule(&self, name: &str) -> Result<(), StopRuleError> {
        let mut workers = self.inner.workers.lock().await;

        let handle = workers.remove(name).ok_or_else(|| StopRuleError::NoSuchRule {
            name: name.to_string(),
        })?;
        handle.shutdown(self.inner.config.drain_timeout()).await;

        tracing::info!(rule = %name, "Rule stopped");
        Ok(())
    }

    /// Start every active rule; one failure never prevents the others
    ///
    /// Returns the rules that failed to start together with why.
    pub async fn start_all(&self, rules: Vec<ForwardRule>) -> Vec<(String, StartRuleError)> {
        let mut failures = Vec::new();

        for rule in rules.into_iter().filter(|r| r.active) {
            let name = rule.name.clone();
            if let Err(e) = self.start_rule(rule).await {
                tracing::warn!(rule = %name, error = %e, "Failed to start rule");
                failures.push((name, e));
            }
        }

        failures
    }

    /// Stop every running rule
    pub async fn stop_all(&self) {
        let mut workers = self.inner.workers.lock().await;
        let drain_timeout = self.inner.config.drain_timeout();

        let stops = workers.drain().map(|(name, handle)| async move {
            handle.shutdown(drain_timeout).await;
            tracing::info!(rule = %name, "Rule stopped");
        });
        futures_util::future::join_all(stops).await;
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.inner.workers.lock().await.contains_key(name)
    }

    /// Address the rule's socket is actually bound to
    pub async fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        self.inner
            .workers
            .lock()
            .await
            .get(name)
            .map(|handle| handle.local_addr)
    }

    /// Status of every running rule, sorted by name
    pub async fn status(&self) -> Vec<RuleStatus> {
        let workers = self.inner.workers.lock().await;
        let mut status: Vec<_> = workers.values().map(WorkerHandle::status).collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn graceful_of(engine: &Engine, name: &str) -> Graceful {
        engine.inner.workers.lock().await[name].graceful.clone()
    }

    #[tokio::test]
    async fn test_stop_leaves_no_tasks_behind() {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_port = target.local_addr().unwrap().port();
        let local_port = free_port();

        let engine = Engine::new(EngineConfig {
            bind_address: std::net::Ipv4Addr::LOCALHOST.into(),
            drain_timeout_ms: 1_000,
            ..Default::default()
        });
        engine
            .start_rule(ForwardRule::tcp("web", local_port, "127.0.0.1", target_port))
            .await
            .unwrap();
        let graceful = graceful_of(&engine, "web").await;

        let mut clients = Vec::new();
        let mut upstreams = Vec::new();
        for _ in 0..2 {
            clients.push(TcpStream::connect(("127.0.0.1", local_port)).await.unwrap());
            upstreams.push(target.accept().await.unwrap().0);
        }
        assert_eq!(graceful.task_count(), 2);

        engine.stop_rule("web").await.unwrap();

        assert!(graceful.is_cancelled());
        assert_eq!(graceful.task_count(), 0);
        for client in &mut clients {
            let mut buf = [0u8; 8];
            assert!(matches!(client.read(&mut buf).await, Ok(0) | Err(_)));
        }
    }
}
