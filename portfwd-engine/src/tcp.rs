//! TCP worker: one listener per rule, one relay per accepted connection
//!
//! Flow for each accepted connection:
//! 1. Resolve and dial the target (bounded by the connect timeout)
//! 2. Register the connection with the worker
//! 3. Relay both directions until either ends
//! 4. Deregister; both sockets are closed by then
//!
//! A failed dial or relay only drops that one connection. The accept loop
//! keeps running until the worker is cancelled.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::config::EngineConfig;
use crate::graceful::Graceful;
use crate::relay::{DirectionEnd, relay};
use crate::rule::ForwardRule;
use crate::worker::{ConnectionRegistry, WorkerState, back_off};

pub(crate) struct TcpWorker {
    rule: Arc<ForwardRule>,
    config: Arc<EngineConfig>,
    listener: TcpListener,
    graceful: Graceful,
    connections: ConnectionRegistry,
    state: watch::Sender<WorkerState>,
}

impl TcpWorker {
    pub(crate) async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
        TcpListener::bind(addr).await
    }

    pub(crate) fn new(
        rule: Arc<ForwardRule>,
        config: Arc<EngineConfig>,
        listener: TcpListener,
        graceful: Graceful,
        connections: ConnectionRegistry,
        state: watch::Sender<WorkerState>,
    ) -> Self {
        Self {
            rule,
            config,
            listener,
            graceful,
            connections,
            state,
        }
    }

    /// Accept until cancelled, then close the listener and drain connections
    pub(crate) async fn run(self) {
        let TcpWorker {
            rule,
            config,
            listener,
            graceful,
            connections,
            state,
        } = self;

        tracing::info!(rule = %rule.name, target = %rule.target(), "TCP worker listening");

        loop {
            tokio::select! {
                biased;
                _ = graceful.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((client, peer)) => {
                        tracing::debug!(rule = %rule.name, %peer, "Accepted connection");
                        graceful.spawn(serve_connection(
                            client,
                            peer,
                            rule.clone(),
                            config.clone(),
                            connections.clone(),
                            graceful.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(rule = %rule.name, error = %e, "Accept failed");
                        if !back_off(&graceful).await {
                            break;
                        }
                    }
                },
            }
        }

        drop(listener);
        state.send_replace(WorkerState::Draining);

        let open = connections.close_all();
        tracing::info!(rule = %rule.name, open, "TCP worker draining");

        if let Err(e) = graceful.drain(config.drain_timeout()).await {
            tracing::warn!(rule = %rule.name, error = %e, "TCP worker drain incomplete");
        }

        state.send_replace(WorkerState::Closed);
        tracing::info!(rule = %rule.name, "TCP worker closed");
    }
}

async fn serve_connection(
    client: TcpStream,
    peer: SocketAddr,
    rule: Arc<ForwardRule>,
    config: Arc<EngineConfig>,
    connections: ConnectionRegistry,
    graceful: Graceful,
) {
    let dialed = tokio::select! {
        biased;
        _ = graceful.cancelled() => {
            tracing::debug!(rule = %rule.name, %peer, "Worker stopping, dropping connection before dial");
            return;
        }
        dialed = crate::target::dial(&rule, config.connect_timeout()) => dialed,
    };

    let (target, target_addr) = match dialed {
        Ok(dialed) => dialed,
        Err(e) => {
            // Dropping `client` here closes the accepted socket
            tracing::warn!(rule = %rule.name, %peer, error = %e, "Dial failed, dropping connection");
            return;
        }
    };

    let Some(registration) = connections.register(peer, target_addr) else {
        tracing::debug!(rule = %rule.name, %peer, "Worker closed during dial, dropping connection");
        return;
    };
    let conn = registration.id();

    tracing::debug!(rule = %rule.name, conn, %peer, target = %target_addr, "Relaying");

    let report = relay(
        client,
        target,
        config.relay_buffer_size,
        registration.close_token(),
    )
    .await;

    for error in report.errors() {
        tracing::warn!(rule = %rule.name, conn, %peer, %error, "Relay error");
    }

    let closed_by_worker = matches!(
        (&report.inbound.end, &report.outbound.end),
        (DirectionEnd::Closed, DirectionEnd::Closed)
    );
    tracing::debug!(
        rule = %rule.name,
        conn,
        %peer,
        inbound_bytes = report.inbound.bytes,
        outbound_bytes = report.outbound.bytes,
        closed_by_worker,
        "Connection closed"
    );
}
