//! UDP worker: one-way datagram relay
//!
//! Datagrams received on the rule's local port are sent on to the target
//! from a separate egress socket. There is no session state and no reply
//! path: whatever the target sends back lands on the egress socket and is
//! never read, so it reaches neither the listening socket nor the original
//! sender.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::config::EngineConfig;
use crate::errors::DialError;
use crate::graceful::Graceful;
use crate::rule::ForwardRule;
use crate::worker::{WorkerState, back_off};

pub(crate) struct UdpWorker {
    rule: Arc<ForwardRule>,
    config: Arc<EngineConfig>,
    socket: UdpSocket,
    graceful: Graceful,
    state: watch::Sender<WorkerState>,
}

/// Send side: an unconnected socket plus the resolved target
struct Egress {
    socket: UdpSocket,
    target: SocketAddr,
}

impl Egress {
    async fn open(rule: &ForwardRule, config: &EngineConfig) -> Result<Self, DialError> {
        let addrs = crate::target::resolve(rule, config.connect_timeout()).await?;
        let target = addrs[0];

        let unspecified = match target.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = UdpSocket::bind(SocketAddr::new(unspecified, 0))
            .await
            .map_err(|source| DialError::Connect {
                target: rule.target(),
                source,
            })?;

        Ok(Self { socket, target })
    }
}

impl UdpWorker {
    pub(crate) async fn bind(addr: SocketAddr) -> std::io::Result<UdpSocket> {
        UdpSocket::bind(addr).await
    }

    pub(crate) fn new(
        rule: Arc<ForwardRule>,
        config: Arc<EngineConfig>,
        socket: UdpSocket,
        graceful: Graceful,
        state: watch::Sender<WorkerState>,
    ) -> Self {
        Self {
            rule,
            config,
            socket,
            graceful,
            state,
        }
    }

    pub(crate) async fn run(self) {
        let UdpWorker {
            rule,
            config,
            socket,
            graceful,
            state,
        } = self;

        tracing::info!(rule = %rule.name, target = %rule.target(), "UDP worker bound");

        let mut buf = vec![0u8; config.udp_buffer_size];
        // Resolved lazily and dropped after a failed send so the next datagram re-resolves
        let mut egress: Option<Egress> = None;

        loop {
            let (len, sender) = tokio::select! {
                biased;
                _ = graceful.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        tracing::warn!(rule = %rule.name, error = %e, "Receive failed");
                        if !back_off(&graceful).await {
                            break;
                        }
                        continue;
                    }
                },
            };

            tokio::select! {
                biased;
                _ = graceful.cancelled() => break,
                _ = forward(&rule, &config, &mut egress, &buf[..len], sender) => {}
            }
        }

        drop(socket);
        drop(egress);
        state.send_replace(WorkerState::Draining);

        if let Err(e) = graceful.drain(config.drain_timeout()).await {
            tracing::warn!(rule = %rule.name, error = %e, "UDP worker drain incomplete");
        }

        state.send_replace(WorkerState::Closed);
        tracing::info!(rule = %rule.name, "UDP worker closed");
    }
}

async fn forward(
    rule: &ForwardRule,
    config: &EngineConfig,
    egress: &mut Option<Egress>,
    datagram: &[u8],
    sender: SocketAddr,
) {
    if egress.is_none() {
        match Egress::open(rule, config).await {
            Ok(opened) => *egress = Some(opened),
            Err(e) => {
                tracing::warn!(rule = %rule.name, %sender, error = %e, "Target unavailable, dropping datagram");
                return;
            }
        }
    }
    let Some(out) = egress.as_ref() else {
        return;
    };

    match out.socket.send_to(datagram, out.target).await {
        Ok(sent) => {
            tracing::trace!(rule = %rule.name, %sender, target = %out.target, bytes = sent, "Forwarded datagram");
        }
        Err(e) => {
            tracing::warn!(rule = %rule.name, %sender, target = %out.target, error = %e, "Send failed, dropping datagram");
            *egress = None;
        }
    }
}
