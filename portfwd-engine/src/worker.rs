//! Pieces shared by the TCP and UDP workers

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::graceful::Graceful;

/// Pause after a failed accept or receive (e.g. out of file descriptors)
pub(crate) const SOCKET_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Wait out [`SOCKET_ERROR_BACKOFF`]; false if the worker was cancelled meanwhile
pub(crate) async fn back_off(graceful: &Graceful) -> bool {
    tokio::select! {
        biased;
        _ = graceful.cancelled() => false,
        _ = tokio::time::sleep(SOCKET_ERROR_BACKOFF) => true,
    }
}

/// Lifecycle of a worker
///
/// `Listening` is entered right after the eager bind, `Draining` once the
/// worker has been cancelled and its socket closed, `Closed` when every
/// child has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Listening,
    Draining,
    Closed,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Listening => write!(f, "listening"),
            WorkerState::Draining => write!(f, "draining"),
            WorkerState::Closed => write!(f, "closed"),
        }
    }
}

/// One live connection as seen from its worker
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConnectionInfo {
    pub id: u64,
    pub peer: SocketAddr,
    pub target: SocketAddr,
    /// Time since the target was dialed, as of the snapshot
    pub open_ms: u64,
}

struct Entry {
    peer: SocketAddr,
    target: SocketAddr,
    opened_at: Instant,
    close: CancellationToken,
}

#[derive(Default)]
struct Registry {
    closed: bool,
    next_id: u64,
    entries: HashMap<u64, Entry>,
}

/// The worker's registry of live connections
///
/// Stopping a worker walks this registry and closes every entry. Once
/// [`close_all`](Self::close_all) has run the registry refuses new entries,
/// so a dial that completes during shutdown cannot slip past the walk.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // Critical sections never panic mid-update, so a poisoned map is still consistent
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a connection; `None` once the registry has been closed
    pub fn register(&self, peer: SocketAddr, target: SocketAddr) -> Option<Registration> {
        let mut registry = self.lock();
        if registry.closed {
            return None;
        }

        let id = registry.next_id;
        registry.next_id += 1;

        let close = CancellationToken::new();
        registry.entries.insert(
            id,
            Entry {
                peer,
                target,
                opened_at: Instant::now(),
                close: close.clone(),
            },
        );

        Some(Registration {
            id,
            close,
            registry: self.clone(),
        })
    }

    /// Refuse new entries and close every live one
    pub fn close_all(&self) -> usize {
        let mut registry = self.lock();
        registry.closed = true;
        for entry in registry.entries.values() {
            entry.close.cancel();
        }
        registry.entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live connections ordered by id
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut connections: Vec<_> = self
            .lock()
            .entries
            .iter()
            .map(|(&id, e)| ConnectionInfo {
                id,
                peer: e.peer,
                target: e.target,
                open_ms: u64::try_from(e.opened_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            })
            .collect();
        connections.sort_by_key(|c| c.id);
        connections
    }

    fn deregister(&self, id: u64) {
        self.lock().entries.remove(&id);
    }
}

/// A registered connection; deregisters itself when dropped
pub struct Registration {
    id: u64,
    close: CancellationToken,
    registry: ConnectionRegistry,
}

impl Registration {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Token that fires when the worker closes this connection
    pub fn close_token(&self) -> CancellationToken {
        self.close.clone()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_registration_drop_deregisters() {
        let registry = ConnectionRegistry::new();
        let first = registry.register(addr(1), addr(2)).unwrap();
        let second = registry.register(addr(3), addr(2)).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(registry.len(), 2);

        drop(first);
        let live = registry.snapshot();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].peer, addr(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_off_waits_unless_cancelled() {
        let graceful = Graceful::new();

        let started = tokio::time::Instant::now();
        assert!(back_off(&graceful).await);
        assert!(started.elapsed() >= SOCKET_ERROR_BACKOFF);

        graceful.cancel();
        let started = tokio::time::Instant::now();
        assert!(!back_off(&graceful).await);
        assert!(started.elapsed() < SOCKET_ERROR_BACKOFF);
    }

    #[test]
    fn test_close_all_cancels_and_refuses_new() {
        let registry = ConnectionRegistry::new();
        let registration = registry.register(addr(1), addr(2)).unwrap();
        let token = registration.close_token();

        assert_eq!(registry.close_all(), 1);
        assert!(token.is_cancelled());
        assert!(registry.register(addr(5), addr(2)).is_none());

        drop(registration);
        assert!(registry.is_empty());
    }
}
