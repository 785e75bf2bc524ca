//! Reference registry server.

use mural_storage::atomic_write_json;
use mural_types::ServerInfo;
use mural_wire::{
    read_frame, write_frame, AckReply, Envelope, ListReply, RankReply, RegistryRequest,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerEntry {
    rank: u64,
    last_heartbeat: f64,
    replication_addr: String,
    election_addr: String,
}

/// The registry's persisted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryState {
    servers: BTreeMap<String, ServerEntry>,
    next_rank: u64,
    timestamp: f64,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            servers: BTreeMap::new(),
            next_rank: 1,
            timestamp: 0.0,
        }
    }
}

/// The reference registry: rank assignment, liveness tracking, and peer
/// listing, persisted as a single JSON object.
#[derive(Debug, Clone)]
pub struct RegistryServer {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<RegistryState>,
    path: Option<PathBuf>,
}

impl RegistryServer {
    /// Opens the registry, reloading `path` when it exists. Pass `None` for
    /// a purely in-memory registry (tests).
    pub fn open(path: Option<PathBuf>) -> Self {
        let state = path
            .as_deref()
            .and_then(|p| std::fs::read(p).ok())
            .and_then(|body| serde_json::from_slice(&body).ok())
            .unwrap_or_default();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                path,
            }),
        }
    }

    /// Serves registry requests on `listener` until the stop flag flips.
    pub async fn serve(self, listener: TcpListener, mut stop: watch::Receiver<bool>) {
        info!(addr = ?listener.local_addr().ok(), "Registry listening");
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Registry accept failed");
                            continue;
                        }
                    };
                    debug!(peer = %peer, "Registry connection");
                    let server = self.clone();
                    tokio::spawn(async move {
                        server.handle_connection(stream).await;
                    });
                }
            }
        }
        info!("Registry stopped");
    }

    async fn handle_connection(&self, mut stream: TcpStream) {
        loop {
            let request: RegistryRequest = match read_frame(&mut stream).await {
                Ok(request) => request,
                Err(e) => {
                    debug!(error = %e, "Registry connection closed");
                    return;
                }
            };
            let written = match request {
                RegistryRequest::Rank {
                    server,
                    replication_addr,
                    election_addr,
                } => {
                    let rank = self.assign_rank(&server, replication_addr, election_addr);
                    let reply = Envelope::new(
                        "rank",
                        RankReply {
                            status: "success".to_string(),
                            rank,
                        },
                    );
                    write_frame(&mut stream, &reply).await
                }
                RegistryRequest::List {} => {
                    let reply = Envelope::new(
                        "list",
                        ListReply {
                            status: "success".to_string(),
                            servers: self.listing(),
                        },
                    );
                    write_frame(&mut stream, &reply).await
                }
                RegistryRequest::Heartbeat { server } => {
                    let status = if self.record_heartbeat(&server) {
                        "success"
                    } else {
                        "erro"
                    };
                    let reply = Envelope::new(
                        "heartbeat",
                        AckReply {
                            status: status.to_string(),
                        },
                    );
                    write_frame(&mut stream, &reply).await
                }
            };
            if let Err(e) = written {
                debug!(error = %e, "Registry reply failed");
                return;
            }
        }
    }

    fn assign_rank(&self, server: &str, replication_addr: String, election_addr: String) -> u64 {
        let now = wall_now();
        let rank = {
            let mut state = self.inner.state.lock();
            state.timestamp = now;
            match state.servers.get_mut(server) {
                Some(entry) => {
                    // Re-registration after a restart keeps the original
                    // rank but may move the endpoints.
                    entry.last_heartbeat = now;
                    entry.replication_addr = replication_addr;
                    entry.election_addr = election_addr;
                    entry.rank
                }
                None => {
                    let rank = state.next_rank;
                    state.next_rank += 1;
                    state.servers.insert(
                        server.to_string(),
                        ServerEntry {
                            rank,
                            last_heartbeat: now,
                            replication_addr,
                            election_addr,
                        },
                    );
                    info!(server, rank, "Registered server");
                    rank
                }
            }
        };
        self.persist();
        rank
    }

    fn record_heartbeat(&self, server: &str) -> bool {
        let known = {
            let mut state = self.inner.state.lock();
            state.timestamp = wall_now();
            match state.servers.get_mut(server) {
                Some(entry) => {
                    entry.last_heartbeat = wall_now();
                    true
                }
                None => false,
            }
        };
        if known {
            self.persist();
        }
        known
    }

    fn listing(&self) -> Vec<ServerInfo> {
        let state = self.inner.state.lock();
        let mut servers: Vec<ServerInfo> = state
            .servers
            .iter()
            .map(|(name, entry)| ServerInfo {
                server: name.clone(),
                rank: entry.rank,
                last_heartbeat: entry.last_heartbeat,
                replication_addr: entry.replication_addr.clone(),
                election_addr: entry.election_addr.clone(),
            })
            .collect();
        servers.sort_by_key(|server| server.rank);
        servers
    }

    fn persist(&self) {
        let Some(path) = &self.inner.path else {
            return;
        };
        let state = self.inner.state.lock().clone();
        if let Err(e) = atomic_write_json(path, &state) {
            warn!(path = %path.display(), error = %e, "Failed to persist registry state");
        }
    }
}

fn wall_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegistryClient;
    use std::time::Duration;

    async fn spawn_registry() -> (String, watch::Sender<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(RegistryServer::open(None).serve(listener, stop_rx));
        (addr, stop_tx)
    }

    #[tokio::test]
    async fn ranks_are_sequential_and_stable() {
        let (addr, _stop) = spawn_registry().await;
        let client = RegistryClient::new(&addr, Duration::from_secs(1));

        let first = client.rank("server_1", "127.0.0.1:6000", "127.0.0.1:6001").await.unwrap();
        let second = client.rank("server_2", "127.0.0.1:6100", "127.0.0.1:6101").await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);

        // Re-registration keeps the original rank.
        let again = client.rank("server_1", "127.0.0.1:6200", "127.0.0.1:6201").await.unwrap();
        assert_eq!(again, 1);
    }

    #[tokio::test]
    async fn listing_reflects_heartbeats() {
        let (addr, _stop) = spawn_registry().await;
        let client = RegistryClient::new(&addr, Duration::from_secs(1));

        client.rank("server_1", "127.0.0.1:6000", "127.0.0.1:6001").await.unwrap();
        let before = client.list().await;
        assert_eq!(before.len(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        client.heartbeat("server_1").await.unwrap();
        let after = client.list().await;
        assert!(after[0].last_heartbeat >= before[0].last_heartbeat);
    }

    #[tokio::test]
    async fn heartbeat_for_unknown_server_is_rejected() {
        let (addr, _stop) = spawn_registry().await;
        let client = RegistryClient::new(&addr, Duration::from_secs(1));
        assert!(client.heartbeat("ghost").await.is_err());
    }

    #[tokio::test]
    async fn unreachable_registry_falls_back_to_cache() {
        let (addr, stop) = spawn_registry().await;
        let client = RegistryClient::new(&addr, Duration::from_millis(200));

        client.rank("server_1", "127.0.0.1:6000", "127.0.0.1:6001").await.unwrap();
        assert_eq!(client.list().await.len(), 1);

        stop.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The cached listing survives the outage.
        assert_eq!(client.list().await.len(), 1);
    }

    #[test]
    fn state_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let registry = RegistryServer::open(Some(path.clone()));
        registry.assign_rank("server_1", "127.0.0.1:6000".into(), "127.0.0.1:6001".into());
        registry.assign_rank("server_2", "127.0.0.1:6100".into(), "127.0.0.1:6101".into());

        let reloaded = RegistryServer::open(Some(path));
        let listing = reloaded.listing();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].server, "server_1");
        assert_eq!(listing[0].rank, 1);
        // next_rank continues past the reloaded entries.
        assert_eq!(reloaded.assign_rank("server_3", "a".into(), "b".into()), 3);
    }
}
