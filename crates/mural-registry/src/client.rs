//! Registry client used by every replica.

use crate::{RegistryError, Result};
use mural_types::ServerInfo;
use mural_wire::{call_once, AckReply, Envelope, ListReply, RankReply, RegistryRequest};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Client for the registry's `rank`, `list`, and `heartbeat` services.
///
/// The last successful listing is cached; when the registry is unreachable
/// the replica keeps working against the cached peer list and the next
/// successful contact refreshes it.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    addr: String,
    deadline: Duration,
    cache: Arc<RwLock<Vec<ServerInfo>>>,
}

impl RegistryClient {
    /// Creates a client for the registry at `addr`.
    pub fn new(addr: impl Into<String>, deadline: Duration) -> Self {
        Self {
            addr: addr.into(),
            deadline,
            cache: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Registers (or re-fetches) this replica's rank, announcing its peer
    /// endpoints. Ranks are stable for the registry's lifetime.
    pub async fn rank(
        &self,
        server: &str,
        replication_addr: &str,
        election_addr: &str,
    ) -> Result<u64> {
        let request = RegistryRequest::Rank {
            server: server.to_string(),
            replication_addr: replication_addr.to_string(),
            election_addr: election_addr.to_string(),
        };
        let reply: Envelope<RankReply> = call_once(&self.addr, &request, self.deadline).await?;
        if reply.data.status != "success" {
            return Err(RegistryError::Rejected(reply.data.status));
        }
        Ok(reply.data.rank)
    }

    /// Lists all registered servers. Falls back to the cached listing when
    /// the registry is unreachable.
    pub async fn list(&self) -> Vec<ServerInfo> {
        let request = RegistryRequest::List {};
        match call_once::<_, Envelope<ListReply>>(&self.addr, &request, self.deadline).await {
            Ok(reply) => {
                *self.cache.write() = reply.data.servers.clone();
                reply.data.servers
            }
            Err(e) => {
                warn!(registry = %self.addr, error = %e, "Registry unreachable, using cached peer list");
                self.cache.read().clone()
            }
        }
    }

    /// The last successfully fetched listing.
    #[must_use]
    pub fn cached(&self) -> Vec<ServerInfo> {
        self.cache.read().clone()
    }

    /// Refreshes this replica's liveness timestamp.
    pub async fn heartbeat(&self, server: &str) -> Result<()> {
        let request = RegistryRequest::Heartbeat {
            server: server.to_string(),
        };
        let reply: Envelope<AckReply> = call_once(&self.addr, &request, self.deadline).await?;
        if reply.data.status != "success" {
            return Err(RegistryError::Rejected(reply.data.status));
        }
        Ok(())
    }
}
