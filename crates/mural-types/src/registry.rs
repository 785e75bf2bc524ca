//! Registry entries describing cluster membership.

use serde::{Deserialize, Serialize};

/// One registered replica, as returned by the registry's `list` service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Unique server name (the replica's `SERVER_NAME`).
    pub server: String,
    /// Rank assigned at first registration; stable for the process lifetime.
    pub rank: u64,
    /// Wall-clock time of the last heartbeat received by the registry.
    pub last_heartbeat: f64,
    /// Address of the replica's replication socket.
    pub replication_addr: String,
    /// Address of the replica's election socket.
    pub election_addr: String,
}

impl ServerInfo {
    /// True when the server's last heartbeat is within `max_age` seconds of
    /// `now`. Replicas use this to drop dead peers from push targets and to
    /// detect a failed coordinator.
    #[must_use]
    pub fn is_live(&self, now: f64, max_age: f64) -> bool {
        now - self.last_heartbeat <= max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(last_heartbeat: f64) -> ServerInfo {
        ServerInfo {
            server: "server_1".to_string(),
            rank: 1,
            last_heartbeat,
            replication_addr: "127.0.0.1:6000".to_string(),
            election_addr: "127.0.0.1:6001".to_string(),
        }
    }

    #[test]
    fn liveness_window() {
        let server = info(100.0);
        assert!(server.is_live(110.0, 15.0));
        assert!(!server.is_live(120.0, 15.0));
    }
}
