//! Scheduled state pushes and the pull-on-start snapshot.

use crate::{apply_payload, ReplicationEvent};
use mural_registry::RegistryClient;
use mural_storage::{Datastore, Journal};
use mural_wire::{call_once, Envelope, PeerRequest, ReplicateAck, StatePayload, SyncStateReply};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Ships all three sequences to every listed peer, one task per
/// (peer, kind), each bounded by `deadline`. Failures are logged and not
/// retried: the next scheduled push subsumes them.
pub async fn push_to_peers(
    store: &Arc<Datastore>,
    peers: &[mural_types::ServerInfo],
    source: &str,
    deadline: Duration,
) {
    let snapshot = store.snapshot();
    let payloads = [
        StatePayload::Logins {
            records: snapshot.logins,
        },
        StatePayload::Channels {
            records: snapshot.channels,
        },
        StatePayload::Messages {
            records: snapshot.messages,
        },
    ];

    let mut transfers = Vec::new();
    for peer in peers.iter().filter(|peer| peer.server != source) {
        for payload in &payloads {
            let request = PeerRequest::Replicate {
                source: source.to_string(),
                clock: store.reply_stamp().clock,
                payload: payload.clone(),
            };
            let addr = peer.replication_addr.clone();
            let peer_name = peer.server.clone();
            let kind = payload.kind();
            let store = store.clone();
            transfers.push(tokio::spawn(async move {
                match call_once::<_, Envelope<ReplicateAck>>(&addr, &request, deadline).await {
                    Ok(ack) => {
                        store.merge_clock(ack.data.clock);
                        debug!(peer = %peer_name, kind = %kind,
                            records = ack.data.records_received, "Pushed sequence");
                    }
                    Err(e) => {
                        warn!(peer = %peer_name, kind = %kind, error = %e,
                            "Replication push failed");
                    }
                }
            }));
        }
    }

    for transfer in transfers {
        let _ = transfer.await;
    }
}

/// Pulls a full snapshot from the cluster on startup.
///
/// The source is the live peer with the lowest rank — the coordinator under
/// the cold-start convention. Returns true when the local sequences were
/// overwritten; on any failure the replica proceeds with whatever it loaded
/// from disk.
pub async fn sync_on_start(
    store: &Arc<Datastore>,
    registry: &RegistryClient,
    journal: &Journal,
    server: &str,
    liveness_window: f64,
    deadline: Duration,
) -> bool {
    let servers = registry.list().await;
    let now = store.now();
    let source = servers
        .iter()
        .filter(|peer| peer.server != server && peer.is_live(now, liveness_window))
        .min_by_key(|peer| peer.rank);
    let Some(source) = source else {
        info!("No live peer to sync from, keeping on-disk state");
        return false;
    };

    let request = PeerRequest::SyncState {
        server: server.to_string(),
        clock: store.reply_stamp().clock,
    };
    let reply: Envelope<SyncStateReply> =
        match call_once(&source.replication_addr, &request, deadline).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(peer = %source.server, error = %e,
                    "Startup sync failed, keeping on-disk state");
                return false;
            }
        };

    store.merge_clock(reply.data.clock);
    let payloads = [
        StatePayload::Logins {
            records: reply.data.logins,
        },
        StatePayload::Channels {
            records: reply.data.channels,
        },
        StatePayload::Messages {
            records: reply.data.messages,
        },
    ];
    for payload in payloads {
        journal.append(&ReplicationEvent {
            timestamp: store.now(),
            source: &source.server,
            payload: &payload,
        });
        let (kind, count) = apply_payload(store, payload);
        debug!(kind = %kind, records = count, "Adopted snapshot sequence");
        if let Err(e) = store.persist(kind) {
            warn!(kind = %kind, error = %e, "Failed to persist synced sequence");
        }
    }
    info!(peer = %source.server, "Synced full state from coordinator");
    true
}
