//! The server-to-server replication listener.

use crate::{apply_payload, ReplicationEvent};
use mural_storage::{Datastore, Journal};
use mural_wire::{
    read_frame, write_frame, AckReply, Envelope, PeerRequest, ReplicateAck, SyncStateReply,
    TimeReply, WireError,
};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Serves the replication socket until the stop flag flips.
///
/// Accepts `replicate` pushes, `sync_state` snapshot requests from
/// restarting peers, and the Berkeley `get_time` / `adjust_time` pair.
pub async fn serve_replication(
    store: Arc<Datastore>,
    journal: Journal,
    listener: TcpListener,
    mut stop: watch::Receiver<bool>,
) {
    info!(addr = ?listener.local_addr().ok(), "Replication listener ready");
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Replication accept failed");
                        continue;
                    }
                };
                debug!(peer = %peer, "Replication connection");
                let store = store.clone();
                let journal = journal.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(&store, &journal, stream).await {
                        debug!(error = %e, "Replication connection closed");
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    store: &Datastore,
    journal: &Journal,
    mut stream: TcpStream,
) -> Result<(), WireError> {
    loop {
        let request: PeerRequest = match read_frame(&mut stream).await {
            Ok(request) => request,
            Err(WireError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match request {
            PeerRequest::Replicate {
                source,
                clock,
                payload,
            } => {
                let merged = store.merge_clock(clock);
                journal.append(&ReplicationEvent {
                    timestamp: store.now(),
                    source: &source,
                    payload: &payload,
                });
                let (kind, count) = apply_payload(store, payload);
                // The push replaces the disk copy too; a failed flush keeps
                // the in-memory truth and the next one retries.
                if let Err(e) = store.persist(kind) {
                    warn!(kind = %kind, error = %e, "Failed to persist replicated sequence");
                }
                debug!(source = %source, kind = %kind, records = count, "Applied replication push");
                let reply = Envelope::new(
                    "replicate",
                    ReplicateAck {
                        status: "success".to_string(),
                        records_received: count,
                        clock: merged,
                    },
                );
                write_frame(&mut stream, &reply).await?;
            }
            PeerRequest::SyncState { server, clock } => {
                store.merge_clock(clock);
                let snapshot = store.snapshot();
                info!(peer = %server, records = snapshot.len(), "Serving full-state snapshot");
                let reply = Envelope::new(
                    "sync_state",
                    SyncStateReply {
                        status: "success".to_string(),
                        logins: snapshot.logins,
                        channels: snapshot.channels,
                        messages: snapshot.messages,
                        clock: store.current_clock(),
                    },
                );
                write_frame(&mut stream, &reply).await?;
            }
            PeerRequest::GetTime {} => {
                let reply = Envelope::new(
                    "get_time",
                    TimeReply { time: store.now() },
                );
                write_frame(&mut stream, &reply).await?;
            }
            PeerRequest::AdjustTime { offset } => {
                let total = store.adjust_offset(offset);
                debug!(offset, total, "Applied Berkeley offset");
                let reply = Envelope::new(
                    "adjust_time",
                    AckReply {
                        status: "success".to_string(),
                    },
                );
                write_frame(&mut stream, &reply).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mural_wire::call_once;
    use mural_wire::StatePayload;
    use mural_types::LoginRecord;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn spawn_listener(
        store: Arc<Datastore>,
        journal: Journal,
    ) -> (String, watch::Sender<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(serve_replication(store, journal, listener, stop_rx));
        (addr, stop_tx)
    }

    #[tokio::test]
    async fn replicate_replaces_sequence_and_acks() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Datastore::open(dir.path()).unwrap());
        let journal = Journal::open(dir.path().join("journal").join("replication.jsonl")).unwrap();
        let (addr, _stop) = spawn_listener(store.clone(), journal).await;

        let request = PeerRequest::Replicate {
            source: "server_1".to_string(),
            clock: 7,
            payload: StatePayload::Logins {
                records: vec![LoginRecord {
                    user: "alice".to_string(),
                    timestamp: 1.0,
                    clock: 1,
                }],
            },
        };
        let ack: Envelope<ReplicateAck> =
            call_once(&addr, &request, Duration::from_secs(1)).await.unwrap();

        assert_eq!(ack.data.status, "success");
        assert_eq!(ack.data.records_received, 1);
        assert!(ack.data.clock > 7);
        assert_eq!(store.users(), vec!["alice".to_string()]);

        // The journal recorded the incoming transfer.
        let journal_path = dir.path().join("journal").join("replication.jsonl");
        let contents = std::fs::read_to_string(journal_path).unwrap();
        assert!(contents.contains("\"source\":\"server_1\""));
        assert!(contents.contains("\"kind\":\"logins\""));
    }

    #[tokio::test]
    async fn sync_state_returns_full_snapshot() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Datastore::open(dir.path()).unwrap());
        store.login("alice").unwrap();
        store.create_channel("geral").unwrap();
        store.publish("alice", "geral", "oi").unwrap();
        let journal = Journal::open(dir.path().join("journal").join("replication.jsonl")).unwrap();
        let (addr, _stop) = spawn_listener(store, journal).await;

        let request = PeerRequest::SyncState {
            server: "server_2".to_string(),
            clock: 0,
        };
        let reply: Envelope<SyncStateReply> =
            call_once(&addr, &request, Duration::from_secs(1)).await.unwrap();

        assert_eq!(reply.data.logins.len(), 1);
        assert_eq!(reply.data.channels.len(), 1);
        assert_eq!(reply.data.messages.len(), 1);
    }

    #[tokio::test]
    async fn time_services_report_and_shift_the_clock() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Datastore::open(dir.path()).unwrap());
        let journal = Journal::open(dir.path().join("journal").join("replication.jsonl")).unwrap();
        let (addr, _stop) = spawn_listener(store.clone(), journal).await;

        let before: Envelope<TimeReply> =
            call_once(&addr, &PeerRequest::GetTime {}, Duration::from_secs(1))
                .await
                .unwrap();

        let _: Envelope<AckReply> = call_once(
            &addr,
            &PeerRequest::AdjustTime { offset: 5.0 },
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let after: Envelope<TimeReply> =
            call_once(&addr, &PeerRequest::GetTime {}, Duration::from_secs(1))
                .await
                .unwrap();

        assert!(after.data.time - before.data.time >= 4.5);
        assert_eq!(store.time_offset(), 5.0);
    }
}
