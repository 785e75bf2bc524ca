//! Shared helpers for the cluster integration tests.

#![allow(dead_code)]

use mural_node::{ReplicaConfig, TimingConfig};
use mural_registry::RegistryServer;
use mural_types::MessageRecord;
use mural_wire::{call_once, read_raw_frame, ClientRequest, Envelope, ReplyData};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

/// Spawns an in-memory registry on an ephemeral port.
pub async fn spawn_registry() -> (String, watch::Sender<bool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(RegistryServer::open(None).serve(listener, stop_rx));
    (addr, stop_tx)
}

/// A replica configuration with ephemeral ports and compressed timings.
pub fn replica_config(name: &str, registry_addr: &str, data_dir: &Path) -> ReplicaConfig {
    ReplicaConfig {
        server_name: name.to_string(),
        sync_interval: 2,
        client_addr: "127.0.0.1:0".parse().unwrap(),
        replication_addr: "127.0.0.1:0".parse().unwrap(),
        election_addr: "127.0.0.1:0".parse().unwrap(),
        advertise_host: "127.0.0.1".to_string(),
        data_dir: data_dir.to_path_buf(),
        registry_addr: registry_addr.to_string(),
        proxy_addr: None,
        timing: TimingConfig {
            coordinator_timeout_secs: 2.0,
            replication_timeout_secs: 1.0,
            berkeley_timeout_secs: 1.0,
            election_timeout_secs: 1.0,
            announcement_timeout_secs: 2.0,
            heartbeat_secs: 0.3,
            monitor_secs: 0.3,
            registry_timeout_secs: 1.0,
        },
        ..ReplicaConfig::default()
    }
}

/// One client call against a replica's client socket.
pub async fn call(addr: SocketAddr, request: &ClientRequest) -> Envelope<ReplyData> {
    call_once(&addr.to_string(), request, Duration::from_secs(2))
        .await
        .expect("client call failed")
}

pub fn login(user: &str) -> ClientRequest {
    ClientRequest::Login {
        user: user.to_string(),
        clock: 0,
    }
}

pub fn channel(channel: &str) -> ClientRequest {
    ClientRequest::Channel {
        channel: channel.to_string(),
        clock: 0,
    }
}

pub fn publish(user: &str, channel: &str, message: &str) -> ClientRequest {
    ClientRequest::Publish {
        user: user.to_string(),
        channel: channel.to_string(),
        message: message.to_string(),
        clock: 0,
    }
}

pub fn get_history(channel: &str, limit: i64) -> ClientRequest {
    ClientRequest::GetHistory {
        channel: channel.to_string(),
        limit,
        clock: 0,
    }
}

/// Extracts the message bodies of a history reply, in reply order.
pub fn bodies(records: &[MessageRecord]) -> Vec<String> {
    records
        .iter()
        .map(|record| match record {
            MessageRecord::Publish { message, .. } | MessageRecord::Message { message, .. } => {
                message.clone()
            }
        })
        .collect()
}

/// A fake publication proxy: accepts connections and forwards
/// (topic, payload) frame pairs.
pub async fn spawn_proxy() -> (String, mpsc::UnboundedReceiver<(String, Vec<u8>)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                loop {
                    let Ok(topic) = read_raw_frame(&mut stream).await else {
                        return;
                    };
                    let Ok(payload) = read_raw_frame(&mut stream).await else {
                        return;
                    };
                    let _ = tx.send((String::from_utf8_lossy(&topic).into_owned(), payload));
                }
            });
        }
    });
    (addr, rx)
}
