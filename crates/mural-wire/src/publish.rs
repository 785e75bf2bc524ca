//! Publication writer feeding the external pub/sub proxy.

use crate::{write_raw_frame, Envelope};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Queue depth between request handlers and the proxy connection.
const PUBLISH_BACKLOG: usize = 1024;

struct Publication {
    topic: String,
    payload: Vec<u8>,
}

/// Best-effort publisher.
///
/// Each publication is two frames: the raw topic, then the packed
/// `{service, data}` payload. A background task owns the proxy connection
/// and reconnects on demand; when the proxy is unreachable the publication
/// is logged and dropped — fan-out is a transparent pipe, not part of the
/// replication guarantees.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: Option<mpsc::Sender<Publication>>,
}

impl Publisher {
    /// Creates a publisher connected to the proxy at `addr`.
    pub fn connect(addr: String, stop: watch::Receiver<bool>) -> Self {
        let (tx, rx) = mpsc::channel(PUBLISH_BACKLOG);
        tokio::spawn(run_publisher(addr, rx, stop));
        Self { tx: Some(tx) }
    }

    /// A publisher that silently discards everything, for replicas running
    /// without a proxy.
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Enqueues one publication. Never blocks the caller.
    pub fn publish<T: Serialize>(&self, topic: &str, service: &str, data: &T) {
        self.publish_envelope(topic, &Envelope::new(service, data));
    }

    /// Enqueues a payload that is already a `{service, data}` envelope
    /// (election announcements serialize that way on their own).
    pub fn publish_envelope<T: Serialize>(&self, topic: &str, envelope: &T) {
        let Some(tx) = &self.tx else {
            return;
        };
        let payload = match rmp_serde::to_vec_named(envelope) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(topic, error = %e, "Failed to pack publication");
                return;
            }
        };
        let publication = Publication {
            topic: topic.to_string(),
            payload,
        };
        if tx.try_send(publication).is_err() {
            warn!(topic, "Publication backlog full, dropping");
        }
    }
}

async fn run_publisher(
    addr: String,
    mut rx: mpsc::Receiver<Publication>,
    mut stop: watch::Receiver<bool>,
) {
    let mut stream: Option<TcpStream> = None;

    loop {
        let publication = tokio::select! {
            publication = rx.recv() => match publication {
                Some(publication) => publication,
                None => break,
            },
            _ = stop.changed() => break,
        };

        if stream.is_none() {
            match TcpStream::connect(&addr).await {
                Ok(connected) => {
                    debug!(addr = %addr, "Connected to publication proxy");
                    stream = Some(connected);
                }
                Err(e) => {
                    warn!(addr = %addr, error = %e, topic = %publication.topic,
                        "Proxy unreachable, dropping publication");
                    continue;
                }
            }
        }

        if let Some(connected) = stream.as_mut() {
            let sent = async {
                write_raw_frame(connected, publication.topic.as_bytes()).await?;
                write_raw_frame(connected, &publication.payload).await
            }
            .await;
            if let Err(e) = sent {
                warn!(addr = %addr, error = %e, topic = %publication.topic,
                    "Publication failed, resetting proxy connection");
                stream = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_raw_frame;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn publishes_topic_then_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (_stop_tx, stop_rx) = watch::channel(false);

        let publisher = Publisher::connect(addr, stop_rx);
        publisher.publish("geral", "publish", &serde_json::json!({"message": "oi"}));

        let (mut stream, _) = listener.accept().await.unwrap();
        let topic = read_raw_frame(&mut stream).await.unwrap();
        assert_eq!(topic, b"geral");

        let payload = read_raw_frame(&mut stream).await.unwrap();
        let envelope: Envelope<serde_json::Value> = rmp_serde::from_slice(&payload).unwrap();
        assert_eq!(envelope.service, "publish");
        assert_eq!(envelope.data["message"], "oi");
    }

    #[tokio::test]
    async fn disabled_publisher_is_a_no_op() {
        let publisher = Publisher::disabled();
        publisher.publish("geral", "publish", &serde_json::json!({}));
    }
}
