//! Berkeley wall-clock averaging, run by the coordinator.

use futures::future::join_all;
use mural_storage::Datastore;
use mural_types::ServerInfo;
use mural_wire::{call_once, AckReply, Envelope, PeerRequest, TimeReply};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One Berkeley cycle: probe every peer's clock in parallel, average the
/// responders together with the local reading, and distribute additive
/// offsets. Returns the number of peers that contributed a reading.
pub async fn run_berkeley_cycle(
    store: &Arc<Datastore>,
    peers: &[ServerInfo],
    server: &str,
    deadline: Duration,
) -> usize {
    let targets: Vec<&ServerInfo> = peers.iter().filter(|peer| peer.server != server).collect();

    let probes = targets.iter().map(|peer| {
        let addr = peer.replication_addr.clone();
        async move {
            let reply: Result<Envelope<TimeReply>, _> =
                call_once(&addr, &PeerRequest::GetTime {}, deadline).await;
            (*peer, reply)
        }
    });
    let probed = join_all(probes).await;

    // Non-responders are dropped for this round only.
    let mut readings: Vec<(Option<&ServerInfo>, f64)> = vec![(None, store.now())];
    for (peer, reply) in &probed {
        match reply {
            Ok(envelope) => readings.push((Some(*peer), envelope.data.time)),
            Err(e) => warn!(peer = %peer.server, error = %e, "Berkeley probe failed"),
        }
    }

    let times: Vec<f64> = readings.iter().map(|(_, time)| *time).collect();
    let offsets = compute_offsets(&times);

    let corrections = readings.iter().zip(offsets).map(|((peer, _), offset)| async move {
        match peer {
            None => {
                let total = store.adjust_offset(offset);
                debug!(offset, total, "Applied own Berkeley offset");
            }
            Some(peer) => {
                let request = PeerRequest::AdjustTime { offset };
                match call_once::<_, Envelope<AckReply>>(&peer.replication_addr, &request, deadline)
                    .await
                {
                    Ok(_) => debug!(peer = %peer.server, offset, "Distributed Berkeley offset"),
                    Err(e) => {
                        warn!(peer = %peer.server, error = %e, "Berkeley adjustment failed");
                    }
                }
            }
        }
    });
    join_all(corrections).await;

    readings.len() - 1
}

/// For each reading, the additive offset that moves it to the mean.
fn compute_offsets(readings: &[f64]) -> Vec<f64> {
    if readings.is_empty() {
        return Vec::new();
    }
    let avg = readings.iter().sum::<f64>() / readings.len() as f64;
    readings.iter().map(|reading| avg - reading).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_clocks_produce_zero_offsets() {
        let offsets = compute_offsets(&[100.0, 100.0, 100.0]);
        assert!(offsets.iter().all(|offset| offset.abs() < f64::EPSILON));
    }

    #[test]
    fn offsets_move_every_reading_to_the_mean() {
        let readings = [100.0, 103.0, 106.0];
        let offsets = compute_offsets(&readings);
        assert!((offsets[0] - 3.0).abs() < 1e-9);
        assert!((offsets[1] - 0.0).abs() < 1e-9);
        assert!((offsets[2] + 3.0).abs() < 1e-9);

        // Corrected clocks agree.
        let corrected: Vec<f64> = readings
            .iter()
            .zip(&offsets)
            .map(|(reading, offset)| reading + offset)
            .collect();
        assert!((corrected[0] - corrected[1]).abs() < 1e-9);
        assert!((corrected[1] - corrected[2]).abs() < 1e-9);
    }

    #[test]
    fn skew_is_split_across_the_cluster() {
        // One peer 5 s ahead of two agreeing peers: its correction is
        // -5 * (n-1)/n, everyone else moves up by 5/n.
        let offsets = compute_offsets(&[100.0, 100.0, 105.0]);
        assert!((offsets[2] + 5.0 * 2.0 / 3.0).abs() < 1e-9);
        assert!((offsets[0] - 5.0 / 3.0).abs() < 1e-9);
    }
}
