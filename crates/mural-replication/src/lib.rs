//! # Mural Replication
//!
//! Peer-to-peer state transfer between replicas: the replication listener
//! (`replicate`, `sync_state`, `get_time`, `adjust_time`), the scheduled
//! push of all three sequences to every live peer, the pull-on-start
//! snapshot, and the coordinator's Berkeley clock cycle.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod berkeley;
mod listener;
mod push;

pub use berkeley::run_berkeley_cycle;
pub use listener::serve_replication;
pub use push::{push_to_peers, sync_on_start};

use mural_storage::Datastore;
use mural_types::RecordKind;
use mural_wire::StatePayload;
use serde::Serialize;

/// One entry of the diagnostic replication journal: an incoming state
/// transfer, with the records it carried.
#[derive(Debug, Serialize)]
pub struct ReplicationEvent<'a> {
    /// Receiver's offset-corrected time at receipt.
    pub timestamp: f64,
    /// Name of the pushing replica.
    pub source: &'a str,
    /// The replaced sequence (`kind` + `records`).
    #[serde(flatten)]
    pub payload: &'a StatePayload,
}

/// Replaces the sequence named by `payload` wholesale, returning the kind
/// and the record count now held.
pub(crate) fn apply_payload(store: &Datastore, payload: StatePayload) -> (RecordKind, usize) {
    let kind = payload.kind();
    let count = match payload {
        StatePayload::Logins { records } => store.replace_logins(records),
        StatePayload::Channels { records } => store.replace_channels(records),
        StatePayload::Messages { records } => store.replace_messages(records),
    };
    (kind, count)
}
