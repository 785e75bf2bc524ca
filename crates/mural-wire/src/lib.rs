//! # Mural Wire
//!
//! The wire protocol spoken on every Mural socket: client requests through
//! the broker, peer-to-peer replication and time probes, election traffic,
//! and the registry. All of them exchange length-prefixed MessagePack maps
//! shaped `{service, data}`; publications add a leading raw topic frame.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod error;
mod frame;
mod message;
mod publish;

pub use client::{call_once, RpcClient};
pub use error::{Result, WireError};
pub use frame::{read_frame, read_raw_frame, write_frame, write_raw_frame, MAX_FRAME_SIZE};
pub use message::{
    AckReply, ClientRequest, ElectionReply, ElectionRequest, Envelope, ListReply, PeerRequest,
    RankReply, RegistryRequest, ReplicateAck, ReplyData, StatePayload, SyncStateReply, TimeReply,
    EVENT_NEW_COORDINATOR, STATUS_ERROR, STATUS_OK, STATUS_SUCCESS,
};
pub use publish::Publisher;

/// Topic carrying election and registry notifications.
pub const SERVERS_TOPIC: &str = "servers";
