//! # Mural Types
//!
//! Common types shared by every Mural crate: the persisted record shapes,
//! the Lamport clock, state snapshots exchanged during replication, and the
//! registry entries that describe cluster membership.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod record;
mod registry;

pub use clock::LamportClock;
pub use record::{
    ChannelRecord, LoginRecord, MessageRecord, RecordKind, Stamp, Stamped, StateSnapshot,
};
pub use registry::ServerInfo;
