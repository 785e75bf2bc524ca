//! # Mural Storage
//!
//! The per-replica datastore: the three record sequences, the Lamport
//! counter, the processed-request counter, and the Berkeley time offset,
//! all behind one mutex, persisted as JSON arrays with atomic full-file
//! replacement. Diagnostic journals for replication and election events
//! live here too.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod datastore;
mod error;
mod journal;

pub use datastore::{atomic_write_json, Datastore};
pub use error::{Result, StoreError};
pub use journal::Journal;
