//! # Mural Node
//!
//! One replica of the Mural message-server cluster: the eight-service
//! client request handler, the replication and election listeners, the
//! heartbeat and liveness background tasks, and the configuration that
//! wires them together.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod handler;
mod replica;

pub use config::{ConfigError, LoggingConfig, ReplicaConfig, TimingConfig};
pub use replica::{Replica, ReplicaAddrs, StartError};
