//! # Mural Registry
//!
//! The registry assigns each replica a stable rank at first contact, tracks
//! liveness through heartbeats, and answers peer listings. This crate holds
//! both the client used by every replica and a reference server so a
//! cluster can run without external collaborators.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod error;
mod server;

pub use client::RegistryClient;
pub use error::{RegistryError, Result};
pub use server::RegistryServer;
