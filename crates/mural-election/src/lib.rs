//! # Mural Election
//!
//! Bully coordinator election. A replica that suspects the coordinator is
//! dead challenges every higher-ranked live peer; the survivor with no
//! higher-ranked living peer announces itself to the cluster. At cold start
//! the lowest-ranked live replica seeds the role instead.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod manager;
mod monitor;

pub use manager::{ElectionConfig, ElectionManager, Phase};
pub use monitor::run_monitor;
