//! herdspike-core: Core types for spike detection and sorting.
//!
//! This crate provides the foundational data model shared by the probe
//! readers, the detection and clustering algorithms and the file formats:
//! channel topology, dense sample blocks, spike events and cluster labels.
//!

pub mod block;
pub mod clustering;
pub mod error;
pub mod params;
pub mod soa;
pub mod topology;

pub use block::SampleBlock;
pub use clustering::{ClusterAssignment, ClusterLabel};
pub use error::{Error, Result};
pub use params::ProbeParams;
pub use soa::{DetectedEvent, SpikeBatch};
pub use topology::{ChannelTopology, Position};
