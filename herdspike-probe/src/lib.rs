//! herdspike-probe: probe models and raw recording readers.
//!
//! A [`Probe`] pairs a channel layout with an optional raw data source and
//! exposes a uniform, random-access, time-windowed read over every
//! supported recording format.
//!
//! # Key Components
//!
//! - [`ProbeConfig`] - JSON-loadable configuration with per-variant presets
//! - [`Probe`] - `Configured` recording or `MetadataOnly` layout
//! - [`RawSource`] - storage backend trait, one implementation per format
//!
//! # Formats
//!
//! | Variant | Source |
//! |---|---|
//! | NeuroPixel, Generic | [`FlatBinarySource`] (memory-mapped interleaved `i16`) |
//! | BioCam | `BrwSource` (feature `hdf5`) |
//! | Mea1k | `MaxOneSource` (feature `hdf5`) |

#[cfg(feature = "hdf5")]
pub mod brw;
pub mod config;
pub mod error;
pub mod flat;
#[cfg(feature = "hdf5")]
pub mod maxone;
pub mod probe;
pub mod source;

pub use config::{NeighborSource, ProbeConfig, ProbeKind};
pub use error::{Error, Result};
pub use flat::FlatBinarySource;
pub use probe::{Probe, ProbeLayout, Recording};
pub use source::{InMemorySource, RawSource};

#[cfg(feature = "hdf5")]
pub use brw::{BrwSource, BrwVersion};
#[cfg(feature = "hdf5")]
pub use maxone::MaxOneSource;
