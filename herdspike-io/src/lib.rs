//! herdspike-io: detection and clustering drivers and their file formats.
//!
//! This crate wires a [`herdspike_probe::Recording`] to the algorithms and
//! persists the results:
//! - **Detection** - windowed scan of a recording into a binary event store
//! - **Clustering** - shape PCA and mean shift over one or more stores
//! - **Output** - CSV writers, the HDF5 sorted store and probe layout SVGs
//!

mod chunking;
mod clustering;
mod detection;
mod error;
pub mod event_store;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod layout;
mod sorted;
mod writer;

pub use chunking::{frame_windows, ChunkConfig, FrameWindow};
pub use clustering::{Clustering, CombinedClusteringConfig};
pub use detection::{Detection, DetectionConfig, DetectionSummary, DEFAULT_BASELINE_FRAMES};
pub use error::{Error, Result};
pub use event_store::{
    read_event_store, write_event_store, EventStoreReader, EventStoreWriter, StoreHeader,
};
#[cfg(feature = "hdf5")]
pub use hdf5::{read_sorted_hdf5, write_sorted_hdf5, SortedStore};
pub use layout::{render_layout_svg, write_layout_svg};
pub use sorted::SortedView;
pub use writer::CsvWriter;
