//! herdspike-algorithms: spike detection and sorting algorithms.
//!
//! This crate provides the numerical stages of the pipeline:
//! - **Detection** - per-channel threshold crossing with dead time
//! - **Merging** - collapse of one spike seen on neighbouring channels
//! - **Localisation** - centre of mass over the inner neighbourhood
//! - **PCA** - waveform shape features
//! - **Mean shift** - flat-kernel clustering on a bounded worker pool
//!

pub mod detect;
pub mod localize;
pub mod mean_shift;
pub mod merge;
pub mod pca;
mod processing;
pub mod spatial;

pub use detect::{channel_medians, span_indices, Baselines, Candidate, ThresholdParams};
pub use localize::InnerNeighborhoods;
pub use mean_shift::{MeanShift, MeanShiftConfig, MeanShiftModel, Points};
pub use merge::merge_neighbors;
pub use pca::Pca;
pub use processing::{BlockDetections, CutoutWindow, SpikeDetector};
pub use spatial::SpatialGrid;
