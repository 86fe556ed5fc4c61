//! Probe and raw-reader error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for probe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Probe error types.
#[derive(Error, Debug)]
pub enum Error {
    /// The recording file could not be opened or mapped.
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// HDF5 library error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// Missing or malformed header field.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Sample or frame counts do not add up.
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// Read window outside the recording.
    #[error("read window [{t0}, {t1}) outside recording of {n_frames} frames")]
    Range {
        t0: usize,
        t1: usize,
        n_frames: usize,
    },

    /// Read attempted on a probe built without a data file.
    #[error("probe {probe} has no data file (metadata-only)")]
    NotConfigured { probe: String },

    /// Invalid probe configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Probe configuration JSON could not be parsed.
    #[error("invalid probe configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] herdspike_core::Error),
}
