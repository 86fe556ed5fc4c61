//! Error types for herdspike-core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for herdspike operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for herdspike operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A file could not be opened or read.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A topology line could not be parsed.
    #[error("format error in {} line {line}: {message}", path.display())]
    Format {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Channel index outside the probe.
    #[error("channel index {channel} out of range (probe has {num_channels} channels)")]
    ChannelIndex { channel: usize, num_channels: usize },

    /// Inconsistent data (counts, lengths, shapes).
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Clustering error.
    #[error("clustering error: {0}")]
    Clustering(String),
}
