//! Borrowed view of a clustering result, shared by the sorted-store writers.

use herdspike_core::{ClusterLabel, SpikeBatch};

/// Rows of a clustering result selected for output.
#[derive(Debug, Clone, Copy)]
pub struct SortedView<'a> {
    /// All clustered events.
    pub events: &'a SpikeBatch,
    /// One label per event.
    pub labels: &'a [ClusterLabel],
    /// Row-major `events x n_features` shape features.
    pub features: &'a [f32],
    pub n_features: usize,
    /// Source file index of every event.
    pub sources: &'a [u32],
    /// Events to emit, in output order.
    pub indices: &'a [usize],
    /// Row-major `clusters x centre_dim` cluster centres.
    pub centres: &'a [f64],
    pub centre_dim: usize,
    /// Sampling rate of the recordings (Hz).
    pub sampling_rate: f64,
}

impl SortedView<'_> {
    /// Shape features of event `index`; empty before PCA.
    #[must_use]
    pub fn features_of(&self, index: usize) -> &[f32] {
        let start = index * self.n_features;
        self.features
            .get(start..start + self.n_features)
            .unwrap_or(&[])
    }

    /// Number of emitted rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Number of cluster centres.
    #[must_use]
    pub fn n_clusters(&self) -> usize {
        if self.centre_dim == 0 {
            0
        } else {
            self.centres.len() / self.centre_dim
        }
    }
}
