//! Cluster labels and per-event assignments.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Cluster membership of a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ClusterLabel {
    /// Member of cluster `n`.
    Cluster(u32),
    /// Not assigned to any cluster.
    Noise,
}

impl ClusterLabel {
    /// Decodes the `-1 = noise` integer convention used in storage.
    #[must_use]
    pub fn from_raw(raw: i32) -> Self {
        u32::try_from(raw).map_or(Self::Noise, Self::Cluster)
    }

    /// Encodes as an integer, `-1` for noise.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn to_raw(self) -> i32 {
        match self {
            Self::Cluster(n) => n as i32,
            Self::Noise => -1,
        }
    }

    /// Returns true for noise.
    #[must_use]
    pub fn is_noise(self) -> bool {
        matches!(self, Self::Noise)
    }
}

/// Sorting result for one event.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusterAssignment {
    /// Index of the event in the clustered batch.
    pub event: usize,
    /// Assigned cluster.
    pub label: ClusterLabel,
    /// Reduced shape features of the event.
    pub features: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_raw_conversion() {
        assert_eq!(ClusterLabel::from_raw(-1), ClusterLabel::Noise);
        assert_eq!(ClusterLabel::from_raw(7), ClusterLabel::Cluster(7));
        assert_eq!(ClusterLabel::Cluster(3).to_raw(), 3);
        assert_eq!(ClusterLabel::Noise.to_raw(), -1);
        assert!(ClusterLabel::Noise.is_noise());
    }
}
