//! Spike localisation by centre of mass over the inner neighbourhood.

use herdspike_core::{ChannelTopology, Result, SampleBlock};

/// Per-channel lists of unmasked inner neighbours.
#[derive(Clone, Debug)]
pub struct InnerNeighborhoods {
    lists: Vec<Vec<usize>>,
}

impl InnerNeighborhoods {
    /// Collects, for each channel, itself and its neighbours within
    /// `inner_radius` that are not masked.
    ///
    /// # Errors
    /// Returns a channel index error if the topology is inconsistent.
    pub fn new(topology: &ChannelTopology, inner_radius: f64, mask: &[bool]) -> Result<Self> {
        let lists = (0..topology.len())
            .map(|channel| {
                let mut inner = topology.inner_neighbors(channel, inner_radius)?;
                if !inner.contains(&channel) {
                    inner.insert(0, channel);
                }
                inner.retain(|&c| !mask.get(c).copied().unwrap_or(false));
                Ok(inner)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { lists })
    }

    /// Inner neighbours of `channel`; empty for unknown channels.
    #[must_use]
    pub fn of(&self, channel: usize) -> &[usize] {
        self.lists.get(channel).map_or(&[], Vec::as_slice)
    }
}

/// Estimates where a spike originated.
///
/// `peak` is local to `block`; `baseline` gives the baseline of a channel
/// at the peak. The weight of each inner neighbour is its
/// largest baseline-subtracted amplitude within `spike_delay` frames of the
/// peak. With more than one contributing channel, weights are shifted so
/// the smallest becomes 1. Falls back to the spike channel's position when
/// no weight remains.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn center_of_mass(
    block: &SampleBlock,
    baseline: impl Fn(usize) -> i32,
    channel: usize,
    peak: usize,
    neighborhoods: &InnerNeighborhoods,
    topology: &ChannelTopology,
    spike_delay: usize,
) -> (f32, f32) {
    let positions = topology.positions();
    let fallback = positions
        .get(channel)
        .map_or((f32::NAN, f32::NAN), |p| (p.x as f32, p.y as f32));

    let start = peak.saturating_sub(spike_delay);
    let end = (peak + spike_delay + 1).min(block.num_frames());

    let mut weights: Vec<(usize, i64)> = neighborhoods
        .of(channel)
        .iter()
        .map(|&c| {
            let base = baseline(c);
            let largest = block.channel(c)[start..end]
                .iter()
                .map(|&x| i64::from(base - i32::from(x)))
                .max()
                .unwrap_or(0);
            (c, largest)
        })
        .collect();

    if weights.len() > 1 {
        let correction = weights.iter().map(|&(_, w)| w).min().unwrap_or(0) - 1;
        for (_, w) in &mut weights {
            *w -= correction;
        }
    }

    let (mut sx, mut sy, mut total) = (0_i64, 0_i64, 0_i64);
    for &(c, w) in &weights {
        let p = positions[c];
        sx += w * i64::from(p.x);
        sy += w * i64::from(p.y);
        total += w;
    }
    if total == 0 {
        return fallback;
    }
    ((sx as f64 / total as f64) as f32, (sy as f64 / total as f64) as f32)
}
