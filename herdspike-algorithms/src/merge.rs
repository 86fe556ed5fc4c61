//! Neighbour merging of candidates that belong to the same spike.

use crate::detect::Candidate;
use herdspike_core::{ChannelTopology, Result};

/// Merges candidates seen on several neighbouring channels.
///
/// Candidates are visited in decreasing amplitude order (ties by frame,
/// then channel). Each surviving candidate absorbs every undecided
/// candidate on one of its neighbour channels within `noise_duration`
/// frames whose amplitude is at most `noise_amp_percent` times its own.
/// The result is sorted by `(frame, channel)`.
///
/// # Errors
/// Returns a channel index error if a candidate lies outside the topology.
pub fn merge_neighbors(
    candidates: &[Candidate],
    topology: &ChannelTopology,
    noise_duration: usize,
    noise_amp_percent: f64,
) -> Result<Vec<Candidate>> {
    let mut by_time: Vec<Candidate> = candidates.to_vec();
    by_time.sort_unstable_by_key(|c| (c.frame, c.channel));

    let mut order: Vec<usize> = (0..by_time.len()).collect();
    order.sort_by(|&a, &b| {
        let (ca, cb) = (&by_time[a], &by_time[b]);
        cb.amplitude
            .cmp(&ca.amplitude)
            .then(ca.frame.cmp(&cb.frame))
            .then(ca.channel.cmp(&cb.channel))
    });

    let mut absorbed = vec![false; by_time.len()];
    let mut kept = vec![false; by_time.len()];
    for &index in &order {
        if absorbed[index] {
            continue;
        }
        kept[index] = true;
        let lead = by_time[index];
        let neighbors = topology.neighbors_of(lead.channel)?;
        let limit = noise_amp_percent * f64::from(lead.amplitude);

        let lo = by_time.partition_point(|c| c.frame + noise_duration < lead.frame);
        for other in lo..by_time.len() {
            let candidate = by_time[other];
            if candidate.frame > lead.frame + noise_duration {
                break;
            }
            if other == index || kept[other] || absorbed[other] {
                continue;
            }
            if neighbors.contains(&candidate.channel) && f64::from(candidate.amplitude) <= limit {
                absorbed[other] = true;
            }
        }
    }

    Ok(by_time
        .into_iter()
        .zip(kept)
        .filter_map(|(candidate, keep)| keep.then_some(candidate))
        .collect())
}
