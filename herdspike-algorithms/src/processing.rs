//! Block-level detection pipeline: threshold detection, neighbour merging,
//! localisation and cutout extraction.

use crate::detect::{detect_channel, Baselines, Candidate, ThresholdParams};
use crate::localize::{center_of_mass, InnerNeighborhoods};
use crate::merge::merge_neighbors;
use herdspike_core::{ChannelTopology, Error, ProbeParams, Result, SampleBlock, SpikeBatch};
use std::ops::Range;

/// Waveform cutout around the peak: `start` frames before, `end` after.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CutoutWindow {
    pub start: usize,
    pub end: usize,
}

impl CutoutWindow {
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Samples per cutout (`start + end + 1`).
    #[must_use]
    pub fn len(&self) -> usize {
        self.start + self.end + 1
    }

    /// Always false; a cutout contains at least the peak sample.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Output of [`SpikeDetector::detect_block`].
#[derive(Debug, Clone)]
pub struct BlockDetections {
    /// Merged events with their peak in the core window, `(frame, channel)`
    /// order.
    pub events: SpikeBatch,
    /// Pre-merge candidates with their peak in the core window.
    pub candidates: Vec<Candidate>,
    /// Events whose cutout did not fit in the block.
    pub dropped: usize,
}

/// Detects spikes in sample blocks of one recording.
#[derive(Debug, Clone)]
pub struct SpikeDetector {
    topology: ChannelTopology,
    params: ProbeParams,
    threshold: ThresholdParams,
    mask: Vec<bool>,
    neighborhoods: Option<InnerNeighborhoods>,
    cutout: CutoutWindow,
}

impl SpikeDetector {
    /// Prepares a detector. Inner neighbourhoods are only built when
    /// `localize` is set.
    ///
    /// # Errors
    /// Returns an error if the parameters are invalid or disagree with the
    /// topology.
    pub fn new(
        topology: &ChannelTopology,
        params: &ProbeParams,
        threshold: ThresholdParams,
        cutout: CutoutWindow,
        localize: bool,
    ) -> Result<Self> {
        params.validate()?;
        if topology.len() != params.num_channels {
            return Err(Error::DataIntegrity(format!(
                "topology has {} channels, parameters {}",
                topology.len(),
                params.num_channels
            )));
        }
        let mask = params.channel_mask();
        let neighborhoods = if localize {
            Some(InnerNeighborhoods::new(topology, params.inner_radius, &mask)?)
        } else {
            None
        };
        Ok(Self {
            topology: topology.clone(),
            params: params.clone(),
            threshold,
            mask,
            neighborhoods,
            cutout,
        })
    }

    #[must_use]
    pub fn cutout(&self) -> CutoutWindow {
        self.cutout
    }

    #[must_use]
    pub fn localizes(&self) -> bool {
        self.neighborhoods.is_some()
    }

    /// Frames of context needed on each side of a core window so that every
    /// event peaking inside it is detected, merged and cut out as if the
    /// whole recording were processed at once.
    #[must_use]
    pub fn margin(&self) -> usize {
        self.cutout.start.max(self.cutout.end)
            + self.threshold.maxsl
            + self.threshold.minsl
            + self.params.spike_peak_duration.max(self.threshold.spike_peak_duration)
            + self.params.noise_duration
            + self.params.spike_delay
    }

    /// Runs the pipeline on `block` and keeps events whose peak lies in
    /// `core` (global frames). `baselines` must hold the spans the block
    /// overlaps.
    ///
    /// # Errors
    /// Returns an error if the block or the baselines do not match the probe.
    pub fn detect_block(
        &self,
        block: &SampleBlock,
        core: Range<usize>,
        baselines: &Baselines,
    ) -> Result<BlockDetections> {
        if block.num_channels() != self.params.num_channels {
            return Err(Error::DataIntegrity(format!(
                "block has {} channels, probe {}",
                block.num_channels(),
                self.params.num_channels
            )));
        }
        if baselines.num_channels() != self.params.num_channels {
            return Err(Error::DataIntegrity(format!(
                "baselines hold {} channels, probe {}",
                baselines.num_channels(),
                self.params.num_channels
            )));
        }
        let first = block.first_frame();

        let mut candidates = Vec::new();
        for (channel, trace) in block.channels().enumerate() {
            if self.mask[channel] {
                continue;
            }
            detect_channel(
                trace,
                channel,
                first,
                |frame| baselines.at(channel, frame),
                &self.threshold,
                &mut candidates,
            );
        }

        let merged = merge_neighbors(
            &candidates,
            &self.topology,
            self.params.noise_duration,
            self.params.noise_amp_percent,
        )?;

        let mut events = SpikeBatch::with_capacity(self.cutout.len(), merged.len());
        let mut dropped = 0;
        for event in merged.iter().filter(|c| core.contains(&c.frame)) {
            let peak = event.frame - first;
            let Some(range) = self.cutout_range(peak, block.num_frames()) else {
                dropped += 1;
                continue;
            };
            let location = self.neighborhoods.as_ref().map(|hoods| {
                center_of_mass(
                    block,
                    |c| baselines.at(c, event.frame),
                    event.channel,
                    peak,
                    hoods,
                    &self.topology,
                    self.params.spike_delay,
                )
            });
            #[allow(clippy::cast_possible_truncation)]
            events.push(
                event.channel as u32,
                event.frame as u64,
                event.amplitude,
                location,
                &block.channel(event.channel)[range],
            );
        }

        candidates.retain(|c| core.contains(&c.frame));
        candidates.sort_unstable_by_key(|c| (c.frame, c.channel));

        Ok(BlockDetections {
            events,
            candidates,
            dropped,
        })
    }

    fn cutout_range(&self, peak: usize, frames: usize) -> Option<Range<usize>> {
        let start = peak.checked_sub(self.cutout.start)?;
        let end = peak + self.cutout.end + 1;
        (end <= frames).then_some(start..end)
    }
}
