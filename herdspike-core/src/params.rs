//! Per-probe detection constants.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Recording-specific constants shared by every probe variant.
///
/// Timing values are in frames.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProbeParams {
    /// Number of channels read per frame.
    pub num_channels: usize,
    /// Half-width of the window used to measure neighbour amplitudes.
    pub spike_delay: usize,
    /// Frames after a threshold crossing searched for the peak.
    pub spike_peak_duration: usize,
    /// Frames within which a smaller detection on a neighbour is absorbed.
    pub noise_duration: usize,
    /// Amplitude fraction below which a neighbour detection is absorbed.
    pub noise_amp_percent: f64,
    /// Radius of the inner neighbourhood used for localisation.
    pub inner_radius: f64,
    /// Sampling rate in frames per second.
    pub fps: f64,
    /// Channels excluded from detection.
    pub masked_channels: Vec<usize>,
}

impl ProbeParams {
    /// Validates the parameters.
    ///
    /// # Errors
    /// Returns `Error::ChannelIndex` for a masked channel outside the probe and
    /// `Error::Config` for a non-positive sampling rate or radius.
    pub fn validate(&self) -> Result<()> {
        if let Some(&channel) = self
            .masked_channels
            .iter()
            .find(|&&c| c >= self.num_channels)
        {
            return Err(Error::ChannelIndex {
                channel,
                num_channels: self.num_channels,
            });
        }
        if !(self.fps.is_finite() && self.fps >= 0.0) {
            return Err(Error::Config(format!(
                "sampling rate must be non-negative, got {}",
                self.fps
            )));
        }
        if !(self.inner_radius.is_finite() && self.inner_radius >= 0.0) {
            return Err(Error::Config(format!(
                "inner radius must be non-negative, got {}",
                self.inner_radius
            )));
        }
        if !(self.noise_amp_percent.is_finite() && self.noise_amp_percent >= 0.0) {
            return Err(Error::Config(format!(
                "noise_amp_percent must be non-negative, got {}",
                self.noise_amp_percent
            )));
        }
        Ok(())
    }

    /// Per-channel mask, `true` for channels excluded from detection.
    #[must_use]
    pub fn channel_mask(&self) -> Vec<bool> {
        let mut mask = vec![false; self.num_channels];
        for &c in &self.masked_channels {
            if let Some(slot) = mask.get_mut(c) {
                *slot = true;
            }
        }
        mask
    }
}
