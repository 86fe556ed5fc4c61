//! Raw sample sources behind the probe read contract.

use crate::{Error, Result};
use herdspike_core::SampleBlock;

/// Storage backend of a recording.
///
/// Implementations decode their own layout into a channel-major
/// [`SampleBlock`]. Range checking happens in [`crate::Recording::read`];
/// `read_into` may assume `block.first_frame() + block.num_frames() <=
/// frame_count()`.
pub trait RawSource {
    /// Short name of the storage format.
    fn format(&self) -> &'static str;

    /// Channels stored per frame.
    fn channel_count(&self) -> usize;

    /// Frames available.
    fn frame_count(&self) -> usize;

    /// Sampling rate stored in the file, if any.
    fn sampling_rate(&self) -> Option<f64> {
        None
    }

    /// Full-array index of every recorded channel, if the file records a
    /// subset of the array.
    fn channel_map(&self) -> Option<&[usize]> {
        None
    }

    /// Fills `block` with the frames it covers.
    ///
    /// # Errors
    /// Returns an error if the underlying storage cannot be decoded.
    fn read_into(&self, block: &mut SampleBlock) -> Result<()>;
}

/// Interleaved samples held in memory (emulated probes, synthetic data).
#[derive(Debug, Clone)]
pub struct InMemorySource {
    samples: Vec<i16>,
    num_channels: usize,
    num_frames: usize,
}

impl InMemorySource {
    /// Wraps frame-interleaved samples (`samples[channel + nch * frame]`).
    ///
    /// # Errors
    /// Returns `Error::DataIntegrity` if the sample count is not a multiple
    /// of the channel count.
    pub fn new(samples: Vec<i16>, num_channels: usize) -> Result<Self> {
        if num_channels == 0 || samples.len() % num_channels != 0 {
            return Err(Error::DataIntegrity(format!(
                "{} samples is not a multiple of {} channels",
                samples.len(),
                num_channels
            )));
        }
        let num_frames = samples.len() / num_channels;
        Ok(Self {
            samples,
            num_channels,
            num_frames,
        })
    }
}

impl RawSource for InMemorySource {
    fn format(&self) -> &'static str {
        "memory"
    }

    fn channel_count(&self) -> usize {
        self.num_channels
    }

    fn frame_count(&self) -> usize {
        self.num_frames
    }

    fn read_into(&self, block: &mut SampleBlock) -> Result<()> {
        let nch = self.num_channels;
        let t0 = block.first_frame();
        let frames = block.num_frames();
        let window = &self.samples[nch * t0..nch * (t0 + frames)];
        for channel in 0..nch {
            let trace = block.channel_mut(channel);
            for (frame, slot) in trace.iter_mut().enumerate() {
                *slot = window[channel + nch * frame];
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_read() {
        let source = InMemorySource::new((0..12).collect(), 3).unwrap();
        assert_eq!(source.frame_count(), 4);

        let mut block = SampleBlock::zeros(3, 1, 2);
        source.read_into(&mut block).unwrap();
        assert_eq!(block.channel(0), &[3, 6]);
        assert_eq!(block.channel(2), &[5, 8]);
    }

    #[test]
    fn test_in_memory_rejects_partial_frame() {
        assert!(matches!(
            InMemorySource::new(vec![0; 7], 3),
            Err(Error::DataIntegrity(_))
        ));
    }
}
