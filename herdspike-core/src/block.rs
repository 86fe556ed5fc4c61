//! Dense multi-channel sample windows.

/// A `[channel][frame]` window of raw ADC samples.
///
/// Samples are stored channel-major so each channel's trace is contiguous.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleBlock {
    num_channels: usize,
    num_frames: usize,
    first_frame: usize,
    data: Vec<i16>,
}

impl SampleBlock {
    /// Creates a zero-filled block covering `[first_frame, first_frame + num_frames)`.
    #[must_use]
    pub fn zeros(num_channels: usize, first_frame: usize, num_frames: usize) -> Self {
        Self {
            num_channels,
            num_frames,
            first_frame,
            data: vec![0; num_channels * num_frames],
        }
    }

    /// Builds a block from frame-interleaved samples (`sample[channel + nch * frame]`).
    ///
    /// Returns `None` if the sample count does not match the shape.
    #[must_use]
    pub fn from_interleaved(
        num_channels: usize,
        first_frame: usize,
        interleaved: &[i16],
    ) -> Option<Self> {
        if num_channels == 0 || interleaved.len() % num_channels != 0 {
            return None;
        }
        let num_frames = interleaved.len() / num_channels;
        let mut block = Self::zeros(num_channels, first_frame, num_frames);
        for (frame, row) in interleaved.chunks_exact(num_channels).enumerate() {
            for (channel, &value) in row.iter().enumerate() {
                block.data[channel * num_frames + frame] = value;
            }
        }
        Some(block)
    }

    /// Number of channels.
    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Number of frames.
    #[must_use]
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Global index of the first frame.
    #[must_use]
    pub fn first_frame(&self) -> usize {
        self.first_frame
    }

    /// `(channels, frames)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.num_channels, self.num_frames)
    }

    /// Trace of one channel.
    ///
    /// # Panics
    /// Panics if `channel >= num_channels`.
    #[must_use]
    pub fn channel(&self, channel: usize) -> &[i16] {
        let start = channel * self.num_frames;
        &self.data[start..start + self.num_frames]
    }

    /// Mutable trace of one channel.
    ///
    /// # Panics
    /// Panics if `channel >= num_channels`.
    pub fn channel_mut(&mut self, channel: usize) -> &mut [i16] {
        let start = channel * self.num_frames;
        &mut self.data[start..start + self.num_frames]
    }

    /// Sample at `(channel, frame)` where `frame` is relative to the block.
    #[must_use]
    pub fn get(&self, channel: usize, frame: usize) -> Option<i16> {
        if channel < self.num_channels && frame < self.num_frames {
            Some(self.data[channel * self.num_frames + frame])
        } else {
            None
        }
    }

    /// Channel-major backing storage.
    #[must_use]
    pub fn as_slice(&self) -> &[i16] {
        &self.data
    }

    /// Iterator over channel traces.
    pub fn channels(&self) -> impl Iterator<Item = &[i16]> {
        self.data.chunks(self.num_frames.max(1)).take(self.num_channels)
    }
}
