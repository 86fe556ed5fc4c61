//! Memory-budgeted window sizing for detection passes.

use crate::{Error, Result};
use std::mem::size_of;
use std::ops::Range;
use sysinfo::System;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const MEMORY_OVERHEAD_FACTOR: f64 = 1.2;
/// Copies of a window held at once: the block itself and the median scratch.
const WINDOW_COPIES: usize = 2;
const MIN_CHUNK_FRAMES: usize = 1024;

/// Window sizing for detection.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChunkConfig {
    /// Fixed core window length in frames. Overrides the memory budget.
    pub chunk_frames: Option<usize>,
    /// Fraction of available system memory to target (0.0 < fraction <= 1.0).
    pub memory_fraction: f64,
    /// Explicit memory budget override (bytes). If set, `memory_fraction` is ignored.
    pub memory_budget_bytes: Option<usize>,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_frames: None,
            memory_fraction: 0.25,
            memory_budget_bytes: None,
        }
    }
}

impl ChunkConfig {
    /// Use windows of exactly `frames` core frames.
    #[must_use]
    pub fn with_chunk_frames(mut self, frames: usize) -> Self {
        self.chunk_frames = Some(frames);
        self
    }

    /// Set the fraction of available system memory to target.
    #[must_use]
    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = fraction;
        self
    }

    /// Set an explicit memory budget in bytes.
    #[must_use]
    pub fn with_memory_budget_bytes(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = Some(bytes);
        self
    }

    /// Resolve the target memory budget in bytes.
    ///
    /// # Errors
    /// Returns an error if the memory fraction is invalid or system memory cannot be queried.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn resolve_budget_bytes(&self) -> Result<usize> {
        if let Some(bytes) = self.memory_budget_bytes {
            return Ok(bytes);
        }
        if !(0.0 < self.memory_fraction && self.memory_fraction <= 1.0) {
            return Err(Error::InvalidFormat(
                "memory_fraction must be in (0.0, 1.0]".to_string(),
            ));
        }
        let mut system = System::new();
        system.refresh_memory();
        let available = system.available_memory();
        if available == 0 {
            return Err(Error::InvalidFormat(
                "available system memory reported as 0".to_string(),
            ));
        }
        let budget = (available as f64 * self.memory_fraction).floor() as u64;
        Ok(usize::try_from(budget).unwrap_or(usize::MAX))
    }

    /// Core window length for a recording of `num_channels` channels when
    /// each window is read with `margin` extra frames on both sides.
    ///
    /// # Errors
    /// Returns an error if `chunk_frames` is 0 or the budget cannot be
    /// resolved.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn frames_per_chunk(&self, num_channels: usize, margin: usize) -> Result<usize> {
        if let Some(frames) = self.chunk_frames {
            if frames == 0 {
                return Err(Error::InvalidFormat(
                    "chunk_frames must be at least 1".to_string(),
                ));
            }
            return Ok(frames);
        }
        let budget = self.resolve_budget_bytes()?;
        let bytes_per_frame = (num_channels.max(1) * size_of::<i16>() * WINDOW_COPIES) as f64
            * MEMORY_OVERHEAD_FACTOR;
        let window = (budget as f64 / bytes_per_frame).floor() as usize;
        Ok(window.saturating_sub(2 * margin).max(MIN_CHUNK_FRAMES))
    }
}

/// One detection window: frames read and frames owned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameWindow {
    /// Frames read from the recording, `core` plus margins clipped to the
    /// recording.
    pub read: Range<usize>,
    /// Frames whose events belong to this window.
    pub core: Range<usize>,
}

/// Splits `[0, num_frames)` into consecutive core windows of `chunk` frames
/// with `margin` frames of context on each side.
///
/// # Panics
/// Panics if `chunk` is 0.
pub fn frame_windows(
    num_frames: usize,
    chunk: usize,
    margin: usize,
) -> impl Iterator<Item = FrameWindow> {
    assert!(chunk > 0, "chunk must be positive");
    (0..num_frames).step_by(chunk).map(move |start| {
        let end = (start + chunk).min(num_frames);
        FrameWindow {
            read: start.saturating_sub(margin)..(end + margin).min(num_frames),
            core: start..end,
        }
    })
}
