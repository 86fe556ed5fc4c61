//! Structure of Arrays (`SoA`) storage for detected spikes.
//!
//! This module defines the `SpikeBatch` structure which stores events
//! in parallel vectors rather than an array of structs. Waveform cutouts of
//! all events share one flat buffer with a fixed stride.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single detected spike.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectedEvent {
    /// Channel with the largest amplitude.
    pub channel: u32,
    /// Global frame index of the peak.
    pub frame: u64,
    /// Peak amplitude relative to the channel baseline (inverted ADC units).
    pub amplitude: i32,
    /// Estimated (x, y) origin on the probe, if localised.
    pub location: Option<(f32, f32)>,
    /// Raw waveform around the peak.
    pub cutout: Vec<i16>,
}

/// A batch of spikes stored in Structure of Arrays (`SoA`) format.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpikeBatch {
    /// Columnar storage for channel indices.
    pub channel: Vec<u32>,
    /// Columnar storage for peak frames.
    pub frame: Vec<u64>,
    /// Columnar storage for amplitudes.
    pub amplitude: Vec<i32>,
    /// Columnar storage for X locations (NaN when not localised).
    pub x: Vec<f32>,
    /// Columnar storage for Y locations (NaN when not localised).
    pub y: Vec<f32>,
    /// Flat cutout storage, `cutout_len` samples per event.
    pub cutouts: Vec<i16>,
    cutout_len: usize,
}

impl SpikeBatch {
    /// Creates an empty batch for cutouts of `cutout_len` samples.
    #[must_use]
    pub fn new(cutout_len: usize) -> Self {
        Self {
            cutout_len,
            ..Self::default()
        }
    }

    /// Creates a new empty batch with specified capacity.
    #[must_use]
    pub fn with_capacity(cutout_len: usize, capacity: usize) -> Self {
        Self {
            channel: Vec::with_capacity(capacity),
            frame: Vec::with_capacity(capacity),
            amplitude: Vec::with_capacity(capacity),
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            cutouts: Vec::with_capacity(capacity * cutout_len),
            cutout_len,
        }
    }

    /// Samples per cutout.
    #[must_use]
    pub fn cutout_len(&self) -> usize {
        self.cutout_len
    }

    /// Returns the number of events in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channel.len()
    }

    /// Returns true if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    /// Returns true if every event carries a location.
    #[must_use]
    pub fn is_localized(&self) -> bool {
        self.x.iter().zip(&self.y).all(|(x, y)| x.is_finite() && y.is_finite())
    }

    /// Clears all vectors in the batch.
    pub fn clear(&mut self) {
        self.channel.clear();
        self.frame.clear();
        self.amplitude.clear();
        self.x.clear();
        self.y.clear();
        self.cutouts.clear();
    }

    /// Pushes a single event.
    ///
    /// # Panics
    /// Panics if `cutout.len()` differs from the batch cutout length.
    pub fn push(
        &mut self,
        channel: u32,
        frame: u64,
        amplitude: i32,
        location: Option<(f32, f32)>,
        cutout: &[i16],
    ) {
        assert_eq!(cutout.len(), self.cutout_len, "cutout length mismatch");
        let (x, y) = location.unwrap_or((f32::NAN, f32::NAN));
        self.channel.push(channel);
        self.frame.push(frame);
        self.amplitude.push(amplitude);
        self.x.push(x);
        self.y.push(y);
        self.cutouts.extend_from_slice(cutout);
    }

    /// Pushes an owned event.
    ///
    /// # Panics
    /// Panics if the event cutout length differs from the batch cutout length.
    pub fn push_event(&mut self, event: &DetectedEvent) {
        self.push(
            event.channel,
            event.frame,
            event.amplitude,
            event.location,
            &event.cutout,
        );
    }

    /// Appends all events from another batch to this one.
    ///
    /// # Panics
    /// Panics if the cutout lengths differ.
    pub fn append(&mut self, other: &SpikeBatch) {
        assert_eq!(self.cutout_len, other.cutout_len, "cutout length mismatch");
        self.channel.extend_from_slice(&other.channel);
        self.frame.extend_from_slice(&other.frame);
        self.amplitude.extend_from_slice(&other.amplitude);
        self.x.extend_from_slice(&other.x);
        self.y.extend_from_slice(&other.y);
        self.cutouts.extend_from_slice(&other.cutouts);
    }

    /// Cutout of event `index`.
    ///
    /// # Panics
    /// Panics if `index >= len()`.
    #[must_use]
    pub fn cutout(&self, index: usize) -> &[i16] {
        let start = index * self.cutout_len;
        &self.cutouts[start..start + self.cutout_len]
    }

    /// Location of event `index`, if localised.
    #[must_use]
    pub fn location(&self, index: usize) -> Option<(f32, f32)> {
        let x = *self.x.get(index)?;
        let y = *self.y.get(index)?;
        (x.is_finite() && y.is_finite()).then_some((x, y))
    }

    /// Owned copy of event `index`.
    #[must_use]
    pub fn event(&self, index: usize) -> Option<DetectedEvent> {
        if index >= self.len() {
            return None;
        }
        Some(DetectedEvent {
            channel: self.channel[index],
            frame: self.frame[index],
            amplitude: self.amplitude[index],
            location: self.location(index),
            cutout: self.cutout(index).to_vec(),
        })
    }

    /// Iterator over owned events.
    pub fn events(&self) -> impl Iterator<Item = DetectedEvent> + '_ {
        (0..self.len()).filter_map(|i| self.event(i))
    }
}
