//! Per-channel threshold detection on baseline-subtracted traces.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use herdspike_core::{Error, Result, SampleBlock};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Threshold detector constants. Durations are in frames, amplitudes in
/// inverted ADC units (`baseline - sample`).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ThresholdParams {
    /// Detection threshold.
    pub threshold: i32,
    /// Minimum mean amplitude over the first `minsl` frames of a run.
    pub maa: i32,
    /// Dead time after a detection, also the after-hyperpolarisation search
    /// window.
    pub maxsl: usize,
    /// Minimum number of consecutive supra-threshold frames.
    pub minsl: usize,
    /// Required after-hyperpolarisation depth; disabled when `<= 0`.
    pub ahpthr: i32,
    /// Frames after the crossing searched for the peak.
    pub spike_peak_duration: usize,
}

impl Default for ThresholdParams {
    fn default() -> Self {
        Self {
            threshold: 20,
            maa: 0,
            maxsl: 12,
            minsl: 3,
            ahpthr: 0,
            spike_peak_duration: 4,
        }
    }
}

/// A detection before neighbour merging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub channel: usize,
    /// Global frame index of the peak.
    pub frame: usize,
    /// Peak height above baseline.
    pub amplitude: i32,
}

/// Median of a trace, the detection baseline of a window.
///
/// For even lengths the lower median is used so the result stays an
/// integer sample value.
#[must_use]
pub fn median_baseline(trace: &[i16]) -> i32 {
    if trace.is_empty() {
        return 0;
    }
    let mut sorted = trace.to_vec();
    let mid = (sorted.len() - 1) / 2;
    let (_, median, _) = sorted.select_nth_unstable(mid);
    i32::from(*median)
}

/// Lower median of every channel of `block`; masked channels get 0.
#[must_use]
pub fn channel_medians(block: &SampleBlock, mask: &[bool]) -> Vec<i32> {
    block
        .channels()
        .enumerate()
        .map(|(channel, trace)| {
            if mask.get(channel).copied().unwrap_or(false) {
                0
            } else {
                median_baseline(trace)
            }
        })
        .collect()
}

/// Detection baselines: one median per channel for every span of `span`
/// frames, with spans aligned to absolute frame 0.
///
/// A frame always reads the median of the same span no matter which window
/// it is processed in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Baselines {
    span: usize,
    first_span: usize,
    num_channels: usize,
    /// `[span][channel]`, spans `first_span..`.
    values: Vec<i32>,
}

impl Baselines {
    /// Wraps per-span channel medians, starting at span `first_span`.
    ///
    /// # Errors
    /// Returns a data integrity error if `span` is 0, no span is given, or
    /// `values` is not a whole number of spans.
    pub fn new(
        span: usize,
        first_span: usize,
        num_channels: usize,
        values: Vec<i32>,
    ) -> Result<Self> {
        if span == 0 || num_channels == 0 || values.is_empty() || values.len() % num_channels != 0
        {
            return Err(Error::DataIntegrity(format!(
                "{} baseline values do not form spans of {num_channels} channels (span {span})",
                values.len()
            )));
        }
        Ok(Self {
            span,
            first_span,
            num_channels,
            values,
        })
    }

    /// Medians of the aligned spans overlapping `block`, each taken over the
    /// part of the span the block holds.
    ///
    /// Only matches [`Self::new`] over whole spans when the block covers
    /// them, as it does for a block holding the whole recording.
    ///
    /// # Panics
    /// Panics if `span` is 0.
    #[must_use]
    pub fn of_block(block: &SampleBlock, span: usize) -> Self {
        assert!(span > 0, "span must be positive");
        let first = block.first_frame();
        let num_channels = block.num_channels();
        let frames = first..first + block.num_frames().max(1);
        let spans = span_indices(span, &frames);
        let mut values = Vec::with_capacity(spans.len() * num_channels);
        for k in spans.clone() {
            let lo = (k * span).max(first) - first;
            let hi = ((k + 1) * span).min(first + block.num_frames()).max(first) - first;
            for channel in 0..num_channels {
                let trace = block.channel(channel);
                values.push(median_baseline(&trace[lo.min(hi)..hi]));
            }
        }
        Self {
            span,
            first_span: spans.start,
            num_channels,
            values,
        }
    }

    /// Frames per span.
    #[must_use]
    pub fn span(&self) -> usize {
        self.span
    }

    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Baseline of `channel` at global `frame`. Frames outside the held spans
    /// read the nearest one.
    #[must_use]
    pub fn at(&self, channel: usize, frame: usize) -> i32 {
        let held = self.values.len() / self.num_channels;
        let k = (frame / self.span).clamp(self.first_span, self.first_span + held - 1);
        self.values[(k - self.first_span) * self.num_channels + channel]
    }
}

/// Indices of the `span`-frame spans overlapping `frames`.
#[must_use]
pub fn span_indices(span: usize, frames: &Range<usize>) -> Range<usize> {
    if frames.is_empty() {
        return frames.start / span..frames.start / span;
    }
    frames.start / span..(frames.end - 1) / span + 1
}

/// Scans one channel and appends its candidates to `out`.
///
/// `first_frame` is the global index of `trace[0]`; `baseline` gives the
/// baseline at a global frame.
pub fn detect_channel(
    trace: &[i16],
    channel: usize,
    first_frame: usize,
    baseline: impl Fn(usize) -> i32,
    params: &ThresholdParams,
    out: &mut Vec<Candidate>,
) {
    let n = trace.len();
    let minsl = params.minsl.max(1);
    let v = |t: usize| baseline(first_frame + t) - i32::from(trace[t]);

    let mut t = 0;
    while t < n {
        if v(t) < params.threshold {
            t += 1;
            continue;
        }

        let mut run_end = t;
        while run_end < n && v(run_end) >= params.threshold {
            run_end += 1;
        }
        let run = run_end - t;

        if run >= minsl && mean_amplitude(t, minsl, &v) >= params.maa {
            let search = run.max(params.spike_peak_duration).min(n - t);
            let peak = first_argmax(t, search, &v);
            if has_after_hyperpolarisation(peak, n, params, &v) {
                out.push(Candidate {
                    channel,
                    frame: first_frame + peak,
                    amplitude: v(peak),
                });
                // Dead time, then wait for a fresh crossing.
                t = peak + params.maxsl.max(1);
                while t < n && v(t) >= params.threshold {
                    t += 1;
                }
                continue;
            }
        }
        t = run_end;
    }
}

fn mean_amplitude(start: usize, len: usize, v: &impl Fn(usize) -> i32) -> i32 {
    let sum: i64 = (start..start + len).map(|t| i64::from(v(t))).sum();
    (sum / len as i64) as i32
}

fn first_argmax(start: usize, len: usize, v: &impl Fn(usize) -> i32) -> usize {
    let mut best = start;
    for t in start + 1..start + len {
        if v(t) > v(best) {
            best = t;
        }
    }
    best
}

fn has_after_hyperpolarisation(
    peak: usize,
    n: usize,
    params: &ThresholdParams,
    v: &impl Fn(usize) -> i32,
) -> bool {
    if params.ahpthr <= 0 {
        return true;
    }
    let end = (peak + params.maxsl).min(n - 1);
    (peak + 1..=end).any(|t| v(t) <= -params.ahpthr)
}
