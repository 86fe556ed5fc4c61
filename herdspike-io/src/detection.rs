//! Detection driver: scans a recording window by window and persists the
//! detected events to the binary event store.

use crate::chunking::{frame_windows, ChunkConfig};
use crate::event_store::{EventStoreReader, EventStoreWriter, StoreHeader};
use crate::writer::CsvWriter;
use crate::{Error, Result};
use herdspike_algorithms::{
    channel_medians, span_indices, Baselines, Candidate, CutoutWindow, SpikeDetector,
    ThresholdParams,
};
use herdspike_core::SpikeBatch;
use herdspike_probe::Recording;
use std::collections::VecDeque;
use std::ops::Range;
use std::path::{Path, PathBuf};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Frames per baseline span by default.
pub const DEFAULT_BASELINE_FRAMES: usize = 8192;

/// Detection parameters.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectionConfig {
    /// Estimate a location for every event.
    pub localize: bool,
    /// Samples kept before the peak.
    pub cutout_start: usize,
    /// Samples kept after the peak.
    pub cutout_end: usize,
    /// Detection threshold (inverted ADC units above baseline).
    pub threshold: i32,
    /// Minimum mean amplitude over the first `minsl` frames.
    pub maa: i32,
    /// Dead time and after-hyperpolarisation window (frames).
    pub maxsl: usize,
    /// Minimum supra-threshold run (frames).
    pub minsl: usize,
    /// Required after-hyperpolarisation depth; 0 disables the check.
    pub ahpthr: i32,
    /// Output stem; events go to `<file_directory>/<out_file_name>.bin`.
    pub out_file_name: String,
    pub file_directory: PathBuf,
    /// Also write the pre-merge candidates to `<out_file_name>_candidates.csv`.
    pub save_all: bool,
    /// Frames per baseline span. Spans are aligned to frame 0, so the
    /// baseline of a frame does not depend on the window it is read in.
    pub baseline_frames: usize,
    /// Window sizing.
    pub chunk: ChunkConfig,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let threshold = ThresholdParams::default();
        Self {
            localize: true,
            cutout_start: 10,
            cutout_end: 30,
            threshold: threshold.threshold,
            maa: threshold.maa,
            maxsl: threshold.maxsl,
            minsl: threshold.minsl,
            ahpthr: threshold.ahpthr,
            out_file_name: "ProcessedSpikes".to_string(),
            file_directory: PathBuf::from("."),
            save_all: false,
            baseline_frames: DEFAULT_BASELINE_FRAMES,
            chunk: ChunkConfig::default(),
        }
    }
}

impl DetectionConfig {
    #[must_use]
    pub fn with_localize(mut self, localize: bool) -> Self {
        self.localize = localize;
        self
    }

    /// Set the cutout window around the peak.
    #[must_use]
    pub fn with_cutout(mut self, start: usize, end: usize) -> Self {
        self.cutout_start = start;
        self.cutout_end = end;
        self
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: i32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the spike shape criteria.
    #[must_use]
    pub fn with_shape_criteria(mut self, maa: i32, maxsl: usize, minsl: usize, ahpthr: i32) -> Self {
        self.maa = maa;
        self.maxsl = maxsl;
        self.minsl = minsl;
        self.ahpthr = ahpthr;
        self
    }

    /// Set the output directory and file stem.
    #[must_use]
    pub fn with_output(mut self, directory: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        self.file_directory = directory.into();
        self.out_file_name = name.into();
        self
    }

    #[must_use]
    pub fn with_save_all(mut self, save_all: bool) -> Self {
        self.save_all = save_all;
        self
    }

    #[must_use]
    pub fn with_baseline_frames(mut self, frames: usize) -> Self {
        self.baseline_frames = frames;
        self
    }

    #[must_use]
    pub fn with_chunk(mut self, chunk: ChunkConfig) -> Self {
        self.chunk = chunk;
        self
    }

    /// Samples per cutout.
    #[must_use]
    pub fn cutout_length(&self) -> usize {
        self.cutout_start + self.cutout_end + 1
    }

    /// Path of the event store.
    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        self.file_directory
            .join(format!("{}.bin", self.out_file_name))
    }

    /// Path of the candidate dump written with `save_all`.
    #[must_use]
    pub fn candidates_path(&self) -> PathBuf {
        self.file_directory
            .join(format!("{}_candidates.csv", self.out_file_name))
    }
}

/// Outcome of one detection pass.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectionSummary {
    /// Events written to the store.
    pub events: usize,
    /// Candidates before neighbour merging.
    pub candidates: usize,
    /// Events dropped because their cutout left the recording.
    pub dropped: usize,
    /// Windows processed.
    pub windows: usize,
    /// Event store path.
    pub output: PathBuf,
    /// Candidate CSV path, with `save_all`.
    pub candidates_file: Option<PathBuf>,
}

/// Detection driver over one recording.
pub struct Detection<'a> {
    recording: &'a Recording,
    config: DetectionConfig,
    detector: SpikeDetector,
    events: Option<SpikeBatch>,
}

impl<'a> Detection<'a> {
    /// Prepares detection on `recording`.
    ///
    /// # Errors
    /// Returns an error if the probe parameters are inconsistent, the
    /// output name is empty or `baseline_frames` is 0.
    pub fn new(recording: &'a Recording, config: DetectionConfig) -> Result<Self> {
        if config.out_file_name.is_empty() {
            return Err(Error::InvalidFormat(
                "out_file_name must not be empty".to_string(),
            ));
        }
        if config.baseline_frames == 0 {
            return Err(Error::InvalidFormat(
                "baseline_frames must be at least 1".to_string(),
            ));
        }
        let params = recording.params();
        let threshold = ThresholdParams {
            threshold: config.threshold,
            maa: config.maa,
            maxsl: config.maxsl,
            minsl: config.minsl,
            ahpthr: config.ahpthr,
            spike_peak_duration: params.spike_peak_duration,
        };
        let detector = SpikeDetector::new(
            recording.topology(),
            params,
            threshold,
            CutoutWindow::new(config.cutout_start, config.cutout_end),
            config.localize,
        )?;
        Ok(Self {
            recording,
            config,
            detector,
            events: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    #[must_use]
    pub fn recording(&self) -> &Recording {
        self.recording
    }

    /// Events held in memory after `detect_from_raw(true)` or
    /// `load_detected()`.
    #[must_use]
    pub fn events(&self) -> Option<&SpikeBatch> {
        self.events.as_ref()
    }

    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        self.config.output_path()
    }

    fn header(&self) -> StoreHeader {
        StoreHeader {
            localized: self.config.localize,
            cutout_length: self.config.cutout_length(),
            num_channels: self.recording.channel_count(),
            sampling_rate: self.recording.fps(),
        }
    }

    /// Scans the whole recording and writes the event store. With `load`
    /// the events are also kept in memory.
    ///
    /// A failed read aborts the pass and removes the partial store.
    ///
    /// # Errors
    /// Returns the first read, detection or write error.
    pub fn detect_from_raw(&mut self, load: bool) -> Result<DetectionSummary> {
        self.events = None;
        std::fs::create_dir_all(&self.config.file_directory)
            .map_err(|e| Error::io(&self.config.file_directory, e))?;
        let output = self.config.output_path();
        log::info!(
            "detecting spikes in {} recording ({} channels, {} frames) -> {}",
            self.recording.format(),
            self.recording.channel_count(),
            self.recording.frame_count(),
            output.display()
        );

        match self.scan(&output, load) {
            Ok((summary, events)) => {
                self.events = events;
                Ok(summary)
            }
            Err(err) => {
                if let Err(remove) = std::fs::remove_file(&output) {
                    log::debug!("could not remove {}: {remove}", output.display());
                }
                Err(err)
            }
        }
    }

    fn scan(&self, output: &Path, load: bool) -> Result<(DetectionSummary, Option<SpikeBatch>)> {
        let margin = self.detector.margin();
        let num_frames = self.recording.frame_count();
        let chunk = self
            .config
            .chunk
            .frames_per_chunk(self.recording.channel_count(), margin)?;

        let mut baselines = BaselineCache::new(
            self.config.baseline_frames,
            self.recording.params().channel_mask(),
        );
        let mut store = EventStoreWriter::create(output, self.header())?;
        let mut loaded = load.then(|| SpikeBatch::new(self.config.cutout_length()));
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut summary = DetectionSummary {
            events: 0,
            candidates: 0,
            dropped: 0,
            windows: 0,
            output: output.to_path_buf(),
            candidates_file: None,
        };

        for window in frame_windows(num_frames, chunk, margin) {
            let block = self.recording.read(window.read.start, window.read.end)?;
            let spans = baselines.covering(self.recording, &window.read)?;
            let detections = self
                .detector
                .detect_block(&block, window.core.clone(), &spans)?;
            log::debug!(
                "window {:?}: {} candidates, {} events",
                window.core,
                detections.candidates.len(),
                detections.events.len()
            );
            store.write_batch(&detections.events)?;
            if let Some(loaded) = loaded.as_mut() {
                loaded.append(&detections.events);
            }
            summary.candidates += detections.candidates.len();
            summary.dropped += detections.dropped;
            summary.windows += 1;
            if self.config.save_all {
                candidates.extend_from_slice(&detections.candidates);
            }
        }
        summary.events = store.finish()?;

        if summary.dropped > 0 {
            log::warn!(
                "dropped {} events whose cutout extends past the recording",
                summary.dropped
            );
        }
        if self.config.save_all {
            let path = self.config.candidates_path();
            CsvWriter::create(&path)?.write_candidates(&candidates)?;
            summary.candidates_file = Some(path);
        }
        log::info!(
            "detected {} events ({} candidates) in {} windows",
            summary.events,
            summary.candidates,
            summary.windows
        );
        Ok((summary, loaded))
    }

    /// Reads the event store written by [`Self::detect_from_raw`] into
    /// memory.
    ///
    /// # Errors
    /// Returns an error if the store is missing or was written with another
    /// cutout length.
    pub fn load_detected(&mut self) -> Result<&SpikeBatch> {
        let reader = EventStoreReader::open(self.config.output_path())?;
        if reader.header().cutout_length != self.config.cutout_length() {
            return Err(Error::InvalidFormat(format!(
                "{} holds {}-sample cutouts, detection uses {}",
                reader.path().display(),
                reader.header().cutout_length,
                self.config.cutout_length()
            )));
        }
        let events = reader.read_all()?;
        log::info!(
            "loaded {} events from {}",
            events.len(),
            reader.path().display()
        );
        Ok(self.events.insert(events))
    }
}

/// Channel medians of the baseline spans the current window overlaps.
///
/// Windows advance monotonically, so spans behind the current window are
/// dropped and every span is read once.
struct BaselineCache {
    span: usize,
    mask: Vec<bool>,
    first_span: usize,
    spans: VecDeque<Vec<i32>>,
}

impl BaselineCache {
    fn new(span: usize, mask: Vec<bool>) -> Self {
        Self {
            span,
            mask,
            first_span: 0,
            spans: VecDeque::new(),
        }
    }

    fn covering(&mut self, recording: &Recording, frames: &Range<usize>) -> Result<Baselines> {
        let wanted = span_indices(self.span, frames);
        while self.first_span < wanted.start && !self.spans.is_empty() {
            self.spans.pop_front();
            self.first_span += 1;
        }
        if self.spans.is_empty() {
            self.first_span = wanted.start;
        }
        let num_frames = recording.frame_count();
        while self.first_span + self.spans.len() < wanted.end {
            let k = self.first_span + self.spans.len();
            let start = k * self.span;
            let end = (start + self.span).min(num_frames);
            let block = recording.read(start, end)?;
            self.spans.push_back(channel_medians(&block, &self.mask));
            log::trace!("baseline span {k} ({start}..{end})");
        }
        let held = wanted.end - self.first_span;
        let values: Vec<i32> = self.spans.iter().take(held).flatten().copied().collect();
        Baselines::new(self.span, self.first_span, recording.channel_count(), values)
            .map_err(Error::from)
    }
}
