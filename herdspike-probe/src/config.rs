//! Probe configuration and per-variant presets.

use crate::{Error, Result};
use herdspike_core::{ChannelTopology, ProbeParams};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Probe hardware / file-format variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// Neuropixels flat binary (`.bin`, interleaved `i16`).
    NeuroPixel,
    /// 3Brain BioCam (`.brw`, HDF5).
    BioCam,
    /// MaxWell MaxOne / Mea1k (HDF5 with channel routing).
    Mea1k,
    /// Any interleaved `i16` recording or in-memory emulation.
    Generic,
}

impl ProbeKind {
    /// Short human readable name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::NeuroPixel => "NeuroPixel",
            Self::BioCam => "BioCam",
            Self::Mea1k => "Mea1k",
            Self::Generic => "Generic",
        }
    }
}

/// Where neighbour lists come from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborSource {
    /// Neighbour matrix text file, one line per channel.
    File(PathBuf),
    /// All channels within this distance of each other are neighbours.
    Radius(f64),
}

/// Full configuration needed to construct a probe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub kind: ProbeKind,
    pub num_channels: usize,
    pub spike_delay: usize,
    pub spike_peak_duration: usize,
    pub noise_duration: usize,
    pub noise_amp_percent: f64,
    pub inner_radius: f64,
    pub fps: f64,
    pub masked_channels: Vec<usize>,
    pub positions_file: PathBuf,
    pub neighbors: NeighborSource,
    /// Frames to expose; must not exceed what the file holds.
    pub frame_count: Option<usize>,
}

// Intermediate structs for the JSON schema; omitted fields use the preset
// of the selected kind.
#[derive(Deserialize)]
struct JsonConfig {
    probe: JsonProbe,
}

#[derive(Deserialize)]
struct JsonProbe {
    kind: ProbeKind,
    positions_file: PathBuf,
    neighbors_file: Option<PathBuf>,
    neighbor_radius: Option<f64>,
    num_channels: Option<usize>,
    spike_delay: Option<usize>,
    spike_peak_duration: Option<usize>,
    noise_duration: Option<usize>,
    noise_amp_percent: Option<f64>,
    inner_radius: Option<f64>,
    fps: Option<f64>,
    masked_channels: Option<Vec<usize>>,
    frame_count: Option<usize>,
}

impl ProbeConfig {
    /// Neuropixels 3A preset: 385 channels at 30 kHz, sync channel 384 masked.
    #[must_use]
    pub fn neuropixel(positions_file: impl Into<PathBuf>, neighbors_file: impl Into<PathBuf>) -> Self {
        Self {
            kind: ProbeKind::NeuroPixel,
            num_channels: 385,
            spike_delay: 5,
            spike_peak_duration: 4,
            noise_duration: 3,
            noise_amp_percent: 1.0,
            inner_radius: 40.0,
            fps: 30_000.0,
            masked_channels: vec![384],
            positions_file: positions_file.into(),
            neighbors: NeighborSource::File(neighbors_file.into()),
            frame_count: None,
        }
    }

    /// BioCam 4096 preset. Channel count and sampling rate are replaced by
    /// the file header when a recording is opened.
    #[must_use]
    pub fn biocam(positions_file: impl Into<PathBuf>, neighbors_file: impl Into<PathBuf>) -> Self {
        Self {
            kind: ProbeKind::BioCam,
            num_channels: 4096,
            spike_delay: 5,
            spike_peak_duration: 4,
            noise_duration: 2,
            noise_amp_percent: 1.0,
            inner_radius: 1.5,
            fps: 0.0,
            masked_channels: vec![0],
            positions_file: positions_file.into(),
            neighbors: NeighborSource::File(neighbors_file.into()),
            frame_count: None,
        }
    }

    /// Mea1k preset: 69 routed channels at 20 kHz.
    #[must_use]
    pub fn mea1k(positions_file: impl Into<PathBuf>, neighbors_file: impl Into<PathBuf>) -> Self {
        Self {
            kind: ProbeKind::Mea1k,
            num_channels: 69,
            spike_delay: 5,
            spike_peak_duration: 4,
            noise_duration: 2,
            noise_amp_percent: 1.0,
            inner_radius: 20.0,
            fps: 20_000.0,
            masked_channels: Vec::new(),
            positions_file: positions_file.into(),
            neighbors: NeighborSource::File(neighbors_file.into()),
            frame_count: None,
        }
    }

    /// Generic probe with radius-derived neighbours.
    #[must_use]
    pub fn generic(
        num_channels: usize,
        fps: f64,
        positions_file: impl Into<PathBuf>,
        neighbor_radius: f64,
        inner_radius: f64,
    ) -> Self {
        Self {
            kind: ProbeKind::Generic,
            num_channels,
            spike_delay: 5,
            spike_peak_duration: 4,
            noise_duration: 3,
            noise_amp_percent: 1.0,
            inner_radius,
            fps,
            masked_channels: Vec::new(),
            positions_file: positions_file.into(),
            neighbors: NeighborSource::Radius(neighbor_radius),
            frame_count: None,
        }
    }

    fn preset(kind: ProbeKind, positions_file: PathBuf) -> Self {
        match kind {
            ProbeKind::NeuroPixel => Self::neuropixel(positions_file, PathBuf::new()),
            ProbeKind::BioCam => Self::biocam(positions_file, PathBuf::new()),
            ProbeKind::Mea1k => Self::mea1k(positions_file, PathBuf::new()),
            ProbeKind::Generic => Self::generic(0, 0.0, positions_file, 0.0, 0.0),
        }
    }

    /// Replaces the masked channel list.
    #[must_use]
    pub fn with_masked_channels(mut self, masked: Vec<usize>) -> Self {
        self.masked_channels = masked;
        self
    }

    /// Sets the sampling rate.
    #[must_use]
    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = fps;
        self
    }

    /// Limits the number of frames exposed by the probe.
    #[must_use]
    pub fn with_frame_count(mut self, frames: usize) -> Self {
        self.frame_count = Some(frames);
        self
    }

    /// Sets the localisation radius.
    #[must_use]
    pub fn with_inner_radius(mut self, radius: f64) -> Self {
        self.inner_radius = radius;
        self
    }

    /// Loads configuration from a JSON file.
    ///
    /// Relative topology paths are resolved against the file's directory.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the JSON is invalid.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let json: JsonConfig = serde_json::from_reader(BufReader::new(file))?;
        let mut config = Self::from_json_config(json)?;
        if let Some(dir) = path.parent() {
            config.resolve_relative_to(dir);
        }
        Ok(config)
    }

    /// Loads configuration from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the JSON is invalid or inconsistent.
    pub fn from_json(json: &str) -> Result<Self> {
        let json: JsonConfig = serde_json::from_str(json)?;
        Self::from_json_config(json)
    }

    fn from_json_config(json: JsonConfig) -> Result<Self> {
        let probe = json.probe;
        let mut config = Self::preset(probe.kind, probe.positions_file);

        config.neighbors = match (probe.neighbors_file, probe.neighbor_radius) {
            (Some(file), None) => NeighborSource::File(file),
            (None, Some(radius)) => NeighborSource::Radius(radius),
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "set either neighbors_file or neighbor_radius, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(Error::Config(
                    "one of neighbors_file or neighbor_radius is required".to_string(),
                ))
            }
        };

        if let Some(value) = probe.num_channels {
            config.num_channels = value;
        }
        if let Some(value) = probe.spike_delay {
            config.spike_delay = value;
        }
        if let Some(value) = probe.spike_peak_duration {
            config.spike_peak_duration = value;
        }
        if let Some(value) = probe.noise_duration {
            config.noise_duration = value;
        }
        if let Some(value) = probe.noise_amp_percent {
            config.noise_amp_percent = value;
        }
        if let Some(value) = probe.inner_radius {
            config.inner_radius = value;
        }
        if let Some(value) = probe.fps {
            config.fps = value;
        }
        if let Some(value) = probe.masked_channels {
            config.masked_channels = value;
        }
        config.frame_count = probe.frame_count;

        if config.kind == ProbeKind::Generic && config.num_channels == 0 {
            return Err(Error::Config(
                "generic probes require num_channels".to_string(),
            ));
        }
        Ok(config)
    }

    fn resolve_relative_to(&mut self, dir: &Path) {
        if self.positions_file.is_relative() {
            self.positions_file = dir.join(&self.positions_file);
        }
        if let NeighborSource::File(file) = &mut self.neighbors {
            if file.is_relative() {
                *file = dir.join(&*file);
            }
        }
    }

    /// Detection constants described by this configuration.
    #[must_use]
    pub fn params(&self) -> ProbeParams {
        ProbeParams {
            num_channels: self.num_channels,
            spike_delay: self.spike_delay,
            spike_peak_duration: self.spike_peak_duration,
            noise_duration: self.noise_duration,
            noise_amp_percent: self.noise_amp_percent,
            inner_radius: self.inner_radius,
            fps: self.fps,
            masked_channels: self.masked_channels.clone(),
        }
    }

    /// Loads the channel topology.
    ///
    /// # Errors
    /// Returns a core error if a topology file is missing or malformed.
    pub fn load_topology(&self) -> Result<ChannelTopology> {
        let topology = match &self.neighbors {
            NeighborSource::File(neighbors) => {
                ChannelTopology::load(&self.positions_file, neighbors)?
            }
            NeighborSource::Radius(radius) => {
                let positions = ChannelTopology::load_positions(&self.positions_file)?;
                ChannelTopology::from_positions(positions, *radius)?
            }
        };
        Ok(topology)
    }
}
