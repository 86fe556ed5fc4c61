//! Probe model: layout, open recordings and the format-dispatch factory.

use crate::config::{ProbeConfig, ProbeKind};
use crate::flat::FlatBinarySource;
use crate::source::{InMemorySource, RawSource};
use crate::{Error, Result};
use herdspike_core::{ChannelTopology, Position, ProbeParams, SampleBlock};
use std::path::{Path, PathBuf};

/// Probe geometry and detection constants, without any data attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeLayout {
    kind: ProbeKind,
    params: ProbeParams,
    topology: ChannelTopology,
}

impl ProbeLayout {
    /// Combines parameters and topology.
    ///
    /// # Errors
    /// Returns an error if the parameters are invalid or the topology does
    /// not describe exactly `params.num_channels` channels.
    pub fn new(kind: ProbeKind, params: ProbeParams, topology: ChannelTopology) -> Result<Self> {
        params.validate()?;
        if topology.len() != params.num_channels {
            return Err(Error::DataIntegrity(format!(
                "{} probe has {} channels but its topology describes {}",
                kind.name(),
                params.num_channels,
                topology.len()
            )));
        }
        Ok(Self {
            kind,
            params,
            topology,
        })
    }

    #[must_use]
    pub fn kind(&self) -> ProbeKind {
        self.kind
    }

    #[must_use]
    pub fn params(&self) -> &ProbeParams {
        &self.params
    }

    #[must_use]
    pub fn topology(&self) -> &ChannelTopology {
        &self.topology
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.params.num_channels
    }

    /// Sampling rate in frames per second.
    #[must_use]
    pub fn fps(&self) -> f64 {
        self.params.fps
    }

    /// Positions of the given channels.
    ///
    /// # Errors
    /// Returns a channel index error if any channel is out of range.
    pub fn channel_positions(&self, channels: &[usize]) -> Result<Vec<Position>> {
        Ok(self.topology.channel_positions(channels)?)
    }
}

/// A probe layout bound to an open raw data source.
///
/// The source (file handle, memory map) is owned exclusively and released
/// on drop or [`Recording::close`].
pub struct Recording {
    layout: ProbeLayout,
    source: Box<dyn RawSource>,
    num_frames: usize,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Recording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recording")
            .field("kind", &self.layout.kind)
            .field("format", &self.source.format())
            .field("channels", &self.layout.channel_count())
            .field("frames", &self.num_frames)
            .field("path", &self.path)
            .finish()
    }
}

impl Recording {
    /// Binds a layout to a source that already matches it.
    ///
    /// # Errors
    /// Returns `Error::DataIntegrity` if the source channel count differs
    /// from the layout.
    pub fn new(layout: ProbeLayout, source: Box<dyn RawSource>) -> Result<Self> {
        if source.channel_count() != layout.channel_count() {
            return Err(Error::DataIntegrity(format!(
                "{} source has {} channels, layout expects {}",
                source.format(),
                source.channel_count(),
                layout.channel_count()
            )));
        }
        let num_frames = source.frame_count();
        Ok(Self {
            layout,
            source,
            num_frames,
            path: None,
        })
    }

    /// Builds a recording from a configuration and an opened source.
    ///
    /// Channel count and sampling rate stored in the file take precedence
    /// over the configuration. A full-array topology is narrowed to the
    /// recorded channels when the source provides a channel map.
    fn assemble(
        config: &ProbeConfig,
        topology: ChannelTopology,
        source: Box<dyn RawSource>,
        path: Option<PathBuf>,
    ) -> Result<Self> {
        let mut params = config.params();
        params.num_channels = source.channel_count();
        if let Some(rate) = source.sampling_rate() {
            params.fps = rate;
        }

        let topology = match source.channel_map() {
            Some(map) if topology.len() != map.len() => {
                params.masked_channels = config
                    .masked_channels
                    .iter()
                    .filter_map(|masked| map.iter().position(|c| c == masked))
                    .collect();
                topology.select(map)?
            }
            _ => topology,
        };

        let stored = source.frame_count();
        let num_frames = match config.frame_count {
            Some(frames) if frames > stored => {
                return Err(Error::DataIntegrity(format!(
                    "{frames} frames configured but the recording holds {stored}"
                )))
            }
            Some(frames) => frames,
            None => stored,
        };

        let layout = ProbeLayout::new(config.kind, params, topology)?;
        Ok(Self {
            layout,
            source,
            num_frames,
            path,
        })
    }

    /// Reads frames `[t0, t1)` of every channel.
    ///
    /// # Errors
    /// Returns `Error::Range` unless `t0 < t1 <= frame_count()`, or the
    /// source's decoding error.
    pub fn read(&self, t0: usize, t1: usize) -> Result<SampleBlock> {
        if t0 >= t1 || t1 > self.num_frames {
            return Err(Error::Range {
                t0,
                t1,
                n_frames: self.num_frames,
            });
        }
        let mut block = SampleBlock::zeros(self.layout.channel_count(), t0, t1 - t0);
        self.source.read_into(&mut block)?;
        Ok(block)
    }

    #[must_use]
    pub fn layout(&self) -> &ProbeLayout {
        &self.layout
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.num_frames
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.layout.channel_count()
    }

    #[must_use]
    pub fn fps(&self) -> f64 {
        self.layout.fps()
    }

    #[must_use]
    pub fn params(&self) -> &ProbeParams {
        self.layout.params()
    }

    #[must_use]
    pub fn topology(&self) -> &ChannelTopology {
        self.layout.topology()
    }

    /// Storage format of the underlying source.
    #[must_use]
    pub fn format(&self) -> &'static str {
        self.source.format()
    }

    /// Data file, if the recording was opened from one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Releases the raw data handle and returns the layout.
    #[must_use]
    pub fn close(self) -> ProbeLayout {
        log::debug!("closing {} recording", self.source.format());
        self.layout
    }
}

/// A probe either bound to a recording or describing geometry only.
#[derive(Debug)]
pub enum Probe {
    /// Layout plus open raw data.
    Configured(Recording),
    /// Layout only; reads fail with `Error::NotConfigured`.
    MetadataOnly(ProbeLayout),
}

impl Probe {
    /// Opens a probe described by `config`.
    ///
    /// The topology is loaded first. Without a data file the probe is
    /// metadata-only; otherwise the raw reader is chosen by `config.kind`.
    ///
    /// # Errors
    /// Returns an error if the topology or the data file cannot be loaded,
    /// or the configuration is inconsistent with the file.
    pub fn open(config: &ProbeConfig, data_file: Option<&Path>) -> Result<Self> {
        let topology = config.load_topology()?;

        let Some(path) = data_file else {
            log::info!(
                "{} probe without data file: {} channels, metadata only",
                config.kind.name(),
                topology.len()
            );
            let layout = ProbeLayout::new(config.kind, config.params(), topology)?;
            return Ok(Self::MetadataOnly(layout));
        };

        let source: Box<dyn RawSource> = match config.kind {
            ProbeKind::NeuroPixel | ProbeKind::Generic => {
                Box::new(FlatBinarySource::open(path, config.num_channels)?)
            }
            ProbeKind::BioCam => open_biocam(path)?,
            ProbeKind::Mea1k => open_mea1k(path)?,
        };
        let recording = Recording::assemble(config, topology, source, Some(path.to_path_buf()))?;
        log::info!(
            "{} {} ({}): {} channels, {} frames at {} Hz",
            config.kind.name(),
            path.display(),
            recording.format(),
            recording.channel_count(),
            recording.frame_count(),
            recording.fps()
        );
        Ok(Self::Configured(recording))
    }

    /// Emulated probe over interleaved in-memory samples.
    ///
    /// # Errors
    /// Returns an error if the topology cannot be loaded or the samples do
    /// not form whole frames of `config.num_channels` channels.
    pub fn from_samples(config: &ProbeConfig, samples: Vec<i16>) -> Result<Self> {
        let topology = config.load_topology()?;
        let source = InMemorySource::new(samples, config.num_channels)?;
        let recording = Recording::assemble(config, topology, Box::new(source), None)?;
        Ok(Self::Configured(recording))
    }

    #[must_use]
    pub fn layout(&self) -> &ProbeLayout {
        match self {
            Self::Configured(recording) => recording.layout(),
            Self::MetadataOnly(layout) => layout,
        }
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        matches!(self, Self::Configured(_))
    }

    #[must_use]
    pub fn recording(&self) -> Option<&Recording> {
        match self {
            Self::Configured(recording) => Some(recording),
            Self::MetadataOnly(_) => None,
        }
    }

    /// Unwraps the recording.
    ///
    /// # Errors
    /// Returns `Error::NotConfigured` for a metadata-only probe.
    pub fn into_recording(self) -> Result<Recording> {
        match self {
            Self::Configured(recording) => Ok(recording),
            Self::MetadataOnly(layout) => Err(Error::NotConfigured {
                probe: layout.kind.name().to_string(),
            }),
        }
    }

    /// Reads frames `[t0, t1)`.
    ///
    /// # Errors
    /// Returns `Error::NotConfigured` for a metadata-only probe and
    /// `Error::Range` for a window outside the recording.
    pub fn read(&self, t0: usize, t1: usize) -> Result<SampleBlock> {
        match self {
            Self::Configured(recording) => recording.read(t0, t1),
            Self::MetadataOnly(layout) => Err(Error::NotConfigured {
                probe: layout.kind.name().to_string(),
            }),
        }
    }

    /// Frames available; 0 without a data file.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.recording().map_or(0, Recording::frame_count)
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.layout().channel_count()
    }

    #[must_use]
    pub fn fps(&self) -> f64 {
        self.layout().fps()
    }

    #[must_use]
    pub fn kind(&self) -> ProbeKind {
        self.layout().kind()
    }

    #[must_use]
    pub fn params(&self) -> &ProbeParams {
        self.layout().params()
    }

    #[must_use]
    pub fn topology(&self) -> &ChannelTopology {
        self.layout().topology()
    }

    /// Positions of the given channels.
    ///
    /// # Errors
    /// Returns a channel index error if any channel is out of range.
    pub fn channel_positions(&self, channels: &[usize]) -> Result<Vec<Position>> {
        self.layout().channel_positions(channels)
    }
}

#[cfg(feature = "hdf5")]
fn open_biocam(path: &Path) -> Result<Box<dyn RawSource>> {
    Ok(Box::new(crate::brw::BrwSource::open(path)?))
}

#[cfg(not(feature = "hdf5"))]
fn open_biocam(path: &Path) -> Result<Box<dyn RawSource>> {
    Err(Error::Config(format!(
        "{}: BioCam recordings require the `hdf5` feature",
        path.display()
    )))
}

#[cfg(feature = "hdf5")]
fn open_mea1k(path: &Path) -> Result<Box<dyn RawSource>> {
    Ok(Box::new(crate::maxone::MaxOneSource::open(path)?))
}

#[cfg(not(feature = "hdf5"))]
fn open_mea1k(path: &Path) -> Result<Box<dyn RawSource>> {
    Err(Error::Config(format!(
        "{}: Mea1k recordings require the `hdf5` feature",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Four channels on a line, 10 units apart.
    fn generic_config(dir: &TempDir) -> ProbeConfig {
        let positions = dir.path().join("positions");
        fs::write(&positions, "0,0\n10,0\n20,0\n30,0\n").unwrap();
        ProbeConfig::generic(4, 10_000.0, positions, 10.0, 15.0)
    }

    #[test]
    fn test_metadata_only_probe() {
        let dir = TempDir::new().unwrap();
        let probe = Probe::open(&generic_config(&dir), None).unwrap();

        assert!(!probe.is_configured());
        assert_eq!(probe.frame_count(), 0);
        assert_eq!(probe.channel_count(), 4);
        assert!(matches!(
            probe.read(0, 1),
            Err(Error::NotConfigured { .. })
        ));
        assert!(matches!(
            probe.into_recording(),
            Err(Error::NotConfigured { .. })
        ));
    }

    #[test]
    fn test_emulated_read_bounds() {
        let dir = TempDir::new().unwrap();
        let samples: Vec<i16> = (0..40).collect();
        let probe = Probe::from_samples(&generic_config(&dir), samples).unwrap();
        assert_eq!(probe.frame_count(), 10);

        let block = probe.read(9, 10).unwrap();
        assert_eq!(block.shape(), (4, 1));
        assert_eq!(block.channel(3), &[39]);

        for (t0, t1) in [(10, 11), (3, 3), (5, 2), (0, 11)] {
            assert!(
                matches!(probe.read(t0, t1), Err(Error::Range { .. })),
                "[{t0}, {t1}) should be rejected"
            );
        }
    }

    #[test]
    fn test_frame_count_limit() {
        let dir = TempDir::new().unwrap();
        let config = generic_config(&dir).with_frame_count(6);
        let probe = Probe::from_samples(&config, vec![0; 40]).unwrap();
        assert_eq!(probe.frame_count(), 6);
        assert!(probe.read(5, 7).is_err());

        let config = generic_config(&dir).with_frame_count(11);
        assert!(matches!(
            Probe::from_samples(&config, vec![0; 40]),
            Err(Error::DataIntegrity(_))
        ));
    }

    #[test]
    fn test_flat_file_dispatch() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("raw.bin");
        let bytes: Vec<u8> = (0..8_i16).flat_map(i16::to_le_bytes).collect();
        fs::write(&data, bytes).unwrap();

        let probe = Probe::open(&generic_config(&dir), Some(&data)).unwrap();
        let recording = probe.into_recording().unwrap();
        assert_eq!(recording.format(), "flat-i16");
        assert_eq!(recording.frame_count(), 2);
        assert_eq!(recording.path(), Some(data.as_path()));
        assert_eq!(recording.read(1, 2).unwrap().channel(0), &[4]);

        let layout = recording.close();
        assert_eq!(layout.channel_count(), 4);
    }

    #[test]
    fn test_masked_channel_out_of_range() {
        let dir = TempDir::new().unwrap();
        let config = generic_config(&dir).with_masked_channels(vec![4]);
        assert!(matches!(
            Probe::open(&config, None),
            Err(Error::Core(herdspike_core::Error::ChannelIndex { channel: 4, .. }))
        ));
    }

    #[test]
    fn test_topology_channel_count_mismatch() {
        let dir = TempDir::new().unwrap();
        let mut config = generic_config(&dir);
        config.num_channels = 5;
        assert!(matches!(
            Probe::open(&config, None),
            Err(Error::DataIntegrity(_))
        ));
    }

    #[test]
    fn test_recording_new_checks_channels() {
        let topology =
            ChannelTopology::from_positions(vec![Position::new(0, 0), Position::new(0, 5)], 6.0)
                .unwrap();
        let params = ProbeParams {
            num_channels: 2,
            spike_delay: 1,
            spike_peak_duration: 2,
            noise_duration: 1,
            noise_amp_percent: 1.0,
            inner_radius: 6.0,
            fps: 1_000.0,
            masked_channels: Vec::new(),
        };
        let layout = ProbeLayout::new(ProbeKind::Generic, params, topology).unwrap();

        let wrong = InMemorySource::new(vec![0; 9], 3).unwrap();
        assert!(Recording::new(layout.clone(), Box::new(wrong)).is_err());

        let right = InMemorySource::new(vec![0; 8], 2).unwrap();
        let recording = Recording::new(layout, Box::new(right)).unwrap();
        assert_eq!(recording.frame_count(), 4);
        assert_eq!(recording.path(), None);
    }
}
