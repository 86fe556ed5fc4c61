//! 3Brain BioCam `.brw` recordings (HDF5).
//!
//! Two raw layouts exist, selected by the `Version` attribute of `3BData`:
//! - 100: `3BData/Raw` is 2-D, `[frame, channel]`
//! - 101: `3BData/Raw` is flat, `[frame * channels + channel]`

use crate::source::RawSource;
use crate::{Error, Result};
use hdf5::{Dataset, File, H5Type};
use herdspike_core::SampleBlock;
use std::path::Path;

const RAW_DATASET: &str = "3BData/Raw";
const N_FRAMES: &str = "3BRecInfo/3BRecVars/NRecFrames";
const SAMPLING_RATE: &str = "3BRecInfo/3BRecVars/SamplingRate";
const N_COLS: &str = "3BRecInfo/3BMeaChip/NCols";
const CHANNELS: &str = "3BRecInfo/3BMeaStreams/Raw/Chs";

/// Raw layout revision of a BRW file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrwVersion {
    /// 2-D `[frame, channel]` dataset.
    V100,
    /// Flat frame-interleaved dataset.
    V101,
}

impl BrwVersion {
    /// Maps the header version number; anything other than 100 uses the
    /// flat layout.
    #[must_use]
    pub fn from_header(version: i32) -> Self {
        if version == 100 {
            Self::V100
        } else {
            Self::V101
        }
    }
}

#[derive(H5Type, Clone, Copy, Debug)]
#[repr(C)]
struct BrwChannel {
    #[hdf5(rename = "Row")]
    row: i16,
    #[hdf5(rename = "Col")]
    col: i16,
}

/// An open BRW recording. The layout is fixed at construction.
pub struct BrwSource {
    _file: File,
    raw: Dataset,
    version: BrwVersion,
    num_channels: usize,
    num_frames: usize,
    sampling_rate: f64,
    channel_map: Vec<usize>,
}

impl BrwSource {
    /// Opens a BRW file and reads its recording header.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, a header field is
    /// missing, or the raw dataset size disagrees with the header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::Open {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
        let file = File::open(path)?;
        let version: i32 = file.group("3BData")?.attr("Version")?.read_scalar()?;
        let version = BrwVersion::from_header(version);

        let num_frames = to_usize(read_first::<i64>(&file, N_FRAMES)?, N_FRAMES)?;
        let sampling_rate = read_first::<f64>(&file, SAMPLING_RATE)?;
        let n_cols = to_usize(read_first::<i64>(&file, N_COLS)?, N_COLS)?;

        let raw = file.dataset(RAW_DATASET)?;
        let shape = raw.shape();
        let num_channels = match version {
            BrwVersion::V100 => match shape.as_slice() {
                [frames, channels] if *frames == num_frames => *channels,
                _ => {
                    return Err(Error::DataIntegrity(format!(
                        "{RAW_DATASET} has shape {shape:?}, expected [{num_frames}, channels]"
                    )))
                }
            },
            BrwVersion::V101 => {
                let total = raw.size();
                if num_frames == 0 || total % num_frames != 0 {
                    return Err(Error::DataIntegrity(format!(
                        "{RAW_DATASET} holds {total} samples, not a multiple of {num_frames} frames"
                    )));
                }
                total / num_frames
            }
        };

        let channels = file.dataset(CHANNELS)?.read_raw::<BrwChannel>()?;
        if channels.len() != num_channels {
            return Err(Error::DataIntegrity(format!(
                "{CHANNELS} lists {} channels, raw data holds {num_channels}",
                channels.len()
            )));
        }
        let channel_map = channels
            .iter()
            .map(|ch| {
                let row = usize::try_from(i32::from(ch.row) - 1);
                let col = usize::try_from(i32::from(ch.col) - 1);
                match (row, col) {
                    (Ok(row), Ok(col)) => Ok(col + row * n_cols),
                    _ => Err(Error::InvalidFormat(format!(
                        "channel ({}, {}) in {CHANNELS} is not 1-based",
                        ch.row, ch.col
                    ))),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "BRW v{} {}: {num_channels} channels, {num_frames} frames at {sampling_rate} Hz",
            if version == BrwVersion::V100 { 100 } else { 101 },
            path.display()
        );

        Ok(Self {
            _file: file,
            raw,
            version,
            num_channels,
            num_frames,
            sampling_rate,
            channel_map,
        })
    }

    /// Layout selected from the header.
    #[must_use]
    pub fn version(&self) -> BrwVersion {
        self.version
    }

    fn decode_v100(&self, t0: usize, t1: usize) -> Result<Vec<u16>> {
        let frames = self.raw.read_slice_2d::<u16, _>((t0..t1, ..))?;
        Ok(frames.iter().copied().collect())
    }

    fn decode_v101(&self, t0: usize, t1: usize) -> Result<Vec<u16>> {
        let nch = self.num_channels;
        let flat = self.raw.read_slice_1d::<u16, _>(nch * t0..nch * t1)?;
        Ok(flat.to_vec())
    }
}

impl RawSource for BrwSource {
    fn format(&self) -> &'static str {
        match self.version {
            BrwVersion::V100 => "brw-100",
            BrwVersion::V101 => "brw-101",
        }
    }

    fn channel_count(&self) -> usize {
        self.num_channels
    }

    fn frame_count(&self) -> usize {
        self.num_frames
    }

    fn sampling_rate(&self) -> Option<f64> {
        Some(self.sampling_rate)
    }

    fn channel_map(&self) -> Option<&[usize]> {
        Some(&self.channel_map)
    }

    fn read_into(&self, block: &mut SampleBlock) -> Result<()> {
        let t0 = block.first_frame();
        let t1 = t0 + block.num_frames();
        let interleaved = match self.version {
            BrwVersion::V100 => self.decode_v100(t0, t1)?,
            BrwVersion::V101 => self.decode_v101(t0, t1)?,
        };
        let nch = self.num_channels;
        for channel in 0..nch {
            let trace = block.channel_mut(channel);
            for (frame, slot) in trace.iter_mut().enumerate() {
                let value = interleaved[channel + nch * frame];
                *slot = i16::try_from(value).map_err(|_| {
                    Error::DataIntegrity(format!(
                        "sample {value} at channel {channel}, frame {} exceeds i16",
                        t0 + frame
                    ))
                })?;
            }
        }
        Ok(())
    }
}

fn read_first<T: H5Type + Copy>(file: &File, name: &str) -> Result<T> {
    file.dataset(name)?
        .read_raw::<T>()?
        .first()
        .copied()
        .ok_or_else(|| Error::InvalidFormat(format!("{name} is empty")))
}

fn to_usize(value: i64, name: &str) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| Error::InvalidFormat(format!("{name} must be non-negative, got {value}")))
}
