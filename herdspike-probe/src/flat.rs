//! Memory-mapped flat binary recordings (frame-interleaved `i16`, little endian).

use crate::source::RawSource;
use crate::{Error, Result};
use herdspike_core::SampleBlock;
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};

const BYTES_PER_SAMPLE: usize = 2;

/// A flat interleaved recording accessed through a read-only memory map.
///
/// Sample `(channel, frame)` lives at element `channel + num_channels * frame`.
/// The mapping is released when the source is dropped.
pub struct FlatBinarySource {
    mmap: Mmap,
    path: PathBuf,
    num_channels: usize,
    num_frames: usize,
}

impl FlatBinarySource {
    /// Maps a flat recording with `num_channels` channels per frame.
    ///
    /// # Errors
    /// Returns `Error::Open` if the file cannot be opened or mapped and
    /// `Error::DataIntegrity` if the file does not hold a whole number of
    /// frames.
    pub fn open<P: AsRef<Path>>(path: P, num_channels: usize) -> Result<Self> {
        let path = path.as_ref();
        if num_channels == 0 {
            return Err(Error::Config("flat recordings need at least one channel".to_string()));
        }
        let file = File::open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file) }.map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;

        if mmap.len() % BYTES_PER_SAMPLE != 0 {
            return Err(Error::DataIntegrity(format!(
                "file size {} is not a multiple of {BYTES_PER_SAMPLE} bytes (file: {})",
                mmap.len(),
                path.display()
            )));
        }
        let samples = mmap.len() / BYTES_PER_SAMPLE;
        if samples % num_channels != 0 {
            return Err(Error::DataIntegrity(format!(
                "{samples} samples is not a multiple of {num_channels} channels (file: {})",
                path.display()
            )));
        }

        Ok(Self {
            mmap,
            path: path.to_path_buf(),
            num_channels,
            num_frames: samples / num_channels,
        })
    }

    /// Path of the mapped file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total number of samples in the file.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.mmap.len() / BYTES_PER_SAMPLE
    }
}

impl RawSource for FlatBinarySource {
    fn format(&self) -> &'static str {
        "flat-i16"
    }

    fn channel_count(&self) -> usize {
        self.num_channels
    }

    fn frame_count(&self) -> usize {
        self.num_frames
    }

    fn read_into(&self, block: &mut SampleBlock) -> Result<()> {
        let nch = self.num_channels;
        let frames = block.num_frames();
        let frame_bytes = nch * BYTES_PER_SAMPLE;
        let start = block.first_frame() * frame_bytes;
        let window = &self.mmap[start..start + frames * frame_bytes];

        for channel in 0..nch {
            let offset = channel * BYTES_PER_SAMPLE;
            let trace = block.channel_mut(channel);
            for (slot, frame) in trace.iter_mut().zip(window.chunks_exact(frame_bytes)) {
                *slot = i16::from_le_bytes([frame[offset], frame[offset + 1]]);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_samples(samples: &[i16]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for s in samples {
            file.write_all(&s.to_le_bytes()).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_flat_read_window() {
        let samples: Vec<i16> = (0..20).map(|v| v - 10).collect();
        let file = write_samples(&samples);
        let source = FlatBinarySource::open(file.path(), 4).unwrap();
        assert_eq!(source.frame_count(), 5);
        assert_eq!(source.sample_count(), 20);

        let mut block = SampleBlock::zeros(4, 2, 3);
        source.read_into(&mut block).unwrap();
        for channel in 0..4 {
            for frame in 0..3 {
                let global = frame + 2;
                assert_eq!(
                    block.get(channel, frame).unwrap(),
                    samples[channel + 4 * global]
                );
            }
        }
    }

    #[test]
    fn test_flat_not_multiple_of_channels() {
        let file = write_samples(&[0; 10]);
        assert!(matches!(
            FlatBinarySource::open(file.path(), 4),
            Err(Error::DataIntegrity(_))
        ));
    }

    #[test]
    fn test_flat_odd_byte_count() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 7]).unwrap();
        file.flush().unwrap();
        assert!(matches!(
            FlatBinarySource::open(file.path(), 1),
            Err(Error::DataIntegrity(_))
        ));
    }

    #[test]
    fn test_flat_missing_file() {
        assert!(matches!(
            FlatBinarySource::open("/nonexistent/recording.bin", 4),
            Err(Error::Open { .. })
        ));
    }
}
