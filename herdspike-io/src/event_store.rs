//! Binary detection store (`.bin`).
//!
//! Layout, little endian:
//!
//! | Offset | Field |
//! |---|---|
//! | 0 | magic `HSPK` |
//! | 4 | version `u16` |
//! | 6 | flags `u16` (bit 0: events are localised) |
//! | 8 | cutout length `u32` |
//! | 12 | channel count `u32` |
//! | 16 | sampling rate `f64` |
//!
//! followed by fixed-size records
//! `channel u32 | frame u64 | amplitude i32 | x f32 | y f32 | cutout i16 x L`.
//! Unlocalised events store NaN coordinates.

use crate::{Error, Result};
use herdspike_core::SpikeBatch;
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// File magic.
pub const STORE_MAGIC: [u8; 4] = *b"HSPK";
/// Current store version.
pub const STORE_VERSION: u16 = 1;
/// Header size in bytes.
pub const HEADER_LEN: usize = 24;

const FLAG_LOCALIZED: u16 = 1;
const RECORD_FIXED_LEN: usize = 24;

/// Store header.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StoreHeader {
    /// Events carry (x, y) locations.
    pub localized: bool,
    /// Samples per waveform cutout.
    pub cutout_length: usize,
    /// Channel count of the recording the events came from.
    pub num_channels: usize,
    /// Sampling rate of the recording (Hz).
    pub sampling_rate: f64,
}

impl StoreHeader {
    /// Bytes per event record.
    #[must_use]
    pub fn record_len(&self) -> usize {
        RECORD_FIXED_LEN + 2 * self.cutout_length
    }

    fn encode(&self) -> Result<[u8; HEADER_LEN]> {
        let cutout_length = u32::try_from(self.cutout_length).map_err(|_| {
            Error::InvalidFormat(format!("cutout length {} too large", self.cutout_length))
        })?;
        let num_channels = u32::try_from(self.num_channels).map_err(|_| {
            Error::InvalidFormat(format!("channel count {} too large", self.num_channels))
        })?;
        let flags = if self.localized { FLAG_LOCALIZED } else { 0 };

        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&STORE_MAGIC);
        bytes[4..6].copy_from_slice(&STORE_VERSION.to_le_bytes());
        bytes[6..8].copy_from_slice(&flags.to_le_bytes());
        bytes[8..12].copy_from_slice(&cutout_length.to_le_bytes());
        bytes[12..16].copy_from_slice(&num_channels.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.sampling_rate.to_le_bytes());
        Ok(bytes)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::InvalidFormat(format!(
                "event store header needs {HEADER_LEN} bytes, file has {}",
                bytes.len()
            )));
        }
        if bytes[0..4] != STORE_MAGIC {
            return Err(Error::InvalidFormat(format!(
                "bad event store magic {:?}",
                &bytes[0..4]
            )));
        }
        let version = le_u16(bytes, 4);
        if version != STORE_VERSION {
            return Err(Error::InvalidFormat(format!(
                "unsupported event store version {version}"
            )));
        }
        Ok(Self {
            localized: le_u16(bytes, 6) & FLAG_LOCALIZED != 0,
            cutout_length: le_u32(bytes, 8) as usize,
            num_channels: le_u32(bytes, 12) as usize,
            sampling_rate: f64::from_le_bytes(array_at(bytes, 16)),
        })
    }
}

/// Streaming writer for the event store.
pub struct EventStoreWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    header: StoreHeader,
    count: usize,
}

impl EventStoreWriter {
    /// Creates the file and writes the header.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn create<P: AsRef<Path>>(path: P, header: StoreHeader) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&header.encode()?)
            .map_err(|e| Error::io(&path, e))?;
        Ok(Self {
            writer,
            path,
            header,
            count: 0,
        })
    }

    #[must_use]
    pub fn header(&self) -> &StoreHeader {
        &self.header
    }

    /// Events written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Appends every event of `batch`.
    ///
    /// # Errors
    /// Returns `Error::InvalidFormat` if the batch cutout length differs from
    /// the header, or an I/O error.
    pub fn write_batch(&mut self, batch: &SpikeBatch) -> Result<()> {
        if batch.cutout_len() != self.header.cutout_length {
            return Err(Error::InvalidFormat(format!(
                "batch cutout length {} does not match store cutout length {}",
                batch.cutout_len(),
                self.header.cutout_length
            )));
        }
        let mut record = Vec::with_capacity(self.header.record_len());
        for i in 0..batch.len() {
            record.clear();
            record.extend_from_slice(&batch.channel[i].to_le_bytes());
            record.extend_from_slice(&batch.frame[i].to_le_bytes());
            record.extend_from_slice(&batch.amplitude[i].to_le_bytes());
            record.extend_from_slice(&batch.x[i].to_le_bytes());
            record.extend_from_slice(&batch.y[i].to_le_bytes());
            for sample in batch.cutout(i) {
                record.extend_from_slice(&sample.to_le_bytes());
            }
            self.writer
                .write_all(&record)
                .map_err(|e| Error::io(&self.path, e))?;
        }
        self.count += batch.len();
        Ok(())
    }

    /// Flushes the file and returns the number of events written.
    ///
    /// # Errors
    /// Returns an error if the final flush fails.
    pub fn finish(mut self) -> Result<usize> {
        self.writer.flush().map_err(|e| Error::io(&self.path, e))?;
        Ok(self.count)
    }
}

/// Memory-mapped reader for the event store.
pub struct EventStoreReader {
    mmap: Mmap,
    path: PathBuf,
    header: StoreHeader,
    len: usize,
}

impl EventStoreReader {
    /// Maps the file and validates its header and size.
    ///
    /// # Errors
    /// Returns `Error::InvalidFormat` on a bad magic or version, or when the
    /// body is not a whole number of records.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| Error::io(&path, e))?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::io(&path, e))?;

        let header = StoreHeader::decode(&mmap)?;
        let body = mmap.len() - HEADER_LEN;
        let record_len = header.record_len();
        if body % record_len != 0 {
            return Err(Error::InvalidFormat(format!(
                "{}: {body} body bytes are not a whole number of {record_len}-byte records",
                path.display()
            )));
        }
        Ok(Self {
            len: body / record_len,
            mmap,
            path,
            header,
        })
    }

    #[must_use]
    pub fn header(&self) -> &StoreHeader {
        &self.header
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Decodes all records.
    ///
    /// # Errors
    /// Returns `Error::InvalidFormat` if a record names a channel outside the
    /// recording.
    pub fn read_all(&self) -> Result<SpikeBatch> {
        let cutout_length = self.header.cutout_length;
        let mut batch = SpikeBatch::with_capacity(cutout_length, self.len);
        let mut cutout = vec![0i16; cutout_length];
        for record in self.mmap[HEADER_LEN..].chunks_exact(self.header.record_len()) {
            let channel = le_u32(record, 0);
            if channel as usize >= self.header.num_channels {
                return Err(Error::InvalidFormat(format!(
                    "{}: event on channel {channel}, store has {} channels",
                    self.path.display(),
                    self.header.num_channels
                )));
            }
            let frame = u64::from_le_bytes(array_at(record, 4));
            let amplitude = i32::from_le_bytes(array_at(record, 12));
            let x = f32::from_le_bytes(array_at(record, 16));
            let y = f32::from_le_bytes(array_at(record, 20));
            for (sample, bytes) in cutout
                .iter_mut()
                .zip(record[RECORD_FIXED_LEN..].chunks_exact(2))
            {
                *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
            }
            let location = (x.is_finite() && y.is_finite()).then_some((x, y));
            batch.push(channel, frame, amplitude, location, &cutout);
        }
        Ok(batch)
    }
}

/// Writes `batch` to a new store at `path`.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_event_store<P: AsRef<Path>>(
    path: P,
    header: StoreHeader,
    batch: &SpikeBatch,
) -> Result<usize> {
    let mut writer = EventStoreWriter::create(path, header)?;
    writer.write_batch(batch)?;
    writer.finish()
}

/// Reads a whole store.
///
/// # Errors
/// Returns an error if the file cannot be opened or is malformed.
pub fn read_event_store<P: AsRef<Path>>(path: P) -> Result<(StoreHeader, SpikeBatch)> {
    let reader = EventStoreReader::open(path)?;
    let batch = reader.read_all()?;
    Ok((*reader.header(), batch))
}

fn array_at<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes(array_at(bytes, at))
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(array_at(bytes, at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn header(localized: bool) -> StoreHeader {
        StoreHeader {
            localized,
            cutout_length: 3,
            num_channels: 4,
            sampling_rate: 24_000.0,
        }
    }

    fn sample_batch() -> SpikeBatch {
        let mut batch = SpikeBatch::new(3);
        batch.push(0, 10, 55, Some((1.5, -2.0)), &[-1, -40, 3]);
        batch.push(3, 4_000_000_000, 21, Some((30.0, 0.25)), &[7, -20, 0]);
        batch
    }

    #[test]
    fn test_store_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.bin");
        let batch = sample_batch();
        assert_eq!(write_event_store(&path, header(true), &batch).unwrap(), 2);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 2 * (24 + 6));
        assert_eq!(&bytes[0..4], b"HSPK");

        let (read_header, events) = read_event_store(&path).unwrap();
        assert_eq!(read_header, header(true));
        assert_eq!(events, batch);
    }

    #[test]
    fn test_unlocalized_events_read_back_without_location() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.bin");
        let mut batch = SpikeBatch::new(3);
        batch.push(2, 7, 30, None, &[1, 2, 3]);
        write_event_store(&path, header(false), &batch).unwrap();

        let (read_header, events) = read_event_store(&path).unwrap();
        assert!(!read_header.localized);
        assert_eq!(events.location(0), None);
        assert_eq!(events.cutout(0), &[1, 2, 3]);
    }

    #[test]
    fn test_empty_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        write_event_store(&path, header(true), &SpikeBatch::new(3)).unwrap();
        let reader = EventStoreReader::open(&path).unwrap();
        assert!(reader.is_empty());
        assert!(reader.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_malformed_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.bin");

        let mut bytes = header(true).encode().unwrap().to_vec();
        bytes[0] = b'X';
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(EventStoreReader::open(&path), Err(Error::InvalidFormat(_))));

        let mut bytes = header(true).encode().unwrap().to_vec();
        bytes[4] = 9;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(EventStoreReader::open(&path), Err(Error::InvalidFormat(_))));

        let mut bytes = header(true).encode().unwrap().to_vec();
        bytes.extend_from_slice(&[0u8; 17]);
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(EventStoreReader::open(&path), Err(Error::InvalidFormat(_))));

        std::fs::write(&path, b"HSPK").unwrap();
        assert!(matches!(EventStoreReader::open(&path), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_cutout_length_mismatch() {
        let dir = tempdir().unwrap();
        let mut writer = EventStoreWriter::create(dir.path().join("x.bin"), header(true)).unwrap();
        let batch = SpikeBatch::new(5);
        assert!(matches!(writer.write_batch(&batch), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = EventStoreReader::open(dir.path().join("nope.bin")).err().unwrap();
        assert!(matches!(err, Error::Io { .. }));
    }
}
