//! MaxWell MaxOne / Mea1k recordings (HDF5).
//!
//! `/sig` is a `[channel, frame]` array of `u16` covering every amplifier;
//! `/mapping` lists which amplifier channels are routed to an electrode.

use crate::source::RawSource;
use crate::{Error, Result};
use hdf5::{Dataset, File, H5Type};
use herdspike_core::SampleBlock;
use ndarray::Array2;
use std::path::Path;

const SIGNAL: &str = "sig";
const MAPPING: &str = "mapping";

#[derive(H5Type, Clone, Copy, Debug)]
#[repr(C)]
struct MappingEntry {
    channel: i32,
    electrode: i32,
}

/// An open Mea1k recording restricted to its routed channels.
pub struct MaxOneSource {
    _file: File,
    signal: Dataset,
    routed: Vec<usize>,
    num_frames: usize,
}

impl MaxOneSource {
    /// Opens a Mea1k file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or the mapping refers
    /// to channels missing from `/sig`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::Open {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
        let file = File::open(path)?;
        let signal = file.dataset(SIGNAL)?;
        let (stored_channels, num_frames) = match signal.shape().as_slice() {
            [channels, frames] => (*channels, *frames),
            shape => {
                return Err(Error::InvalidFormat(format!(
                    "/{SIGNAL} must be 2-D, got shape {shape:?}"
                )))
            }
        };

        let mapping = file.dataset(MAPPING)?.read_raw::<MappingEntry>()?;
        let mut routed = Vec::with_capacity(mapping.len());
        for entry in mapping.iter().filter(|entry| entry.electrode > -1) {
            let channel = usize::try_from(entry.channel).map_err(|_| {
                Error::InvalidFormat(format!("negative channel {} in /{MAPPING}", entry.channel))
            })?;
            if channel >= stored_channels {
                return Err(Error::DataIntegrity(format!(
                    "routed channel {channel} missing from /{SIGNAL} ({stored_channels} channels)"
                )));
            }
            routed.push(channel);
        }

        log::info!(
            "Mea1k {}: {} routed of {stored_channels} channels, {num_frames} frames",
            path.display(),
            routed.len()
        );

        Ok(Self {
            _file: file,
            signal,
            routed,
            num_frames,
        })
    }

    /// Amplifier channels routed to an electrode, in mapping order.
    #[must_use]
    pub fn routed_channels(&self) -> &[usize] {
        &self.routed
    }
}

impl RawSource for MaxOneSource {
    fn format(&self) -> &'static str {
        "maxone"
    }

    fn channel_count(&self) -> usize {
        self.routed.len()
    }

    fn frame_count(&self) -> usize {
        self.num_frames
    }

    #[allow(clippy::cast_possible_wrap)]
    fn read_into(&self, block: &mut SampleBlock) -> Result<()> {
        let t0 = block.first_frame();
        let t1 = t0 + block.num_frames();
        let window: Array2<u16> = self.signal.read_slice_2d((.., t0..t1))?;
        for (channel, &stored) in self.routed.iter().enumerate() {
            let trace = block.channel_mut(channel);
            for (slot, &value) in trace.iter_mut().zip(window.row(stored)) {
                // Reinterpreted bitwise, as the acquisition software does.
                *slot = value as i16;
            }
        }
        Ok(())
    }
}
