//! CSV writers for detection candidates and sorted events.

use crate::sorted::SortedView;
use crate::{Error, Result};
use herdspike_algorithms::Candidate;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writer for CSV output.
pub struct CsvWriter {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl CsvWriter {
    /// Creates a new file writer.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    /// Writes pre-merge detection candidates.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_candidates(&mut self, candidates: &[Candidate]) -> Result<()> {
        self.line(format_args!("channel,frame,amplitude"))?;
        for c in candidates {
            self.line(format_args!("{},{},{}", c.channel, c.frame, c.amplitude))?;
        }
        self.flush()
    }

    /// Writes one row per sorted event.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_sorted(&mut self, view: &SortedView<'_>) -> Result<()> {
        let mut header = String::from("event,source,cluster_id,channel,frame,amplitude,x,y");
        for k in 0..view.n_features {
            header.push_str(&format!(",pc{k}"));
        }
        self.line(format_args!("{header}"))?;

        let mut row = String::new();
        for &i in view.indices {
            let events = view.events;
            row.clear();
            row.push_str(&format!(
                "{},{},{},{},{},{},{},{}",
                i,
                view.sources[i],
                view.labels[i].to_raw(),
                events.channel[i],
                events.frame[i],
                events.amplitude[i],
                events.x[i],
                events.y[i]
            ));
            for value in view.features_of(i) {
                row.push_str(&format!(",{value}"));
            }
            self.line(format_args!("{row}"))?;
        }
        self.flush()
    }

    /// Flushes the writer.
    ///
    /// # Errors
    /// Returns an error if the flush fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| Error::io(&self.path, e))
    }

    fn line(&mut self, args: std::fmt::Arguments<'_>) -> Result<()> {
        writeln!(self.writer, "{args}").map_err(|e| Error::io(&self.path, e))
    }
}
