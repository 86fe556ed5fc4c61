//! Channel geometry and neighbour adjacency.
//!
//! Topology files are plain text with one channel per line and
//! comma-separated integers: two per line for positions, a variable-length
//! list of channel indices for neighbours.

use crate::{Error, Result};
use std::fs;
use std::path::Path;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Channel position on the probe (probe units, usually micrometres).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Position {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate.
    pub y: i32,
}

impl Position {
    /// Creates a new position.
    #[inline]
    #[must_use]
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Computes the squared Euclidean distance to another position.
    #[inline]
    #[must_use]
    pub fn distance_squared(&self, other: &Self) -> i64 {
        let dx = i64::from(self.x) - i64::from(other.x);
        let dy = i64::from(self.y) - i64::from(other.y);
        dx * dx + dy * dy
    }

    /// Checks whether another position lies within `radius`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn within(&self, other: &Self, radius: f64) -> bool {
        (self.distance_squared(other) as f64) <= radius * radius
    }
}

/// Channel positions plus per-channel neighbour lists.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChannelTopology {
    positions: Vec<Position>,
    neighbors: Vec<Vec<usize>>,
    max_neighbors: usize,
}

impl ChannelTopology {
    /// Builds a topology from explicit positions and neighbour lists.
    ///
    /// # Errors
    /// Returns an error if the list lengths differ or a neighbour index is
    /// not a valid channel.
    pub fn new(positions: Vec<Position>, neighbors: Vec<Vec<usize>>) -> Result<Self> {
        if positions.len() != neighbors.len() {
            return Err(Error::DataIntegrity(format!(
                "{} positions but {} neighbour lists",
                positions.len(),
                neighbors.len()
            )));
        }
        let num_channels = positions.len();
        if let Some(&channel) = neighbors.iter().flatten().find(|&&n| n >= num_channels) {
            return Err(Error::ChannelIndex {
                channel,
                num_channels,
            });
        }
        let max_neighbors = neighbors.iter().map(Vec::len).max().unwrap_or(0);
        Ok(Self {
            positions,
            neighbors,
            max_neighbors,
        })
    }

    /// Loads positions and neighbour lists from text files.
    ///
    /// # Errors
    /// Returns `Error::Io` if a file cannot be read, `Error::Format` if a line
    /// is malformed or the files disagree on the channel count, and
    /// `Error::ChannelIndex` for an out-of-range neighbour.
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(
        positions_path: P,
        neighbors_path: Q,
    ) -> Result<Self> {
        let positions = Self::load_positions(positions_path)?;
        let neighbors_path = neighbors_path.as_ref();
        let rows = read_integer_rows(neighbors_path)?;
        if rows.len() != positions.len() {
            return Err(Error::Format {
                path: neighbors_path.to_path_buf(),
                line: rows.len().min(positions.len()) + 1,
                message: format!(
                    "expected {} neighbour lines (one per position), found {}",
                    positions.len(),
                    rows.len()
                ),
            });
        }
        let mut neighbors = Vec::with_capacity(rows.len());
        for (line, row) in rows.into_iter().enumerate() {
            let list = row
                .into_iter()
                .map(|value| {
                    usize::try_from(value).map_err(|_| Error::Format {
                        path: neighbors_path.to_path_buf(),
                        line: line + 1,
                        message: format!("negative channel index {value}"),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            neighbors.push(list);
        }
        Self::new(positions, neighbors)
    }

    /// Loads channel positions only.
    ///
    /// # Errors
    /// Returns `Error::Io` or `Error::Format` as for [`Self::load`].
    pub fn load_positions<P: AsRef<Path>>(path: P) -> Result<Vec<Position>> {
        let path = path.as_ref();
        read_integer_rows(path)?
            .into_iter()
            .enumerate()
            .map(|(line, row)| match row.as_slice() {
                [x, y] => Ok(Position::new(*x, *y)),
                _ => Err(Error::Format {
                    path: path.to_path_buf(),
                    line: line + 1,
                    message: format!("expected 2 coordinates, found {}", row.len()),
                }),
            })
            .collect()
    }

    /// Derives adjacency from positions: `c` neighbours `c'` iff their
    /// distance is at most `radius`. Every channel neighbours itself.
    ///
    /// # Errors
    /// Returns `Error::Config` for a negative or non-finite radius.
    pub fn from_positions(positions: Vec<Position>, radius: f64) -> Result<Self> {
        if !radius.is_finite() || radius < 0.0 {
            return Err(Error::Config(format!(
                "neighbour radius must be finite and non-negative, got {radius}"
            )));
        }
        let neighbors = positions
            .iter()
            .map(|p| {
                positions
                    .iter()
                    .enumerate()
                    .filter(|(_, q)| p.within(q, radius))
                    .map(|(i, _)| i)
                    .collect()
            })
            .collect();
        Self::new(positions, neighbors)
    }

    /// Number of channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true if the topology has no channels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Largest neighbour list; sizes fixed-width buffers downstream.
    #[must_use]
    pub fn max_neighbors(&self) -> usize {
        self.max_neighbors
    }

    /// All channel positions, indexed by channel.
    #[must_use]
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Position of a single channel.
    ///
    /// # Errors
    /// Returns `Error::ChannelIndex` if the channel does not exist.
    pub fn position(&self, channel: usize) -> Result<Position> {
        self.positions
            .get(channel)
            .copied()
            .ok_or(Error::ChannelIndex {
                channel,
                num_channels: self.len(),
            })
    }

    /// Neighbour list of a channel as a slice of channel indices.
    ///
    /// # Errors
    /// Returns `Error::ChannelIndex` if the channel does not exist.
    pub fn neighbors_of(&self, channel: usize) -> Result<&[usize]> {
        self.neighbors
            .get(channel)
            .map(Vec::as_slice)
            .ok_or(Error::ChannelIndex {
                channel,
                num_channels: self.len(),
            })
    }

    /// Returns true if `other` is in the neighbour list of `channel`.
    #[must_use]
    pub fn is_neighbor(&self, channel: usize, other: usize) -> bool {
        self.neighbors
            .get(channel)
            .is_some_and(|list| list.contains(&other))
    }

    /// Neighbours of `channel` lying within `inner_radius` of it.
    ///
    /// # Errors
    /// Returns `Error::ChannelIndex` if the channel does not exist.
    pub fn inner_neighbors(&self, channel: usize, inner_radius: f64) -> Result<Vec<usize>> {
        let origin = self.position(channel)?;
        Ok(self.neighbors[channel]
            .iter()
            .copied()
            .filter(|&n| origin.within(&self.positions[n], inner_radius))
            .collect())
    }

    /// Looks up the positions of several channels.
    ///
    /// # Errors
    /// Returns `Error::ChannelIndex` for the first channel that is out of range.
    pub fn channel_positions(&self, channels: &[usize]) -> Result<Vec<Position>> {
        channels.iter().map(|&c| self.position(c)).collect()
    }

    /// Re-indexes a full-array topology onto a recorded subset.
    ///
    /// Channel `i` of the result is channel `channel_map[i]` of `self`;
    /// neighbours that were not recorded are dropped.
    ///
    /// # Errors
    /// Returns `Error::ChannelIndex` if the map references a missing channel.
    pub fn select(&self, channel_map: &[usize]) -> Result<Self> {
        let mut remap = vec![None; self.len()];
        for (new, &old) in channel_map.iter().enumerate() {
            self.check_channel(old)?;
            remap[old] = Some(new);
        }
        let positions = channel_map.iter().map(|&old| self.positions[old]).collect();
        let neighbors = channel_map
            .iter()
            .map(|&old| {
                self.neighbors[old]
                    .iter()
                    .filter_map(|&n| remap[n])
                    .collect()
            })
            .collect();
        Self::new(positions, neighbors)
    }

    fn check_channel(&self, channel: usize) -> Result<()> {
        if channel < self.len() {
            Ok(())
        } else {
            Err(Error::ChannelIndex {
                channel,
                num_channels: self.len(),
            })
        }
    }
}

/// Reads a file of comma-separated integer rows.
///
/// Line terminators are stripped by `str::lines` (LF and CRLF), so the
/// content of the last field is never truncated. A trailing comma is allowed.
/// Blank lines at the end of the file are ignored; a blank line between rows
/// is a format error.
fn read_integer_rows(path: &Path) -> Result<Vec<Vec<i32>>> {
    let text = fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    text.trim_end()
        .lines()
        .enumerate()
        .map(|(index, line)| parse_integer_row(line).map_err(|message| Error::Format {
            path: path.to_path_buf(),
            line: index + 1,
            message,
        }))
        .collect()
}

fn parse_integer_row(line: &str) -> std::result::Result<Vec<i32>, String> {
    let line = line.trim();
    let line = line.strip_suffix(',').unwrap_or(line);
    if line.is_empty() {
        return Err("empty line".to_string());
    }
    line.split(',')
        .map(|token| {
            let token = token.trim();
            token
                .parse::<i32>()
                .map_err(|e| format!("invalid integer {token:?}: {e}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_parse_row_variants() {
        assert_eq!(parse_integer_row("1,2").unwrap(), vec![1, 2]);
        assert_eq!(parse_integer_row("1,2,").unwrap(), vec![1, 2]);
        assert_eq!(parse_integer_row(" 10 , -20 ,\r").unwrap(), vec![10, -20]);
        assert!(parse_integer_row("").is_err());
        assert!(parse_integer_row("1,x").is_err());
    }

    #[test]
    fn test_load_handles_crlf_and_lf() {
        let positions = write_file("0,0,\r\n0,20,\r\n16,20\n");
        let neighbors = write_file("0,1,\r\n0,1,2,\n1,2\r\n");

        let topology = ChannelTopology::load(positions.path(), neighbors.path()).unwrap();
        assert_eq!(topology.len(), 3);
        assert_eq!(topology.positions()[2], Position::new(16, 20));
        assert_eq!(topology.neighbors_of(1).unwrap(), &[0, 1, 2]);
        assert_eq!(topology.max_neighbors(), 3);
    }

    #[test]
    fn test_load_last_digit_preserved() {
        // Multi-digit last field without trailing comma.
        let positions = write_file("100,250\n");
        let neighbors = write_file("0\n");
        let topology = ChannelTopology::load(positions.path(), neighbors.path()).unwrap();
        assert_eq!(topology.positions()[0], Position::new(100, 250));
    }

    #[test]
    fn test_load_ignores_trailing_blank_lines() {
        let positions = write_file("0,0\n0,20\n\n\r\n  \n");
        let neighbors = write_file("0,1,\n0,1,\n\n");
        let topology = ChannelTopology::load(positions.path(), neighbors.path()).unwrap();
        assert_eq!(topology.len(), 2);
        assert_eq!(topology.positions()[1], Position::new(0, 20));
    }

    #[test]
    fn test_load_interior_blank_line() {
        let positions = write_file("0,0\n\n0,20\n");
        let neighbors = write_file("0\n1\n");
        let err = ChannelTopology::load(positions.path(), neighbors.path()).unwrap_err();
        match err {
            Error::Format { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_missing_file() {
        let neighbors = write_file("0\n");
        let err = ChannelTopology::load("/nonexistent/positions", neighbors.path()).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_load_malformed_line() {
        let positions = write_file("0,0\n1,a\n");
        let neighbors = write_file("0\n1\n");
        let err = ChannelTopology::load(positions.path(), neighbors.path()).unwrap_err();
        match err {
            Error::Format { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_neighbor_out_of_range() {
        let positions = write_file("0,0\n1,1\n");
        let neighbors = write_file("0,1\n1,2\n");
        let err = ChannelTopology::load(positions.path(), neighbors.path()).unwrap_err();
        assert!(matches!(
            err,
            Error::ChannelIndex {
                channel: 2,
                num_channels: 2
            }
        ));
    }

    #[test]
    fn test_load_line_count_mismatch() {
        let positions = write_file("0,0\n1,1\n");
        let neighbors = write_file("0,1\n");
        let err = ChannelTopology::load(positions.path(), neighbors.path()).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn test_radius_topology_matches_distance() {
        let positions: Vec<Position> = (0..6)
            .map(|i| Position::new((i % 2) * 16, (i / 2) * 20))
            .collect();
        let radius = 25.0;
        let topology = ChannelTopology::from_positions(positions.clone(), radius).unwrap();

        for (c, p) in positions.iter().enumerate() {
            for (other, q) in positions.iter().enumerate() {
                let close = p.within(q, radius);
                assert_eq!(topology.is_neighbor(other, c), close, "{c} vs {other}");
            }
        }
        let expected_max = (0..6)
            .map(|c| topology.neighbors_of(c).unwrap().len())
            .max()
            .unwrap();
        assert_eq!(topology.max_neighbors(), expected_max);
    }

    #[test]
    fn test_channel_positions_out_of_range() {
        let topology =
            ChannelTopology::from_positions(vec![Position::new(0, 0), Position::new(0, 10)], 5.0)
                .unwrap();
        assert_eq!(topology.channel_positions(&[1]).unwrap(), vec![Position::new(0, 10)]);
        assert!(matches!(
            topology.channel_positions(&[2]),
            Err(Error::ChannelIndex {
                channel: 2,
                num_channels: 2
            })
        ));
    }

    #[test]
    fn test_inner_neighbors() {
        let positions = vec![Position::new(0, 0), Position::new(10, 0), Position::new(30, 0)];
        let topology = ChannelTopology::from_positions(positions, 40.0).unwrap();
        assert_eq!(topology.inner_neighbors(0, 15.0).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_select_reindexes() {
        let positions = vec![Position::new(0, 0), Position::new(10, 0), Position::new(20, 0)];
        let topology = ChannelTopology::from_positions(positions, 10.0).unwrap();
        let subset = topology.select(&[2, 1]).unwrap();
        assert_eq!(subset.len(), 2);
        assert_eq!(subset.positions()[0], Position::new(20, 0));
        assert_eq!(subset.neighbors_of(0).unwrap(), &[1, 0]);
        assert_eq!(subset.neighbors_of(1).unwrap(), &[1, 0]);
    }
}
