//! BioCam BRW dispatch through the probe factory.
#![cfg(feature = "hdf5")]

use approx::assert_relative_eq;
use hdf5::{File, H5Type};
use herdspike_probe::{Probe, ProbeConfig, ProbeKind};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const N_COLS: i64 = 4;

#[derive(H5Type, Clone, Copy)]
#[repr(C)]
struct Chs {
    #[hdf5(rename = "Row")]
    row: i16,
    #[hdf5(rename = "Col")]
    col: i16,
}

/// 2 x 4 array, 100 units pitch, 8-connected neighbours.
fn write_topology(dir: &Path) -> (PathBuf, PathBuf) {
    let mut positions = String::new();
    let mut neighbors = String::new();
    for index in 0..8_i64 {
        let (row, col) = (index / N_COLS, index % N_COLS);
        writeln!(positions, "{},{}", col * 100, row * 100).unwrap();
        let row_neighbors: Vec<String> = (0..8_i64)
            .filter(|other| {
                let (r, c) = (other / N_COLS, other % N_COLS);
                (r - row).abs() <= 1 && (c - col).abs() <= 1
            })
            .map(|other| other.to_string())
            .collect();
        neighbors.push_str(&row_neighbors.join(","));
        neighbors.push('\n');
    }
    let positions_path = dir.join("positions_biocam");
    let neighbors_path = dir.join("neighbormatrix_biocam");
    fs::write(&positions_path, positions).unwrap();
    fs::write(&neighbors_path, neighbors).unwrap();
    (positions_path, neighbors_path)
}

/// Records array channels 0, 1 and 5 (1-based (row, col) = (1,1), (1,2), (2,2)).
fn write_brw(path: &Path, version: i32) {
    let frames = 5_usize;
    let recorded = [(1_i16, 1_i16), (1, 2), (2, 2)];
    let samples: Vec<u16> = (0..frames)
        .flat_map(|frame| (0..recorded.len()).map(move |ch| u16::try_from(frame * 10 + ch).unwrap()))
        .collect();

    let file = File::create(path).unwrap();
    let data = file.create_group("3BData").unwrap();
    data.new_attr::<i32>()
        .create("Version")
        .unwrap()
        .write_scalar(&version)
        .unwrap();
    let shape: Vec<usize> = if version == 100 {
        vec![frames, recorded.len()]
    } else {
        vec![samples.len()]
    };
    data.new_dataset::<u16>()
        .shape(shape)
        .create("Raw")
        .unwrap()
        .write_raw(&samples)
        .unwrap();

    let vars = file.create_group("3BRecInfo/3BRecVars").unwrap();
    vars.new_dataset::<i64>()
        .shape((1,))
        .create("NRecFrames")
        .unwrap()
        .write_raw(&[5_i64])
        .unwrap();
    vars.new_dataset::<f64>()
        .shape((1,))
        .create("SamplingRate")
        .unwrap()
        .write_raw(&[17_855.5])
        .unwrap();
    file.create_group("3BRecInfo/3BMeaChip")
        .unwrap()
        .new_dataset::<i64>()
        .shape((1,))
        .create("NCols")
        .unwrap()
        .write_raw(&[N_COLS])
        .unwrap();
    let chs: Vec<Chs> = recorded.iter().map(|&(row, col)| Chs { row, col }).collect();
    file.create_group("3BRecInfo/3BMeaStreams/Raw")
        .unwrap()
        .new_dataset::<Chs>()
        .shape((chs.len(),))
        .create("Chs")
        .unwrap()
        .write_raw(&chs)
        .unwrap();
}

#[test]
fn test_biocam_subset_recording() {
    for version in [100, 101] {
        let dir = TempDir::new().unwrap();
        let (positions, neighbors) = write_topology(dir.path());
        let data = dir.path().join("recording.brw");
        write_brw(&data, version);

        let config = ProbeConfig::biocam(positions, neighbors);
        let probe = Probe::open(&config, Some(&data)).unwrap();

        assert_eq!(probe.kind(), ProbeKind::BioCam);
        assert_eq!(probe.channel_count(), 3);
        assert_eq!(probe.frame_count(), 5);
        assert_relative_eq!(probe.fps(), 17_855.5);
        // Array channel 0 is masked in the preset and recorded as channel 0.
        assert_eq!(probe.params().masked_channels, vec![0]);

        let positions = probe.channel_positions(&[0, 1, 2]).unwrap();
        assert_eq!((positions[2].x, positions[2].y), (100, 100));
        assert_eq!(probe.topology().neighbors_of(2).unwrap(), &[0, 1, 2]);

        let block = probe.read(2, 4).unwrap();
        assert_eq!(block.channel(0), &[20, 30]);
        assert_eq!(block.channel(2), &[22, 32]);

        let expected = if version == 100 { "brw-100" } else { "brw-101" };
        assert_eq!(probe.recording().unwrap().format(), expected);
    }
}

#[test]
fn test_biocam_metadata_only() {
    let dir = TempDir::new().unwrap();
    let (positions, neighbors) = write_topology(dir.path());
    let mut config = ProbeConfig::biocam(positions, neighbors);
    config.num_channels = 8;

    let probe = Probe::open(&config, None).unwrap();
    assert_eq!(probe.frame_count(), 0);
    assert_eq!(probe.channel_count(), 8);
}
