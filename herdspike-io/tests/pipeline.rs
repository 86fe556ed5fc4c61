//! Detection and clustering over a synthetic two-unit recording.

use herdspike_core::ClusterLabel;
use herdspike_io::{
    read_event_store, ChunkConfig, Clustering, CombinedClusteringConfig, Detection,
    DetectionConfig,
};
use herdspike_probe::{Probe, ProbeConfig, Recording};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const CHANNELS: usize = 8;
const FRAMES: usize = 6000;
const OFFSET: i16 = 50;
const UNIT_A: [i16; 5] = [-30, -90, -120, -70, -25];
const UNIT_B: [i16; 7] = [-25, -45, -70, -80, -70, -45, -25];

/// Two columns 20 units apart. Unit A fires on channel 2 (echoed on 3),
/// unit B on channel 5, on a flat baseline.
fn recording(dir: &Path) -> Recording {
    let positions = dir.join("positions");
    let mut text = String::new();
    for c in 0..CHANNELS {
        text.push_str(&format!("{},{}\n", (c % 2) * 20, (c / 2) * 20));
    }
    fs::write(&positions, text).unwrap();
    let config = ProbeConfig::generic(CHANNELS, 20_000.0, positions, 25.0, 25.0);

    let mut samples = vec![OFFSET; CHANNELS * FRAMES];
    for k in 0..14 {
        let a = 300 + 400 * k;
        for (t, &v) in UNIT_A.iter().enumerate() {
            samples[(a + t) * CHANNELS + 2] += v;
            samples[(a + t) * CHANNELS + 3] += v / 2;
        }
        let b = 500 + 400 * k;
        for (t, &v) in UNIT_B.iter().enumerate() {
            samples[(b + t) * CHANNELS + 5] += v;
            samples[(b + t) * CHANNELS + 4] += v / 3;
        }
    }
    Probe::from_samples(&config, samples)
        .unwrap()
        .into_recording()
        .unwrap()
}

fn detect(recording: &Recording, dir: &Path, name: &str, chunk: ChunkConfig) -> Vec<u8> {
    let config = DetectionConfig::default()
        .with_cutout(5, 10)
        .with_output(dir, name)
        .with_chunk(chunk);
    let mut detection = Detection::new(recording, config).unwrap();
    let summary = detection.detect_from_raw(false).unwrap();
    fs::read(summary.output).unwrap()
}

#[test]
fn test_detection_events() {
    let dir = TempDir::new().unwrap();
    let recording = recording(dir.path());
    let config = DetectionConfig::default()
        .with_cutout(5, 10)
        .with_output(dir.path(), "events");
    let mut detection = Detection::new(&recording, config).unwrap();
    let summary = detection.detect_from_raw(true).unwrap();
    assert_eq!(summary.events, 28);
    assert_eq!(summary.dropped, 0);

    let events = detection.events().unwrap();
    for i in 0..events.len() {
        let (channel, frame) = (events.channel[i], events.frame[i]);
        match channel {
            2 => {
                assert_eq!((frame - 302) % 400, 0);
                assert_eq!(events.amplitude[i], 120);
            }
            5 => {
                assert_eq!((frame - 503) % 400, 0);
                assert_eq!(events.amplitude[i], 80);
            }
            other => panic!("unexpected event on channel {other}"),
        }
        assert!(events.location(i).is_some());
    }
    assert!(events.frame.windows(2).all(|w| w[0] <= w[1]));

    let (header, stored) = read_event_store(detection.output_path()).unwrap();
    assert!(header.localized);
    assert_eq!(header.cutout_length, 16);
    assert_eq!(header.num_channels, CHANNELS);
    assert_eq!(&stored, events);
}

#[test]
fn test_detection_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let recording = recording(dir.path());
    let first = detect(&recording, dir.path(), "first", ChunkConfig::default());
    let second = detect(&recording, dir.path(), "second", ChunkConfig::default());
    assert_eq!(first, second);
}

#[test]
fn test_window_size_does_not_change_events() {
    let dir = TempDir::new().unwrap();
    let recording = recording(dir.path());
    let whole = detect(
        &recording,
        dir.path(),
        "whole",
        ChunkConfig::default().with_chunk_frames(FRAMES),
    );
    for chunk in [97, 500, 1999] {
        let windowed = detect(
            &recording,
            dir.path(),
            &format!("chunk{chunk}"),
            ChunkConfig::default().with_chunk_frames(chunk),
        );
        assert_eq!(whole, windowed, "chunk of {chunk} frames");
    }
}

#[test]
fn test_sort_detected_units() {
    let dir = TempDir::new().unwrap();
    let recording = recording(dir.path());
    let config = DetectionConfig::default()
        .with_cutout(5, 10)
        .with_output(dir.path(), "sort");
    let mut detection = Detection::new(&recording, config).unwrap();
    detection.detect_from_raw(false).unwrap();

    let mut clustering = Clustering::from_detection(&detection).unwrap();
    assert_eq!(clustering.len(), 28);
    clustering.shape_pca(2, true).unwrap();
    let n_clusters = clustering
        .combined_clustering(
            &CombinedClusteringConfig::default()
                .with_alpha(1.0)
                .with_bandwidth(5.0)
                .with_n_jobs(Some(2)),
        )
        .unwrap();
    assert_eq!(n_clusters, 2);

    let events = clustering.events();
    let labels = clustering.labels().unwrap();
    let label_of = |channel: u32| {
        let i = events.channel.iter().position(|&c| c == channel).unwrap();
        labels[i]
    };
    let (a, b) = (label_of(2), label_of(5));
    assert_ne!(a, b);
    for (i, label) in labels.iter().enumerate() {
        let expected = if events.channel[i] == 2 { a } else { b };
        assert_eq!(*label, expected);
        assert_ne!(*label, ClusterLabel::Noise);
    }
}

#[cfg(feature = "hdf5")]
#[test]
fn test_sorted_store_per_source() {
    use approx::assert_relative_eq;
    use herdspike_io::read_sorted_hdf5;

    let dir = TempDir::new().unwrap();
    let recording = recording(dir.path());
    detect(&recording, dir.path(), "one", ChunkConfig::default());
    detect(&recording, dir.path(), "two", ChunkConfig::default());

    let stores = [dir.path().join("one.bin"), dir.path().join("two.bin")];
    let mut clustering = Clustering::from_files(&stores, 16).unwrap();
    clustering.shape_pca(2, true).unwrap();
    clustering
        .combined_clustering(
            &CombinedClusteringConfig::default()
                .with_alpha(1.0)
                .with_bandwidth(5.0)
                .with_bin_seeding(1),
        )
        .unwrap();

    let combined = dir.path().join("sorted.hdf5");
    clustering.save_hdf5(&combined).unwrap();
    let store = read_sorted_hdf5(&combined).unwrap();
    assert_eq!(store.len(), 56);
    assert_eq!(store.cutout_length, 16);
    assert_eq!(store.n_features, 2);
    assert_eq!(store.centre_dim, 4);
    assert_relative_eq!(store.sampling_rate, 20_000.0);

    let outputs = [dir.path().join("one.hdf5"), dir.path().join("two.hdf5")];
    clustering.save_hdf5_per_source(&outputs).unwrap();
    let one = read_sorted_hdf5(&outputs[0]).unwrap();
    let two = read_sorted_hdf5(&outputs[1]).unwrap();
    assert_eq!(one.len(), 28);
    assert!(two.source.iter().all(|&s| s == 1));
    assert_eq!(one.cluster_id, two.cluster_id);
}

/// Channel 0 drifts from 0 to 60 over the recording with a 30-deep,
/// four-frame spike every 200 frames; channel 1 stays flat.
fn drifting_recording(dir: &Path) -> Recording {
    const DRIFT_FRAMES: usize = 8000;
    let positions = dir.join("drift_positions");
    fs::write(&positions, "0,0\n0,20\n").unwrap();
    let config = ProbeConfig::generic(2, 20_000.0, positions, 25.0, 25.0);

    let mut samples = vec![0_i16; 2 * DRIFT_FRAMES];
    for t in 0..DRIFT_FRAMES {
        samples[t * 2] = i16::try_from(t * 60 / DRIFT_FRAMES).unwrap();
    }
    for k in 0..40 {
        for t in 100 + 200 * k..104 + 200 * k {
            samples[t * 2] -= 30;
        }
    }
    Probe::from_samples(&config, samples)
        .unwrap()
        .into_recording()
        .unwrap()
}

fn detect_drifting(
    recording: &Recording,
    dir: &Path,
    name: &str,
    baseline_frames: usize,
    chunk: ChunkConfig,
) -> Vec<u8> {
    let config = DetectionConfig::default()
        .with_cutout(5, 10)
        .with_baseline_frames(baseline_frames)
        .with_output(dir, name)
        .with_chunk(chunk);
    let mut detection = Detection::new(recording, config).unwrap();
    let summary = detection.detect_from_raw(false).unwrap();
    assert!(summary.events > 0);
    fs::read(summary.output).unwrap()
}

#[test]
fn test_drifting_baseline_independent_of_window() {
    let dir = TempDir::new().unwrap();
    let recording = drifting_recording(dir.path());

    for baseline_frames in [1000, 8192] {
        let whole = detect_drifting(
            &recording,
            dir.path(),
            &format!("whole{baseline_frames}"),
            baseline_frames,
            ChunkConfig::default().with_chunk_frames(8000),
        );
        let budgets = [
            ChunkConfig::default().with_chunk_frames(300),
            ChunkConfig::default().with_chunk_frames(1999),
            // Floors at the minimum window, far below the recording length.
            ChunkConfig::default().with_memory_budget_bytes(1),
            ChunkConfig::default().with_memory_budget_bytes(1 << 30),
        ];
        for (i, chunk) in budgets.into_iter().enumerate() {
            let windowed = detect_drifting(
                &recording,
                dir.path(),
                &format!("windowed{baseline_frames}_{i}"),
                baseline_frames,
                chunk,
            );
            assert_eq!(whole, windowed, "span {baseline_frames}, window config {i}");
        }
    }

    // Short spans follow the drift, so every spike is found.
    let config = DetectionConfig::default()
        .with_cutout(5, 10)
        .with_baseline_frames(1000)
        .with_output(dir.path(), "tracked");
    let mut detection = Detection::new(&recording, config).unwrap();
    assert_eq!(detection.detect_from_raw(false).unwrap().events, 40);
}
