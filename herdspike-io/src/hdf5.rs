//! HDF5 sorted store.
//!
//! Root attributes `herdspike_format_version` and `Sampling`, and one row per
//! event in `cluster_id`, `ch`, `times`, `data` (x, y), `shapes`, `features`
//! and `exp_inds`. Cluster centres are stored in `centres`.

use crate::sorted::SortedView;
use crate::{Error, Result};
use hdf5::types::H5Type;
use hdf5::{Dataset, File, Group};
use std::path::Path;

/// Version written to the `herdspike_format_version` attribute.
pub const SORTED_FORMAT_VERSION: u32 = 1;

const COMPRESSION_LEVEL: u8 = 4;

/// Contents of a sorted store read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SortedStore {
    pub format_version: u32,
    pub sampling_rate: f64,
    pub cluster_id: Vec<i32>,
    pub channel: Vec<u32>,
    pub times: Vec<u64>,
    /// Row-major `[N, 2]` locations.
    pub locations: Vec<f32>,
    /// Row-major `[N, cutout_length]` waveforms.
    pub shapes: Vec<i16>,
    pub cutout_length: usize,
    /// Row-major `[N, n_features]` shape features.
    pub features: Vec<f32>,
    pub n_features: usize,
    pub source: Vec<u32>,
    /// Row-major `[clusters, centre_dim]` centres.
    pub centres: Vec<f64>,
    pub centre_dim: usize,
}

impl SortedStore {
    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cluster_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cluster_id.is_empty()
    }
}

/// Writes the rows selected by `view` to a new HDF5 file.
///
/// # Errors
/// Returns an error if the file or a dataset cannot be created.
pub fn write_sorted_hdf5<P: AsRef<Path>>(path: P, view: &SortedView<'_>) -> Result<()> {
    let file = File::create(path.as_ref())?;
    file.new_attr::<u32>()
        .create("herdspike_format_version")?
        .write_scalar(&SORTED_FORMAT_VERSION)?;
    file.new_attr::<f64>()
        .create("Sampling")?
        .write_scalar(&view.sampling_rate)?;

    let events = view.events;
    let rows = view.indices;
    let n = rows.len();
    let cutout_length = events.cutout_len();

    let cluster_id: Vec<i32> = rows.iter().map(|&i| view.labels[i].to_raw()).collect();
    let channel: Vec<u32> = rows.iter().map(|&i| events.channel[i]).collect();
    let times: Vec<u64> = rows.iter().map(|&i| events.frame[i]).collect();
    let locations: Vec<f32> = rows
        .iter()
        .flat_map(|&i| [events.x[i], events.y[i]])
        .collect();
    let shapes: Vec<i16> = rows
        .iter()
        .flat_map(|&i| events.cutout(i).iter().copied())
        .collect();
    let features: Vec<f32> = rows
        .iter()
        .flat_map(|&i| view.features_of(i).iter().copied())
        .collect();
    let source: Vec<u32> = rows.iter().map(|&i| view.sources[i]).collect();

    let group: &Group = &file;
    write_dataset(group, "cluster_id", &[n], &cluster_id)?;
    write_dataset(group, "ch", &[n], &channel)?;
    write_dataset(group, "times", &[n], &times)?;
    write_dataset(group, "data", &[n, 2], &locations)?;
    write_dataset(group, "shapes", &[n, cutout_length], &shapes)?;
    write_dataset(group, "features", &[n, view.n_features], &features)?;
    write_dataset(group, "exp_inds", &[n], &source)?;
    write_dataset(
        group,
        "centres",
        &[view.n_clusters(), view.centre_dim],
        view.centres,
    )?;
    log::info!("wrote {n} sorted events to {}", path.as_ref().display());
    Ok(())
}

/// Reads a sorted store written by [`write_sorted_hdf5`].
///
/// # Errors
/// Returns an error if the file is missing a dataset or its shapes disagree.
pub fn read_sorted_hdf5<P: AsRef<Path>>(path: P) -> Result<SortedStore> {
    let file = File::open(path.as_ref())?;
    let format_version: u32 = file.attr("herdspike_format_version")?.read_scalar()?;
    if format_version != SORTED_FORMAT_VERSION {
        return Err(Error::InvalidFormat(format!(
            "unsupported sorted store version {format_version}"
        )));
    }
    let sampling_rate: f64 = file.attr("Sampling")?.read_scalar()?;

    let cluster_id = read_dataset_vec::<i32>(&file, "cluster_id")?;
    let n = cluster_id.len();
    let (shapes, cutout_length) = read_matrix::<i16>(&file, "shapes", n)?;
    let (features, n_features) = read_matrix::<f32>(&file, "features", n)?;
    let (locations, _) = read_matrix::<f32>(&file, "data", n)?;
    let centres_ds = file.dataset("centres")?;
    let centre_dim = centres_ds.shape().get(1).copied().unwrap_or(0);

    let store = SortedStore {
        format_version,
        sampling_rate,
        cluster_id,
        channel: read_dataset_vec(&file, "ch")?,
        times: read_dataset_vec(&file, "times")?,
        locations,
        shapes,
        cutout_length,
        features,
        n_features,
        source: read_dataset_vec(&file, "exp_inds")?,
        centres: centres_ds.read_raw::<f64>()?,
        centre_dim,
    };
    if store.channel.len() != n || store.times.len() != n || store.source.len() != n {
        return Err(Error::InvalidFormat(format!(
            "{}: per-event datasets disagree on the event count",
            path.as_ref().display()
        )));
    }
    Ok(store)
}

fn create_fixed_dataset<T: H5Type>(group: &Group, name: &str, shape: &[usize]) -> Result<Dataset> {
    let mut builder = group.new_dataset::<T>().shape(shape.to_vec());
    if shape.iter().all(|&d| d > 0) {
        builder = builder.chunk(shape.to_vec()).deflate(COMPRESSION_LEVEL);
    }
    Ok(builder.create(name)?)
}

fn write_dataset<T: H5Type>(group: &Group, name: &str, shape: &[usize], data: &[T]) -> Result<()> {
    let dataset = create_fixed_dataset::<T>(group, name, shape)?;
    if !data.is_empty() {
        dataset.write_raw(data)?;
    }
    Ok(())
}

fn read_dataset_vec<T: H5Type>(group: &Group, name: &str) -> Result<Vec<T>> {
    let dataset = group.dataset(name)?;
    Ok(dataset.read_raw::<T>()?)
}

fn read_matrix<T: H5Type>(group: &Group, name: &str, rows: usize) -> Result<(Vec<T>, usize)> {
    let dataset = group.dataset(name)?;
    match dataset.shape().as_slice() {
        [n, width] if *n == rows => Ok((dataset.read_raw::<T>()?, *width)),
        shape => Err(Error::InvalidFormat(format!(
            "dataset {name} has shape {shape:?}, expected [{rows}, _]"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use herdspike_core::{ClusterLabel, SpikeBatch};
    use tempfile::tempdir;

    #[test]
    fn test_sorted_store_roundtrip() {
        let mut events = SpikeBatch::new(3);
        events.push(0, 5, 20, Some((1.0, 2.0)), &[1, -20, 2]);
        events.push(4, 9, 35, Some((3.0, 4.0)), &[0, -35, 1]);
        events.push(2, 12, 28, Some((5.0, 6.0)), &[2, -28, 0]);
        let labels = [
            ClusterLabel::Cluster(1),
            ClusterLabel::Noise,
            ClusterLabel::Cluster(0),
        ];
        let features = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let sources = [0, 0, 1];
        let indices = [0, 1, 2];
        let centres = [1.0, 2.0, 0.0, 0.0, 5.0, 6.0, 0.0, 0.0];
        let view = SortedView {
            events: &events,
            labels: &labels,
            features: &features,
            n_features: 2,
            sources: &sources,
            indices: &indices,
            centres: &centres,
            centre_dim: 4,
            sampling_rate: 17_855.5,
        };

        let dir = tempdir().unwrap();
        let path = dir.path().join("sorted.hdf5");
        write_sorted_hdf5(&path, &view).unwrap();

        let store = read_sorted_hdf5(&path).unwrap();
        assert_eq!(store.format_version, SORTED_FORMAT_VERSION);
        assert_relative_eq!(store.sampling_rate, 17_855.5);
        assert_eq!(store.cluster_id, vec![1, -1, 0]);
        assert_eq!(store.channel, vec![0, 4, 2]);
        assert_eq!(store.times, vec![5, 9, 12]);
        assert_eq!(store.locations, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(store.cutout_length, 3);
        assert_eq!(store.shapes[3..6], [0, -35, 1]);
        assert_eq!(store.n_features, 2);
        assert_eq!(store.source, vec![0, 0, 1]);
        assert_eq!(store.centre_dim, 4);
        assert_eq!(store.centres.len(), 8);
    }

    #[test]
    fn test_empty_selection() {
        let events = SpikeBatch::new(3);
        let view = SortedView {
            events: &events,
            labels: &[],
            features: &[],
            n_features: 2,
            sources: &[],
            indices: &[],
            centres: &[],
            centre_dim: 4,
            sampling_rate: 1000.0,
        };
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.hdf5");
        write_sorted_hdf5(&path, &view).unwrap();
        let store = read_sorted_hdf5(&path).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.n_features, 2);
    }
}
