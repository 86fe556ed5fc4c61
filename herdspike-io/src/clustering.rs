//! Clustering driver: shape PCA and combined location/shape mean shift over
//! one or more detection stores.
#![allow(clippy::cast_possible_truncation)]

use crate::detection::Detection;
use crate::event_store::read_event_store;
use crate::sorted::SortedView;
use crate::writer::CsvWriter;
use crate::{Error, Result};
use herdspike_algorithms::{MeanShift, MeanShiftConfig, MeanShiftModel, Pca, Points};
use herdspike_core::{ClusterAssignment, ClusterLabel, SpikeBatch};
use std::path::{Path, PathBuf};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Parameters of [`Clustering::combined_clustering`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CombinedClusteringConfig {
    /// Weight of the shape features relative to the location.
    pub alpha: f64,
    /// Flat kernel radius.
    pub bandwidth: f64,
    /// Seed from occupied bins of width `bandwidth`.
    pub bin_seeding: bool,
    /// Minimum events in a bin for it to seed.
    pub min_bin_freq: usize,
    /// Worker threads; `None` uses every core.
    pub n_jobs: Option<usize>,
    /// Fit on about this many evenly strided events, then label all.
    pub cluster_subset: Option<usize>,
    /// Label events beyond `bandwidth` of every centre with the nearest one
    /// instead of noise.
    pub cluster_all: bool,
}

impl Default for CombinedClusteringConfig {
    fn default() -> Self {
        let mean_shift = MeanShiftConfig::default();
        Self {
            alpha: 4.0,
            bandwidth: mean_shift.bandwidth,
            bin_seeding: mean_shift.bin_seeding,
            min_bin_freq: mean_shift.min_bin_freq,
            n_jobs: mean_shift.n_jobs,
            cluster_subset: None,
            cluster_all: mean_shift.cluster_all,
        }
    }
}

impl CombinedClusteringConfig {
    #[must_use]
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    #[must_use]
    pub fn with_bandwidth(mut self, bandwidth: f64) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    /// Enable bin seeding with the given minimum bin population.
    #[must_use]
    pub fn with_bin_seeding(mut self, min_bin_freq: usize) -> Self {
        self.bin_seeding = true;
        self.min_bin_freq = min_bin_freq;
        self
    }

    #[must_use]
    pub fn with_n_jobs(mut self, n_jobs: Option<usize>) -> Self {
        self.n_jobs = n_jobs;
        self
    }

    #[must_use]
    pub fn with_cluster_subset(mut self, subset: usize) -> Self {
        self.cluster_subset = Some(subset);
        self
    }

    #[must_use]
    pub fn with_cluster_all(mut self, cluster_all: bool) -> Self {
        self.cluster_all = cluster_all;
        self
    }

    fn mean_shift(&self) -> MeanShiftConfig {
        MeanShiftConfig {
            bandwidth: self.bandwidth,
            bin_seeding: self.bin_seeding,
            min_bin_freq: self.min_bin_freq,
            n_jobs: self.n_jobs,
            cluster_all: self.cluster_all,
            ..MeanShiftConfig::default()
        }
    }
}

/// Clustering state over the events of one or more recordings.
#[derive(Debug)]
pub struct Clustering {
    events: SpikeBatch,
    sources: Vec<u32>,
    source_files: Vec<PathBuf>,
    sampling_rate: f64,
    pca: Option<Pca>,
    features: Vec<f32>,
    model: Option<MeanShiftModel>,
    labels: Option<Vec<ClusterLabel>>,
}

impl Clustering {
    /// Clusters the events of a single in-memory batch.
    #[must_use]
    pub fn from_events(events: SpikeBatch, sampling_rate: f64) -> Self {
        let sources = vec![0; events.len()];
        Self {
            events,
            sources,
            source_files: Vec::new(),
            sampling_rate,
            pca: None,
            features: Vec::new(),
            model: None,
            labels: None,
        }
    }

    /// Loads and concatenates event stores, remembering which file every
    /// event came from.
    ///
    /// # Errors
    /// Returns a data integrity error if a store's cutout length differs from
    /// `cutout_length`, or the store's read error.
    pub fn from_files<P: AsRef<Path>>(paths: &[P], cutout_length: usize) -> Result<Self> {
        if paths.is_empty() {
            return Err(herdspike_core::Error::Config("no event stores given".to_string()).into());
        }
        let mut events = SpikeBatch::new(cutout_length);
        let mut sources = Vec::new();
        let mut sampling_rate = None;
        for (index, path) in paths.iter().enumerate() {
            let path = path.as_ref();
            let (header, batch) = read_event_store(path)?;
            if header.cutout_length != cutout_length {
                return Err(herdspike_core::Error::DataIntegrity(format!(
                    "{} holds {}-sample cutouts, expected {cutout_length}",
                    path.display(),
                    header.cutout_length
                ))
                .into());
            }
            match sampling_rate {
                None => sampling_rate = Some(header.sampling_rate),
                Some(rate) if (rate - header.sampling_rate).abs() > f64::EPSILON => {
                    log::warn!(
                        "{} was sampled at {} Hz, first store at {rate} Hz",
                        path.display(),
                        header.sampling_rate
                    );
                }
                Some(_) => {}
            }
            log::info!("loaded {} events from {}", batch.len(), path.display());
            sources.extend(std::iter::repeat(index as u32).take(batch.len()));
            events.append(&batch);
        }
        Ok(Self {
            events,
            sources,
            source_files: paths.iter().map(|p| p.as_ref().to_path_buf()).collect(),
            sampling_rate: sampling_rate.unwrap_or(0.0),
            pca: None,
            features: Vec::new(),
            model: None,
            labels: None,
        })
    }

    /// Takes the events of a finished detection, from memory when loaded and
    /// from its event store otherwise.
    ///
    /// # Errors
    /// Returns an error if the event store cannot be read.
    pub fn from_detection(detection: &Detection<'_>) -> Result<Self> {
        let sampling_rate = detection.recording().fps();
        match detection.events() {
            Some(events) => Ok(Self::from_events(events.clone(), sampling_rate)),
            None => {
                let output = detection.output_path();
                let mut clustering =
                    Self::from_files(&[&output], detection.config().cutout_length())?;
                clustering.sampling_rate = sampling_rate;
                Ok(clustering)
            }
        }
    }

    #[must_use]
    pub fn events(&self) -> &SpikeBatch {
        &self.events
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Source store index of every event.
    #[must_use]
    pub fn sources(&self) -> &[u32] {
        &self.sources
    }

    #[must_use]
    pub fn source_files(&self) -> &[PathBuf] {
        &self.source_files
    }

    #[must_use]
    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    #[must_use]
    pub fn pca(&self) -> Option<&Pca> {
        self.pca.as_ref()
    }

    /// Row-major shape features; empty before [`Self::shape_pca`].
    #[must_use]
    pub fn features(&self) -> &[f32] {
        &self.features
    }

    #[must_use]
    pub fn n_features(&self) -> usize {
        self.pca.as_ref().map_or(0, Pca::n_components)
    }

    #[must_use]
    pub fn labels(&self) -> Option<&[ClusterLabel]> {
        self.labels.as_deref()
    }

    #[must_use]
    pub fn model(&self) -> Option<&MeanShiftModel> {
        self.model.as_ref()
    }

    /// Number of clusters found, 0 before clustering.
    #[must_use]
    pub fn n_clusters(&self) -> usize {
        self.model.as_ref().map_or(0, MeanShiftModel::n_clusters)
    }

    /// Projects every cutout onto its first `n_components` principal
    /// components. Clears earlier cluster labels.
    ///
    /// # Errors
    /// Returns an error with fewer than two events or an invalid component
    /// count.
    pub fn shape_pca(&mut self, n_components: usize, whiten: bool) -> Result<&Pca> {
        let dim = self.events.cutout_len();
        let pca = Pca::fit(&self.events.cutouts, dim, n_components, whiten)?;
        self.features = pca.transform(&self.events.cutouts)?;
        self.model = None;
        self.labels = None;
        log::info!(
            "shape PCA: {} components, explained variance {:?}",
            pca.n_components(),
            pca.explained_variance()
        );
        Ok(self.pca.insert(pca))
    }

    /// Mean shift over `[x, y, alpha * pc_1, ..., alpha * pc_k]`.
    ///
    /// Returns the number of clusters.
    ///
    /// # Errors
    /// Returns a clustering error if [`Self::shape_pca`] has not run, events
    /// are not localised, or mean shift fails.
    pub fn combined_clustering(&mut self, config: &CombinedClusteringConfig) -> Result<usize> {
        let k = self.n_features();
        if k == 0 {
            return Err(clustering_error("combined clustering needs shape_pca first"));
        }
        if !self.events.is_localized() {
            return Err(clustering_error(
                "combined clustering needs localised events",
            ));
        }

        let dim = 2 + k;
        let mut data = Vec::with_capacity(self.events.len() * dim);
        for (i, features) in self.features.chunks_exact(k).enumerate() {
            data.push(f64::from(self.events.x[i]));
            data.push(f64::from(self.events.y[i]));
            data.extend(features.iter().map(|&f| config.alpha * f64::from(f)));
        }
        let points = Points::new(&data, dim)?;
        let mean_shift = MeanShift::new(config.mean_shift());

        let model = match config.cluster_subset {
            Some(subset) if subset > 0 && subset < points.len() => {
                let stride = points.len().div_ceil(subset);
                let fit_data = points.strided(stride);
                let fit_points = Points::new(&fit_data, dim)?;
                log::info!(
                    "fitting mean shift on {} of {} events",
                    fit_points.len(),
                    points.len()
                );
                mean_shift.fit(&fit_points)?
            }
            _ => mean_shift.fit(&points)?,
        };
        let labels = model.predict(&points)?;
        let noise = labels.iter().filter(|l| l.is_noise()).count();
        log::info!(
            "{} clusters over {} events ({noise} noise)",
            model.n_clusters(),
            labels.len()
        );

        let n_clusters = model.n_clusters();
        self.model = Some(model);
        self.labels = Some(labels);
        Ok(n_clusters)
    }

    /// Per-event sorting result.
    ///
    /// # Errors
    /// Returns a clustering error before [`Self::combined_clustering`].
    pub fn assignments(&self) -> Result<Vec<ClusterAssignment>> {
        let labels = self.require_labels()?;
        let k = self.n_features();
        Ok(labels
            .iter()
            .enumerate()
            .map(|(event, &label)| ClusterAssignment {
                event,
                label,
                features: self.features[event * k..(event + 1) * k].to_vec(),
            })
            .collect())
    }

    fn require_labels(&self) -> Result<&[ClusterLabel]> {
        self.labels
            .as_deref()
            .ok_or_else(|| clustering_error("no cluster labels; run combined_clustering first"))
    }

    fn view<'a>(&'a self, indices: &'a [usize]) -> Result<SortedView<'a>> {
        let labels = self.require_labels()?;
        let (centres, centre_dim) = self
            .model
            .as_ref()
            .map_or((&[][..], 0), |m| (m.centers(), m.dim()));
        Ok(SortedView {
            events: &self.events,
            labels,
            features: &self.features,
            n_features: self.n_features(),
            sources: &self.sources,
            indices,
            centres,
            centre_dim,
            sampling_rate: self.sampling_rate,
        })
    }

    fn indices_of_source(&self, source: Option<u32>) -> Vec<usize> {
        self.sources
            .iter()
            .enumerate()
            .filter(|(_, &s)| source.map_or(true, |wanted| s == wanted))
            .map(|(i, _)| i)
            .collect()
    }

    /// Writes every event with its label and features as CSV.
    ///
    /// # Errors
    /// Returns an error before clustering or if the file cannot be written.
    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let indices = self.indices_of_source(None);
        let view = self.view(&indices)?;
        CsvWriter::create(path)?.write_sorted(&view)
    }

    /// Writes every event to one HDF5 sorted store.
    ///
    /// # Errors
    /// Returns an error before clustering or if the file cannot be written.
    #[cfg(feature = "hdf5")]
    pub fn save_hdf5<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let indices = self.indices_of_source(None);
        crate::hdf5::write_sorted_hdf5(path, &self.view(&indices)?)
    }

    /// Writes one HDF5 sorted store per source file, each holding that
    /// file's events. Cluster ids are shared across the files.
    ///
    /// # Errors
    /// Returns an error if `paths` does not match the number of sources.
    #[cfg(feature = "hdf5")]
    pub fn save_hdf5_per_source<P: AsRef<Path>>(&self, paths: &[P]) -> Result<()> {
        let n_sources = self.source_files.len().max(1);
        if paths.len() != n_sources {
            return Err(herdspike_core::Error::Config(format!(
                "{} output paths for {n_sources} sources",
                paths.len()
            ))
            .into());
        }
        for (source, path) in paths.iter().enumerate() {
            let indices = self.indices_of_source(Some(source as u32));
            crate::hdf5::write_sorted_hdf5(path, &self.view(&indices)?)?;
        }
        Ok(())
    }
}

fn clustering_error(message: &str) -> Error {
    herdspike_core::Error::Clustering(message.to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{write_event_store, StoreHeader};
    use tempfile::tempdir;

    const LEN: usize = 8;

    /// Two units: narrow spikes near (0, 0) and wide ones near (40, 40).
    fn two_units(n: usize, offset: u64) -> SpikeBatch {
        let mut batch = SpikeBatch::new(LEN);
        for i in 0..n {
            let jitter = (i % 3) as i16 - 1;
            let unit = i % 2;
            let cutout: Vec<i16> = (0..LEN as i16)
                .map(|t| match unit {
                    0 if t == 3 => -90 + jitter,
                    0 => jitter,
                    _ => 2 * (t - 4) * (t - 4) - 40 + jitter,
                })
                .collect();
            let base = if unit == 0 { 0.0 } else { 40.0 };
            let location = (base + f32::from(jitter) * 0.3, base);
            batch.push(unit as u32, offset + i as u64 * 50, 60, Some(location), &cutout);
        }
        batch
    }

    fn header(localized: bool) -> StoreHeader {
        StoreHeader {
            localized,
            cutout_length: LEN,
            num_channels: 2,
            sampling_rate: 10_000.0,
        }
    }

    #[test]
    fn test_combined_clustering_separates_units() {
        let mut clustering = Clustering::from_events(two_units(40, 0), 10_000.0);
        clustering.shape_pca(2, true).unwrap();
        let config = CombinedClusteringConfig::default()
            .with_alpha(1.0)
            .with_bandwidth(6.0)
            .with_n_jobs(Some(2));
        assert_eq!(clustering.combined_clustering(&config).unwrap(), 2);

        let labels = clustering.labels().unwrap();
        for (i, label) in labels.iter().enumerate() {
            assert_eq!(*label, labels[i % 2]);
        }
        assert_ne!(labels[0], labels[1]);

        let assignments = clustering.assignments().unwrap();
        assert_eq!(assignments.len(), 40);
        assert_eq!(assignments[3].features.len(), 2);
    }

    #[test]
    fn test_cluster_subset_labels_everything() {
        let mut clustering = Clustering::from_events(two_units(60, 0), 10_000.0);
        clustering.shape_pca(2, true).unwrap();
        let config = CombinedClusteringConfig::default()
            .with_alpha(1.0)
            .with_bandwidth(6.0)
            .with_cluster_subset(20);
        assert_eq!(clustering.combined_clustering(&config).unwrap(), 2);
        assert_eq!(clustering.labels().unwrap().len(), 60);
        assert!(clustering.labels().unwrap().iter().all(|l| !l.is_noise()));
    }

    #[test]
    fn test_requires_pca_and_locations() {
        let mut clustering = Clustering::from_events(two_units(10, 0), 10_000.0);
        let config = CombinedClusteringConfig::default();
        assert!(matches!(
            clustering.combined_clustering(&config),
            Err(Error::Core(herdspike_core::Error::Clustering(_)))
        ));
        assert!(clustering.assignments().is_err());

        let mut unlocalized = SpikeBatch::new(LEN);
        for i in 0..4_i16 {
            unlocalized.push(0, 0, 30, None, &[i; LEN]);
        }
        let mut clustering = Clustering::from_events(unlocalized, 10_000.0);
        clustering.shape_pca(1, false).unwrap();
        assert!(matches!(
            clustering.combined_clustering(&config),
            Err(Error::Core(herdspike_core::Error::Clustering(_)))
        ));
    }

    #[test]
    fn test_from_files_tracks_sources() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("a.bin");
        let second = dir.path().join("b.bin");
        write_event_store(&first, header(true), &two_units(6, 0)).unwrap();
        write_event_store(&second, header(true), &two_units(4, 1_000)).unwrap();

        let clustering = Clustering::from_files(&[&first, &second], LEN).unwrap();
        assert_eq!(clustering.len(), 10);
        assert_eq!(clustering.sources(), &[0, 0, 0, 0, 0, 0, 1, 1, 1, 1]);
        assert_eq!(clustering.events().frame[6], 1_000);
        assert_eq!(clustering.source_files().len(), 2);
    }

    #[test]
    fn test_from_files_cutout_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.bin");
        write_event_store(&path, header(true), &two_units(2, 0)).unwrap();
        assert!(matches!(
            Clustering::from_files(&[&path], LEN + 1),
            Err(Error::Core(herdspike_core::Error::DataIntegrity(_)))
        ));
    }

    #[test]
    fn test_save_csv() {
        let dir = tempdir().unwrap();
        let mut clustering = Clustering::from_events(two_units(20, 0), 10_000.0);
        clustering.shape_pca(2, true).unwrap();
        let path = dir.path().join("sorted.csv");
        assert!(clustering.save_csv(&path).is_err());

        clustering
            .combined_clustering(
                &CombinedClusteringConfig::default()
                    .with_alpha(1.0)
                    .with_bandwidth(6.0),
            )
            .unwrap();
        clustering.save_csv(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 21);
    }
}
