//! Flat-kernel mean-shift clustering.
//!
//! Points are row-major `f64` vectors of a fixed dimension whose first two
//! coordinates index a [`SpatialGrid`] with cells one bandwidth wide; every
//! radius query is answered from the 3x3 block of cells around the point
//! and then checked exactly in all dimensions.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use crate::spatial::SpatialGrid;
use herdspike_core::{ClusterLabel, Error, Result};
use rayon::prelude::*;
use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Mean-shift configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MeanShiftConfig {
    /// Kernel radius.
    pub bandwidth: f64,
    /// Seed from occupied grid bins instead of every point.
    pub bin_seeding: bool,
    /// Minimum points in a bin for it to become a seed.
    pub min_bin_freq: usize,
    /// Worker threads; `None` uses every core.
    pub n_jobs: Option<usize>,
    /// Label every point with its nearest centre, even beyond `bandwidth`.
    pub cluster_all: bool,
    /// Iteration limit per seed.
    pub max_iter: usize,
}

impl Default for MeanShiftConfig {
    fn default() -> Self {
        Self {
            bandwidth: 5.0,
            bin_seeding: false,
            min_bin_freq: 1,
            n_jobs: None,
            cluster_all: true,
            max_iter: 300,
        }
    }
}

impl MeanShiftConfig {
    #[must_use]
    pub fn with_bandwidth(mut self, bandwidth: f64) -> Self {
        self.bandwidth = bandwidth;
        self
    }

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
    pub fn with_cluster_all(mut self, cluster_all: bool) -> Self {
        self.cluster_all = cluster_all;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.bandwidth.is_finite() && self.bandwidth > 0.0) {
            return Err(Error::Config(format!(
                "bandwidth must be positive, got {}",
                self.bandwidth
            )));
        }
        if self.n_jobs == Some(0) {
            return Err(Error::Config("n_jobs must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Row-major point set borrowed from the caller.
#[derive(Clone, Copy, Debug)]
pub struct Points<'a> {
    data: &'a [f64],
    dim: usize,
}

impl<'a> Points<'a> {
    /// Wraps `data` as rows of `dim` values.
    ///
    /// # Errors
    /// Returns `Error::Config` for fewer than two dimensions and
    /// `Error::DataIntegrity` if `data` is not a whole number of rows.
    pub fn new(data: &'a [f64], dim: usize) -> Result<Self> {
        if dim < 2 {
            return Err(Error::Config(format!(
                "mean shift needs at least 2 dimensions, got {dim}"
            )));
        }
        if data.len() % dim != 0 {
            return Err(Error::DataIntegrity(format!(
                "{} values do not form {dim}-dimensional points",
                data.len()
            )));
        }
        Ok(Self { data, dim })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn row(&self, index: usize) -> &'a [f64] {
        &self.data[index * self.dim..(index + 1) * self.dim]
    }

    /// Every `stride`-th point.
    #[must_use]
    pub fn strided(&self, stride: usize) -> Vec<f64> {
        (0..self.len())
            .step_by(stride.max(1))
            .flat_map(|i| self.row(i).iter().copied())
            .collect()
    }

    fn grid(&self, cell_size: f64) -> SpatialGrid<usize> {
        let mut grid = SpatialGrid::new(cell_size);
        for i in 0..self.len() {
            let row = self.row(i);
            grid.insert(row[0], row[1], i);
        }
        grid
    }
}

fn distance_squared(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Fitted cluster centres.
#[derive(Clone, Debug)]
pub struct MeanShiftModel {
    /// Row-major `n_clusters x dim`, densest first.
    centers: Vec<f64>,
    dim: usize,
    bandwidth: f64,
    cluster_all: bool,
    pool: std::sync::Arc<rayon::ThreadPool>,
}

impl MeanShiftModel {
    #[must_use]
    pub fn n_clusters(&self) -> usize {
        self.centers.len() / self.dim
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Centre of cluster `k`.
    #[must_use]
    pub fn center(&self, k: usize) -> &[f64] {
        &self.centers[k * self.dim..(k + 1) * self.dim]
    }

    /// All centres, row-major.
    #[must_use]
    pub fn centers(&self) -> &[f64] {
        &self.centers
    }

    /// Labels each point with its nearest centre.
    ///
    /// Without `cluster_all`, points farther than `bandwidth` from every
    /// centre are [`ClusterLabel::Noise`].
    ///
    /// # Errors
    /// Returns `Error::DataIntegrity` if the points have a different
    /// dimension than the centres.
    pub fn predict(&self, points: &Points<'_>) -> Result<Vec<ClusterLabel>> {
        if points.dim() != self.dim {
            return Err(Error::DataIntegrity(format!(
                "model has {} dimensions, points {}",
                self.dim,
                points.dim()
            )));
        }
        let mut grid = SpatialGrid::new(self.bandwidth);
        for k in 0..self.n_clusters() {
            let center = self.center(k);
            grid.insert(center[0], center[1], k);
        }
        let radius_sq = self.bandwidth * self.bandwidth;

        let labels = self.pool.install(|| {
            (0..points.len())
                .into_par_iter()
                .map(|i| {
                    let row = points.row(i);
                    let near = grid
                        .query_neighborhood(row[0], row[1])
                        .map(|&k| (k, distance_squared(row, self.center(k))))
                        .filter(|&(_, d)| d <= radius_sq)
                        .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
                    let nearest = match near {
                        Some((k, _)) => Some(k),
                        None if self.cluster_all => (0..self.n_clusters())
                            .map(|k| (k, distance_squared(row, self.center(k))))
                            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
                            .map(|(k, _)| k),
                        None => None,
                    };
                    nearest.map_or(ClusterLabel::Noise, |k| ClusterLabel::Cluster(k as u32))
                })
                .collect()
        });
        Ok(labels)
    }
}

/// Mean-shift clusterer.
#[derive(Clone, Debug)]
pub struct MeanShift {
    config: MeanShiftConfig,
}

impl MeanShift {
    #[must_use]
    pub fn new(config: MeanShiftConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &MeanShiftConfig {
        &self.config
    }

    /// Finds cluster centres.
    ///
    /// # Errors
    /// Returns `Error::Config` for an invalid configuration or thread pool,
    /// and `Error::Clustering` if no seed converges.
    pub fn fit(&self, points: &Points<'_>) -> Result<MeanShiftModel> {
        self.config.validate()?;
        if points.is_empty() {
            return Err(Error::Clustering("no points to cluster".to_string()));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.n_jobs.unwrap_or(0))
            .build()
            .map_err(|e| Error::Config(format!("cannot start clustering workers: {e}")))?;

        let dim = points.dim();
        let bandwidth = self.config.bandwidth;
        let seeds = self.seeds(points);
        let grid = points.grid(bandwidth);
        log::info!(
            "mean shift: {} points, {} seeds, bandwidth {bandwidth}, {} workers",
            points.len(),
            seeds.len() / dim,
            pool.current_num_threads()
        );

        let max_iter = self.config.max_iter;
        let mut modes: Vec<(Vec<f64>, usize)> = pool.install(|| {
            seeds
                .par_chunks_exact(dim)
                .filter_map(|seed| shift_seed(seed, points, &grid, bandwidth, max_iter))
                .collect()
        });
        if modes.is_empty() {
            return Err(Error::Clustering(format!(
                "no seed has a point within bandwidth {bandwidth}"
            )));
        }

        // Densest modes first; ties keep seed order for reproducibility.
        modes.sort_by(|a, b| b.1.cmp(&a.1));
        let radius_sq = bandwidth * bandwidth;
        let mut centers: Vec<f64> = Vec::new();
        for (mode, _) in &modes {
            let duplicate = centers
                .chunks_exact(dim)
                .any(|kept| distance_squared(kept, mode) < radius_sq);
            if !duplicate {
                centers.extend_from_slice(mode);
            }
        }
        log::info!(
            "mean shift: {} modes merged into {} clusters",
            modes.len(),
            centers.len() / dim
        );

        Ok(MeanShiftModel {
            centers,
            dim,
            bandwidth,
            cluster_all: self.config.cluster_all,
            pool: std::sync::Arc::new(pool),
        })
    }

    /// Fits on `points` and labels them.
    ///
    /// # Errors
    /// See [`MeanShift::fit`].
    pub fn fit_predict(&self, points: &Points<'_>) -> Result<(MeanShiftModel, Vec<ClusterLabel>)> {
        let model = self.fit(points)?;
        let labels = model.predict(points)?;
        Ok((model, labels))
    }

    fn seeds(&self, points: &Points<'_>) -> Vec<f64> {
        if !self.config.bin_seeding {
            return points.data.to_vec();
        }
        let bandwidth = self.config.bandwidth;
        let mut bins: HashMap<Vec<i64>, usize> = HashMap::new();
        for i in 0..points.len() {
            let key: Vec<i64> = points
                .row(i)
                .iter()
                .map(|v| (v / bandwidth).round() as i64)
                .collect();
            *bins.entry(key).or_default() += 1;
        }
        let mut kept: Vec<Vec<i64>> = bins
            .into_iter()
            .filter(|(_, count)| *count >= self.config.min_bin_freq)
            .map(|(key, _)| key)
            .collect();
        if kept.is_empty() {
            log::warn!(
                "no bin holds {} points, seeding from every point",
                self.config.min_bin_freq
            );
            return points.data.to_vec();
        }
        if kept.len() == points.len() {
            log::warn!("bin seeding found one point per bin, seeding from every point");
            return points.data.to_vec();
        }
        kept.sort_unstable();
        kept.into_iter()
            .flat_map(|key| key.into_iter().map(move |k| k as f64 * bandwidth))
            .collect()
    }
}

/// Moves one seed uphill until it converges; returns the mode and the
/// number of points within bandwidth of it.
fn shift_seed(
    seed: &[f64],
    points: &Points<'_>,
    grid: &SpatialGrid<usize>,
    bandwidth: f64,
    max_iter: usize,
) -> Option<(Vec<f64>, usize)> {
    let radius_sq = bandwidth * bandwidth;
    let tolerance = 1e-3 * bandwidth;
    let mut mean = seed.to_vec();
    let mut next = vec![0.0; seed.len()];

    for iteration in 0..max_iter.max(1) {
        next.iter_mut().for_each(|v| *v = 0.0);
        let mut count = 0_usize;
        for &i in grid.query_neighborhood(mean[0], mean[1]) {
            let row = points.row(i);
            if distance_squared(row, &mean) <= radius_sq {
                for (acc, v) in next.iter_mut().zip(row) {
                    *acc += v;
                }
                count += 1;
            }
        }
        if count == 0 {
            return None;
        }
        for v in &mut next {
            *v /= count as f64;
        }
        let shift = distance_squared(&next, &mean).sqrt();
        std::mem::swap(&mut mean, &mut next);
        if shift < tolerance || iteration + 1 == max_iter {
            return Some((mean, count));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two tight blobs of 20 points around (0, 0) and (10, 10), 3-D.
    fn blobs() -> Vec<f64> {
        let mut data = Vec::new();
        for (cx, cy) in [(0.0, 0.0), (10.0, 10.0)] {
            for i in 0..20 {
                let dx = f64::from(i % 5) * 0.1 - 0.2;
                let dy = f64::from(i / 5) * 0.1 - 0.15;
                data.extend_from_slice(&[cx + dx, cy + dy, 0.0]);
            }
        }
        data
    }

    #[test]
    fn test_two_blobs() {
        let data = blobs();
        let points = Points::new(&data, 3).unwrap();
        let shift = MeanShift::new(MeanShiftConfig::default().with_bandwidth(1.0).with_n_jobs(Some(2)));
        let (model, labels) = shift.fit_predict(&points).unwrap();

        assert_eq!(model.n_clusters(), 2);
        assert!(labels[..20].iter().all(|&l| l == labels[0]));
        assert!(labels[20..].iter().all(|&l| l == labels[20]));
        assert_ne!(labels[0], labels[20]);
        assert!(!labels[0].is_noise());
    }

    #[test]
    fn test_bin_seeding_min_freq() {
        let mut data = blobs();
        // A lone outlier never becomes a seed.
        data.extend_from_slice(&[50.0, 50.0, 0.0]);
        let points = Points::new(&data, 3).unwrap();
        let config = MeanShiftConfig::default()
            .with_bandwidth(1.0)
            .with_bin_seeding(5)
            .with_cluster_all(false);
        let (model, labels) = MeanShift::new(config).fit_predict(&points).unwrap();

        assert_eq!(model.n_clusters(), 2);
        assert_eq!(labels[40], ClusterLabel::Noise);
        assert!(labels[..40].iter().all(|l| !l.is_noise()));
    }

    #[test]
    fn test_bin_seeding_without_full_bin_uses_every_point() {
        // 30 points in three groups, none holding 40.
        let data: Vec<f64> = (0..30)
            .flat_map(|i| {
                let group = f64::from(i % 3) * 10.0;
                [group + f64::from(i / 3) * 0.01, 0.0]
            })
            .collect();
        let points = Points::new(&data, 2).unwrap();
        let config = MeanShiftConfig::default()
            .with_bandwidth(1.0)
            .with_bin_seeding(40);
        let (model, labels) = MeanShift::new(config).fit_predict(&points).unwrap();
        assert_eq!(model.n_clusters(), 3);
        assert!(labels.iter().all(|l| !l.is_noise()));
        assert_eq!(labels[0], labels[3]);
        assert_ne!(labels[0], labels[1]);
    }

    #[test]
    fn test_cluster_all_assigns_outliers() {
        let mut data = blobs();
        data.extend_from_slice(&[50.0, 50.0, 0.0]);
        let points = Points::new(&data, 3).unwrap();
        let config = MeanShiftConfig::default()
            .with_bandwidth(1.0)
            .with_bin_seeding(5);
        let (_, labels) = MeanShift::new(config).fit_predict(&points).unwrap();
        assert_eq!(labels[40], labels[20]);
    }

    #[test]
    fn test_reproducible() {
        let data = blobs();
        let points = Points::new(&data, 3).unwrap();
        let shift = MeanShift::new(MeanShiftConfig::default().with_bandwidth(1.0));
        let first = shift.fit(&points).unwrap();
        let second = shift.fit(&points).unwrap();
        assert_eq!(first.centers(), second.centers());
    }

    #[test]
    fn test_invalid_input() {
        assert!(Points::new(&[1.0, 2.0, 3.0], 2).is_err());
        assert!(Points::new(&[1.0, 2.0], 1).is_err());
        let data = blobs();
        let points = Points::new(&data, 3).unwrap();
        let bad = MeanShift::new(MeanShiftConfig::default().with_bandwidth(0.0));
        assert!(matches!(bad.fit(&points), Err(Error::Config(_))));
        let bad = MeanShift::new(MeanShiftConfig::default().with_n_jobs(Some(0)));
        assert!(matches!(bad.fit(&points), Err(Error::Config(_))));
    }
}
