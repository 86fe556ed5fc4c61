//! Principal component analysis of waveform cutouts.
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]

use herdspike_core::{Error, Result};
use nalgebra::{DMatrix, SymmetricEigen};

/// Fitted PCA projection.
///
/// Components are sorted by decreasing explained variance. The sign of each
/// component is fixed so that its largest-magnitude loading is positive,
/// which makes repeated fits on identical data reproducible.
#[derive(Debug, Clone)]
pub struct Pca {
    mean: Vec<f64>,
    /// Row-major `n_components x dim`.
    components: Vec<f64>,
    explained_variance: Vec<f64>,
    dim: usize,
    whiten: bool,
}

impl Pca {
    /// Fits a projection onto `n_components` axes from row-major `rows`
    /// (`dim` values per row).
    ///
    /// # Errors
    /// Returns `Error::Config` if `n_components` is 0 or exceeds `dim`, and
    /// `Error::Clustering` with fewer than two rows.
    pub fn fit(rows: &[i16], dim: usize, n_components: usize, whiten: bool) -> Result<Self> {
        if dim == 0 || n_components == 0 || n_components > dim {
            return Err(Error::Config(format!(
                "cannot extract {n_components} components from {dim}-sample waveforms"
            )));
        }
        let n = rows.len() / dim;
        if n < 2 {
            return Err(Error::Clustering(format!(
                "PCA needs at least two waveforms, got {n}"
            )));
        }

        let mut mean = vec![0.0; dim];
        for row in rows.chunks_exact(dim) {
            for (m, &x) in mean.iter_mut().zip(row) {
                *m += f64::from(x);
            }
        }
        for m in &mut mean {
            *m /= n as f64;
        }

        let mut covariance = DMatrix::<f64>::zeros(dim, dim);
        let mut centered = vec![0.0; dim];
        for row in rows.chunks_exact(dim) {
            for ((c, &x), m) in centered.iter_mut().zip(row).zip(&mean) {
                *c = f64::from(x) - m;
            }
            for i in 0..dim {
                let ci = centered[i];
                for j in i..dim {
                    covariance[(i, j)] += ci * centered[j];
                }
            }
        }
        let denominator = (n - 1) as f64;
        for i in 0..dim {
            for j in i..dim {
                let value = covariance[(i, j)] / denominator;
                covariance[(i, j)] = value;
                covariance[(j, i)] = value;
            }
        }

        let eigen = SymmetricEigen::new(covariance);
        let mut order: Vec<usize> = (0..dim).collect();
        order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

        let mut components = Vec::with_capacity(n_components * dim);
        let mut explained_variance = Vec::with_capacity(n_components);
        for &axis in order.iter().take(n_components) {
            let column = eigen.eigenvectors.column(axis);
            let pivot = column
                .iter()
                .copied()
                .max_by(|a, b| a.abs().total_cmp(&b.abs()))
                .unwrap_or(1.0);
            let sign = if pivot < 0.0 { -1.0 } else { 1.0 };
            components.extend(column.iter().map(|v| v * sign));
            explained_variance.push(eigen.eigenvalues[axis].max(0.0));
        }

        log::debug!(
            "PCA on {n} waveforms of {dim} samples: variance {explained_variance:?}"
        );

        Ok(Self {
            mean,
            components,
            explained_variance,
            dim,
            whiten,
        })
    }

    #[must_use]
    pub fn n_components(&self) -> usize {
        self.explained_variance.len()
    }

    /// Variance captured by each component.
    #[must_use]
    pub fn explained_variance(&self) -> &[f64] {
        &self.explained_variance
    }

    /// Loadings of component `k`.
    #[must_use]
    pub fn component(&self, k: usize) -> &[f64] {
        &self.components[k * self.dim..(k + 1) * self.dim]
    }

    /// Projects row-major `rows` onto the fitted components, returning
    /// `n_rows x n_components` features.
    ///
    /// # Errors
    /// Returns `Error::DataIntegrity` if the rows are not `dim` wide.
    pub fn transform(&self, rows: &[i16]) -> Result<Vec<f32>> {
        if rows.len() % self.dim != 0 {
            return Err(Error::DataIntegrity(format!(
                "{} samples do not form {}-sample waveforms",
                rows.len(),
                self.dim
            )));
        }
        let k = self.n_components();
        let scales: Vec<f64> = self
            .explained_variance
            .iter()
            .map(|&var| match (self.whiten, var > f64::EPSILON) {
                (false, _) => 1.0,
                (true, true) => 1.0 / var.sqrt(),
                (true, false) => 0.0,
            })
            .collect();

        let mut features = Vec::with_capacity(rows.len() / self.dim * k);
        for row in rows.chunks_exact(self.dim) {
            for (c, scale) in scales.iter().enumerate() {
                let projection: f64 = self
                    .component(c)
                    .iter()
                    .zip(row)
                    .zip(&self.mean)
                    .map(|((w, &x), m)| w * (f64::from(x) - m))
                    .sum();
                features.push((projection * scale) as f32);
            }
        }
        Ok(features)
    }
}
