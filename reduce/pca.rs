//! # Principal Component Analysis
//!
//! Turns an `N × M` metric matrix into an orthonormal basis of `M`-dimensional
//! component vectors ranked by explained variance:
//!
//! 1.  Column-center, and when `scale` is set divide every column by its
//!     sample standard deviation (a deviation of exactly zero divides by 1).
//! 2.  Thin SVD of the treated matrix. Squared singular values are the
//!     component loadings; right singular vectors are the components.
//! 3.  Optionally rotate the components with VARIMAX.
//!
//! Degenerate input (no rows or no columns) and numerical failure both yield
//! the identity basis with all-zero loadings. The latter is flagged as
//! degraded rather than reported as an error, so a training run can continue.

use crate::reduce::varimax::{VarimaxOptions, varimax};
use crate::shared::{ColumnScaler, FaerSvd};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReductionOptions {
    pub scale: bool,
    pub rotate: bool,
    pub varimax: VarimaxOptions,
}

impl Default for ReductionOptions {
    fn default() -> Self {
        Self {
            scale: true,
            rotate: true,
            varimax: VarimaxOptions::default(),
        }
    }
}

/// A prefix of the ranked components chosen by [`PrincipalComponents::reduced`].
#[derive(Debug, Clone)]
pub struct Reduction {
    pub components: Array2<f64>,
    pub loadings: Array1<f64>,
    pub count: usize,
    /// Cumulative explained-variance fraction of the kept components.
    pub captured_variance: f64,
}

#[derive(Debug, Clone)]
pub struct PrincipalComponents {
    components: Array2<f64>,
    loadings: Array1<f64>,
    n_metrics: usize,
    degraded: bool,
}

impl PrincipalComponents {
    pub fn fit(data: ArrayView2<f64>, options: &ReductionOptions) -> Self {
        let (rows, cols) = data.dim();
        if rows == 0 || cols == 0 {
            return Self::identity(cols, false);
        }

        let scaler = if options.scale {
            ColumnScaler::fit(data)
        } else {
            ColumnScaler::fit_centering(data)
        };
        let treated = scaler.transform(data);

        let svd = match treated.thin_svd() {
            Ok(svd) => svd,
            Err(err) => {
                log::warn!(
                    "SVD of the {}x{} metric matrix failed ({}); falling back to the identity basis.",
                    rows,
                    cols,
                    err
                );
                return Self::identity(cols, true);
            }
        };

        // Rank by loading, descending. Stable so equal loadings keep solver order.
        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&a, &b| {
            svd.singular_values[b]
                .partial_cmp(&svd.singular_values[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        // Directions below the numerical rank get an exact zero loading.
        let sigma_max = order.first().map_or(0.0, |&i| svd.singular_values[i]);
        let cutoff = rows.max(cols) as f64 * f64::EPSILON * sigma_max;
        let loadings = Array1::from_iter(order.iter().map(|&i| {
            let sigma = svd.singular_values[i];
            if sigma > cutoff { sigma * sigma } else { 0.0 }
        }));
        let mut components = svd.v.select(Axis(1), &order);

        if options.rotate {
            // Only the informative directions are rotated; zero-loading
            // columns stay where they are so truncation can still drop them.
            let informative = informative_count(&loadings);
            if informative > 1 {
                let rotated = varimax(
                    components.slice(ndarray::s![.., ..informative]),
                    &options.varimax,
                );
                components
                    .slice_mut(ndarray::s![.., ..informative])
                    .assign(&rotated.components);
            }
        }

        log::debug!(
            "PCA on {}x{} matrix produced {} components (scale: {}, rotate: {})",
            rows,
            cols,
            components.ncols(),
            options.scale,
            options.rotate
        );

        Self {
            components,
            loadings,
            n_metrics: cols,
            degraded: false,
        }
    }

    fn identity(cols: usize, degraded: bool) -> Self {
        Self {
            components: Array2::eye(cols),
            loadings: Array1::zeros(cols),
            n_metrics: cols,
            degraded,
        }
    }

    /// `M × K` matrix whose columns are the components.
    pub fn components(&self) -> &Array2<f64> {
        &self.components
    }

    pub fn loadings(&self) -> &Array1<f64> {
        &self.loadings
    }

    pub fn n_metrics(&self) -> usize {
        self.n_metrics
    }

    /// True when the decomposition failed and the identity basis was substituted.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn explained_variance_ratio(&self) -> Array1<f64> {
        let total = self.loadings.sum();
        if total > 0.0 {
            &self.loadings / total
        } else {
            self.loadings.clone()
        }
    }

    /// Smallest prefix of components whose cumulative explained-variance
    /// fraction reaches `target_variance`, or whose length reaches
    /// `target_components`, whichever comes first.
    ///
    /// The prefix never extends into zero-loading components. When every
    /// loading is zero the variance rule never fires and components are
    /// returned in their original order up to the count limit.
    pub fn reduced(
        &self,
        target_variance: Option<f64>,
        target_components: Option<usize>,
    ) -> Reduction {
        let mut max_components = target_components.unwrap_or(self.n_metrics);
        let informative = informative_count(&self.loadings);
        if informative > 0 {
            max_components = max_components.min(informative);
        }
        let max_variance = target_variance.unwrap_or(f64::INFINITY);

        let mut captured_variance = 0.0;
        let mut count = 0;
        for fraction in self.explained_variance_ratio().iter() {
            captured_variance += fraction;
            count += 1;
            if captured_variance >= max_variance || count >= max_components {
                break;
            }
        }

        Reduction {
            components: self.components.slice(ndarray::s![.., ..count]).to_owned(),
            loadings: self.loadings.slice(ndarray::s![..count]).to_owned(),
            count,
            captured_variance,
        }
    }

    /// The components whose loading is non-zero, in rank order.
    pub fn nonzero_components(&self) -> Array2<f64> {
        let kept = informative_count(&self.loadings);
        self.components.slice(ndarray::s![.., ..kept]).to_owned()
    }
}

/// Loadings are descending, so the informative components form a prefix.
fn informative_count(loadings: &Array1<f64>) -> usize {
    loadings.iter().take_while(|&&l| l > 0.0).count()
}
