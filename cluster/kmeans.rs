//! # Lloyd's k-means
//!
//! Partitions the rows of an `N × P` matrix into `k` groups. Seeding is
//! deterministic: every row starts labeled `i % k` and the first `k` rows are
//! the initial centers. Each iteration assigns rows to the closest center by
//! squared Euclidean distance (lowest cluster index wins ties) and then moves
//! every center to the mean of its members. A cluster that loses all of its
//! members keeps its previous center.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MAX_ITERATIONS: usize = 50;

#[derive(Debug, Error, PartialEq)]
pub enum ClusterError {
    #[error("The number of clusters must be at least 1.")]
    InvalidClusterCount,
    #[error("Cannot form {clusters} clusters from only {rows} rows.")]
    TooFewRows { rows: usize, clusters: usize },
    #[error("Row has {found} columns but the cluster centers have {expected}.")]
    DimensionMismatch { expected: usize, found: usize },
}

/// A cluster that ended an iteration with no members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyClusterEvent {
    pub iteration: usize,
    pub cluster: usize,
    /// Member count before the reassignment that emptied it.
    pub previous_size: usize,
}

#[derive(Debug, Clone)]
pub struct Clustering {
    pub assignments: Vec<usize>,
    /// `k × P`, one center per row.
    pub centers: Array2<f64>,
    pub iterations: usize,
    pub converged: bool,
    pub empty_cluster_events: Vec<EmptyClusterEvent>,
}

impl Clustering {
    pub fn k(&self) -> usize {
        self.centers.nrows()
    }

    /// Row indices grouped by cluster, each group sorted ascending.
    pub fn members(&self) -> Vec<Vec<usize>> {
        let mut groups = vec![Vec::new(); self.k()];
        for (row, &cluster) in self.assignments.iter().enumerate() {
            groups[cluster].push(row);
        }
        groups
    }

    pub fn sizes(&self) -> Vec<usize> {
        internal::sizes(&self.assignments, self.k())
    }

    pub fn closest_cluster(&self, rows: ArrayView2<f64>) -> Result<Vec<usize>, ClusterError> {
        closest_cluster(self.centers.view(), rows)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KMeans {
    pub k: usize,
    pub max_iterations: usize,
}

impl KMeans {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn fit(&self, data: ArrayView2<f64>) -> Result<Clustering, ClusterError> {
        let k = self.k;
        let rows = data.nrows();
        if k == 0 {
            return Err(ClusterError::InvalidClusterCount);
        }
        if rows < k {
            return Err(ClusterError::TooFewRows { rows, clusters: k });
        }

        let mut assignments: Vec<usize> = (0..rows).map(|i| i % k).collect();
        let mut centers = data.slice(ndarray::s![..k, ..]).to_owned();
        let mut sizes = internal::sizes(&assignments, k);
        let mut empty_cluster_events = Vec::new();
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iterations {
            iterations += 1;
            let mut changed = false;
            let mut new_sizes = vec![0; k];
            for (row, label) in data.rows().into_iter().zip(assignments.iter_mut()) {
                let best = internal::nearest(centers.view(), row);
                if best != *label {
                    changed = true;
                    *label = best;
                }
                new_sizes[best] += 1;
            }

            for cluster in 0..k {
                if new_sizes[cluster] == 0 {
                    log::warn!(
                        "k-means iteration {}: cluster {} has no members (it had {} before); keeping its previous center.",
                        iterations,
                        cluster,
                        sizes[cluster]
                    );
                    empty_cluster_events.push(EmptyClusterEvent {
                        iteration: iterations,
                        cluster,
                        previous_size: sizes[cluster],
                    });
                }
            }
            sizes = new_sizes;
            internal::recompute_centers(data, &assignments, &sizes, &mut centers);

            if !changed {
                converged = true;
                break;
            }
        }

        if !converged {
            log::warn!(
                "k-means with k = {} stopped after {} iterations without converging.",
                k,
                iterations
            );
        }

        Ok(Clustering {
            assignments,
            centers,
            iterations,
            converged,
            empty_cluster_events,
        })
    }
}

/// Index of the nearest center for every row of `rows`.
pub fn closest_cluster(
    centers: ArrayView2<f64>,
    rows: ArrayView2<f64>,
) -> Result<Vec<usize>, ClusterError> {
    if centers.nrows() == 0 {
        return Err(ClusterError::InvalidClusterCount);
    }
    if rows.ncols() != centers.ncols() {
        return Err(ClusterError::DimensionMismatch {
            expected: centers.ncols(),
            found: rows.ncols(),
        });
    }
    Ok(rows
        .rows()
        .into_iter()
        .map(|row| internal::nearest(centers, row))
        .collect())
}

mod internal {
    use super::*;

    pub(super) fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    /// Strict comparison keeps the lowest index on ties.
    pub(super) fn nearest(centers: ArrayView2<f64>, row: ArrayView1<f64>) -> usize {
        let mut best = 0;
        let mut best_distance = f64::INFINITY;
        for (idx, center) in centers.rows().into_iter().enumerate() {
            let distance = squared_distance(row, center);
            if idx == 0 || distance < best_distance {
                best = idx;
                best_distance = distance;
            }
        }
        best
    }

    pub(super) fn sizes(assignments: &[usize], k: usize) -> Vec<usize> {
        let mut sizes = vec![0; k];
        for &label in assignments {
            sizes[label] += 1;
        }
        sizes
    }

    pub(super) fn recompute_centers(
        data: ArrayView2<f64>,
        assignments: &[usize],
        sizes: &[usize],
        centers: &mut Array2<f64>,
    ) {
        let mut sums = Array2::<f64>::zeros(centers.dim());
        for (row, &label) in data.axis_iter(Axis(0)).zip(assignments) {
            let mut target = sums.row_mut(label);
            target += &row;
        }
        for (cluster, &size) in sizes.iter().enumerate() {
            if size == 0 {
                continue;
            }
            let mean = &sums.row(cluster) / size as f64;
            centers.row_mut(cluster).assign(&mean);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn two_blobs() -> Array2<f64> {
        array![
            [0.0, 0.0],
            [10.0, 10.0],
            [0.2, -0.1],
            [9.8, 10.1],
            [-0.1, 0.3],
            [10.2, 9.9]
        ]
    }

    #[test]
    fn single_cluster_converges_in_one_iteration() {
        let mut rng = StdRng::seed_from_u64(42);
        let data = Array2::<f64>::from_shape_fn((17, 3), |_| rng.gen_range(-5.0..5.0));
        let result = KMeans::new(1).fit(data.view()).unwrap();
        assert!(result.converged);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.members(), vec![(0..17).collect::<Vec<_>>()]);
    }

    #[test]
    fn separates_two_blobs() {
        let data = two_blobs();
        let result = KMeans::new(2).fit(data.view()).unwrap();
        assert!(result.converged);
        assert_eq!(result.members(), vec![vec![0, 2, 4], vec![1, 3, 5]]);
        assert!(result.empty_cluster_events.is_empty());
        assert!((result.centers[[0, 0]] - 0.1 / 3.0).abs() < 1e-12);
        assert!((result.centers[[1, 0]] - 10.0).abs() < 1e-12);
    }

    #[test]
    fn centers_map_to_their_own_cluster() {
        let data = two_blobs();
        let result = KMeans::new(3).fit(data.view()).unwrap();
        let owners = result.closest_cluster(result.centers.view()).unwrap();
        assert_eq!(owners, (0..result.k()).collect::<Vec<_>>());
    }

    #[test]
    fn ties_go_to_the_lowest_index() {
        let centers = array![[1.0], [-1.0], [1.0]];
        let rows = array![[0.0], [1.0]];
        assert_eq!(closest_cluster(centers.view(), rows.view()).unwrap(), vec![0, 0]);
    }

    #[test]
    fn duplicate_seed_rows_report_an_empty_cluster() {
        // Rows 0 and 1 are identical, so cluster 1 loses every row on the first pass.
        let data = array![[1.0, 1.0], [1.0, 1.0], [5.0, 5.0], [5.0, 5.1]];
        let result = KMeans::new(2).fit(data.view()).unwrap();
        assert_eq!(
            result.empty_cluster_events,
            vec![EmptyClusterEvent {
                iteration: 1,
                cluster: 1,
                previous_size: 2
            }]
        );
        // The kept center later wins back the duplicated rows.
        assert!(result.converged);
        assert_eq!(result.members(), vec![vec![2, 3], vec![0, 1]]);
        assert_eq!(result.centers.row(1).to_vec(), vec![1.0, 1.0]);
    }

    #[test]
    fn stops_at_iteration_limit() {
        let data = array![[1.0, 1.0], [1.0, 1.0], [5.0, 5.0], [5.0, 5.1]];
        let result = KMeans::new(2)
            .with_max_iterations(1)
            .fit(data.view())
            .unwrap();
        assert!(!result.converged);
        assert_eq!(result.iterations, 1);
    }

    #[test]
    fn rejects_invalid_cluster_counts() {
        let data = two_blobs();
        assert_eq!(
            KMeans::new(0).fit(data.view()).unwrap_err(),
            ClusterError::InvalidClusterCount
        );
        assert_eq!(
            KMeans::new(7).fit(data.view()).unwrap_err(),
            ClusterError::TooFewRows {
                rows: 6,
                clusters: 7
            }
        );
    }

    #[test]
    fn closest_cluster_checks_dimensions() {
        let centers = array![[0.0, 0.0]];
        let rows = array![[1.0, 2.0, 3.0]];
        assert_eq!(
            closest_cluster(centers.view(), rows.view()).unwrap_err(),
            ClusterError::DimensionMismatch {
                expected: 2,
                found: 3
            }
        );
    }
}
