//! # VARIMAX rotation
//!
//! Rotates a set of component vectors (as columns of an `M × k` matrix) so
//! that each component loads heavily on few metrics and weakly on the rest.
//! Every sweep visits all `k(k-1)/2` column pairs and applies the planar
//! rotation that maximizes the variance of squared loadings for that pair,
//! using the closed form `φ = arg(u - v²) / 4` with
//! `u = mean((x_j + i·x_l)^4)` and `v = mean((x_j + i·x_l)^2)`.
//!
//! The same rotations are accumulated into `R` (initialized to identity), so
//! `rotated = components · R`.

use ndarray::{Array2, ArrayView2, ArrayViewMut2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_ITERATIONS: usize = 100;
pub const DEFAULT_EPSILON: f64 = 1.0e-5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarimaxOptions {
    pub max_iterations: usize,
    pub epsilon: f64,
}

impl Default for VarimaxOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VarimaxRotation {
    /// Accumulated `k × k` rotation.
    pub rotation: Array2<f64>,
    /// The rotated `M × k` components.
    pub components: Array2<f64>,
    pub sweeps: usize,
    pub converged: bool,
}

/// Runs full pairwise sweeps until the fractional change of the total squared
/// loading drops below `options.epsilon` or `options.max_iterations` sweeps
/// have run.
pub fn varimax(components: ArrayView2<f64>, options: &VarimaxOptions) -> VarimaxRotation {
    let k = components.ncols();
    let mut x = components.to_owned();
    let mut r = Array2::<f64>::eye(k);

    if k < 2 || x.nrows() == 0 {
        return VarimaxRotation {
            rotation: r,
            components: x,
            sweeps: 0,
            converged: true,
        };
    }

    let mut total = squared_loading(x.view());
    let mut sweeps = 0;
    let mut converged = false;

    while !converged && sweeps < options.max_iterations {
        for j in 0..k - 1 {
            for l in j + 1..k {
                let phi = pair_angle(x.view(), j, l);
                rotate_pair(x.view_mut(), phi, j, l);
                rotate_pair(r.view_mut(), phi, j, l);
            }
        }
        sweeps += 1;

        let updated = squared_loading(x.view());
        converged = updated <= f64::MIN_POSITIVE
            || ((updated - total) / updated).abs() < options.epsilon;
        total = updated;
    }

    log::debug!(
        "VARIMAX finished after {} sweeps (converged: {}, squared loading {:.6e})",
        sweeps,
        converged,
        total
    );

    VarimaxRotation {
        rotation: r,
        components: x,
        sweeps,
        converged,
    }
}

fn squared_loading(x: ArrayView2<f64>) -> f64 {
    x.iter().map(|v| v * v).sum()
}

fn pair_angle(x: ArrayView2<f64>, j: usize, l: usize) -> f64 {
    let rows = x.nrows() as f64;
    let (mut u, mut v) = (Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0));
    for row in x.rows() {
        let z = Complex64::new(row[j], row[l]);
        let z2 = z * z;
        u += z2 * z2;
        v += z2;
    }
    u /= rows;
    v /= rows;
    (u - v * v).arg() / 4.0
}

/// Replaces columns `(j, l)` with `[x_j x_l] · [[c, -s], [s, c]]`.
fn rotate_pair(mut x: ArrayViewMut2<f64>, phi: f64, j: usize, l: usize) {
    let (s, c) = phi.sin_cos();
    for mut row in x.rows_mut() {
        let (a, b) = (row[j], row[l]);
        row[j] = c * a + s * b;
        row[l] = -s * a + c * b;
    }
}
