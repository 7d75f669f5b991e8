use dyn_stack::{MemBuffer, MemStack};
use faer::diag::Diag;
use faer::linalg::svd::{self, ComputeSvdVectors};
use faer::{Mat, get_global_parallelism};
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Data, Ix2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinalgError {
    #[error("SVD failed to converge")]
    SvdNoConvergence,
    #[error("Matrix contains non-finite entries; refusing to decompose it.")]
    NonFiniteInput,
    #[error("Design matrix has {rows} rows but the right-hand side has {rhs} entries.")]
    ShapeMismatch { rows: usize, rhs: usize },
}

/// Economy-size singular value decomposition `A = U · diag(S) · Vᵀ`.
///
/// For an `n × m` input with `k = min(n, m)`: `u` is `n × k`, `singular_values`
/// has length `k`, and `v` is `m × k` (right singular vectors as columns).
#[derive(Debug, Clone)]
pub struct ThinSvd {
    pub u: Array2<f64>,
    pub singular_values: Array1<f64>,
    pub v: Array2<f64>,
}

pub trait FaerSvd {
    fn thin_svd(&self) -> Result<ThinSvd, LinalgError>;
}

impl<S: Data<Elem = f64>> FaerSvd for ArrayBase<S, Ix2> {
    fn thin_svd(&self) -> Result<ThinSvd, LinalgError> {
        if self.iter().any(|v| !v.is_finite()) {
            return Err(LinalgError::NonFiniteInput);
        }
        let (rows, cols) = self.dim();
        let k = rows.min(cols);
        if k == 0 {
            return Ok(ThinSvd {
                u: Array2::zeros((rows, 0)),
                singular_values: Array1::zeros(0),
                v: Array2::zeros((cols, 0)),
            });
        }

        let input = Mat::<f64>::from_fn(rows, cols, |i, j| self[(i, j)]);
        let mut singular = Diag::<f64>::zeros(k);
        let mut u_storage = Mat::<f64>::zeros(rows, k);
        let mut v_storage = Mat::<f64>::zeros(cols, k);

        let par = get_global_parallelism();
        let mut mem = MemBuffer::new(svd::svd_scratch::<f64>(
            rows,
            cols,
            ComputeSvdVectors::Thin,
            ComputeSvdVectors::Thin,
            par,
            Default::default(),
        ));
        let mut stack = MemStack::new(&mut mem);

        svd::svd(
            input.as_ref(),
            singular.as_mut(),
            Some(u_storage.as_mut()),
            Some(v_storage.as_mut()),
            par,
            &mut stack,
            Default::default(),
        )
        .map_err(|_| LinalgError::SvdNoConvergence)?;

        let (u, v) = (u_storage.as_ref(), v_storage.as_ref());
        let sigma = singular.as_ref().column_vector().as_mat();
        let decomposition = ThinSvd {
            u: Array2::from_shape_fn((rows, k), |(i, j)| u[(i, j)]),
            singular_values: Array1::from_shape_fn(k, |i| sigma[(i, 0)]),
            v: Array2::from_shape_fn((cols, k), |(i, j)| v[(i, j)]),
        };
        if decomposition.singular_values.iter().any(|s| !s.is_finite()) {
            return Err(LinalgError::SvdNoConvergence);
        }
        Ok(decomposition)
    }
}

/// Result of a rank-aware least-squares solve.
#[derive(Debug, Clone)]
pub struct LeastSquaresFit {
    pub solution: Array1<f64>,
    pub rank: usize,
    pub singular_values: Array1<f64>,
    /// Only reported for full column rank systems with more rows than
    /// columns. Callers recompute it from predictions otherwise.
    pub residual_sum_of_squares: Option<f64>,
}

/// Minimum-norm least-squares solution of `a · x ≈ b` through the SVD
/// pseudo-inverse. Singular values below `max(n, p) · ε · σ_max` count as zero.
pub fn least_squares(
    a: ArrayView2<f64>,
    b: ArrayView1<f64>,
) -> Result<LeastSquaresFit, LinalgError> {
    let (rows, cols) = a.dim();
    if rows != b.len() {
        return Err(LinalgError::ShapeMismatch {
            rows,
            rhs: b.len(),
        });
    }
    if b.iter().any(|v| !v.is_finite()) {
        return Err(LinalgError::NonFiniteInput);
    }

    let ThinSvd {
        u,
        singular_values,
        v,
    } = a.thin_svd()?;

    let sigma_max = singular_values.iter().fold(0.0_f64, |acc, &s| acc.max(s));
    let cutoff = rows.max(cols) as f64 * f64::EPSILON * sigma_max;

    let mut solution = Array1::<f64>::zeros(cols);
    let mut rank = 0;
    for (idx, &sigma) in singular_values.iter().enumerate() {
        if sigma <= cutoff || sigma == 0.0 {
            continue;
        }
        rank += 1;
        let coefficient = u.column(idx).dot(&b) / sigma;
        solution.scaled_add(coefficient, &v.column(idx));
    }

    let residual_sum_of_squares = if rank == cols && rows > cols {
        let residual = &b - &a.dot(&solution);
        Some(residual.dot(&residual))
    } else {
        None
    };

    Ok(LeastSquaresFit {
        solution,
        rank,
        singular_values,
        residual_sum_of_squares,
    })
}
