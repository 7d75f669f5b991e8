//! # Multivariate adaptive regression splines
//!
//! Every observed value of every column is a candidate knot, giving the pair
//! of hinges `max(x_j - v, 0)` and `max(v - x_j, 0)`.
//!
//! ## Forward pass
//!
//! Starts from the constant term. Each step tries to multiply every existing
//! term (that still has fewer than `max_interactions` hinge factors) by every
//! knot pair on a column the term does not already use. Both products are
//! appended to the design together and the pair with the lowest residual sum
//! of squares wins. The pass stops when no pair lowers the error, when the
//! error vanishes, or when another pair would exceed `max_terms`.
//!
//! ## Backward pass
//!
//! Repeatedly drops the term whose removal leaves the smallest error and
//! scores every intermediate model with
//! `GCV = SSE / (N (1 - (r + 3K)/N)²)`, `K = (r - 1)/2`. The model with the
//! lowest GCV is kept; ties go to the smaller model.

use crate::regress::basis::BasisFunction;
use crate::regress::model::{Model, RegressionError, Term};
use crate::shared::least_squares;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_TERMS: usize = 40;
pub const DEFAULT_MAX_INTERACTIONS: usize = 2;
/// GCV cost per knot for models with interactions.
pub const GCV_PENALTY: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarsOptions {
    pub max_terms: usize,
    pub max_interactions: usize,
}

impl Default for MarsOptions {
    fn default() -> Self {
        Self {
            max_terms: DEFAULT_MAX_TERMS,
            max_interactions: DEFAULT_MAX_INTERACTIONS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarsFit {
    pub model: Model,
    pub gcv: f64,
    /// Training residual sum of squares of `model`.
    pub sse: f64,
    /// Term count reached by the forward pass before pruning.
    pub forward_terms: usize,
}

/// Generalized cross-validation score for `terms` terms fit to `rows` rows.
/// Infinite when the effective parameter count reaches the row count.
pub fn gcv(sse: f64, terms: usize, rows: usize) -> f64 {
    let n = rows as f64;
    let r = terms as f64;
    let knots = (r - 1.0) / 2.0;
    let effective = r + GCV_PENALTY * knots;
    if effective >= n {
        return f64::INFINITY;
    }
    let shrink = 1.0 - effective / n;
    sse / (n * shrink * shrink)
}

pub fn fit_mars(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    options: &MarsOptions,
) -> Result<MarsFit, RegressionError> {
    let rows = x.nrows();
    if rows != y.len() {
        return Err(RegressionError::RowMismatch {
            rows,
            targets: y.len(),
        });
    }
    if rows == 0 {
        return Err(RegressionError::EmptyInput);
    }

    let knots = internal::candidate_knots(x);
    let mut terms = vec![Term::constant()];
    let mut design = Array2::<f64>::ones((rows, 1));
    let mut sse = internal::sse(design.view(), y)?;
    let floor = f64::EPSILON * y.dot(&y);

    while terms.len() + 2 <= options.max_terms && sse > floor {
        let candidates = internal::expansions(&terms, &knots, options.max_interactions);
        if candidates.is_empty() {
            break;
        }

        let scored: Vec<Option<f64>> = candidates
            .par_iter()
            .map(|candidate| {
                let extended = internal::extend_design(design.view(), x, candidate);
                internal::sse(extended.view(), y).ok()
            })
            .collect();

        let mut best: Option<(usize, f64)> = None;
        for (idx, score) in scored.iter().enumerate() {
            let Some(score) = *score else { continue };
            if !score.is_finite() {
                continue;
            }
            if best.is_none_or(|(_, current)| score < current) {
                best = Some((idx, score));
            }
        }

        let Some((idx, candidate_sse)) = best else { break };
        if candidate_sse >= sse - floor {
            break;
        }

        let candidate = &candidates[idx];
        design = internal::extend_design(design.view(), x, candidate);
        let parent = &terms[candidate.parent];
        let rising = parent.extended(BasisFunction::Hinge {
            column: candidate.column,
            knot: candidate.knot,
        });
        let falling = parent.extended(BasisFunction::ReflectedHinge {
            column: candidate.column,
            knot: candidate.knot,
        });
        log::debug!(
            "MARS forward: added [{}] and [{}], SSE {:.6e} -> {:.6e}",
            rising,
            falling,
            sse,
            candidate_sse
        );
        terms.push(rising);
        terms.push(falling);
        sse = candidate_sse;
    }

    let forward_terms = terms.len();
    let (kept, best_gcv) = internal::prune(design.view(), y)?;
    let final_design = design.select(Axis(1), &kept);
    let fit = least_squares(final_design.view(), y)?;
    let final_sse = internal::residual(final_design.view(), y, &fit.solution);
    let final_terms: Vec<Term> = kept.iter().map(|&idx| terms[idx].clone()).collect();

    log::debug!(
        "MARS kept {} of {} terms (GCV {:.6e})",
        final_terms.len(),
        forward_terms,
        best_gcv
    );

    Ok(MarsFit {
        model: Model::new(final_terms, fit.solution)?,
        gcv: best_gcv,
        sse: final_sse,
        forward_terms,
    })
}

mod internal {
    use super::*;

    /// One knot pair applied to one parent term.
    pub(super) struct Expansion {
        pub parent: usize,
        pub column: usize,
        pub knot: f64,
    }

    /// Distinct observed values per column, ascending.
    pub(super) fn candidate_knots(x: ArrayView2<f64>) -> Vec<Vec<f64>> {
        x.columns()
            .into_iter()
            .map(|column| {
                let mut values: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
                values.sort_by(f64::total_cmp);
                values.dedup();
                values
            })
            .collect()
    }

    pub(super) fn expansions(
        terms: &[Term],
        knots: &[Vec<f64>],
        max_interactions: usize,
    ) -> Vec<Expansion> {
        let mut out = Vec::new();
        for (parent, term) in terms.iter().enumerate() {
            if term.hinge_count() >= max_interactions {
                continue;
            }
            for (column, values) in knots.iter().enumerate() {
                if term.uses_column(column) {
                    continue;
                }
                out.extend(values.iter().map(|&knot| Expansion {
                    parent,
                    column,
                    knot,
                }));
            }
        }
        out
    }

    /// `design` with the rising and falling products of `candidate` appended.
    pub(super) fn extend_design(
        design: ArrayView2<f64>,
        x: ArrayView2<f64>,
        candidate: &Expansion,
    ) -> Array2<f64> {
        let (rows, cols) = design.dim();
        let mut extended = Array2::<f64>::zeros((rows, cols + 2));
        extended.slice_mut(s![.., ..cols]).assign(&design);
        let parent = design.column(candidate.parent);
        let values = x.column(candidate.column);
        let knot = candidate.knot;
        for row in 0..rows {
            extended[[row, cols]] = parent[row] * (values[row] - knot).max(0.0);
            extended[[row, cols + 1]] = parent[row] * (knot - values[row]).max(0.0);
        }
        extended
    }

    pub(super) fn residual(design: ArrayView2<f64>, y: ArrayView1<f64>, weights: &Array1<f64>) -> f64 {
        let diff = &y - &design.dot(weights);
        diff.dot(&diff)
    }

    pub(super) fn sse(design: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<f64, RegressionError> {
        let fit = least_squares(design, y)?;
        Ok(fit
            .residual_sum_of_squares
            .unwrap_or_else(|| residual(design, y, &fit.solution)))
    }

    /// Backward elimination over design columns. Returns the kept column
    /// indices (in original order) and their GCV.
    pub(super) fn prune(
        design: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Result<(Vec<usize>, f64), RegressionError> {
        let rows = design.nrows();
        let mut current: Vec<usize> = (0..design.ncols()).collect();
        let mut current_sse = sse(design, y)?;
        let mut best = current.clone();
        let mut best_gcv = gcv(current_sse, current.len(), rows);

        while current.len() > 1 {
            let removals: Vec<Option<f64>> = (0..current.len())
                .into_par_iter()
                .map(|drop| {
                    let subset: Vec<usize> = current
                        .iter()
                        .enumerate()
                        .filter(|&(pos, _)| pos != drop)
                        .map(|(_, &col)| col)
                        .collect();
                    sse(design.select(Axis(1), &subset).view(), y).ok()
                })
                .collect();

            let mut choice: Option<(usize, f64)> = None;
            for (pos, removal) in removals.iter().enumerate() {
                let Some(err) = *removal else { continue };
                if choice.is_none_or(|(_, current_err)| err < current_err) {
                    choice = Some((pos, err));
                }
            }
            let Some((pos, err)) = choice else { break };

            current.remove(pos);
            current_sse = err;
            let score = gcv(current_sse, current.len(), rows);
            log::debug!(
                "MARS backward: {} terms, SSE {:.6e}, GCV {:.6e}",
                current.len(),
                current_sse,
                score
            );
            if score <= best_gcv {
                best_gcv = score;
                best = current.clone();
            }
        }

        Ok((best, best_gcv))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn gcv_matches_closed_form() {
        // r = 3, K = 1, effective = 6, N = 12 => SSE / (12 * 0.25)
        assert_abs_diff_eq!(gcv(6.0, 3, 12), 2.0, epsilon = 1e-12);
        assert_eq!(gcv(1.0, 5, 11), f64::INFINITY);
        assert_abs_diff_eq!(gcv(4.0, 1, 4), 4.0 / (4.0 * 0.75 * 0.75), epsilon = 1e-12);
    }

    #[test]
    fn recovers_a_single_hinge() {
        let x = Array2::from_shape_fn((21, 1), |(i, _)| i as f64);
        let y = x.column(0).mapv(|v| (v - 5.0).max(0.0));
        let fit = fit_mars(x.view(), y.view(), &MarsOptions::default()).unwrap();

        assert_eq!(fit.forward_terms, 3);
        let predicted = fit.model.predict(x.view());
        for (p, t) in predicted.iter().zip(y.iter()) {
            assert_abs_diff_eq!(*p, *t, epsilon = 1e-8);
        }
        assert!(fit.model.terms().iter().any(|term| term.factors()
            == [BasisFunction::Hinge {
                column: 0,
                knot: 5.0
            }]));
    }

    #[test]
    fn constant_target_keeps_only_the_intercept() {
        let x = array![[1.0, 2.0], [3.0, 1.0], [2.0, 5.0], [4.0, 4.0]];
        let y = array![7.0, 7.0, 7.0, 7.0];
        let fit = fit_mars(x.view(), y.view(), &MarsOptions::default()).unwrap();
        assert_eq!(fit.forward_terms, 1);
        assert_eq!(fit.model.terms(), &[Term::constant()]);
        assert_abs_diff_eq!(fit.model.weights()[0], 7.0, epsilon = 1e-12);
    }

    #[test]
    fn respects_term_and_interaction_limits() {
        let mut rng = StdRng::seed_from_u64(21);
        let x = Array2::<f64>::from_shape_fn((30, 3), |_| rng.gen_range(0.0..4.0));
        let y = Array1::from_iter(x.rows().into_iter().map(|r| {
            (r[0] - 1.0_f64).max(0.0) * (2.0 - r[1]).max(0.0) + 0.5 * r[2] + rng.gen_range(-0.05..0.05)
        }));

        let limited = MarsOptions {
            max_terms: 5,
            max_interactions: 1,
        };
        let fit = fit_mars(x.view(), y.view(), &limited).unwrap();
        assert!(fit.forward_terms <= 5);
        assert!(fit.model.len() <= 5);
        for term in fit.model.terms() {
            assert!(term.hinge_count() <= 1);
        }

        let interacting = MarsOptions {
            max_terms: 11,
            ..MarsOptions::default()
        };
        let fit = fit_mars(x.view(), y.view(), &interacting).unwrap();
        for term in fit.model.terms() {
            assert!(term.hinge_count() <= 2);
            let mut columns: Vec<usize> = term.factors().iter().flat_map(|f| f.columns()).collect();
            let before = columns.len();
            columns.dedup();
            assert_eq!(columns.len(), before);
        }
        assert!(fit.gcv.is_finite());
    }

    #[test]
    fn rejects_mismatched_rows() {
        let x = array![[1.0], [2.0]];
        let y = array![1.0, 2.0, 3.0];
        assert!(matches!(
            fit_mars(x.view(), y.view(), &MarsOptions::default()),
            Err(RegressionError::RowMismatch { .. })
        ));
    }
}
