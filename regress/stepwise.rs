//! # Forward stepwise selection
//!
//! Greedily grows a linear model one basis function at a time. Each round
//! fits every remaining candidate together with the functions accepted so
//! far, scores it by adjusted R² on the evaluation rows and accepts the best
//! candidate when it beats the current model by more than `threshold`.
//!
//! With more than one fold the rows are shuffled with a seeded generator and
//! dealt round-robin into folds; every fold runs its own search on an
//! independent copy of the candidate pool, trained on the other folds and
//! scored on its own rows. The fold with the highest held-out R² wins and its
//! functions are refit on all rows.
//!
//! Folds and candidates are evaluated in parallel. Results are collected in
//! index order before any comparison, so the first index wins every tie no
//! matter how work was scheduled.

use crate::regress::basis::BasisFunction;
use crate::regress::model::{Model, RegressionError, Term};
use crate::shared::least_squares;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepwiseOptions {
    /// Minimum adjusted-R² gain required to accept another function.
    pub threshold: f64,
    pub folds: usize,
    pub seed: u64,
}

impl Default for StepwiseOptions {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            folds: 1,
            seed: 0,
        }
    }
}

/// Outcome of a selection run. `model` is `None` when no candidate was ever
/// accepted in any fold.
#[derive(Debug, Clone)]
pub struct StepwiseSelection {
    pub model: Option<Model>,
    /// Held-out R² of the winning fold (in-sample R² with a single fold).
    pub r_squared: f64,
    pub adjusted_r_squared: f64,
    pub fold: Option<usize>,
    pub folds_evaluated: usize,
}

/// Rows used to fit and rows used to score one fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldSplit {
    pub train: Vec<usize>,
    pub holdout: Vec<usize>,
}

pub struct StepwiseSelector<'a> {
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, f64>,
}

impl<'a> StepwiseSelector<'a> {
    pub fn new(x: ArrayView2<'a, f64>, y: ArrayView1<'a, f64>) -> Result<Self, RegressionError> {
        if x.nrows() != y.len() {
            return Err(RegressionError::RowMismatch {
                rows: x.nrows(),
                targets: y.len(),
            });
        }
        Ok(Self { x, y })
    }

    pub fn select(&self, pool: &[BasisFunction], options: &StepwiseOptions) -> StepwiseSelection {
        let lookup = internal::lookup_table(pool, self.x);
        let splits = fold_splits(self.x.nrows(), options.folds, options.seed);
        let in_sample = options.folds <= 1;

        let searches: Vec<Option<internal::FoldSearch>> = splits
            .par_iter()
            .map(|split| {
                internal::search_fold(lookup.view(), self.y, split, options.threshold, in_sample)
            })
            .collect();

        let mut winner: Option<(usize, &internal::FoldSearch)> = None;
        for (fold, search) in searches.iter().enumerate() {
            let Some(search) = search else { continue };
            log::debug!(
                "Fold {}: {} functions, held-out R² {:.6}, adjusted {:.6}",
                fold,
                search.selected.len(),
                search.r_squared,
                search.adjusted
            );
            let better = match winner {
                None => true,
                Some((_, best)) => search.r_squared > best.r_squared,
            };
            if better {
                winner = Some((fold, search));
            }
        }

        let Some((fold, search)) = winner else {
            return StepwiseSelection {
                model: None,
                r_squared: 0.0,
                adjusted_r_squared: f64::NEG_INFINITY,
                fold: None,
                folds_evaluated: splits.len(),
            };
        };

        let weights = self.refit(lookup.view(), &search.selected).unwrap_or_else(|| {
            log::warn!(
                "Refitting the selected functions on all rows failed; keeping the weights of fold {}.",
                fold
            );
            search.weights.clone()
        });
        let terms: Vec<Term> = search
            .selected
            .iter()
            .map(|&idx| Term::single(pool[idx]))
            .collect();

        StepwiseSelection {
            model: Model::new(terms, weights).ok(),
            r_squared: search.r_squared,
            adjusted_r_squared: search.adjusted,
            fold: Some(fold),
            folds_evaluated: splits.len(),
        }
    }

    fn refit(&self, lookup: ArrayView2<f64>, selected: &[usize]) -> Option<Array1<f64>> {
        let design = lookup.select(Axis(1), selected);
        let fit = least_squares(design.view(), self.y).ok()?;
        fit.solution
            .iter()
            .all(|w| w.is_finite())
            .then_some(fit.solution)
    }
}

/// `1 − (1 − R²)(n − 1)/(n − k − 1)`, undefined when `n − k − 1 ≤ 0`.
pub fn adjusted_r_squared(r_squared: f64, n: usize, k: usize) -> Option<f64> {
    let dof = n as i64 - k as i64 - 1;
    if dof <= 0 {
        return None;
    }
    Some(1.0 - (1.0 - r_squared) * (n as f64 - 1.0) / dof as f64)
}

/// Splits `0..rows` into train/holdout pairs. One fold (or none) trains and
/// scores on every row. Otherwise rows are shuffled with `seed` and position
/// `p` of the shuffle lands in fold `p % folds`; folds left without training
/// or holdout rows are dropped.
pub fn fold_splits(rows: usize, folds: usize, seed: u64) -> Vec<FoldSplit> {
    let all: Vec<usize> = (0..rows).collect();
    if folds <= 1 {
        return vec![FoldSplit {
            train: all.clone(),
            holdout: all,
        }];
    }

    let mut shuffled = all;
    let mut rng = StdRng::seed_from_u64(seed);
    shuffled.shuffle(&mut rng);

    (0..folds)
        .filter_map(|fold| {
            let mut train = Vec::new();
            let mut holdout = Vec::new();
            for (position, &row) in shuffled.iter().enumerate() {
                if position % folds == fold {
                    holdout.push(row);
                } else {
                    train.push(row);
                }
            }
            if train.is_empty() || holdout.is_empty() {
                None
            } else {
                Some(FoldSplit { train, holdout })
            }
        })
        .collect()
}

mod internal {
    use super::*;

    pub(super) struct FoldSearch {
        pub selected: Vec<usize>,
        pub weights: Array1<f64>,
        pub r_squared: f64,
        pub adjusted: f64,
    }

    struct CandidateFit {
        weights: Array1<f64>,
        r_squared: f64,
        adjusted: f64,
    }

    /// `rows × |pool|` table of every function evaluated on every row.
    pub(super) fn lookup_table(pool: &[BasisFunction], x: ArrayView2<f64>) -> Array2<f64> {
        let mut table = Array2::<f64>::zeros((x.nrows(), pool.len()));
        Zip::from(table.rows_mut())
            .and(x.rows())
            .par_for_each(|mut out, row| {
                for (slot, function) in out.iter_mut().zip(pool) {
                    *slot = function.evaluate(row);
                }
            });
        table
    }

    pub(super) fn search_fold(
        lookup: ArrayView2<f64>,
        y: ArrayView1<f64>,
        split: &FoldSplit,
        threshold: f64,
        in_sample: bool,
    ) -> Option<FoldSearch> {
        let train_lookup = lookup.select(Axis(0), &split.train);
        let holdout_lookup = lookup.select(Axis(0), &split.holdout);
        let train_y = y.select(Axis(0), &split.train);
        let holdout_y = y.select(Axis(0), &split.holdout);

        let mut remaining: Vec<usize> = (0..lookup.ncols()).collect();
        let mut selected: Vec<usize> = Vec::new();
        let mut best: Option<CandidateFit> = None;
        let mut best_adjusted = f64::NEG_INFINITY;

        while !remaining.is_empty() {
            let fits: Vec<Option<CandidateFit>> = remaining
                .par_iter()
                .map(|&candidate| {
                    let mut columns = selected.clone();
                    columns.push(candidate);
                    evaluate_candidate(
                        train_lookup.view(),
                        train_y.view(),
                        holdout_lookup.view(),
                        holdout_y.view(),
                        &columns,
                        in_sample,
                    )
                })
                .collect();

            let mut round_best: Option<(usize, CandidateFit)> = None;
            for (position, fit) in fits.into_iter().enumerate() {
                let Some(fit) = fit else { continue };
                let better = match &round_best {
                    None => true,
                    Some((_, current)) => fit.adjusted > current.adjusted,
                };
                if better {
                    round_best = Some((position, fit));
                }
            }

            let Some((position, fit)) = round_best else {
                break;
            };
            if fit.adjusted - best_adjusted <= threshold {
                break;
            }

            let accepted = remaining.remove(position);
            log::debug!(
                "Accepted pool function {} (adjusted R² {:.6}, gain {:.3e})",
                accepted,
                fit.adjusted,
                fit.adjusted - best_adjusted
            );
            selected.push(accepted);
            best_adjusted = fit.adjusted;
            best = Some(fit);
        }

        best.map(|fit| FoldSearch {
            selected,
            weights: fit.weights,
            r_squared: fit.r_squared,
            adjusted: fit.adjusted,
        })
    }

    fn evaluate_candidate(
        train_lookup: ArrayView2<f64>,
        train_y: ArrayView1<f64>,
        holdout_lookup: ArrayView2<f64>,
        holdout_y: ArrayView1<f64>,
        columns: &[usize],
        in_sample: bool,
    ) -> Option<CandidateFit> {
        let n = holdout_y.len();
        adjusted_r_squared(0.0, n, columns.len())?;

        let design = train_lookup.select(Axis(1), columns);
        let fit = least_squares(design.view(), train_y).ok()?;
        let weights = fit.solution;

        let solver_residual = if in_sample {
            fit.residual_sum_of_squares
        } else {
            None
        };
        let ss_res = match solver_residual {
            Some(value) => value,
            None => {
                let predicted = holdout_lookup.select(Axis(1), columns).dot(&weights);
                let residual = &holdout_y - &predicted;
                residual.dot(&residual)
            }
        };
        let mean = holdout_y.mean()?;
        let ss_tot: f64 = holdout_y.iter().map(|v| (v - mean) * (v - mean)).sum();
        if ss_tot == 0.0 {
            return None;
        }

        let r_squared = 1.0 - ss_res / ss_tot;
        let adjusted = adjusted_r_squared(r_squared, n, columns.len())?;
        if !r_squared.is_finite() || !adjusted.is_finite() {
            return None;
        }
        Some(CandidateFit {
            weights,
            r_squared,
            adjusted,
        })
    }
}
