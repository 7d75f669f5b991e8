use crate::regress::basis::{BasisFunction, DecodeError};
use crate::shared::LinalgError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegressionError {
    #[error("Feature matrix has {rows} rows but the performance vector has {targets} entries.")]
    RowMismatch { rows: usize, targets: usize },
    #[error("Model has {terms} terms but {weights} weights.")]
    WeightMismatch { terms: usize, weights: usize },
    #[error("Cannot fit a model to an empty data set.")]
    EmptyInput,
    #[error("A term must contain at least one factor.")]
    EmptyTerm,
    #[error("Failed to decode term: {0}")]
    Decode(#[from] DecodeError),
    #[error("Least-squares fit failed: {0}")]
    Linalg(#[from] LinalgError),
}

/// A product of basis functions. Stepwise models use single-factor terms;
/// MARS terms multiply up to `max_interactions` hinges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Term {
    factors: Vec<BasisFunction>,
}

impl Term {
    pub fn new(factors: Vec<BasisFunction>) -> Result<Self, RegressionError> {
        if factors.is_empty() {
            return Err(RegressionError::EmptyTerm);
        }
        Ok(Self { factors })
    }

    pub fn constant() -> Self {
        Self {
            factors: vec![BasisFunction::Constant],
        }
    }

    pub fn single(function: BasisFunction) -> Self {
        Self {
            factors: vec![function],
        }
    }

    /// This term multiplied by one more factor. A bare constant is replaced.
    pub fn extended(&self, factor: BasisFunction) -> Self {
        if self.factors == [BasisFunction::Constant] {
            return Self::single(factor);
        }
        let mut factors = self.factors.clone();
        factors.push(factor);
        Self { factors }
    }

    pub fn factors(&self) -> &[BasisFunction] {
        &self.factors
    }

    pub fn hinge_count(&self) -> usize {
        self.factors.iter().filter(|f| f.is_hinge()).count()
    }

    pub fn uses_column(&self, column: usize) -> bool {
        self.factors.iter().any(|f| f.columns().contains(&column))
    }

    /// Largest column index read by any factor.
    pub fn max_column(&self) -> Option<usize> {
        self.factors.iter().flat_map(|f| f.columns()).max()
    }

    pub fn evaluate(&self, row: ArrayView1<f64>) -> f64 {
        self.factors.iter().map(|f| f.evaluate(row)).product()
    }

    pub fn encode(&self) -> String {
        self.factors
            .iter()
            .map(BasisFunction::encode)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl FromStr for Term {
    type Err = RegressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Term::new(BasisFunction::decode_sequence(s)?)
    }
}

impl TryFrom<String> for Term {
    type Error = RegressionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Term> for String {
    fn from(term: Term) -> Self {
        term.encode()
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.factors.iter().map(BasisFunction::readable).collect();
        f.write_str(&rendered.join(" * "))
    }
}

/// Weighted sum of terms. A model without terms predicts zero everywhere and
/// marks a cluster for which no model was accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    terms: Vec<Term>,
    weights: Array1<f64>,
}

impl Model {
    pub fn new(terms: Vec<Term>, weights: Array1<f64>) -> Result<Self, RegressionError> {
        if terms.len() != weights.len() {
            return Err(RegressionError::WeightMismatch {
                terms: terms.len(),
                weights: weights.len(),
            });
        }
        Ok(Self { terms, weights })
    }

    pub fn empty() -> Self {
        Self {
            terms: Vec::new(),
            weights: Array1::zeros(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    /// Largest input column read by any term, if any term reads one.
    pub fn max_column(&self) -> Option<usize> {
        self.terms.iter().filter_map(Term::max_column).max()
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        self.terms
            .iter()
            .zip(self.weights.iter())
            .map(|(term, weight)| weight * term.evaluate(row))
            .sum()
    }

    pub fn predict(&self, rows: ArrayView2<f64>) -> Array1<f64> {
        rows.rows()
            .into_iter()
            .map(|row| self.predict_row(row))
            .collect()
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return f.write_str("0");
        }
        for (idx, (term, weight)) in self.terms.iter().zip(self.weights.iter()).enumerate() {
            if idx > 0 {
                f.write_str(" + ")?;
            }
            write!(f, "{weight:.3e} * {term}")?;
        }
        Ok(())
    }
}

/// `rows × terms` matrix of every term evaluated on every row.
pub fn design_matrix(terms: &[Term], rows: ArrayView2<f64>) -> Array2<f64> {
    Array2::from_shape_fn((rows.nrows(), terms.len()), |(i, j)| {
        terms[j].evaluate(rows.row(i))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn sample_model() -> Model {
        Model::new(
            vec![
                Term::single(BasisFunction::Power {
                    column: 0,
                    exponent: 1.0,
                }),
                Term::constant(),
            ],
            array![3.0, 0.12],
        )
        .unwrap()
    }

    #[test]
    fn predicts_weighted_sum() {
        let model = sample_model();
        let rows = array![[1.0, 9.0], [2.0, -4.0]];
        let predicted = model.predict(rows.view());
        assert_abs_diff_eq!(predicted[0], 3.12, epsilon = 1e-12);
        assert_abs_diff_eq!(predicted[1], 6.12, epsilon = 1e-12);
    }

    #[test]
    fn empty_model_predicts_zero() {
        let model = Model::empty();
        assert!(model.is_empty());
        let rows = array![[1.0], [5.0]];
        assert_eq!(model.predict(rows.view()), array![0.0, 0.0]);
        assert_eq!(model.to_string(), "0");
    }

    #[test]
    fn display_uses_scientific_weights() {
        assert_eq!(sample_model().to_string(), "3.000e0 * x[0]^1 + 1.200e-1 * 1");
    }

    #[test]
    fn product_terms_encode_and_evaluate() {
        let term = Term::constant()
            .extended(BasisFunction::Hinge {
                column: 0,
                knot: 1.0,
            })
            .extended(BasisFunction::ReflectedHinge {
                column: 1,
                knot: 2.0,
            });
        assert_eq!(term.factors().len(), 2);
        assert_eq!(term.hinge_count(), 2);
        assert!(term.uses_column(1));
        assert!(!term.uses_column(2));
        assert_eq!(term.encode(), "3 0 1 5 1 2");
        assert_eq!(term.evaluate(array![3.0, 0.5].view()), 2.0 * 1.5);

        let decoded: Term = term.encode().parse().unwrap();
        assert_eq!(decoded, term);
    }

    #[test]
    fn serializes_terms_as_encoded_strings() {
        let term = Term::single(BasisFunction::Log2 { column: 4 });
        let json = serde_json::to_string(&term).unwrap();
        assert_eq!(json, "\"4 4\"");
        let back: Term = serde_json::from_str(&json).unwrap();
        assert_eq!(back, term);
        assert!(serde_json::from_str::<Term>("\"\"").is_err());
    }

    #[test]
    fn rejects_mismatched_weights() {
        let err = Model::new(vec![Term::constant()], array![1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            RegressionError::WeightMismatch {
                terms: 1,
                weights: 2
            }
        ));
    }

    #[test]
    fn design_matrix_layout() {
        let terms = vec![
            Term::constant(),
            Term::single(BasisFunction::Cross { left: 0, right: 1 }),
        ];
        let rows = array![[2.0, 3.0], [-1.0, 4.0], [0.0, 5.0]];
        let design = design_matrix(&terms, rows.view());
        assert_eq!(design, array![[1.0, 6.0], [1.0, -4.0], [1.0, 0.0]]);
    }
}
