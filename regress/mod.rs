// Regression model selection over a pool of basis functions.
pub mod basis;
pub mod mars;
pub mod model;
pub mod stepwise;

pub use basis::{BasisFunction, BasisKind, DecodeError, build_pool};
pub use mars::{MarsFit, MarsOptions, fit_mars};
pub use model::{Model, RegressionError, Term, design_matrix};
pub use stepwise::{StepwiseOptions, StepwiseSelection, StepwiseSelector, adjusted_r_squared};
