// Numeric plumbing shared by every modeling stage.
pub mod faer_ndarray;
pub mod scaling;

pub use faer_ndarray::{FaerSvd, LeastSquaresFit, LinalgError, ThinSvd, least_squares};
pub use scaling::ColumnScaler;
