// Dimensionality reduction of metric profiles.
pub mod pca;
pub mod varimax;

pub use pca::{PrincipalComponents, Reduction, ReductionOptions};
pub use varimax::{VarimaxOptions, VarimaxRotation, varimax};
