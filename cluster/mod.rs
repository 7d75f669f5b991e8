// Grouping of reduced trial profiles.
pub mod kmeans;

pub use kmeans::{ClusterError, Clustering, EmptyClusterEvent, KMeans, closest_cluster};
