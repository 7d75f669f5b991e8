// End-to-end training and prediction over metric tables.
pub mod artifact;
pub mod config;
pub mod data;
pub mod experiment;
pub mod train;

pub use artifact::{ArtifactError, ClusterModel, RoutedPrediction, TrainedArtifact, is_json_path};
pub use config::{ConfigError, RegressionKind, TrainingConfig};
pub use data::{DataError, MetricTable, MetricType};
pub use experiment::{
    ExperimentError, ExperimentReport, PredictionStatistics, prediction_statistics, run_experiment,
    write_predictions,
};
pub use train::{ClusterSummary, ReductionSummary, TrainingError, TrainingOutcome, train};
