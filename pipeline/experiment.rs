//! # Experiments
//!
//! Applies a trained artifact to a metric table that also carries the measured
//! performance metric, and summarizes how far the predictions are off.

use crate::pipeline::artifact::{ArtifactError, TrainedArtifact};
use crate::pipeline::data::{DataError, MetricTable};
use ndarray::{Array1, ArrayView1};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error(
        "The table's predictor metrics do not match the model. Expected {expected:?}, found {found:?}."
    )]
    MetricMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("Data error: {0}")]
    Data(#[from] DataError),
    #[error("Prediction failed: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("Failed to write predictions: {0}")]
    Csv(#[from] csv::Error),
    #[error("The experiment table has no trials.")]
    NoTrials,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionStatistics {
    pub trials: usize,
    pub mse: f64,
    pub rmse: f64,
    /// Mean absolute percentage error, in percent, over trials whose actual
    /// value is non-zero; `None` when there are no such trials.
    pub mape: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ExperimentReport {
    pub predictions: Array1<f64>,
    pub actual: Array1<f64>,
    pub clusters: Vec<usize>,
    pub statistics: PredictionStatistics,
}

pub fn run_experiment(
    artifact: &TrainedArtifact,
    table: &MetricTable,
    performance_metric: &str,
) -> Result<ExperimentReport, ExperimentError> {
    let actual = table.column(performance_metric)?.to_owned();
    let predictors = table.predictor_indices(performance_metric);
    let found = table.names_of(&predictors);
    if found != artifact.metric_names() {
        return Err(ExperimentError::MetricMismatch {
            expected: artifact.metric_names().to_vec(),
            found,
        });
    }
    if table.n_trials() == 0 {
        return Err(ExperimentError::NoTrials);
    }

    let profile = table.select_columns(&predictors);
    let routed = artifact.predict_routed(profile.view())?;
    let statistics = prediction_statistics(actual.view(), routed.values.view());
    log::info!(
        "Predicted {} trials: MSE {:.6e}, RMSE {:.6e}",
        statistics.trials,
        statistics.mse,
        statistics.rmse
    );
    if let Some(mape) = statistics.mape {
        log::info!("Mean absolute percentage error: {:.3}%", mape);
    }

    Ok(ExperimentReport {
        predictions: routed.values,
        actual,
        clusters: routed.clusters,
        statistics,
    })
}

pub fn prediction_statistics(
    actual: ArrayView1<f64>,
    predicted: ArrayView1<f64>,
) -> PredictionStatistics {
    let trials = actual.len().min(predicted.len());
    let mut squared = 0.0;
    let mut relative = 0.0;
    let mut nonzero = 0usize;
    for (&a, &p) in actual.iter().zip(predicted.iter()) {
        squared += (p - a).powi(2);
        if a != 0.0 {
            relative += ((p - a) / a).abs();
            nonzero += 1;
        }
    }
    let mse = if trials > 0 {
        squared / trials as f64
    } else {
        0.0
    };
    PredictionStatistics {
        trials,
        mse,
        rmse: mse.sqrt(),
        mape: (nonzero > 0).then(|| 100.0 * relative / nonzero as f64),
    }
}

/// Writes one tab-separated line per trial: index, cluster, actual, predicted.
pub fn write_predictions(
    path: impl AsRef<Path>,
    report: &ExperimentReport,
) -> Result<(), ExperimentError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path.as_ref())?;
    writer.write_record(["trial", "cluster", "actual", "predicted"])?;
    for (trial, ((actual, predicted), cluster)) in report
        .actual
        .iter()
        .zip(report.predictions.iter())
        .zip(report.clusters.iter())
        .enumerate()
    {
        writer.write_record([
            trial.to_string(),
            cluster.to_string(),
            actual.to_string(),
            predicted.to_string(),
        ])?;
    }
    writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::artifact::ClusterModel;
    use crate::pipeline::data::MetricType;
    use crate::regress::{BasisFunction, Model, Term};
    use crate::shared::ColumnScaler;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};
    use tempfile::tempdir;

    /// One metric, identity rotation, one cluster predicting `2 * x`.
    fn doubling_artifact(name: &str) -> TrainedArtifact {
        let model = Model::new(
            vec![Term::single(BasisFunction::Power {
                column: 0,
                exponent: 1.0,
            })],
            array![2.0],
        )
        .unwrap();
        TrainedArtifact::new(
            vec![name.to_string()],
            ColumnScaler::identity(1),
            Array2::eye(1),
            vec![ClusterModel {
                center: array![0.0],
                model,
            }],
        )
        .unwrap()
    }

    fn table(names: &[&str], types: &[MetricType], values: Array2<f64>) -> MetricTable {
        MetricTable::new(
            names.iter().map(|n| n.to_string()).collect(),
            types.to_vec(),
            values,
        )
        .unwrap()
    }

    #[test]
    fn statistics_match_hand_computation() {
        let stats = prediction_statistics(
            array![1.0, 2.0, 0.0].view(),
            array![1.5, 2.0, 1.0].view(),
        );
        assert_eq!(stats.trials, 3);
        assert_abs_diff_eq!(stats.mse, (0.25 + 0.0 + 1.0) / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.rmse, stats.mse.sqrt(), epsilon = 1e-12);
        // The zero actual value is left out of the percentage error.
        assert_abs_diff_eq!(stats.mape.unwrap(), 25.0, epsilon = 1e-10);

        let zeros = prediction_statistics(array![0.0].view(), array![1.0].view());
        assert!(zeros.mape.is_none());
    }

    #[test]
    fn experiment_reports_predictions_and_errors() {
        let artifact = doubling_artifact("x");
        let data = table(
            &["x", "time"],
            &[MetricType::Deterministic, MetricType::Result],
            array![[1.0, 2.0], [3.0, 7.0]],
        );
        let report = run_experiment(&artifact, &data, "time").unwrap();
        assert_eq!(report.predictions.to_vec(), vec![2.0, 6.0]);
        assert_eq!(report.clusters, vec![0, 0]);
        assert_abs_diff_eq!(report.statistics.mse, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(report.statistics.mape.unwrap(), 100.0 / 14.0, epsilon = 1e-10);
    }

    #[test]
    fn machine_metrics_are_ignored_but_predictor_names_must_match() {
        let artifact = doubling_artifact("x");
        let with_machine = table(
            &["cores", "x", "time"],
            &[MetricType::Machine, MetricType::Deterministic, MetricType::Result],
            array![[8.0, 1.0, 2.0]],
        );
        assert!(run_experiment(&artifact, &with_machine, "time").is_ok());

        let renamed = table(
            &["y", "time"],
            &[MetricType::Deterministic, MetricType::Result],
            array![[1.0, 2.0]],
        );
        match run_experiment(&artifact, &renamed, "time") {
            Err(ExperimentError::MetricMismatch { expected, found }) => {
                assert_eq!(expected, vec!["x"]);
                assert_eq!(found, vec!["y"]);
            }
            other => panic!("Expected MetricMismatch, got {:?}", other),
        }
    }

    #[test]
    fn predictions_file_has_one_line_per_trial() {
        let artifact = doubling_artifact("x");
        let data = table(
            &["x", "time"],
            &[MetricType::Deterministic, MetricType::Result],
            array![[1.0, 2.0], [3.0, 7.0]],
        );
        let report = run_experiment(&artifact, &data, "time").unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("predictions.tsv");
        write_predictions(&path, &report).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["trial\tcluster\tactual\tpredicted", "0\t0\t2\t2", "1\t0\t7\t6"]);
    }
}
