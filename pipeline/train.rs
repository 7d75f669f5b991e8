//! # Training
//!
//! Turns a metric table into a [`TrainedArtifact`]:
//!
//! 1. Pick the predictor metrics by type tag and the performance column by name.
//! 2. Reduce the predictor profile with PCA (and VARIMAX), keeping either the
//!    non-degenerate components or the prefix the configuration asks for.
//! 3. Standardize the reduced rows and cluster them with k-means.
//! 4. Fit one model per cluster on that cluster's reduced rows.

use crate::cluster::{ClusterError, EmptyClusterEvent, KMeans};
use crate::pipeline::artifact::{ArtifactError, ClusterModel, TrainedArtifact};
use crate::pipeline::config::{ConfigError, RegressionKind, TrainingConfig};
use crate::pipeline::data::{DataError, MetricTable};
use crate::reduce::PrincipalComponents;
use crate::regress::{Model, RegressionError, StepwiseSelector, build_pool, fit_mars};
use crate::shared::ColumnScaler;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Data error: {0}")]
    Data(#[from] DataError),
    #[error("Clustering failed: {0}")]
    Cluster(#[from] ClusterError),
    #[error("Regression failed: {0}")]
    Regression(#[from] RegressionError),
    #[error("Could not assemble the trained model: {0}")]
    Artifact(#[from] ArtifactError),
    #[error(
        "The table has no deterministic or nondeterministic metrics besides the performance metric '{0}'."
    )]
    NoPredictors(String),
    #[error("Cannot train on a table without trials.")]
    NoTrials,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReductionSummary {
    pub metrics: usize,
    pub components: usize,
    /// Fraction of total variance explained by the kept components.
    pub captured_variance: f64,
    /// True when PCA failed and the identity basis was used instead.
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    pub cluster: usize,
    pub trials: usize,
    pub terms: usize,
    /// Stepwise only: R² of the selected model.
    pub r_squared: Option<f64>,
    /// MARS only: GCV of the pruned model.
    pub gcv: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub artifact: TrainedArtifact,
    pub reduction: ReductionSummary,
    pub clusters: Vec<ClusterSummary>,
    pub cluster_iterations: usize,
    pub cluster_converged: bool,
    pub empty_cluster_events: Vec<EmptyClusterEvent>,
}

pub fn train(
    table: &MetricTable,
    performance_metric: &str,
    config: &TrainingConfig,
) -> Result<TrainingOutcome, TrainingError> {
    config.validate()?;

    // --- 1. Select predictors and outcome ---
    let performance = table.column(performance_metric)?;
    let predictors = table.predictor_indices(performance_metric);
    if predictors.is_empty() {
        return Err(TrainingError::NoPredictors(performance_metric.to_string()));
    }
    if table.n_trials() == 0 {
        return Err(TrainingError::NoTrials);
    }
    let metric_names = table.names_of(&predictors);
    let profile = table.select_columns(&predictors);
    log::info!(
        "Training on {} trials with {} predictor metrics; performance metric '{}'",
        table.n_trials(),
        metric_names.len(),
        performance_metric
    );

    // --- 2. Dimensionality reduction ---
    let (basis, reduction) = internal::reduce(profile.view(), config);
    if reduction.components == 0 {
        log::warn!("No metric varies across trials; every cluster model is limited to a constant.");
    }
    let reduced = profile.dot(&basis);
    log::info!(
        "Reduced {} metrics to {} components capturing {:.2}% of the variance",
        reduction.metrics,
        reduction.components,
        100.0 * reduction.captured_variance
    );

    // --- 3. Clustering in standardized reduced space ---
    let scaler = ColumnScaler::fit(reduced.view());
    let standardized = scaler.transform(reduced.view());
    let clustering = KMeans::new(config.clusters)
        .with_max_iterations(config.max_cluster_iterations)
        .fit(standardized.view())?;
    log::info!(
        "k-means with k = {} finished after {} iterations; cluster sizes {:?}",
        config.clusters,
        clustering.iterations,
        clustering.sizes()
    );

    // --- 4. Per-cluster regression ---
    let mut cluster_models = Vec::with_capacity(clustering.k());
    let mut summaries = Vec::with_capacity(clustering.k());
    for (cluster, members) in clustering.members().into_iter().enumerate() {
        let x = reduced.select(Axis(0), &members);
        let y = performance.select(Axis(0), &members);
        let (model, summary) = internal::fit_cluster(cluster, x.view(), y.view(), config)?;
        summaries.push(summary);
        cluster_models.push(ClusterModel {
            center: clustering.centers.row(cluster).to_owned(),
            model,
        });
    }

    let artifact = TrainedArtifact::new(metric_names, scaler, basis, cluster_models)?;
    Ok(TrainingOutcome {
        artifact,
        reduction,
        clusters: summaries,
        cluster_iterations: clustering.iterations,
        cluster_converged: clustering.converged,
        empty_cluster_events: clustering.empty_cluster_events,
    })
}

mod internal {
    use super::*;

    pub(super) fn reduce(
        profile: ArrayView2<f64>,
        config: &TrainingConfig,
    ) -> (Array2<f64>, ReductionSummary) {
        let pca = PrincipalComponents::fit(profile, &config.reduction_options());
        let ratios = pca.explained_variance_ratio();
        let (basis, captured_variance) =
            if config.target_variance.is_some() || config.target_components.is_some() {
                let reduction = pca.reduced(config.target_variance, config.target_components);
                (reduction.components, reduction.captured_variance)
            } else {
                let basis = pca.nonzero_components();
                let captured = ratios.iter().take(basis.ncols()).sum();
                (basis, captured)
            };
        let summary = ReductionSummary {
            metrics: profile.ncols(),
            components: basis.ncols(),
            captured_variance,
            degraded: pca.is_degraded(),
        };
        (basis, summary)
    }

    pub(super) fn fit_cluster<'a>(
        cluster: usize,
        x: ArrayView2<'a, f64>,
        y: ArrayView1<'a, f64>,
        config: &TrainingConfig,
    ) -> Result<(Model, ClusterSummary), TrainingError> {
        let mut summary = ClusterSummary {
            cluster,
            trials: x.nrows(),
            terms: 0,
            r_squared: None,
            gcv: None,
        };
        if x.nrows() == 0 {
            log::warn!("Cluster {} has no trials; storing an empty model.", cluster);
            return Ok((Model::empty(), summary));
        }

        let model = match config.regression {
            RegressionKind::Stepwise => {
                let pool = build_pool(&config.basis_kinds, x.ncols());
                let selection =
                    StepwiseSelector::new(x, y)?.select(&pool, &config.stepwise_options());
                summary.r_squared = Some(selection.r_squared);
                match selection.model {
                    Some(model) => model,
                    None => {
                        log::warn!(
                            "No candidate function improved the fit for cluster {}; storing an empty model.",
                            cluster
                        );
                        Model::empty()
                    }
                }
            }
            RegressionKind::Mars => {
                let fit = fit_mars(x, y, &config.mars_options())?;
                summary.gcv = Some(fit.gcv);
                fit.model
            }
        };
        summary.terms = model.len();

        match (summary.r_squared, summary.gcv) {
            (Some(r2), _) => log::info!(
                "Finished modeling cluster {} ({} trials): r squared = {:.6}",
                cluster,
                summary.trials,
                r2
            ),
            (_, Some(gcv)) => log::info!(
                "Finished modeling cluster {} ({} trials): GCV = {:.6e}",
                cluster,
                summary.trials,
                gcv
            ),
            _ => {}
        }
        log::info!("Model {}: {}", cluster, model);
        Ok((model, summary))
    }
}
