use crate::reduce::{ReductionOptions, VarimaxOptions};
use crate::regress::mars::{DEFAULT_MAX_INTERACTIONS, DEFAULT_MAX_TERMS};
use crate::regress::{BasisKind, MarsOptions, StepwiseOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegressionKind {
    #[default]
    Stepwise,
    Mars,
}

/// Every knob of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Divide metric columns by their standard deviation before PCA.
    pub scale: bool,
    /// Apply VARIMAX to the principal components.
    pub rotate: bool,
    /// Keep components until this fraction of variance is explained.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_variance: Option<f64>,
    /// Keep at most this many components.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_components: Option<usize>,
    pub clusters: usize,
    pub max_cluster_iterations: usize,
    pub regression: RegressionKind,
    /// Adjusted-R² gain required to accept another stepwise function.
    pub threshold: f64,
    pub folds: usize,
    pub seed: u64,
    pub basis_kinds: Vec<BasisKind>,
    pub mars_max_terms: usize,
    pub mars_max_interactions: usize,
    pub varimax_max_iterations: usize,
    pub varimax_epsilon: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let varimax = VarimaxOptions::default();
        Self {
            scale: true,
            rotate: true,
            target_variance: None,
            target_components: None,
            clusters: 1,
            max_cluster_iterations: crate::cluster::kmeans::DEFAULT_MAX_ITERATIONS,
            regression: RegressionKind::Stepwise,
            threshold: 0.0,
            folds: 1,
            seed: 0,
            basis_kinds: BasisKind::default_set(),
            mars_max_terms: DEFAULT_MAX_TERMS,
            mars_max_interactions: DEFAULT_MAX_INTERACTIONS,
            varimax_max_iterations: varimax.max_iterations,
            varimax_epsilon: varimax.epsilon,
        }
    }
}

impl TrainingConfig {
    /// Reads a TOML file. Keys that are absent keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: TrainingConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.clusters == 0 {
            return invalid("clusters must be at least 1".to_string());
        }
        if let Some(variance) = self.target_variance {
            if !(variance > 0.0 && variance <= 1.0) {
                return invalid(format!(
                    "target_variance must lie in (0, 1], got {variance}"
                ));
            }
        }
        if self.target_components == Some(0) {
            return invalid("target_components must be at least 1".to_string());
        }
        if !self.threshold.is_finite() {
            return invalid(format!("threshold must be finite, got {}", self.threshold));
        }
        if self.mars_max_terms == 0 {
            return invalid("mars_max_terms must be at least 1".to_string());
        }
        if self.mars_max_interactions == 0 {
            return invalid("mars_max_interactions must be at least 1".to_string());
        }
        if self.regression == RegressionKind::Stepwise && self.basis_kinds.is_empty() {
            return invalid("basis_kinds must name at least one kind for stepwise regression".to_string());
        }
        if !(self.varimax_epsilon.is_finite() && self.varimax_epsilon > 0.0) {
            return invalid(format!(
                "varimax_epsilon must be a positive number, got {}",
                self.varimax_epsilon
            ));
        }
        Ok(())
    }

    pub fn reduction_options(&self) -> ReductionOptions {
        ReductionOptions {
            scale: self.scale,
            rotate: self.rotate,
            varimax: VarimaxOptions {
                max_iterations: self.varimax_max_iterations,
                epsilon: self.varimax_epsilon,
            },
        }
    }

    pub fn stepwise_options(&self) -> StepwiseOptions {
        StepwiseOptions {
            threshold: self.threshold,
            folds: self.folds,
            seed: self.seed,
        }
    }

    pub fn mars_options(&self) -> MarsOptions {
        MarsOptions {
            max_terms: self.mars_max_terms,
            max_interactions: self.mars_max_interactions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_valid() {
        let config = TrainingConfig::default();
        config.validate().unwrap();
        assert_eq!(config.clusters, 1);
        assert_eq!(config.max_cluster_iterations, 50);
        assert_eq!(config.mars_max_terms, 40);
        assert_eq!(config.varimax_max_iterations, 100);
        assert_eq!(config.regression, RegressionKind::Stepwise);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "clusters = 3\nregression = \"mars\"\nbasis_kinds = [\"power\", \"sqrt\"]\ntarget_variance = 0.95"
        )
        .unwrap();

        let config = TrainingConfig::load(file.path()).unwrap();
        assert_eq!(config.clusters, 3);
        assert_eq!(config.regression, RegressionKind::Mars);
        assert_eq!(config.basis_kinds, vec![BasisKind::Power, BasisKind::Sqrt]);
        assert_eq!(config.target_variance, Some(0.95));
        assert!(config.scale);
        assert_eq!(config.folds, 1);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let file = NamedTempFile::new().unwrap();
        let config = TrainingConfig {
            clusters: 4,
            threshold: 0.01,
            folds: 5,
            seed: 99,
            target_components: Some(2),
            ..TrainingConfig::default()
        };
        config.save(file.path()).unwrap();
        assert_eq!(TrainingConfig::load(file.path()).unwrap(), config);
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            TrainingConfig {
                clusters: 0,
                ..TrainingConfig::default()
            },
            TrainingConfig {
                target_variance: Some(1.5),
                ..TrainingConfig::default()
            },
            TrainingConfig {
                threshold: f64::NAN,
                ..TrainingConfig::default()
            },
            TrainingConfig {
                basis_kinds: Vec::new(),
                ..TrainingConfig::default()
            },
            TrainingConfig {
                mars_max_interactions: 0,
                ..TrainingConfig::default()
            },
        ];
        for config in cases {
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn unknown_regression_kind_fails_to_parse() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "regression = \"lasso\"").unwrap();
        assert!(matches!(
            TrainingConfig::load(file.path()),
            Err(ConfigError::TomlParse(_))
        ));
    }
}
