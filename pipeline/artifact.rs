//! # Trained artifacts
//!
//! A [`TrainedArtifact`] holds everything prediction needs: the metric names
//! in training order, the `M × P` reduction basis, the per-component mean and
//! deviation used to standardize reduced rows before cluster assignment, and
//! one center plus [`Model`] per cluster.
//!
//! Two encodings are supported and convert into each other losslessly.
//!
//! ## Text
//!
//! ```text
//! 2
//! flops
//! misses
//! [1](0.5)
//! [1](1.25)
//! [2,1]((0.7071067811865476),(0.7071067811865476))
//! Model 0
//! [1](-0.8)
//! [2](2.5,0.1)
//! 1 0 1
//! 0
//! ```
//!
//! ## JSON
//!
//! `{"metric_names", "means", "std_devs", "rotation_matrix", "clusters":
//! [{"center", "regressors": [{"weight", "function"}]}]}` where `function` is
//! the term encoding used on the text lines above.

use crate::cluster::{ClusterError, closest_cluster};
use crate::regress::{Model, RegressionError, Term};
use crate::shared::ColumnScaler;
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to read or write model file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse JSON model file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed model file at line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("Inconsistent model: {0}")]
    Shape(String),
    #[error("Rows have {found} metrics but the model was trained on {expected}.")]
    RowWidth { expected: usize, found: usize },
    #[error("Cluster assignment failed: {0}")]
    Cluster(#[from] ClusterError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterModel {
    /// Center in standardized reduced space.
    pub center: Array1<f64>,
    pub model: Model,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainedArtifact {
    metric_names: Vec<String>,
    scaler: ColumnScaler,
    rotation: Array2<f64>,
    clusters: Vec<ClusterModel>,
}

/// Predictions together with the cluster each row was routed to.
#[derive(Debug, Clone)]
pub struct RoutedPrediction {
    pub values: Array1<f64>,
    pub clusters: Vec<usize>,
}

impl TrainedArtifact {
    /// Assembles an artifact, checking that every part agrees on `M` and `P`.
    pub fn new(
        metric_names: Vec<String>,
        scaler: ColumnScaler,
        rotation: Array2<f64>,
        clusters: Vec<ClusterModel>,
    ) -> Result<Self, ArtifactError> {
        let (metrics, components) = rotation.dim();
        if metric_names.len() != metrics {
            return Err(ArtifactError::Shape(format!(
                "{} metric names but the rotation matrix has {} rows",
                metric_names.len(),
                metrics
            )));
        }
        if scaler.means.len() != components || scaler.std_devs.len() != components {
            return Err(ArtifactError::Shape(format!(
                "standardization has {} means and {} deviations for {} components",
                scaler.means.len(),
                scaler.std_devs.len(),
                components
            )));
        }
        if scaler.std_devs.iter().any(|sd| !sd.is_finite() || *sd == 0.0) {
            return Err(ArtifactError::Shape(
                "standard deviations must be finite and non-zero".to_string(),
            ));
        }
        if clusters.is_empty() {
            return Err(ArtifactError::Shape("artifact has no clusters".to_string()));
        }
        for (idx, cluster) in clusters.iter().enumerate() {
            if cluster.center.len() != components {
                return Err(ArtifactError::Shape(format!(
                    "cluster {} center has {} entries, expected {}",
                    idx,
                    cluster.center.len(),
                    components
                )));
            }
            if let Some(column) = cluster.model.max_column() {
                if column >= components {
                    return Err(ArtifactError::Shape(format!(
                        "cluster {idx} model reads component {column} but only {components} exist"
                    )));
                }
            }
        }
        Ok(Self {
            metric_names,
            scaler,
            rotation,
            clusters,
        })
    }

    pub fn metric_names(&self) -> &[String] {
        &self.metric_names
    }

    pub fn scaler(&self) -> &ColumnScaler {
        &self.scaler
    }

    /// `M × P` reduction basis.
    pub fn rotation(&self) -> &Array2<f64> {
        &self.rotation
    }

    pub fn clusters(&self) -> &[ClusterModel] {
        &self.clusters
    }

    pub fn n_components(&self) -> usize {
        self.rotation.ncols()
    }

    fn centers(&self) -> Array2<f64> {
        let p = self.n_components();
        Array2::from_shape_fn((self.clusters.len(), p), |(c, j)| self.clusters[c].center[j])
    }

    /// Projects `rows` (`N × M`, metrics in training order), routes each to
    /// its nearest center and evaluates that cluster's model. Predictions are
    /// magnitudes, so the model output is reported as an absolute value.
    pub fn predict_routed(&self, rows: ArrayView2<f64>) -> Result<RoutedPrediction, ArtifactError> {
        if rows.ncols() != self.metric_names.len() {
            return Err(ArtifactError::RowWidth {
                expected: self.metric_names.len(),
                found: rows.ncols(),
            });
        }
        let projected = rows.dot(&self.rotation);
        let standardized = self.scaler.transform(projected.view());
        let clusters = closest_cluster(self.centers().view(), standardized.view())?;
        let values = projected
            .rows()
            .into_iter()
            .zip(clusters.iter())
            .map(|(row, &cluster)| self.clusters[cluster].model.predict_row(row).abs())
            .collect();
        Ok(RoutedPrediction { values, clusters })
    }

    pub fn predict(&self, rows: ArrayView2<f64>) -> Result<Array1<f64>, ArtifactError> {
        Ok(self.predict_routed(rows)?.values)
    }

    // --- Text codec ---

    pub fn to_text(&self) -> String {
        self.to_string()
    }

    pub fn from_text(text: &str) -> Result<Self, ArtifactError> {
        let mut lines = internal::LineCursor::new(text);

        let (line, count_text) = lines.next_line()?;
        let metric_count: usize = count_text.parse().map_err(|_| ArtifactError::Parse {
            line,
            reason: format!("expected the metric count, found '{count_text}'"),
        })?;
        let mut metric_names = Vec::with_capacity(metric_count);
        for _ in 0..metric_count {
            let (_, name) = lines.next_line()?;
            metric_names.push(name.to_string());
        }

        let (line, text) = lines.next_line()?;
        let means = internal::parse_vector(line, text)?;
        let (line, text) = lines.next_line()?;
        let std_devs = internal::parse_vector(line, text)?;
        let (line, text) = lines.next_line()?;
        let rotation = internal::parse_matrix(line, text)?;

        let mut clusters = Vec::new();
        while let Some((line, header)) = lines.next_nonblank() {
            let expected = format!("Model {}", clusters.len());
            if header != expected {
                return Err(ArtifactError::Parse {
                    line,
                    reason: format!("expected '{expected}', found '{header}'"),
                });
            }
            let (line, text) = lines.next_line()?;
            let center = internal::parse_vector(line, text)?;
            let (line, text) = lines.next_line()?;
            let weights = internal::parse_vector(line, text)?;
            let mut terms = Vec::with_capacity(weights.len());
            for _ in 0..weights.len() {
                let (line, text) = lines.next_line()?;
                let term: Term = text.parse().map_err(|e: RegressionError| ArtifactError::Parse {
                    line,
                    reason: e.to_string(),
                })?;
                terms.push(term);
            }
            let model = Model::new(terms, weights)
                .map_err(|e| ArtifactError::Shape(e.to_string()))?;
            clusters.push(ClusterModel { center, model });
        }

        Self::new(
            metric_names,
            ColumnScaler { means, std_devs },
            rotation,
            clusters,
        )
    }

    // --- JSON codec ---

    pub fn to_json(&self) -> Result<String, ArtifactError> {
        let document = internal::JsonArtifact {
            metric_names: self.metric_names.clone(),
            means: self.scaler.means.to_vec(),
            std_devs: self.scaler.std_devs.to_vec(),
            rotation_matrix: self.rotation.rows().into_iter().map(|r| r.to_vec()).collect(),
            clusters: self
                .clusters
                .iter()
                .map(|cluster| internal::JsonCluster {
                    center: cluster.center.to_vec(),
                    regressors: cluster
                        .model
                        .terms()
                        .iter()
                        .zip(cluster.model.weights().iter())
                        .map(|(term, &weight)| internal::JsonRegressor {
                            weight,
                            function: term.clone(),
                        })
                        .collect(),
                })
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ArtifactError> {
        let document: internal::JsonArtifact = serde_json::from_str(text)?;
        let rotation = internal::rectangular(document.rotation_matrix)?;
        let mut clusters = Vec::with_capacity(document.clusters.len());
        for cluster in document.clusters {
            let (terms, weights): (Vec<Term>, Vec<f64>) = cluster
                .regressors
                .into_iter()
                .map(|r| (r.function, r.weight))
                .unzip();
            let model = Model::new(terms, Array1::from(weights))
                .map_err(|e| ArtifactError::Shape(e.to_string()))?;
            clusters.push(ClusterModel {
                center: Array1::from(cluster.center),
                model,
            });
        }
        Self::new(
            document.metric_names,
            ColumnScaler {
                means: Array1::from(document.means),
                std_devs: Array1::from(document.std_devs),
            },
            rotation,
            clusters,
        )
    }

    // --- Files ---

    pub fn save_text(&self, path: impl AsRef<Path>) -> Result<(), ArtifactError> {
        fs::write(path, self.to_text())?;
        Ok(())
    }

    pub fn load_text(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        Self::from_text(&fs::read_to_string(path)?)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), ArtifactError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// JSON for paths ending in `.json`, text otherwise.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        if is_json_path(path.as_ref()) {
            Self::load_json(path)
        } else {
            Self::load_text(path)
        }
    }

    /// JSON for paths ending in `.json`, text otherwise.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ArtifactError> {
        if is_json_path(path.as_ref()) {
            self.save_json(path)
        } else {
            self.save_text(path)
        }
    }
}

/// Writes the text encoding.
impl fmt::Display for TrainedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.metric_names.len())?;
        for name in &self.metric_names {
            writeln!(f, "{name}")?;
        }
        writeln!(f, "{}", internal::format_vector(self.scaler.means.iter()))?;
        writeln!(f, "{}", internal::format_vector(self.scaler.std_devs.iter()))?;
        let rows = self
            .rotation
            .rows()
            .into_iter()
            .map(|row| format!("({})", internal::join(row.iter())))
            .join(",");
        writeln!(
            f,
            "[{},{}]({})",
            self.rotation.nrows(),
            self.rotation.ncols(),
            rows
        )?;
        for (idx, cluster) in self.clusters.iter().enumerate() {
            writeln!(f, "Model {idx}")?;
            writeln!(f, "{}", internal::format_vector(cluster.center.iter()))?;
            writeln!(f, "{}", internal::format_vector(cluster.model.weights().iter()))?;
            for term in cluster.model.terms() {
                writeln!(f, "{}", term.encode())?;
            }
        }
        Ok(())
    }
}

pub fn is_json_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

mod internal {
    use super::*;

    #[derive(Serialize, Deserialize)]
    pub(super) struct JsonArtifact {
        pub metric_names: Vec<String>,
        pub means: Vec<f64>,
        pub std_devs: Vec<f64>,
        pub rotation_matrix: Vec<Vec<f64>>,
        pub clusters: Vec<JsonCluster>,
    }

    #[derive(Serialize, Deserialize)]
    pub(super) struct JsonCluster {
        pub center: Vec<f64>,
        pub regressors: Vec<JsonRegressor>,
    }

    #[derive(Serialize, Deserialize)]
    pub(super) struct JsonRegressor {
        pub weight: f64,
        pub function: Term,
    }

    pub(super) fn rectangular(rows: Vec<Vec<f64>>) -> Result<Array2<f64>, ArtifactError> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().position(|r| r.len() != width) {
            return Err(ArtifactError::Shape(format!(
                "rotation matrix row {} has {} entries, expected {}",
                bad,
                rows[bad].len(),
                width
            )));
        }
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((height, width), flat)
            .map_err(|e| ArtifactError::Shape(e.to_string()))
    }

    pub(super) fn join<'a>(mut values: impl Iterator<Item = &'a f64>) -> String {
        values.join(",")
    }

    pub(super) fn format_vector<'a>(values: impl ExactSizeIterator<Item = &'a f64>) -> String {
        let len = values.len();
        format!("[{}]({})", len, join(values))
    }

    /// Line iterator that remembers 1-based line numbers.
    pub(super) struct LineCursor<'a> {
        lines: std::iter::Enumerate<std::str::Lines<'a>>,
    }

    impl<'a> LineCursor<'a> {
        pub fn new(text: &'a str) -> Self {
            Self {
                lines: text.lines().enumerate(),
            }
        }

        pub fn next_line(&mut self) -> Result<(usize, &'a str), ArtifactError> {
            match self.lines.next() {
                Some((idx, line)) => Ok((idx + 1, line.trim())),
                None => Err(ArtifactError::Parse {
                    line: 0,
                    reason: "unexpected end of file".to_string(),
                }),
            }
        }

        pub fn next_nonblank(&mut self) -> Option<(usize, &'a str)> {
            self.lines
                .by_ref()
                .map(|(idx, line)| (idx + 1, line.trim()))
                .find(|(_, line)| !line.is_empty())
        }
    }

    fn parse_error(line: usize, reason: impl Into<String>) -> ArtifactError {
        ArtifactError::Parse {
            line,
            reason: reason.into(),
        }
    }

    /// Splits `[header](body)` into its two parts.
    fn split_bracketed(line: usize, text: &str) -> Result<(&str, &str), ArtifactError> {
        let rest = text
            .strip_prefix('[')
            .ok_or_else(|| parse_error(line, format!("expected '[', found '{text}'")))?;
        let (header, body) = rest
            .split_once(']')
            .ok_or_else(|| parse_error(line, "missing ']'"))?;
        let body = body
            .trim()
            .strip_prefix('(')
            .and_then(|b| b.strip_suffix(')'))
            .ok_or_else(|| parse_error(line, "values must be enclosed in parentheses"))?;
        Ok((header.trim(), body))
    }

    fn parse_count(line: usize, text: &str) -> Result<usize, ArtifactError> {
        text.trim()
            .parse()
            .map_err(|_| parse_error(line, format!("'{text}' is not a count")))
    }

    fn parse_numbers(line: usize, body: &str) -> Result<Vec<f64>, ArtifactError> {
        body.split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| match token.parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(value),
                _ => Err(parse_error(line, format!("'{token}' is not a finite number"))),
            })
            .collect()
    }

    pub(super) fn parse_vector(line: usize, text: &str) -> Result<Array1<f64>, ArtifactError> {
        let (header, body) = split_bracketed(line, text)?;
        let count = parse_count(line, header)?;
        let values = parse_numbers(line, body)?;
        if values.len() != count {
            return Err(parse_error(
                line,
                format!("declared {count} values but found {}", values.len()),
            ));
        }
        Ok(Array1::from(values))
    }

    pub(super) fn parse_matrix(line: usize, text: &str) -> Result<Array2<f64>, ArtifactError> {
        let (header, body) = split_bracketed(line, text)?;
        let (rows_text, cols_text) = header
            .split_once(',')
            .ok_or_else(|| parse_error(line, "matrix header must be [rows,cols]"))?;
        let rows = parse_count(line, rows_text)?;
        let cols = parse_count(line, cols_text)?;

        let mut values = Vec::with_capacity(rows * cols);
        let mut found_rows = 0;
        let mut rest = body.trim();
        while !rest.is_empty() {
            let inner = rest
                .strip_prefix('(')
                .ok_or_else(|| parse_error(line, "matrix rows must be enclosed in parentheses"))?;
            let (row_body, tail) = inner
                .split_once(')')
                .ok_or_else(|| parse_error(line, "unterminated matrix row"))?;
            let row = parse_numbers(line, row_body)?;
            if row.len() != cols {
                return Err(parse_error(
                    line,
                    format!("matrix row {found_rows} has {} values, expected {cols}", row.len()),
                ));
            }
            values.extend(row);
            found_rows += 1;
            rest = tail.trim_start().trim_start_matches(',').trim_start();
        }
        if found_rows != rows {
            return Err(parse_error(
                line,
                format!("declared {rows} matrix rows but found {found_rows}"),
            ));
        }
        Array2::from_shape_vec((rows, cols), values).map_err(|e| parse_error(line, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regress::BasisFunction;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use tempfile::tempdir;

    fn sample() -> TrainedArtifact {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        TrainedArtifact::new(
            vec!["flops".to_string(), "misses".to_string()],
            ColumnScaler {
                means: array![0.5],
                std_devs: array![1.25],
            },
            array![[s], [s]],
            vec![
                ClusterModel {
                    center: array![-0.8],
                    model: Model::new(
                        vec![
                            Term::single(BasisFunction::Power {
                                column: 0,
                                exponent: 1.0,
                            }),
                            Term::constant(),
                        ],
                        array![2.5, 0.1],
                    )
                    .unwrap(),
                },
                ClusterModel {
                    center: array![0.9],
                    model: Model::empty(),
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn text_layout_matches_documented_format() {
        let text = sample().to_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "2");
        assert_eq!(lines[1], "flops");
        assert_eq!(lines[3], "[1](0.5)");
        assert_eq!(lines[4], "[1](1.25)");
        assert!(lines[5].starts_with("[2,1]((0.7071"));
        assert_eq!(lines[6], "Model 0");
        assert_eq!(lines[7], "[1](-0.8)");
        assert_eq!(lines[8], "[2](2.5,0.1)");
        assert_eq!(lines[9], "1 0 1");
        assert_eq!(lines[10], "0");
        assert_eq!(lines[11], "Model 1");
        assert_eq!(lines[13], "[0]()");
        assert_eq!(lines.len(), 14);
    }

    #[test]
    fn text_and_json_decode_to_the_same_artifact() {
        let artifact = sample();
        assert_eq!(TrainedArtifact::from_text(&artifact.to_text()).unwrap(), artifact);
        assert_eq!(
            TrainedArtifact::from_json(&artifact.to_json().unwrap()).unwrap(),
            artifact
        );
    }

    #[test]
    fn json_uses_documented_keys() {
        let value: serde_json::Value =
            serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        for key in ["metric_names", "means", "std_devs", "rotation_matrix", "clusters"] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
        let regressor = &value["clusters"][0]["regressors"][0];
        assert_eq!(regressor["function"], "1 0 1");
        assert_eq!(regressor["weight"], 2.5);
        assert_eq!(value["clusters"][1]["regressors"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn routes_rows_to_nearest_center() {
        let artifact = sample();
        let s = std::f64::consts::FRAC_1_SQRT_2;
        // Projection of (1, 1) is sqrt(2); standardized (sqrt(2) - 0.5) / 1.25 ~ 0.73.
        // Projection of (-1, 0) is -s; standardized ~ -0.97. Powers read |x|.
        let rows = array![[1.0, 1.0], [-1.0, 0.0]];
        let routed = artifact.predict_routed(rows.view()).unwrap();
        assert_eq!(routed.clusters, vec![1, 0]);
        assert_eq!(routed.values[0], 0.0);
        assert_abs_diff_eq!(routed.values[1], 2.5 * s + 0.1, epsilon = 1e-12);
    }

    #[test]
    fn rejects_rows_of_the_wrong_width() {
        let rows = array![[1.0, 2.0, 3.0]];
        assert!(matches!(
            sample().predict(rows.view()),
            Err(ArtifactError::RowWidth {
                expected: 2,
                found: 3
            })
        ));
    }

    #[test]
    fn malformed_text_reports_the_line() {
        let text = sample().to_text().replace("[1](1.25)", "[2](1.25)");
        match TrainedArtifact::from_text(&text) {
            Err(ArtifactError::Parse { line, .. }) => assert_eq!(line, 5),
            other => panic!("Expected Parse error, got {:?}", other),
        }

        let text = sample().to_text().replace("1 0 1", "7 0");
        match TrainedArtifact::from_text(&text) {
            Err(ArtifactError::Parse { line, reason }) => {
                assert_eq!(line, 10);
                assert!(reason.contains('7'));
            }
            other => panic!("Expected Parse error, got {:?}", other),
        }

        let truncated: String = sample().to_text().lines().take(8).collect::<Vec<_>>().join("\n");
        assert!(matches!(
            TrainedArtifact::from_text(&truncated),
            Err(ArtifactError::Parse { .. })
        ));
    }

    #[test]
    fn shape_violations_are_reported() {
        let mut value: serde_json::Value =
            serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        value["clusters"][0]["center"] = serde_json::json!([]);
        assert!(matches!(
            TrainedArtifact::from_json(&value.to_string()),
            Err(ArtifactError::Shape(_))
        ));

        let ragged = r#"{"metric_names":["a","b"],"means":[0.0],"std_devs":[1.0],
            "rotation_matrix":[[1.0],[1.0,2.0]],"clusters":[]}"#;
        assert!(matches!(
            TrainedArtifact::from_json(ragged),
            Err(ArtifactError::Shape(_))
        ));
    }

    #[test]
    fn file_helpers_dispatch_on_extension() {
        let dir = tempdir().unwrap();
        let artifact = sample();
        let text_path = dir.path().join("model.eiger");
        let json_path = dir.path().join("model.json");
        artifact.save(&text_path).unwrap();
        artifact.save(&json_path).unwrap();

        assert!(fs::read_to_string(&json_path).unwrap().trim_start().starts_with('{'));
        assert!(fs::read_to_string(&text_path).unwrap().starts_with("2\n"));
        assert_eq!(TrainedArtifact::load(&text_path).unwrap(), artifact);
        assert_eq!(TrainedArtifact::load(&json_path).unwrap(), artifact);
    }
}
