//! # Metric tables
//!
//! A metric table is a delimited text file with one trial per row and one
//! metric per column. Header cells are `name` or `name:type`, where the type
//! tag says what role the metric plays:
//!
//! - `deterministic` and `nondeterministic` metrics describe the application
//!   and are the predictors of a model. Untagged columns are deterministic.
//! - `machine` metrics describe the platform.
//! - `result` metrics are measured outcomes, such as the performance column.
//!
//! Files whose header line contains a tab are read tab-separated, everything
//! else comma-separated. Every cell must hold a finite number.

use ndarray::{Array2, ArrayView1, Axis};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse delimited table: {0}")]
    Csv(#[from] csv::Error),
    #[error("Unknown metric type '{tag}' for column '{column}'.")]
    UnknownMetricType { column: String, tag: String },
    #[error("Value '{value}' in row {row}, column '{column}' is not a number.")]
    NonNumeric {
        row: usize,
        column: String,
        value: String,
    },
    #[error("Value in row {row}, column '{column}' is not finite.")]
    NonFinite { row: usize, column: String },
    #[error("Row {row} has {found} fields but the header declares {expected}.")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Metric '{0}' was not found in the table.")]
    MetricNotFound(String),
    #[error("Metric '{0}' appears more than once in the header.")]
    DuplicateMetric(String),
    #[error("The table has no header row.")]
    MissingHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    Deterministic,
    Nondeterministic,
    Machine,
    Result,
}

impl MetricType {
    /// Roles that feed the reduction and the regression.
    pub const PREDICTORS: [MetricType; 2] = [MetricType::Deterministic, MetricType::Nondeterministic];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Deterministic => "deterministic",
            MetricType::Nondeterministic => "nondeterministic",
            MetricType::Machine => "machine",
            MetricType::Result => "result",
        }
    }
}

impl FromStr for MetricType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deterministic" => Ok(MetricType::Deterministic),
            "nondeterministic" => Ok(MetricType::Nondeterministic),
            "machine" => Ok(MetricType::Machine),
            "result" => Ok(MetricType::Result),
            _ => Err(()),
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct MetricTable {
    names: Vec<String>,
    types: Vec<MetricType>,
    /// `trials × metrics`
    values: Array2<f64>,
}

impl MetricTable {
    pub fn new(
        names: Vec<String>,
        types: Vec<MetricType>,
        values: Array2<f64>,
    ) -> Result<Self, DataError> {
        if names.len() != values.ncols() || types.len() != values.ncols() {
            return Err(DataError::RaggedRow {
                row: 0,
                expected: values.ncols(),
                found: names.len().min(types.len()),
            });
        }
        for (idx, name) in names.iter().enumerate() {
            if names[..idx].contains(name) {
                return Err(DataError::DuplicateMetric(name.clone()));
            }
        }
        for ((row, column), value) in values.indexed_iter() {
            if !value.is_finite() {
                return Err(DataError::NonFinite {
                    row: row + 1,
                    column: names[column].clone(),
                });
            }
        }
        Ok(Self {
            names,
            types,
            values,
        })
    }

    /// Reads a table from disk, choosing the delimiter from the header line.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let mut file = File::open(path.as_ref())?;
        let mut header = String::new();
        BufReader::new(&mut file).read_line(&mut header)?;
        let delimiter = if header.contains('\t') { b'\t' } else { b',' };
        file.seek(SeekFrom::Start(0))?;
        let table = Self::from_reader(file, delimiter)?;
        log::info!(
            "Loaded {} trials x {} metrics from {}",
            table.n_trials(),
            table.n_metrics(),
            path.as_ref().display()
        );
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self, DataError> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        if headers.is_empty() {
            return Err(DataError::MissingHeader);
        }
        let mut names = Vec::with_capacity(headers.len());
        let mut types = Vec::with_capacity(headers.len());
        for cell in headers.iter() {
            let (name, metric_type) = internal::parse_header_cell(cell)?;
            names.push(name);
            types.push(metric_type);
        }

        let width = names.len();
        let mut flat = Vec::new();
        let mut rows = 0;
        for (idx, record) in rdr.records().enumerate() {
            let record = record?;
            let row = idx + 1;
            if record.len() != width {
                return Err(DataError::RaggedRow {
                    row,
                    expected: width,
                    found: record.len(),
                });
            }
            for (column, cell) in record.iter().enumerate() {
                let value: f64 = cell.parse().map_err(|_| DataError::NonNumeric {
                    row,
                    column: names[column].clone(),
                    value: cell.to_string(),
                })?;
                flat.push(value);
            }
            rows += 1;
        }

        let values = Array2::from_shape_vec((rows, width), flat).map_err(|_| {
            DataError::RaggedRow {
                row: rows,
                expected: width,
                found: 0,
            }
        })?;
        Self::new(names, types, values)
    }

    pub fn n_trials(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_metrics(&self) -> usize {
        self.values.ncols()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn types(&self) -> &[MetricType] {
        &self.types
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn index_of(&self, name: &str) -> Result<usize, DataError> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| DataError::MetricNotFound(name.to_string()))
    }

    pub fn column(&self, name: &str) -> Result<ArrayView1<'_, f64>, DataError> {
        let idx = self.index_of(name)?;
        Ok(self.values.column(idx))
    }

    /// Column indices whose type is one of `kinds`, in table order.
    pub fn indices_by_type(&self, kinds: &[MetricType]) -> Vec<usize> {
        self.types
            .iter()
            .enumerate()
            .filter(|(_, t)| kinds.contains(t))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Predictor columns (deterministic and nondeterministic), excluding the
    /// performance metric if it happens to carry a predictor tag.
    pub fn predictor_indices(&self, performance_metric: &str) -> Vec<usize> {
        self.indices_by_type(&MetricType::PREDICTORS)
            .into_iter()
            .filter(|&idx| self.names[idx] != performance_metric)
            .collect()
    }

    pub fn select_columns(&self, indices: &[usize]) -> Array2<f64> {
        self.values.select(Axis(1), indices)
    }

    pub fn names_of(&self, indices: &[usize]) -> Vec<String> {
        indices.iter().map(|&idx| self.names[idx].clone()).collect()
    }
}

mod internal {
    use super::*;

    pub(super) fn parse_header_cell(cell: &str) -> Result<(String, MetricType), DataError> {
        match cell.rsplit_once(':') {
            Some((name, tag)) => {
                let metric_type = tag.parse().map_err(|_| DataError::UnknownMetricType {
                    column: name.trim().to_string(),
                    tag: tag.trim().to_string(),
                })?;
                Ok((name.trim().to_string(), metric_type))
            }
            None => Ok((cell.trim().to_string(), MetricType::Deterministic)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_table(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_tab_separated_table_with_types() {
        let file = write_table(
            "flops:deterministic\tmisses:nondeterministic\tcores:machine\ttime:result\n\
             1.0\t2.0\t8\t0.5\n\
             3.0\t4.0\t8\t1.5\n",
        );
        let table = MetricTable::load(file.path()).unwrap();
        assert_eq!(table.n_trials(), 2);
        assert_eq!(table.names(), &["flops", "misses", "cores", "time"]);
        assert_eq!(
            table.types(),
            &[
                MetricType::Deterministic,
                MetricType::Nondeterministic,
                MetricType::Machine,
                MetricType::Result
            ]
        );
        assert_eq!(table.predictor_indices("time"), vec![0, 1]);
        assert_eq!(table.column("time").unwrap().to_vec(), vec![0.5, 1.5]);
    }

    #[test]
    fn untagged_comma_columns_default_to_deterministic() {
        let file = write_table("a,b\n1,2\n3,4\n5,6\n");
        let table = MetricTable::load(file.path()).unwrap();
        assert_eq!(table.types(), &[MetricType::Deterministic; 2]);
        assert_eq!(table.select_columns(&[1]).column(0).to_vec(), vec![2.0, 4.0, 6.0]);
        // A tagged predictor used as the target is not its own predictor.
        assert_eq!(table.predictor_indices("b"), vec![0]);
    }

    #[test]
    fn reports_bad_cells_with_position() {
        let file = write_table("a,b\n1,2\n3,oops\n");
        match MetricTable::load(file.path()) {
            Err(DataError::NonNumeric { row, column, value }) => {
                assert_eq!(row, 2);
                assert_eq!(column, "b");
                assert_eq!(value, "oops");
            }
            other => panic!("Expected NonNumeric, got {:?}", other),
        }

        let file = write_table("a,b\n1,inf\n");
        assert!(matches!(
            MetricTable::load(file.path()),
            Err(DataError::NonFinite { row: 1, .. })
        ));
    }

    #[test]
    fn rejects_ragged_rows_and_unknown_tags() {
        let file = write_table("a,b\n1,2\n3\n");
        assert!(matches!(
            MetricTable::load(file.path()),
            Err(DataError::RaggedRow {
                row: 2,
                expected: 2,
                found: 1
            })
        ));

        let file = write_table("a:weird,b\n1,2\n");
        match MetricTable::load(file.path()) {
            Err(DataError::UnknownMetricType { column, tag }) => {
                assert_eq!(column, "a");
                assert_eq!(tag, "weird");
            }
            other => panic!("Expected UnknownMetricType, got {:?}", other),
        }
    }

    #[test]
    fn missing_metric_is_named() {
        let file = write_table("a,b\n1,2\n");
        let table = MetricTable::load(file.path()).unwrap();
        match table.column("c") {
            Err(DataError::MetricNotFound(name)) => assert_eq!(name, "c"),
            other => panic!("Expected MetricNotFound, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_metric_names_are_rejected() {
        let file = write_table("a,a\n1,2\n");
        assert!(matches!(
            MetricTable::load(file.path()),
            Err(DataError::DuplicateMetric(name)) if name == "a"
        ));
    }
}
