use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Per-column centering and scaling learned from a training matrix.
///
/// Deviations are sample standard deviations (ddof = 1). A column whose
/// deviation is exactly zero keeps a divisor of 1.0 so constant columns pass
/// through centered but otherwise unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnScaler {
    pub means: Array1<f64>,
    pub std_devs: Array1<f64>,
}

impl ColumnScaler {
    /// Learns means and deviations from the columns of `data`.
    pub fn fit(data: ArrayView2<f64>) -> Self {
        let (rows, cols) = data.dim();
        if rows == 0 {
            return Self::identity(cols);
        }
        let means = data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(cols));
        let std_devs = if rows < 2 {
            Array1::ones(cols)
        } else {
            data.std_axis(Axis(0), 1.0)
                .mapv(|sd| if sd == 0.0 || !sd.is_finite() { 1.0 } else { sd })
        };
        Self { means, std_devs }
    }

    /// Centers only; every divisor is 1.0.
    pub fn fit_centering(data: ArrayView2<f64>) -> Self {
        let cols = data.ncols();
        let means = data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(cols));
        Self {
            means,
            std_devs: Array1::ones(cols),
        }
    }

    pub fn identity(cols: usize) -> Self {
        Self {
            means: Array1::zeros(cols),
            std_devs: Array1::ones(cols),
        }
    }

    pub fn dim(&self) -> usize {
        self.means.len()
    }

    pub fn transform(&self, data: ArrayView2<f64>) -> Array2<f64> {
        let mut out = data.to_owned();
        for mut row in out.rows_mut() {
            row -= &self.means;
            row /= &self.std_devs;
        }
        out
    }

    pub fn transform_row(&self, row: ArrayView1<f64>) -> Array1<f64> {
        (&row - &self.means) / &self.std_devs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn standardizes_with_sample_deviation() {
        let data = array![[1.0, 5.0], [2.0, 5.0], [3.0, 5.0]];
        let scaler = ColumnScaler::fit(data.view());
        assert_abs_diff_eq!(scaler.means[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(scaler.std_devs[0], 1.0, epsilon = 1e-12);
        // Constant column keeps a unit divisor.
        assert_eq!(scaler.std_devs[1], 1.0);

        let z = scaler.transform(data.view());
        assert_abs_diff_eq!(z[[0, 0]], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(z[[2, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(z[[1, 1]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn row_and_matrix_transforms_agree() {
        let data = array![[1.0, -2.0], [4.0, 0.5], [0.0, 3.0], [2.0, 2.0]];
        let scaler = ColumnScaler::fit(data.view());
        let all = scaler.transform(data.view());
        for (i, row) in data.rows().into_iter().enumerate() {
            let single = scaler.transform_row(row);
            assert_abs_diff_eq!(single[0], all[[i, 0]], epsilon = 1e-12);
            assert_abs_diff_eq!(single[1], all[[i, 1]], epsilon = 1e-12);
        }
    }

    #[test]
    fn empty_input_yields_identity() {
        let data = Array2::<f64>::zeros((0, 3));
        let scaler = ColumnScaler::fit(data.view());
        assert_eq!(scaler, ColumnScaler::identity(3));
    }
}
