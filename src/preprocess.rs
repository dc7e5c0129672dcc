use std::collections::BTreeMap;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::csv_reader::Table;
use crate::error::{PipelineError, Result};

/// Fitted `(x - mean) / scale` transform for one column.
///
/// A column without spread gets `scale = 1.0`, so it is centred to zeros
/// instead of producing NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnScaler {
    pub mean: f64,
    pub scale: f64,
}

impl ColumnScaler {
    pub fn fit(values: ArrayView1<'_, f64>) -> Self {
        let n = values.len();
        if n == 0 {
            return Self { mean: 0.0, scale: 1.0 };
        }
        let mean = values.sum() / n as f64;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        let std = var.sqrt();
        let scale = if std.is_finite() && std > f64::EPSILON { std } else { 1.0 };
        Self { mean, scale }
    }

    pub fn transform(&self, value: f64) -> f64 {
        (value - self.mean) / self.scale
    }
}

/// Scaling fitted during preprocessing, keyed by feature name. Bundled with
/// the model artifact so inference inputs get the identical transform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalingParams {
    scalers: BTreeMap<String, ColumnScaler>,
}

impl ScalingParams {
    pub fn get(&self, column: &str) -> Option<&ColumnScaler> {
        self.scalers.get(column)
    }

    pub fn len(&self) -> usize {
        self.scalers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scalers.is_empty()
    }

    fn insert(&mut self, column: String, scaler: ColumnScaler) {
        self.scalers.insert(column, scaler);
    }

    /// Applies the stored scalers in place to a raw row laid out as
    /// `feature_names`.
    pub fn apply_row(&self, feature_names: &[String], row: &mut [f64]) -> Result<()> {
        if row.len() != feature_names.len() {
            return Err(PipelineError::ShapeMismatch {
                expected: feature_names.len(),
                actual: row.len(),
            });
        }
        for (value, name) in row.iter_mut().zip(feature_names) {
            if let Some(scaler) = self.scalers.get(name) {
                *value = scaler.transform(*value);
            }
        }
        Ok(())
    }
}

/// Standardizes every column of a matrix; fitted on training rows only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    columns: Vec<ColumnScaler>,
}

impl StandardScaler {
    pub fn fit(x: ArrayView2<'_, f64>) -> Self {
        Self {
            columns: x.axis_iter(Axis(1)).map(ColumnScaler::fit).collect(),
        }
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.columns.len() {
            return Err(PipelineError::ShapeMismatch {
                expected: self.columns.len(),
                actual: x.ncols(),
            });
        }
        let mut out = x.to_owned();
        for (mut col, scaler) in out.axis_iter_mut(Axis(1)).zip(&self.columns) {
            col.mapv_inplace(|v| scaler.transform(v));
        }
        Ok(out)
    }
}

/// Feature matrix and aligned binary labels.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub x: Array2<f64>,
    pub y: Array1<usize>,
    pub feature_names: Vec<String>,
}

/// Column-level transforms applied to the loaded table before splitting.
#[derive(Debug, Clone)]
pub struct FeaturePreprocessor {
    columns: Vec<String>,
    values: Array2<f64>,
    scaling: ScalingParams,
}

impl FeaturePreprocessor {
    pub fn new(table: Table) -> Self {
        let (columns, values) = table.into_parts();
        Self {
            columns,
            values,
            scaling: ScalingParams::default(),
        }
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| PipelineError::ColumnNotFound(name.to_string()))
    }

    pub fn drop_column(&mut self, name: &str) -> Result<()> {
        let idx = self.index_of(name)?;
        let keep: Vec<usize> = (0..self.columns.len()).filter(|&i| i != idx).collect();
        self.values = self.values.select(Axis(1), &keep);
        self.columns.remove(idx);
        info!(column = name, "dropped column");
        Ok(())
    }

    /// Standardizes a column with its own mean and population std, and
    /// records the fitted scaler.
    pub fn standardize(&mut self, name: &str) -> Result<ColumnScaler> {
        let idx = self.index_of(name)?;
        let scaler = ColumnScaler::fit(self.values.column(idx));
        self.values
            .column_mut(idx)
            .mapv_inplace(|v| scaler.transform(v));
        self.scaling.insert(name.to_string(), scaler);
        debug!(column = name, mean = scaler.mean, scale = scaler.scale, "standardized column");
        Ok(scaler)
    }

    pub fn scaling(&self) -> &ScalingParams {
        &self.scaling
    }

    /// Splits off the label column. Fails if any value is missing or a label
    /// is not 0/1.
    pub fn split_features_label(&self, label: &str) -> Result<FeatureSet> {
        let label_idx = self.index_of(label)?;

        let missing: Vec<&str> = self
            .columns
            .iter()
            .zip(self.values.axis_iter(Axis(1)))
            .filter(|(_, col)| col.iter().any(|v| v.is_nan()))
            .map(|(name, _)| name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::InvalidData(format!(
                "missing values in columns {:?}",
                missing
            )));
        }

        let y = self
            .values
            .column(label_idx)
            .iter()
            .enumerate()
            .map(|(row, &v)| match v {
                v if v == 0.0 => Ok(0),
                v if v == 1.0 => Ok(1),
                other => Err(PipelineError::InvalidData(format!(
                    "row {} has non-binary label {}",
                    row, other
                ))),
            })
            .collect::<Result<Array1<usize>>>()?;

        let keep: Vec<usize> = (0..self.columns.len()).filter(|&i| i != label_idx).collect();
        let x = self.values.select(Axis(1), &keep);
        let feature_names = keep.iter().map(|&i| self.columns[i].clone()).collect();

        Ok(FeatureSet { x, y, feature_names })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn sample_table() -> Table {
        Table::new(
            vec!["Time".into(), "V1".into(), "Amount".into(), "Class".into()],
            array![
                [0.0, 1.0, 10.0, 0.0],
                [1.0, 2.0, 20.0, 0.0],
                [2.0, 3.0, 30.0, 1.0],
                [3.0, 4.0, 40.0, 0.0]
            ],
        )
        .unwrap()
    }

    #[test]
    fn drop_column_removes_name_and_values() {
        let mut pre = FeaturePreprocessor::new(sample_table());
        pre.drop_column("Time").unwrap();
        assert_eq!(pre.column_names(), &["V1", "Amount", "Class"]);

        let features = pre.split_features_label("Class").unwrap();
        assert_eq!(features.x.ncols(), 2);
        assert_eq!(features.x[[0, 0]], 1.0);
    }

    #[test]
    fn drop_unknown_column_fails() {
        let mut pre = FeaturePreprocessor::new(sample_table());
        let err = pre.drop_column("Merchant").unwrap_err();
        assert!(matches!(err, PipelineError::ColumnNotFound(_)));
    }

    #[test]
    fn standardize_centres_and_scales() {
        let mut pre = FeaturePreprocessor::new(sample_table());
        pre.standardize("Amount").unwrap();
        let features = pre.split_features_label("Class").unwrap();
        let amount = features.x.column(2);

        assert_abs_diff_eq!(amount.mean().unwrap(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(amount.std(0.0), 1.0, epsilon = 1e-12);
        assert!(pre.scaling().get("Amount").is_some());
    }

    #[test]
    fn standardize_constant_column_yields_zeros_not_nan() {
        let table = Table::new(vec!["Amount".into(), "Class".into()], array![[5.0, 0.0], [5.0, 1.0], [5.0, 0.0]]).unwrap();
        let mut pre = FeaturePreprocessor::new(table);
        let scaler = pre.standardize("Amount").unwrap();

        assert_eq!(scaler.scale, 1.0);
        let features = pre.split_features_label("Class").unwrap();
        assert!(features.x.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn split_separates_label() {
        let pre = FeaturePreprocessor::new(sample_table());
        let features = pre.split_features_label("Class").unwrap();
        assert_eq!(features.y.to_vec(), vec![0, 0, 1, 0]);
        assert!(!features.feature_names.contains(&"Class".to_string()));
    }

    #[test]
    fn split_rejects_missing_values_and_bad_labels() {
        let missing = Table::new(vec!["V1".into(), "Class".into()], array![[f64::NAN, 0.0], [1.0, 1.0]]).unwrap();
        let err = FeaturePreprocessor::new(missing).split_features_label("Class").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidData(_)));

        let bad_label = Table::new(vec!["V1".into(), "Class".into()], array![[0.0, 2.0], [1.0, 1.0]]).unwrap();
        let err = FeaturePreprocessor::new(bad_label).split_features_label("Class").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidData(_)));
    }

    #[test]
    fn scaling_params_apply_to_raw_rows() {
        let mut pre = FeaturePreprocessor::new(sample_table());
        pre.drop_column("Time").unwrap();
        let scaler = pre.standardize("Amount").unwrap();
        let features = pre.split_features_label("Class").unwrap();

        let mut row = vec![1.0, 10.0];
        pre.scaling().apply_row(&features.feature_names, &mut row).unwrap();
        assert_eq!(row[0], 1.0);
        assert_abs_diff_eq!(row[1], scaler.transform(10.0));
        assert_abs_diff_eq!(row[1], features.x[[0, 1]]);

        let err = pre.scaling().apply_row(&features.feature_names, &mut [1.0]).unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn standard_scaler_rejects_wrong_width() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let scaler = StandardScaler::fit(x.view());
        let scaled = scaler.transform(x.view()).unwrap();
        assert_abs_diff_eq!(scaled[[0, 0]], -1.0);
        assert!(scaler.transform(array![[1.0]].view()).is_err());
    }
}
