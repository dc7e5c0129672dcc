//! Summary statistics reported before training: class balance, per-column
//! description, `Amount` outliers and correlation with the label.

use std::collections::BTreeMap;

use ndarray::{ArrayView1, Axis};
use tracing::{info, warn};

use crate::csv_reader::Table;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassShare {
    pub class: usize,
    pub count: usize,
    pub percentage: f64,
}

/// Counts and percentages per class, ordered by class.
pub fn class_distribution(labels: &[usize]) -> Vec<ClassShare> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for &label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    let total = labels.len().max(1) as f64;
    counts
        .into_iter()
        .map(|(class, count)| ClassShare {
            class,
            count,
            percentage: count as f64 / total * 100.0,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSummary {
    pub name: String,
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
}

/// Per-column description over the non-missing values.
pub fn describe(table: &Table) -> Vec<ColumnSummary> {
    table
        .column_names()
        .iter()
        .zip(table.values().axis_iter(Axis(1)))
        .map(|(name, col)| {
            let mut values: Vec<f64> = col.iter().copied().filter(|v| !v.is_nan()).collect();
            values.sort_by(f64::total_cmp);
            let count = values.len();
            let mean = if count > 0 {
                values.iter().sum::<f64>() / count as f64
            } else {
                f64::NAN
            };
            let std = if count > 1 {
                (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64).sqrt()
            } else {
                f64::NAN
            };
            ColumnSummary {
                name: name.clone(),
                count,
                mean,
                std,
                min: values.first().copied().unwrap_or(f64::NAN),
                q25: quantile(&values, 0.25),
                median: quantile(&values, 0.5),
                q75: quantile(&values, 0.75),
                max: values.last().copied().unwrap_or(f64::NAN),
            }
        })
        .collect()
}

/// Linear-interpolated quantile of an ascending slice.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Number of values outside `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]`.
pub fn iqr_outliers(values: ArrayView1<'_, f64>) -> usize {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(f64::total_cmp);
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    let (lower, upper) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
    sorted.iter().filter(|&&v| v < lower || v > upper).count()
}

/// Pearson correlation of every other column with `target`, strongest
/// positive first. Columns with no variance correlate as 0.
pub fn correlations_with(table: &Table, target: &str) -> Result<Vec<(String, f64)>> {
    let target_col = table.column(target)?;
    let mut out: Vec<(String, f64)> = table
        .column_names()
        .iter()
        .zip(table.values().axis_iter(Axis(1)))
        .filter(|(name, _)| name.as_str() != target)
        .map(|(name, col)| (name.clone(), pearson(col, target_col)))
        .collect();
    out.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(out)
}

fn pearson(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b.iter())
        .filter(|(x, y)| !x.is_nan() && !y.is_nan())
        .map(|(x, y)| (*x, *y))
        .collect();
    if pairs.len() < 2 {
        return 0.0;
    }
    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

/// Everything reported about a dataset before it is transformed.
#[derive(Debug, Clone)]
pub struct DatasetSummary {
    pub rows: usize,
    pub classes: Vec<ClassShare>,
    pub columns: Vec<ColumnSummary>,
    pub missing: Vec<(String, usize)>,
    /// Labels that are neither 0 nor 1, left out of `classes`
    pub invalid_labels: usize,
    /// IQR outliers of `Amount`, when the column exists
    pub amount_outliers: Option<usize>,
    pub correlations: Vec<(String, f64)>,
}

pub fn summarize(table: &Table, label: &str) -> Result<DatasetSummary> {
    let raw = table.column(label)?;
    let labels: Vec<usize> = raw
        .iter()
        .filter(|&&v| v == 0.0 || v == 1.0)
        .map(|&v| v as usize)
        .collect();
    let missing_labels = raw.iter().filter(|v| v.is_nan()).count();
    let summary = DatasetSummary {
        rows: table.n_rows(),
        classes: class_distribution(&labels),
        columns: describe(table),
        missing: table.missing_value_counts(),
        invalid_labels: raw.len() - labels.len() - missing_labels,
        amount_outliers: table.column("Amount").ok().map(iqr_outliers),
        correlations: correlations_with(table, label)?,
    };

    for share in &summary.classes {
        info!(
            class = share.class,
            count = share.count,
            percentage = share.percentage,
            "class distribution"
        );
    }
    if summary.invalid_labels > 0 {
        warn!(count = summary.invalid_labels, "labels other than 0 or 1 left out of class distribution");
    }
    if let Some(outliers) = summary.amount_outliers {
        info!(outliers, "Amount outliers by IQR rule");
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    #[test]
    fn class_distribution_reports_percentages() {
        let shares = class_distribution(&[0, 0, 0, 1]);
        assert_eq!(shares.len(), 2);
        assert_eq!(shares[0].count, 3);
        assert_abs_diff_eq!(shares[1].percentage, 25.0);
    }

    #[test]
    fn describe_matches_hand_computed_quartiles() {
        let table = Table::new(vec!["Amount".into()], array![[1.0], [2.0], [3.0], [4.0], [f64::NAN]]).unwrap();
        let summary = &describe(&table)[0];
        assert_eq!(summary.count, 4);
        assert_abs_diff_eq!(summary.mean, 2.5);
        assert_abs_diff_eq!(summary.q25, 1.75);
        assert_abs_diff_eq!(summary.median, 2.5);
        assert_abs_diff_eq!(summary.max, 4.0);
    }

    #[test]
    fn iqr_flags_extreme_amounts() {
        let amounts = Array1::from(vec![1.0, 2.0, 2.0, 3.0, 3.0, 4.0, 100.0]);
        assert_eq!(iqr_outliers(amounts.view()), 1);
    }

    #[test]
    fn correlation_sorted_and_constant_column_is_zero() {
        let table = Table::new(
            vec!["V1".into(), "V2".into(), "Const".into(), "Class".into()],
            array![
                [0.0, 1.0, 5.0, 0.0],
                [1.0, 0.0, 5.0, 1.0],
                [0.0, 1.0, 5.0, 0.0],
                [1.0, 0.0, 5.0, 1.0]
            ],
        )
        .unwrap();
        let corr = correlations_with(&table, "Class").unwrap();
        assert_eq!(corr[0].0, "V1");
        assert_abs_diff_eq!(corr[0].1, 1.0, epsilon = 1e-12);
        assert_eq!(corr[1], ("Const".to_string(), 0.0));
        assert_abs_diff_eq!(corr[2].1, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn summarize_collects_every_section() {
        let table = Table::new(
            vec!["V1".into(), "Amount".into(), "Class".into()],
            array![[0.5, 10.0, 0.0], [0.1, 12.0, 0.0], [f64::NAN, 11.0, 0.0], [2.0, 900.0, 1.0]],
        )
        .unwrap();
        let summary = summarize(&table, "Class").unwrap();

        assert_eq!(summary.rows, 4);
        assert_eq!(summary.classes[1].count, 1);
        assert_eq!(summary.columns.len(), 3);
        assert_eq!(summary.missing[0], ("V1".to_string(), 1));
        assert_eq!(summary.amount_outliers, Some(1));
        assert_eq!(summary.invalid_labels, 0);
        assert!(summarize(&table, "Label").is_err());
    }

    #[test]
    fn non_binary_labels_are_counted_apart() {
        let table = Table::new(
            vec!["V1".into(), "Class".into()],
            array![[0.1, 0.0], [0.2, 1.0], [0.3, 0.5], [0.4, -1.0], [0.5, f64::NAN], [0.6, 0.0]],
        )
        .unwrap();
        let summary = summarize(&table, "Class").unwrap();

        assert_eq!(summary.invalid_labels, 2);
        assert_eq!(summary.classes.len(), 2);
        assert_eq!(summary.classes[0].count, 2);
        assert_eq!(summary.classes[1].count, 1);
    }
}
