//! Classification metrics on a held-out partition. Label 1 (fraud) is the
//! positive class throughout.

use std::fmt;

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::models::Classifier;

/// Counts indexed `[actual][predicted]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub counts: [[usize; 2]; 2],
}

impl ConfusionMatrix {
    pub fn from_labels(actual: ArrayView1<'_, usize>, predicted: ArrayView1<'_, usize>) -> Self {
        let mut counts = [[0; 2]; 2];
        for (&a, &p) in actual.iter().zip(predicted.iter()) {
            counts[a.min(1)][p.min(1)] += 1;
        }
        Self { counts }
    }

    pub fn true_negatives(&self) -> usize {
        self.counts[0][0]
    }

    pub fn false_positives(&self) -> usize {
        self.counts[0][1]
    }

    pub fn false_negatives(&self) -> usize {
        self.counts[1][0]
    }

    pub fn true_positives(&self) -> usize {
        self.counts[1][1]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    /// Precision, recall, F1 and support for `class`.
    fn class_scores(&self, class: usize) -> ClassReport {
        let other = 1 - class;
        let hit = self.counts[class][class];
        let predicted = hit + self.counts[other][class];
        let support = hit + self.counts[class][other];
        let precision = ratio(hit, predicted);
        let recall = ratio(hit, support);
        ClassReport {
            class,
            precision,
            recall,
            f1: harmonic_mean(precision, recall),
            support,
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn harmonic_mean(a: f64, b: f64) -> f64 {
    if a + b == 0.0 {
        0.0
    } else {
        2.0 * a * b / (a + b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    pub class: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AveragedScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub classes: [ClassReport; 2],
    pub macro_avg: AveragedScores,
    pub weighted_avg: AveragedScores,
}

impl ClassificationReport {
    fn from_confusion(cm: &ConfusionMatrix) -> Self {
        let classes = [cm.class_scores(0), cm.class_scores(1)];
        let macro_avg = AveragedScores {
            precision: (classes[0].precision + classes[1].precision) / 2.0,
            recall: (classes[0].recall + classes[1].recall) / 2.0,
            f1: (classes[0].f1 + classes[1].f1) / 2.0,
        };
        let total = cm.total();
        let weighted = |f: fn(&ClassReport) -> f64| {
            if total == 0 {
                0.0
            } else {
                classes.iter().map(|c| f(c) * c.support as f64).sum::<f64>() / total as f64
            }
        };
        let weighted_avg = AveragedScores {
            precision: weighted(|c: &ClassReport| c.precision),
            recall: weighted(|c: &ClassReport| c.recall),
            f1: weighted(|c: &ClassReport| c.f1),
        };
        Self {
            classes,
            macro_avg,
            weighted_avg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// `None` when the evaluated labels hold a single class.
    pub roc_auc: Option<f64>,
    pub confusion_matrix: ConfusionMatrix,
    pub report: ClassificationReport,
}

impl Metrics {
    pub fn from_predictions(
        y_true: ArrayView1<'_, usize>,
        y_pred: ArrayView1<'_, usize>,
        scores: ArrayView1<'_, f64>,
    ) -> Result<Self> {
        if y_true.len() != y_pred.len() || y_true.len() != scores.len() {
            return Err(PipelineError::InvalidData(format!(
                "{} labels, {} predictions, {} scores",
                y_true.len(),
                y_pred.len(),
                scores.len()
            )));
        }
        let cm = ConfusionMatrix::from_labels(y_true, y_pred);
        let report = ClassificationReport::from_confusion(&cm);
        let fraud = report.classes[1];
        Ok(Self {
            accuracy: ratio(cm.true_positives() + cm.true_negatives(), cm.total()),
            precision: fraud.precision,
            recall: fraud.recall,
            f1: fraud.f1,
            roc_auc: roc_auc_score(y_true, scores),
            confusion_matrix: cm,
            report,
        })
    }
}

/// Scores `model` on a held-out partition.
pub fn evaluate<C: Classifier + ?Sized>(
    model: &C,
    x_test: ArrayView2<'_, f64>,
    y_test: ArrayView1<'_, usize>,
) -> Result<Metrics> {
    if x_test.nrows() != y_test.len() {
        return Err(PipelineError::InvalidData(format!(
            "{} feature rows for {} labels",
            x_test.nrows(),
            y_test.len()
        )));
    }
    let predicted = model.predict(x_test)?;
    let scores = model.predict_proba(x_test)?;
    Metrics::from_predictions(y_test, predicted.view(), scores.view())
}

/// Area under the ROC curve via the Mann-Whitney rank statistic; tied scores
/// share their average rank. `None` unless both classes are present.
pub fn roc_auc_score(y: ArrayView1<'_, usize>, scores: ArrayView1<'_, f64>) -> Option<f64> {
    let n_pos = y.iter().filter(|&&l| l == 1).count();
    let n_neg = y.len() - n_pos;
    if n_pos == 0 || n_neg == 0 || y.len() != scores.len() {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut pos_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // ranks are 1-based: positions start..end share (start + 1 + end) / 2
        let rank = (start + 1 + end) as f64 / 2.0;
        pos_rank_sum += rank * order[start..end].iter().filter(|&&i| y[i] == 1).count() as f64;
        start = end;
    }

    let n_pos = n_pos as f64;
    Some((pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64))
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cm = &self.confusion_matrix.counts;
        writeln!(f, "Confusion matrix (rows actual, columns predicted):")?;
        writeln!(f, "    [{:>8} {:>8}]", cm[0][0], cm[0][1])?;
        writeln!(f, "    [{:>8} {:>8}]", cm[1][0], cm[1][1])?;
        writeln!(f, "{:>14} {:>10} {:>10} {:>10} {:>10}", "", "precision", "recall", "f1-score", "support")?;
        for c in &self.report.classes {
            writeln!(
                f,
                "{:>14} {:>10.4} {:>10.4} {:>10.4} {:>10}",
                c.class, c.precision, c.recall, c.f1, c.support
            )?;
        }
        let total = self.confusion_matrix.total();
        for (name, avg) in [("macro avg", &self.report.macro_avg), ("weighted avg", &self.report.weighted_avg)] {
            writeln!(
                f,
                "{:>14} {:>10.4} {:>10.4} {:>10.4} {:>10}",
                name, avg.precision, avg.recall, avg.f1, total
            )?;
        }
        writeln!(f, "Accuracy: {:.4}", self.accuracy)?;
        match self.roc_auc {
            Some(auc) => write!(f, "ROC AUC: {:.4}", auc),
            None => write!(f, "ROC AUC: undefined (single class)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1, Array2};

    struct Constant(f64);

    impl Classifier for Constant {
        fn fit(&mut self, _x: ArrayView2<'_, f64>, _y: ArrayView1<'_, usize>) -> Result<()> {
            Ok(())
        }

        fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
            Ok(Array1::from_elem(x.nrows(), self.0))
        }
    }

    #[test]
    fn confusion_matrix_sums_to_length() {
        let y = array![0, 0, 1, 1, 0, 1];
        let p = array![0, 1, 1, 0, 0, 1];
        let cm = ConfusionMatrix::from_labels(y.view(), p.view());
        assert_eq!(cm.total(), y.len());
        assert_eq!(cm.counts, [[2, 1], [1, 2]]);
    }

    #[test]
    fn scores_for_a_mixed_prediction() {
        let y = array![0, 0, 0, 0, 1, 1];
        let p = array![0, 0, 0, 1, 1, 0];
        let s = array![0.1, 0.2, 0.3, 0.7, 0.8, 0.4];
        let m = Metrics::from_predictions(y.view(), p.view(), s.view()).unwrap();

        assert_abs_diff_eq!(m.accuracy, 4.0 / 6.0);
        assert_abs_diff_eq!(m.precision, 0.5);
        assert_abs_diff_eq!(m.recall, 0.5);
        assert_abs_diff_eq!(m.f1, 0.5);
        // fraud rows rank 4 and 6: (10 - 3) / (2 * 4)
        assert_abs_diff_eq!(m.roc_auc.unwrap(), 7.0 / 8.0);
        assert_eq!(m.report.classes[0].support, 4);
        assert_abs_diff_eq!(m.report.classes[0].recall, 0.75);
        assert_abs_diff_eq!(m.report.macro_avg.recall, 0.625);
        assert_abs_diff_eq!(m.report.weighted_avg.recall, (0.75 * 4.0 + 0.5 * 2.0) / 6.0);
    }

    #[test]
    fn tied_scores_share_rank() {
        let y = array![0, 1, 0, 1];
        let s = array![0.5, 0.5, 0.5, 0.5];
        assert_abs_diff_eq!(roc_auc_score(y.view(), s.view()).unwrap(), 0.5);

        let perfect = array![0.1, 0.9, 0.2, 0.8];
        assert_abs_diff_eq!(roc_auc_score(y.view(), perfect.view()).unwrap(), 1.0);
    }

    #[test]
    fn single_class_has_no_roc_auc() {
        let y = array![0, 0, 0];
        assert!(roc_auc_score(y.view(), array![0.1, 0.2, 0.3].view()).is_none());
    }

    #[test]
    fn never_predicting_fraud_reports_zero_not_nan() {
        let x = Array2::zeros((4, 2));
        let y = array![0, 0, 0, 1];
        let m = evaluate(&Constant(0.0), x.view(), y.view()).unwrap();

        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1, 0.0);
        assert_abs_diff_eq!(m.accuracy, 0.75);
        assert_abs_diff_eq!(m.roc_auc.unwrap(), 0.5);
    }

    #[test]
    fn mismatched_lengths_rejected() {
        let x = Array2::zeros((3, 1));
        let err = evaluate(&Constant(0.0), x.view(), array![0, 1].view()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidData(_)));
    }
}
