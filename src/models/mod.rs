//! Estimator families behind a common fit/predict contract.
//!
//! - `LinearClassifier`: L2 logistic regression (linfa-logistic)
//! - `RandomForestClassifier`: bagged Gini trees
//! - `BoostedTreeClassifier`: second-order gradient boosting on log loss
//! - `StackedClassifier`: boosted-tree base model under a linear meta-model

pub mod boosting;
pub mod forest;
pub mod linear;
pub mod stacking;
pub mod tree;

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

pub use boosting::{BoostedTreeClassifier, BoostingParams};
pub use forest::{ForestParams, RandomForestClassifier};
pub use linear::{LinearClassifier, LinearParams};
pub use stacking::{StackedClassifier, StackingParams};

/// Binary classifier over rows of `f64` features; label 1 is fraud.
pub trait Classifier {
    /// Learns from `x`/`y`, replacing any previous fit.
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, usize>) -> Result<()>;

    /// Probability of the fraud class for each row.
    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>>;

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<usize>> {
        Ok(self.predict_proba(x)?.mapv(|p| usize::from(p > 0.5)))
    }
}

/// A fitted or unfitted estimator of any supported family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Estimator {
    Linear(LinearClassifier),
    RandomForest(RandomForestClassifier),
    BoostedTrees(BoostedTreeClassifier),
    Stacked(StackedClassifier),
}

impl Estimator {
    pub fn family(&self) -> &'static str {
        match self {
            Estimator::Linear(_) => "logistic_regression",
            Estimator::RandomForest(_) => "random_forest",
            Estimator::BoostedTrees(_) => "boosted_trees",
            Estimator::Stacked(_) => "stacked",
        }
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            Estimator::Linear(m) => m,
            Estimator::RandomForest(m) => m,
            Estimator::BoostedTrees(m) => m,
            Estimator::Stacked(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Classifier {
        match self {
            Estimator::Linear(m) => m,
            Estimator::RandomForest(m) => m,
            Estimator::BoostedTrees(m) => m,
            Estimator::Stacked(m) => m,
        }
    }
}

impl Classifier for Estimator {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, usize>) -> Result<()> {
        self.inner_mut().fit(x, y)
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        self.inner().predict_proba(x)
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<usize>> {
        self.inner().predict(x)
    }
}

impl From<LinearClassifier> for Estimator {
    fn from(m: LinearClassifier) -> Self {
        Estimator::Linear(m)
    }
}

impl From<RandomForestClassifier> for Estimator {
    fn from(m: RandomForestClassifier) -> Self {
        Estimator::RandomForest(m)
    }
}

impl From<BoostedTreeClassifier> for Estimator {
    fn from(m: BoostedTreeClassifier) -> Self {
        Estimator::BoostedTrees(m)
    }
}

impl From<StackedClassifier> for Estimator {
    fn from(m: StackedClassifier) -> Self {
        Estimator::Stacked(m)
    }
}

/// Majority count over minority count of `y`, used as the positive-class
/// weight for imbalance-aware fitting.
pub fn class_weight_ratio(y: ArrayView1<'_, usize>) -> Result<f64> {
    let positives = y.iter().filter(|&&l| l == 1).count();
    let negatives = y.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(PipelineError::InvalidData(
            "class weight ratio needs both classes".into(),
        ));
    }
    Ok(positives.max(negatives) as f64 / positives.min(negatives) as f64)
}

/// Rejects mismatched lengths, empty input and labels other than 0/1.
pub(crate) fn check_training_input(x: ArrayView2<'_, f64>, y: ArrayView1<'_, usize>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(PipelineError::InvalidData(format!(
            "{} feature rows for {} labels",
            x.nrows(),
            y.len()
        )));
    }
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(PipelineError::InvalidData("empty training data".into()));
    }
    if let Some(bad) = y.iter().find(|&&l| l > 1) {
        return Err(PipelineError::InvalidData(format!("non-binary label {}", bad)));
    }
    Ok(())
}

pub(crate) fn check_width(expected: usize, x: ArrayView2<'_, f64>) -> Result<()> {
    if x.ncols() != expected {
        return Err(PipelineError::ShapeMismatch {
            expected,
            actual: x.ncols(),
        });
    }
    Ok(())
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn class_weight_ratio_is_majority_over_minority() {
        let y = array![0, 0, 0, 0, 0, 0, 1, 1];
        assert_eq!(class_weight_ratio(y.view()).unwrap(), 3.0);
        assert!(class_weight_ratio(array![0, 0].view()).is_err());
    }

    #[test]
    fn training_input_checks() {
        let x = array![[1.0], [2.0]];
        assert!(check_training_input(x.view(), array![0, 1].view()).is_ok());
        assert!(check_training_input(x.view(), array![0].view()).is_err());
        assert!(check_training_input(x.view(), array![0, 2].view()).is_err());
    }

    #[test]
    fn estimator_reports_family() {
        let est: Estimator = RandomForestClassifier::new(ForestParams::default()).into();
        assert_eq!(est.family(), "random_forest");
    }
}
