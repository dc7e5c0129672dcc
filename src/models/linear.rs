use linfa::prelude::Predict;
use linfa::traits::Fit;
use linfa::Dataset;
use linfa_logistic::{FittedLogisticRegression, LogisticRegression};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_training_input, check_width, Classifier};
use crate::error::{PipelineError, Result};
use crate::preprocess::StandardScaler;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearParams {
    /// L2 penalty strength
    pub alpha: f64,
    pub max_iterations: u64,
    /// Standardize inputs with statistics of the training rows.
    pub standardize: bool,
}

impl Default for LinearParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            max_iterations: 100,
            standardize: false,
        }
    }
}

/// Logistic regression classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearClassifier {
    params: LinearParams,
    scaler: Option<StandardScaler>,
    model: Option<FittedLogisticRegression<f64, usize>>,
    /// Whether linfa's positive class is label 1
    fraud_is_positive: bool,
    n_features: usize,
}

impl LinearClassifier {
    pub fn new(params: LinearParams) -> Self {
        Self {
            params,
            scaler: None,
            model: None,
            fraud_is_positive: true,
            n_features: 0,
        }
    }

    pub fn params(&self) -> &LinearParams {
        &self.params
    }

    /// Fitted coefficients, one per input feature.
    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.model.as_ref().map(|m| m.params())
    }

    fn prepare(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        match &self.scaler {
            Some(scaler) => scaler.transform(x),
            None => Ok(x.to_owned()),
        }
    }

    fn fitted(&self, x: ArrayView2<'_, f64>) -> Result<(&FittedLogisticRegression<f64, usize>, Array2<f64>)> {
        let model = self.model.as_ref().ok_or(PipelineError::NotFitted)?;
        check_width(self.n_features, x)?;
        Ok((model, self.prepare(x)?))
    }
}

impl Classifier for LinearClassifier {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, usize>) -> Result<()> {
        check_training_input(x, y)?;
        self.scaler = self.params.standardize.then(|| StandardScaler::fit(x));
        let records = self.prepare(x)?;
        let dataset = Dataset::new(records, y.to_owned());

        let model = LogisticRegression::default()
            .alpha(self.params.alpha)
            .max_iterations(self.params.max_iterations)
            .fit(&dataset)
            .map_err(|e| PipelineError::Training(format!("logistic regression: {}", e)))?;

        // linfa picks the more frequent class as positive, or the first one
        // seen on a tie, so read the orientation back off a training row
        let probabilities = model.predict_probabilities(dataset.records());
        let labels = model.predict(dataset.records());
        self.fraud_is_positive = match (probabilities.first(), labels.first()) {
            (Some(&p), Some(&label)) => (p >= 0.5) == (label == 1),
            _ => true,
        };

        debug!(
            rows = x.nrows(),
            features = x.ncols(),
            intercept = model.intercept(),
            fraud_is_positive = self.fraud_is_positive,
            "fitted logistic regression"
        );
        self.n_features = x.ncols();
        self.model = Some(model);
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let (model, records) = self.fitted(x)?;
        let probabilities = model.predict_probabilities(&records);
        if self.fraud_is_positive {
            Ok(probabilities)
        } else {
            Ok(probabilities.mapv(|p| 1.0 - p))
        }
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<usize>> {
        let (model, records) = self.fitted(x)?;
        Ok(model.predict(&records))
    }
}
