//! Inference context built once from a saved artifact and shared by callers.

use std::path::PathBuf;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::models::Classifier;
use crate::persist::{self, ModelArtifact};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorConfig {
    pub artifact_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    /// 1 for fraud, 0 for legitimate
    pub label: usize,
    pub fraud_probability: f64,
}

/// Loaded model plus the preprocessing it was trained behind. Raw feature
/// vectors go in, in the order of `feature_names()`.
#[derive(Debug, Clone)]
pub struct FraudPredictor {
    artifact: ModelArtifact,
}

impl FraudPredictor {
    pub fn from_config(config: &PredictorConfig) -> Result<Self> {
        // the file handle is dropped inside load
        let artifact = persist::load(&config.artifact_path)?;
        Ok(Self::from_artifact(artifact))
    }

    pub fn from_artifact(artifact: ModelArtifact) -> Self {
        Self { artifact }
    }

    pub fn feature_names(&self) -> &[String] {
        &self.artifact.feature_names
    }

    pub fn model_name(&self) -> &str {
        &self.artifact.model_name
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn predict(&self, features: &[f64]) -> Result<Prediction> {
        let mut row = features.to_vec();
        self.artifact
            .scaling
            .apply_row(&self.artifact.feature_names, &mut row)?;
        let x = Array2::from_shape_vec((1, row.len()), row)
            .map_err(|e| PipelineError::InvalidData(e.to_string()))?;
        let prediction = self
            .score(x.view())?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::InvalidData("empty feature vector".into()))?;
        debug!(
            label = prediction.label,
            fraud_probability = prediction.fraud_probability,
            "scored transaction"
        );
        Ok(prediction)
    }

    /// Scores every row of `x`, laid out like `feature_names()`.
    pub fn predict_batch(&self, x: ArrayView2<'_, f64>) -> Result<Vec<Prediction>> {
        let expected = self.artifact.feature_names.len();
        if x.ncols() != expected {
            return Err(PipelineError::ShapeMismatch {
                expected,
                actual: x.ncols(),
            });
        }
        // rebuilt row by row so the layout of `x` does not matter
        let mut values = Vec::with_capacity(x.len());
        for row in x.rows() {
            let mut row = row.to_vec();
            self.artifact
                .scaling
                .apply_row(&self.artifact.feature_names, &mut row)?;
            values.extend(row);
        }
        let scaled = Array2::from_shape_vec(x.raw_dim(), values)
            .map_err(|e| PipelineError::InvalidData(e.to_string()))?;
        self.score(scaled.view())
    }

    fn score(&self, x: ArrayView2<'_, f64>) -> Result<Vec<Prediction>> {
        let estimator = &self.artifact.estimator;
        let labels = estimator.predict(x)?;
        let probabilities = estimator.predict_proba(x)?;
        Ok(labels
            .iter()
            .zip(probabilities.iter())
            .map(|(&label, &fraud_probability)| Prediction {
                label,
                fraud_probability,
            })
            .collect())
    }
}
