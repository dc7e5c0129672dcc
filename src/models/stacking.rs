use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_training_input, check_width, BoostedTreeClassifier, BoostingParams, Classifier};
use super::{LinearClassifier, LinearParams};
use crate::error::{PipelineError, Result};
use crate::split::stratified_folds;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackingParams {
    pub base: BoostingParams,
    pub meta: LinearParams,
    /// Feed the original features to the meta-model next to the base score.
    pub passthrough: bool,
    /// Folds used to produce out-of-fold base scores for the meta-model.
    pub cv_folds: usize,
}

impl Default for StackingParams {
    fn default() -> Self {
        Self {
            base: BoostingParams {
                n_estimators: 200,
                max_depth: 5,
                learning_rate: 0.1,
                ..BoostingParams::default()
            },
            meta: LinearParams::default(),
            passthrough: true,
            cv_folds: 5,
        }
    }
}

/// Boosted-tree base model whose fraud probability, optionally joined with
/// the raw features, is the input of a logistic-regression meta-model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackedClassifier {
    params: StackingParams,
    base: Option<BoostedTreeClassifier>,
    meta: Option<LinearClassifier>,
    n_features: usize,
}

impl StackedClassifier {
    pub fn new(params: StackingParams) -> Self {
        Self {
            params,
            base: None,
            meta: None,
            n_features: 0,
        }
    }

    pub fn params(&self) -> &StackingParams {
        &self.params
    }

    fn meta_features(&self, base_scores: Array1<f64>, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let scores = base_scores.insert_axis(Axis(1));
        if !self.params.passthrough {
            return Ok(scores);
        }
        concatenate(Axis(1), &[scores.view(), x.view()]).map_err(|e| PipelineError::InvalidData(e.to_string()))
    }

    /// Base-model probabilities for each row, each predicted by a model
    /// that did not see that row.
    fn out_of_fold_scores(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, usize>) -> Result<Array1<f64>> {
        let folds = stratified_folds(y, self.params.cv_folds)?;
        let fold_scores: Vec<(Vec<usize>, Array1<f64>)> = folds
            .into_par_iter()
            .map(|(train, valid)| -> Result<(Vec<usize>, Array1<f64>)> {
                let mut base = BoostedTreeClassifier::new(self.params.base.clone());
                base.fit(x.select(Axis(0), &train).view(), y.select(Axis(0), &train).view())?;
                let scores = base.predict_proba(x.select(Axis(0), &valid).view())?;
                Ok((valid, scores))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut oof = Array1::zeros(x.nrows());
        for (valid, scores) in fold_scores {
            for (&row, score) in valid.iter().zip(scores) {
                oof[row] = score;
            }
        }
        Ok(oof)
    }

    fn meta_input(&self, x: ArrayView2<'_, f64>) -> Result<(&LinearClassifier, Array2<f64>)> {
        let (base, meta) = match (&self.base, &self.meta) {
            (Some(base), Some(meta)) => (base, meta),
            _ => return Err(PipelineError::NotFitted),
        };
        check_width(self.n_features, x)?;
        Ok((meta, self.meta_features(base.predict_proba(x)?, x)?))
    }
}

impl Classifier for StackedClassifier {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, usize>) -> Result<()> {
        check_training_input(x, y)?;

        let oof = self.out_of_fold_scores(x, y)?;
        let meta_x = self.meta_features(oof, x)?;
        let mut meta = LinearClassifier::new(self.params.meta.clone());
        meta.fit(meta_x.view(), y)?;

        let mut base = BoostedTreeClassifier::new(self.params.base.clone());
        base.fit(x, y)?;

        debug!(
            folds = self.params.cv_folds,
            passthrough = self.params.passthrough,
            meta_features = meta_x.ncols(),
            "fitted stacked classifier"
        );
        self.base = Some(base);
        self.meta = Some(meta);
        self.n_features = x.ncols();
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let (meta, meta_x) = self.meta_input(x)?;
        meta.predict_proba(meta_x.view())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<usize>> {
        let (meta, meta_x) = self.meta_input(x)?;
        meta.predict(meta_x.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn data() -> (Array2<f64>, Array1<usize>) {
        let x = Array::from_shape_fn((50, 2), |(i, j)| {
            let shift = if i % 2 == 0 { 0.0 } else { 3.0 };
            shift + ((i * 5 + j * 11) % 9) as f64 / 9.0
        });
        let y = Array::from_shape_fn(50, |i| i % 2);
        (x, y)
    }

    fn small_params(passthrough: bool) -> StackingParams {
        StackingParams {
            base: BoostingParams {
                n_estimators: 10,
                max_depth: 2,
                ..BoostingParams::default()
            },
            meta: LinearParams::default(),
            passthrough,
            cv_folds: 3,
        }
    }

    #[test]
    fn stacked_model_learns_both_ways() {
        let (x, y) = data();
        for passthrough in [true, false] {
            let mut model = StackedClassifier::new(small_params(passthrough));
            model.fit(x.view(), y.view()).unwrap();
            assert_eq!(model.predict(x.view()).unwrap(), y);
            // first row is legit and the classes are tied
            let scores = model.predict_proba(x.view()).unwrap();
            assert_eq!(crate::metrics::roc_auc_score(y.view(), scores.view()), Some(1.0));
        }
    }

    #[test]
    fn passthrough_widens_meta_input() {
        let (x, _) = data();
        let model = StackedClassifier::new(small_params(true));
        let meta_x = model.meta_features(Array1::zeros(x.nrows()), x.view()).unwrap();
        assert_eq!(meta_x.ncols(), 3);
        assert_eq!(meta_x.column(1), x.column(0));
    }

    #[test]
    fn unfitted_stack_refuses_to_predict() {
        let (x, _) = data();
        let model = StackedClassifier::new(small_params(true));
        assert!(matches!(model.predict(x.view()), Err(PipelineError::NotFitted)));
    }
}
