use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tree::{grow_gini_tree, GiniTreeParams, Tree};
use super::{check_training_input, check_width, Classifier};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    /// `None` grows trees until leaves are pure
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features tried per split; `None` means `sqrt(n_features)`
    pub max_features: Option<usize>,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            bootstrap: true,
            seed: 42,
        }
    }
}

/// Random forest of Gini trees; the fraud probability is the mean leaf
/// fraction across trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestClassifier {
    params: ForestParams,
    trees: Vec<Tree>,
    n_features: usize,
}

impl RandomForestClassifier {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
            n_features: 0,
        }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ForestParams {
        &mut self.params
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for RandomForestClassifier {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, usize>) -> Result<()> {
        check_training_input(x, y)?;
        if self.params.n_estimators == 0 {
            return Err(PipelineError::InvalidParameter {
                name: "n_estimators".into(),
                reason: "must be at least 1".into(),
            });
        }

        let n_rows = x.nrows();
        let n_features = x.ncols();
        let tree_params = GiniTreeParams {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split.max(2),
            min_samples_leaf: self.params.min_samples_leaf.max(1),
            max_features: self
                .params
                .max_features
                .unwrap_or_else(|| (n_features as f64).sqrt().round() as usize)
                .clamp(1, n_features),
        };
        let bootstrap = self.params.bootstrap;
        let seed = self.params.seed;

        let trees: Vec<Tree> = (0..self.params.n_estimators)
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(i as u64));
                let indices: Vec<usize> = if bootstrap {
                    (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect()
                } else {
                    (0..n_rows).collect()
                };
                grow_gini_tree(x, y, &indices, &tree_params, &mut rng)
            })
            .collect();

        debug!(
            trees = trees.len(),
            max_depth = trees.iter().map(Tree::depth).max().unwrap_or(0),
            "fitted random forest"
        );
        self.trees = trees;
        self.n_features = n_features;
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(PipelineError::NotFitted);
        }
        check_width(self.n_features, x)?;
        let n_trees = self.trees.len() as f64;
        Ok(x
            .rows()
            .into_iter()
            .map(|row| self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / n_trees)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, Array2};

    fn blobs() -> (Array2<f64>, Array1<usize>) {
        let x = Array::from_shape_fn((40, 3), |(i, j)| {
            let base = if i < 20 { 0.0 } else { 4.0 };
            base + ((i * 7 + j * 3) % 10) as f64 / 10.0
        });
        let y = Array::from_shape_fn(40, |i| usize::from(i >= 20));
        (x, y)
    }

    #[test]
    fn separates_blobs() {
        let (x, y) = blobs();
        let mut forest = RandomForestClassifier::new(ForestParams {
            n_estimators: 15,
            ..ForestParams::default()
        });
        forest.fit(x.view(), y.view()).unwrap();

        assert_eq!(forest.n_trees(), 15);
        assert_eq!(forest.predict(x.view()).unwrap(), y);
    }

    #[test]
    fn seeded_forest_is_reproducible() {
        let (x, y) = blobs();
        let params = ForestParams {
            n_estimators: 5,
            max_depth: Some(3),
            ..ForestParams::default()
        };
        let mut a = RandomForestClassifier::new(params.clone());
        let mut b = RandomForestClassifier::new(params);
        a.fit(x.view(), y.view()).unwrap();
        b.fit(x.view(), y.view()).unwrap();
        assert_eq!(a.predict_proba(x.view()).unwrap(), b.predict_proba(x.view()).unwrap());
    }

    #[test]
    fn unfitted_forest_refuses_to_predict() {
        let forest = RandomForestClassifier::new(ForestParams::default());
        assert!(matches!(
            forest.predict(Array2::zeros((1, 3)).view()),
            Err(PipelineError::NotFitted)
        ));
    }
}
