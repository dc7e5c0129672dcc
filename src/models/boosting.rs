//! Gradient-boosted trees on logistic loss, grown with first and second
//! order gradient statistics (XGBoost-style exact greedy splits).

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tree::{midpoint, partition, sample_features, sort_by_feature, Node, Tree};
use super::{check_training_input, check_width, sigmoid, Classifier};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Fraction of rows sampled per tree
    pub subsample: f64,
    /// Fraction of columns sampled per tree
    pub colsample_bytree: f64,
    /// L2 penalty on leaf weights
    pub lambda: f64,
    /// Minimum hessian sum in a child
    pub min_child_weight: f64,
    /// Gradient multiplier for fraud rows
    pub scale_pos_weight: f64,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 5,
            subsample: 1.0,
            colsample_bytree: 1.0,
            lambda: 1.0,
            min_child_weight: 1.0,
            scale_pos_weight: 1.0,
            seed: 42,
        }
    }
}

impl BoostingParams {
    fn validate(&self) -> Result<()> {
        let invalid = |name: &str, reason: &str| PipelineError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        };
        if self.n_estimators == 0 {
            return Err(invalid("n_estimators", "must be at least 1"));
        }
        if !(self.learning_rate > 0.0) {
            return Err(invalid("learning_rate", "must be positive"));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(invalid("subsample", "must be in (0, 1]"));
        }
        if !(self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0) {
            return Err(invalid("colsample_bytree", "must be in (0, 1]"));
        }
        if !(self.scale_pos_weight > 0.0) {
            return Err(invalid("scale_pos_weight", "must be positive"));
        }
        if self.lambda < 0.0 || self.min_child_weight < 0.0 {
            return Err(invalid("lambda", "penalties must be non-negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostedTreeClassifier {
    params: BoostingParams,
    trees: Vec<Tree>,
    n_features: usize,
}

struct GradientStats<'a> {
    grad: &'a [f64],
    hess: &'a [f64],
}

impl BoostedTreeClassifier {
    pub fn new(params: BoostingParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
            n_features: 0,
        }
    }

    pub fn params(&self) -> &BoostingParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut BoostingParams {
        &mut self.params
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn margin(&self, row: ArrayView1<'_, f64>) -> f64 {
        self.trees.iter().map(|t| t.predict_row(row)).sum()
    }

    fn grow_node(
        &self,
        x: ArrayView2<'_, f64>,
        stats: &GradientStats<'_>,
        indices: &[usize],
        features: &[usize],
        depth: usize,
        nodes: &mut Vec<Node>,
    ) -> usize {
        let p = &self.params;
        let id = nodes.len();
        let g: f64 = indices.iter().map(|&i| stats.grad[i]).sum();
        let h: f64 = indices.iter().map(|&i| stats.hess[i]).sum();
        nodes.push(Node::Leaf {
            value: -g / (h + p.lambda) * p.learning_rate,
        });

        if depth >= p.max_depth || indices.len() < 2 {
            return id;
        }

        let parent_score = g * g / (h + p.lambda);
        let mut best: Option<(f64, usize, f64)> = None;
        for &feature in features {
            let sorted = sort_by_feature(x, indices, feature);
            let (mut gl, mut hl) = (0.0, 0.0);
            for cut in 1..sorted.len() {
                let prev = sorted[cut - 1];
                gl += stats.grad[prev];
                hl += stats.hess[prev];
                let lo = x[[prev, feature]];
                let hi = x[[sorted[cut], feature]];
                let (gr, hr) = (g - gl, h - hl);
                if lo == hi || hl < p.min_child_weight || hr < p.min_child_weight {
                    continue;
                }
                let gain = gl * gl / (hl + p.lambda) + gr * gr / (hr + p.lambda) - parent_score;
                if gain > 1e-12 && best.map_or(true, |b| gain > b.0) {
                    best = Some((gain, feature, midpoint(lo, hi)));
                }
            }
        }

        if let Some((_, feature, threshold)) = best {
            let (left_rows, right_rows) = partition(x, indices, feature, threshold);
            let left = self.grow_node(x, stats, &left_rows, features, depth + 1, nodes);
            let right = self.grow_node(x, stats, &right_rows, features, depth + 1, nodes);
            nodes[id] = Node::Split {
                feature,
                threshold,
                left,
                right,
            };
        }
        id
    }
}

impl Classifier for BoostedTreeClassifier {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, usize>) -> Result<()> {
        check_training_input(x, y)?;
        self.params.validate()?;

        let n_rows = x.nrows();
        let n_features = x.ncols();
        let n_cols = ((self.params.colsample_bytree * n_features as f64).ceil() as usize).clamp(1, n_features);
        let weights: Vec<f64> = y
            .iter()
            .map(|&l| if l == 1 { self.params.scale_pos_weight } else { 1.0 })
            .collect();

        let mut rng = ChaCha8Rng::seed_from_u64(self.params.seed);
        let mut margins = vec![0.0; n_rows];
        let mut grad = vec![0.0; n_rows];
        let mut hess = vec![0.0; n_rows];
        self.trees.clear();

        for round in 0..self.params.n_estimators {
            for i in 0..n_rows {
                let prob = sigmoid(margins[i]);
                grad[i] = weights[i] * (prob - y[i] as f64);
                hess[i] = (weights[i] * prob * (1.0 - prob)).max(1e-16);
            }

            let mut rows: Vec<usize> = if self.params.subsample < 1.0 {
                (0..n_rows)
                    .filter(|_| rng.gen::<f64>() < self.params.subsample)
                    .collect()
            } else {
                (0..n_rows).collect()
            };
            if rows.is_empty() {
                rows.push(rng.gen_range(0..n_rows));
            }
            let features = sample_features(n_features, n_cols, &mut rng);

            let stats = GradientStats {
                grad: &grad,
                hess: &hess,
            };
            let mut nodes = Vec::new();
            self.grow_node(x, &stats, &rows, &features, 0, &mut nodes);
            let tree = Tree::from_nodes(nodes);

            for (i, row) in x.rows().into_iter().enumerate() {
                margins[i] += tree.predict_row(row);
            }
            if round == 0 || (round + 1) % 50 == 0 {
                debug!(round = round + 1, nodes = tree.n_nodes(), "boosting round");
            }
            self.trees.push(tree);
        }

        self.n_features = n_features;
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(PipelineError::NotFitted);
        }
        check_width(self.n_features, x)?;
        Ok(x.rows().into_iter().map(|row| sigmoid(self.margin(row))).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array, Array2};

    fn ring() -> (Array2<f64>, Array1<usize>) {
        // fraud where |x| is large: not linearly separable
        let x = Array::from_shape_fn((60, 2), |(i, j)| {
            let v = (i as f64 - 30.0) / 10.0;
            if j == 0 {
                v
            } else {
                ((i * 13) % 7) as f64 / 7.0
            }
        });
        let y = Array::from_shape_fn(60, |i| usize::from(((i as f64 - 30.0) / 10.0).abs() > 1.5));
        (x, y)
    }

    #[test]
    fn fits_nonlinear_boundary() {
        let (x, y) = ring();
        let mut model = BoostedTreeClassifier::new(BoostingParams {
            n_estimators: 30,
            max_depth: 3,
            learning_rate: 0.3,
            ..BoostingParams::default()
        });
        model.fit(x.view(), y.view()).unwrap();
        assert_eq!(model.predict(x.view()).unwrap(), y);
    }

    #[test]
    fn positive_weight_raises_fraud_probability() {
        let (x, y) = ring();
        let base = BoostingParams {
            n_estimators: 3,
            max_depth: 1,
            ..BoostingParams::default()
        };
        let mut plain = BoostedTreeClassifier::new(base.clone());
        let mut weighted = BoostedTreeClassifier::new(BoostingParams {
            scale_pos_weight: 5.0,
            ..base
        });
        plain.fit(x.view(), y.view()).unwrap();
        weighted.fit(x.view(), y.view()).unwrap();

        let probe = array![[0.0, 0.5]];
        assert!(weighted.predict_proba(probe.view()).unwrap()[0] > plain.predict_proba(probe.view()).unwrap()[0]);
    }

    #[test]
    fn sampling_is_seeded() {
        let (x, y) = ring();
        let params = BoostingParams {
            n_estimators: 10,
            subsample: 0.7,
            colsample_bytree: 0.5,
            ..BoostingParams::default()
        };
        let mut a = BoostedTreeClassifier::new(params.clone());
        let mut b = BoostedTreeClassifier::new(params);
        a.fit(x.view(), y.view()).unwrap();
        b.fit(x.view(), y.view()).unwrap();
        assert_eq!(a.predict_proba(x.view()).unwrap(), b.predict_proba(x.view()).unwrap());
    }

    #[test]
    fn invalid_subsample_rejected() {
        let (x, y) = ring();
        let mut model = BoostedTreeClassifier::new(BoostingParams {
            subsample: 0.0,
            ..BoostingParams::default()
        });
        let err = model.fit(x.view(), y.view()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidParameter { .. }));
    }
}
