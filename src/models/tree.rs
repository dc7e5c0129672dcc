//! Binary decision trees shared by the forest and boosting estimators.

use ndarray::{ArrayView1, ArrayView2};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// Tree stored as a flat node arena; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub(crate) fn from_nodes(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], at: usize) -> usize {
            match nodes[at] {
                Node::Leaf { .. } => 1,
                Node::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    /// Leaf value reached by `row`. Values `<= threshold` go left.
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut at = 0;
        loop {
            match self.nodes.get(at) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    at = if row[*feature] <= *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }
}

/// Rows of `indices` ordered by one feature.
pub(crate) fn sort_by_feature(x: ArrayView2<'_, f64>, indices: &[usize], feature: usize) -> Vec<usize> {
    let mut sorted = indices.to_vec();
    sorted.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));
    sorted
}

/// Random subset of `n_features` columns, in ascending order.
pub(crate) fn sample_features(n_features: usize, max_features: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let mut features: Vec<usize> = (0..n_features).collect();
    if max_features < n_features {
        features.shuffle(rng);
        features.truncate(max_features.max(1));
        features.sort_unstable();
    }
    features
}

/// Growth limits for a Gini tree.
#[derive(Debug, Clone, Copy)]
pub struct GiniTreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: usize,
}

fn gini(n: f64, pos: f64) -> f64 {
    if n <= 0.0 {
        return 0.0;
    }
    let p = pos / n;
    2.0 * p * (1.0 - p)
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

/// Grows a classification tree whose leaves hold the fraud fraction of
/// their training rows. `indices` may repeat rows (bootstrap samples).
pub fn grow_gini_tree(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, usize>,
    indices: &[usize],
    params: &GiniTreeParams,
    rng: &mut ChaCha8Rng,
) -> Tree {
    let mut nodes = Vec::new();
    grow_node(x, y, indices, 0, params, rng, &mut nodes);
    Tree::from_nodes(nodes)
}

fn grow_node(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, usize>,
    indices: &[usize],
    depth: usize,
    params: &GiniTreeParams,
    rng: &mut ChaCha8Rng,
    nodes: &mut Vec<Node>,
) -> usize {
    let id = nodes.len();
    let n = indices.len();
    let pos = indices.iter().filter(|&&i| y[i] == 1).count();
    let value = if n == 0 { 0.0 } else { pos as f64 / n as f64 };
    nodes.push(Node::Leaf { value });

    let depth_reached = params.max_depth.map_or(false, |d| depth >= d);
    if depth_reached || n < params.min_samples_split || pos == 0 || pos == n {
        return id;
    }

    if let Some(split) = best_gini_split(x, y, indices, pos, params, rng) {
        let left = grow_node(x, y, &split.left, depth + 1, params, rng, nodes);
        let right = grow_node(x, y, &split.right, depth + 1, params, rng, nodes);
        nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
    }
    id
}

fn best_gini_split(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, usize>,
    indices: &[usize],
    pos_total: usize,
    params: &GiniTreeParams,
    rng: &mut ChaCha8Rng,
) -> Option<BestSplit> {
    let n = indices.len() as f64;
    let parent = gini(n, pos_total as f64) * n;
    let min_leaf = params.min_samples_leaf.max(1);

    let mut best: Option<(f64, usize, f64)> = None;
    for feature in sample_features(x.ncols(), params.max_features, rng) {
        let sorted = sort_by_feature(x, indices, feature);
        let mut left_pos = 0usize;
        for cut in 1..sorted.len() {
            if y[sorted[cut - 1]] == 1 {
                left_pos += 1;
            }
            let lo = x[[sorted[cut - 1], feature]];
            let hi = x[[sorted[cut], feature]];
            if lo == hi || cut < min_leaf || sorted.len() - cut < min_leaf {
                continue;
            }
            let n_left = cut as f64;
            let n_right = n - n_left;
            let impurity = gini(n_left, left_pos as f64) * n_left
                + gini(n_right, (pos_total - left_pos) as f64) * n_right;
            if impurity < parent - 1e-12 && best.map_or(true, |b| impurity < b.0) {
                best = Some((impurity, feature, midpoint(lo, hi)));
            }
        }
    }

    best.map(|(_, feature, threshold)| {
        let (left, right) = partition(x, indices, feature, threshold);
        BestSplit {
            feature,
            threshold,
            left,
            right,
        }
    })
}

/// Split point between two distinct sorted values that keeps `lo` on the left.
pub(crate) fn midpoint(lo: f64, hi: f64) -> f64 {
    let mid = lo + (hi - lo) / 2.0;
    if mid >= hi {
        lo
    } else {
        mid
    }
}

pub(crate) fn partition(
    x: ArrayView2<'_, f64>,
    indices: &[usize],
    feature: usize,
    threshold: f64,
) -> (Vec<usize>, Vec<usize>) {
    indices.iter().copied().partition(|&i| x[[i, feature]] <= threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    fn params() -> GiniTreeParams {
        GiniTreeParams {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: 2,
        }
    }

    #[test]
    fn separable_data_gives_pure_leaves() {
        let x = array![[1.0, 0.0], [2.0, 0.0], [3.0, 1.0], [4.0, 1.0]];
        let y = array![0, 0, 1, 1];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let tree = grow_gini_tree(x.view(), y.view(), &[0, 1, 2, 3], &params(), &mut rng);

        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.predict_row(array![1.5, 0.0].view()), 0.0);
        assert_eq!(tree.predict_row(array![3.5, 1.0].view()), 1.0);
    }

    #[test]
    fn depth_limit_makes_mixed_leaf() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = array![0, 1, 0, 1];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let limited = GiniTreeParams {
            max_depth: Some(0),
            ..params()
        };
        let tree = grow_gini_tree(x.view(), y.view(), &[0, 1, 2, 3], &limited, &mut rng);
        assert_eq!(tree.n_nodes(), 1);
        assert_eq!(tree.predict_row(array![2.0].view()), 0.5);
    }

    #[test]
    fn threshold_is_midpoint() {
        let x = array![[0.0], [10.0]];
        let y = array![0, 1];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let tree = grow_gini_tree(x.view(), y.view(), &[0, 1], &params(), &mut rng);
        assert_eq!(tree.predict_row(array![5.0].view()), 0.0);
        assert_eq!(tree.predict_row(array![5.1].view()), 1.0);
    }
}
