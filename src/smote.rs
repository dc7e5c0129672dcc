//! SMOTE-style oversampling of the minority class.

use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct Smote {
    pub k_neighbors: usize,
    pub seed: u64,
}

impl Default for Smote {
    fn default() -> Self {
        Self {
            k_neighbors: 5,
            seed: 42,
        }
    }
}

fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Indices (into `points`) of the `k` nearest rows to each row, itself excluded.
fn nearest_neighbors(points: ArrayView2<'_, f64>, k: usize) -> Vec<Vec<usize>> {
    (0..points.nrows())
        .map(|i| {
            let mut dists: Vec<(f64, usize)> = (0..points.nrows())
                .filter(|&j| j != i)
                .map(|j| (squared_distance(points.row(i), points.row(j)), j))
                .collect();
            dists.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            dists.into_iter().take(k).map(|(_, j)| j).collect()
        })
        .collect()
}

impl Smote {
    pub fn new(k_neighbors: usize, seed: u64) -> Self {
        Self { k_neighbors, seed }
    }

    /// Adds synthetic minority rows until both classes have the majority
    /// count. Original rows come first, unchanged and in order.
    pub fn resample(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, usize>,
    ) -> Result<(Array2<f64>, Array1<usize>)> {
        if x.nrows() != y.len() {
            return Err(PipelineError::InvalidData(format!(
                "{} feature rows for {} labels",
                x.nrows(),
                y.len()
            )));
        }
        if self.k_neighbors == 0 {
            return Err(PipelineError::InvalidParameter {
                name: "k_neighbors".into(),
                reason: "must be at least 1".into(),
            });
        }

        let negatives: Vec<usize> = (0..y.len()).filter(|&i| y[i] == 0).collect();
        let positives: Vec<usize> = (0..y.len()).filter(|&i| y[i] == 1).collect();
        if negatives.is_empty() || positives.is_empty() {
            return Err(PipelineError::InvalidData(
                "oversampling needs rows of both classes".into(),
            ));
        }
        let (minority_label, minority, majority_count) = if positives.len() <= negatives.len() {
            (1, positives, negatives.len())
        } else {
            (0, negatives, positives.len())
        };

        let n_synthetic = majority_count - minority.len();
        if n_synthetic == 0 {
            return Ok((x.to_owned(), y.to_owned()));
        }

        let minority_x = x.select(Axis(0), &minority);
        let k = self.k_neighbors.min(minority.len() - 1);
        let neighbors = nearest_neighbors(minority_x.view(), k);

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut synthetic = Array2::<f64>::zeros((n_synthetic, x.ncols()));
        for mut row in synthetic.axis_iter_mut(Axis(0)) {
            let sample = rng.gen_range(0..minority.len());
            let base = minority_x.row(sample);
            if neighbors[sample].is_empty() {
                row.assign(&base);
                continue;
            }
            let neighbor = minority_x.row(neighbors[sample][rng.gen_range(0..neighbors[sample].len())]);
            let gap: f64 = rng.gen();
            row.assign(&(&base + &((&neighbor - &base) * gap)));
        }

        let x_out = concatenate(Axis(0), &[x.view(), synthetic.view()])
            .map_err(|e| PipelineError::InvalidData(e.to_string()))?;
        let mut y_out = y.to_vec();
        y_out.extend(std::iter::repeat(minority_label).take(n_synthetic));

        info!(
            original_rows = y.len(),
            synthetic_rows = n_synthetic,
            k_neighbors = k,
            "oversampled minority class"
        );

        Ok((x_out, Array1::from(y_out)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn imbalanced() -> (Array2<f64>, Array1<usize>) {
        let x = array![
            [0.0, 0.0],
            [0.1, 0.2],
            [0.3, 0.1],
            [0.2, 0.4],
            [0.5, 0.5],
            [0.4, 0.2],
            [5.0, 5.0],
            [6.0, 5.5],
            [5.5, 6.0]
        ];
        let y = array![0, 0, 0, 0, 0, 0, 1, 1, 1];
        (x, y)
    }

    #[test]
    fn balances_classes() {
        let (x, y) = imbalanced();
        let (xr, yr) = Smote::default().resample(x.view(), y.view()).unwrap();
        assert_eq!(xr.nrows(), 12);
        assert_eq!(yr.iter().filter(|&&l| l == 0).count(), 6);
        assert_eq!(yr.iter().filter(|&&l| l == 1).count(), 6);
    }

    #[test]
    fn original_rows_untouched() {
        let (x, y) = imbalanced();
        let (xr, yr) = Smote::default().resample(x.view(), y.view()).unwrap();
        assert_eq!(xr.slice(ndarray::s![..9, ..]), x);
        assert_eq!(yr.slice(ndarray::s![..9]), y);
    }

    #[test]
    fn synthetic_rows_lie_inside_minority_hull() {
        let (x, y) = imbalanced();
        let (xr, _) = Smote::new(2, 9).resample(x.view(), y.view()).unwrap();
        for row in xr.slice(ndarray::s![9.., ..]).rows() {
            assert!(row[0] >= 5.0 && row[0] <= 6.0);
            assert!(row[1] >= 5.0 && row[1] <= 6.0);
        }
    }

    #[test]
    fn deterministic_for_seed() {
        let (x, y) = imbalanced();
        let a = Smote::new(3, 11).resample(x.view(), y.view()).unwrap();
        let b = Smote::new(3, 11).resample(x.view(), y.view()).unwrap();
        assert_eq!(a.0, b.0);
    }

    #[test]
    fn single_minority_row_is_replicated() {
        let x = array![[0.0], [1.0], [2.0], [9.0]];
        let y = array![0, 0, 0, 1];
        let (xr, yr) = Smote::default().resample(x.view(), y.view()).unwrap();
        assert_eq!(yr.len(), 6);
        assert!(xr.slice(ndarray::s![4.., 0]).iter().all(|&v| v == 9.0));
    }

    #[test]
    fn missing_class_is_rejected() {
        let x = array![[0.0], [1.0]];
        let y = array![0, 0];
        assert!(Smote::default().resample(x.view(), y.view()).is_err());
    }
}
