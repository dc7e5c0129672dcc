//! Stratified partitioning of rows into train/test sets and CV folds.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Array1<usize>,
    pub y_test: Array1<usize>,
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
}

fn rows_by_class(y: ArrayView1<'_, usize>) -> BTreeMap<usize, Vec<usize>> {
    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in y.iter().enumerate() {
        by_class.entry(label).or_default().push(i);
    }
    by_class
}

/// Per-class number of test rows summing to `n_test`.
fn allocate_test_counts(class_sizes: &[usize], n: usize, n_test: usize) -> Vec<usize> {
    let exact: Vec<f64> = class_sizes
        .iter()
        .map(|&size| size as f64 * n_test as f64 / n as f64)
        .collect();
    let mut counts: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();

    // every class with two or more rows appears on both sides
    for (count, &size) in counts.iter_mut().zip(class_sizes) {
        if size >= 2 {
            *count = (*count).clamp(1, size - 1);
        }
    }

    let mut total: usize = counts.iter().sum();
    while total > n_test {
        let shrinkable = (0..counts.len())
            .filter(|&c| counts[c] > 1 || (counts[c] == 1 && class_sizes[c] < 2))
            .max_by_key(|&c| counts[c]);
        match shrinkable {
            Some(c) => {
                counts[c] -= 1;
                total -= 1;
            }
            None => break,
        }
    }
    while total < n_test {
        let growable = (0..counts.len())
            .filter(|&c| counts[c] + 1 < class_sizes[c])
            .max_by(|&a, &b| {
                let rem_a = exact[a] - counts[a] as f64;
                let rem_b = exact[b] - counts[b] as f64;
                rem_a.total_cmp(&rem_b).then(b.cmp(&a))
            });
        match growable {
            Some(c) => {
                counts[c] += 1;
                total += 1;
            }
            None => break,
        }
    }
    counts
}

/// Splits rows so that each side keeps the class proportions of `y`.
///
/// Deterministic for a given `seed`. Indices on both sides are ascending.
pub fn stratified_split(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, usize>,
    test_fraction: f64,
    seed: u64,
) -> Result<TrainTestSplit> {
    let n = y.len();
    if x.nrows() != n {
        return Err(PipelineError::InvalidData(format!(
            "{} feature rows for {} labels",
            x.nrows(),
            n
        )));
    }
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(PipelineError::InvalidData(format!(
            "test fraction {} outside (0, 1)",
            test_fraction
        )));
    }
    if n < 2 {
        return Err(PipelineError::InvalidData(format!("cannot split {} rows", n)));
    }

    let n_test = ((test_fraction * n as f64).ceil() as usize).clamp(1, n - 1);
    let by_class = rows_by_class(y);
    let sizes: Vec<usize> = by_class.values().map(Vec::len).collect();
    let test_counts = allocate_test_counts(&sizes, n, n_test);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train_indices = Vec::with_capacity(n - n_test);
    let mut test_indices = Vec::with_capacity(n_test);
    for (rows, &n_class_test) in by_class.values().zip(&test_counts) {
        let mut shuffled = rows.clone();
        shuffled.shuffle(&mut rng);
        let (test, train) = shuffled.split_at(n_class_test);
        test_indices.extend_from_slice(test);
        train_indices.extend_from_slice(train);
    }
    train_indices.sort_unstable();
    test_indices.sort_unstable();

    info!(
        train_rows = train_indices.len(),
        test_rows = test_indices.len(),
        train_fraud = train_indices.iter().filter(|&&i| y[i] == 1).count(),
        test_fraud = test_indices.iter().filter(|&&i| y[i] == 1).count(),
        "stratified split"
    );

    Ok(TrainTestSplit {
        x_train: x.select(Axis(0), &train_indices),
        x_test: x.select(Axis(0), &test_indices),
        y_train: y.select(Axis(0), &train_indices),
        y_test: y.select(Axis(0), &test_indices),
        train_indices,
        test_indices,
    })
}

/// Stratified k-fold without shuffling: each class's rows are dealt to the
/// folds in order. Returns `(train, validation)` index pairs.
pub fn stratified_folds(y: ArrayView1<'_, usize>, k: usize) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
    if k < 2 {
        return Err(PipelineError::InvalidParameter {
            name: "folds".into(),
            reason: format!("need at least 2 folds, got {}", k),
        });
    }
    if y.len() < k {
        return Err(PipelineError::InvalidData(format!(
            "cannot make {} folds from {} rows",
            k,
            y.len()
        )));
    }

    let mut fold_of = vec![0usize; y.len()];
    let mut next = 0usize;
    for rows in rows_by_class(y).values() {
        for &row in rows {
            fold_of[row] = next % k;
            next += 1;
        }
    }

    Ok((0..k)
        .map(|fold| {
            let (valid, train): (Vec<usize>, Vec<usize>) =
                (0..y.len()).partition(|&i| fold_of[i] == fold);
            (train, valid)
        })
        .collect())
}
