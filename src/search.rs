//! Randomized hyperparameter search with stratified cross-validation.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{ArrayView1, ArrayView2, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::metrics::roc_auc_score;
use crate::models::{
    BoostedTreeClassifier, BoostingParams, Classifier, Estimator, ForestParams, LinearClassifier,
    LinearParams, RandomForestClassifier,
};
use crate::split::stratified_folds;

/// One candidate value of a hyperparameter.
///
/// `Unbounded` lifts a limit such as `max_depth`; in config files it is
/// written as the string `"none"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawParamValue", into = "RawParamValue")]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Unbounded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl TryFrom<RawParamValue> for ParamValue {
    type Error = String;

    fn try_from(raw: RawParamValue) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawParamValue::Int(v) => Ok(ParamValue::Int(v)),
            RawParamValue::Float(v) => Ok(ParamValue::Float(v)),
            RawParamValue::Text(s) if s.eq_ignore_ascii_case("none") => Ok(ParamValue::Unbounded),
            RawParamValue::Text(s) => Err(format!("unsupported parameter value `{}`", s)),
        }
    }
}

impl From<ParamValue> for RawParamValue {
    fn from(value: ParamValue) -> Self {
        match value {
            ParamValue::Int(v) => RawParamValue::Int(v),
            ParamValue::Float(v) => RawParamValue::Float(v),
            ParamValue::Unbounded => RawParamValue::Text("none".into()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Unbounded => write!(f, "none"),
        }
    }
}

/// Candidate values per parameter name.
pub type ParamGrid = BTreeMap<String, Vec<ParamValue>>;

/// One sampled combination.
pub type ParamSet = BTreeMap<String, ParamValue>;

fn invalid(name: &str, reason: impl Into<String>) -> PipelineError {
    PipelineError::InvalidParameter {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn as_usize(name: &str, value: ParamValue) -> Result<usize> {
    match value {
        ParamValue::Int(v) if v >= 0 => Ok(v as usize),
        other => Err(invalid(name, format!("expected a non-negative integer, got {}", other))),
    }
}

fn as_limit(name: &str, value: ParamValue) -> Result<Option<usize>> {
    match value {
        ParamValue::Unbounded => Ok(None),
        other => as_usize(name, other).map(Some),
    }
}

fn as_f64(name: &str, value: ParamValue) -> Result<f64> {
    match value {
        ParamValue::Float(v) => Ok(v),
        ParamValue::Int(v) => Ok(v as f64),
        ParamValue::Unbounded => Err(invalid(name, "expected a number, got none")),
    }
}

/// Estimator family searched over, with the configuration that sampled
/// parameters override.
#[derive(Debug, Clone)]
pub enum ModelFamily {
    Logistic(LinearParams),
    RandomForest(ForestParams),
    BoostedTrees(BoostingParams),
}

impl ModelFamily {
    /// Unfitted estimator with `params` applied over the base configuration.
    pub fn build(&self, params: &ParamSet) -> Result<Estimator> {
        match self {
            ModelFamily::Logistic(base) => {
                let mut p = base.clone();
                for (name, &value) in params {
                    match name.as_str() {
                        "alpha" => p.alpha = as_f64(name, value)?,
                        "max_iterations" => p.max_iterations = as_usize(name, value)? as u64,
                        _ => return Err(invalid(name, "unknown logistic regression parameter")),
                    }
                }
                Ok(LinearClassifier::new(p).into())
            }
            ModelFamily::RandomForest(base) => {
                let mut p = base.clone();
                for (name, &value) in params {
                    match name.as_str() {
                        "n_estimators" => p.n_estimators = as_usize(name, value)?,
                        "max_depth" => p.max_depth = as_limit(name, value)?,
                        "min_samples_split" => p.min_samples_split = as_usize(name, value)?,
                        "min_samples_leaf" => p.min_samples_leaf = as_usize(name, value)?,
                        "max_features" => p.max_features = as_limit(name, value)?,
                        _ => return Err(invalid(name, "unknown random forest parameter")),
                    }
                }
                Ok(RandomForestClassifier::new(p).into())
            }
            ModelFamily::BoostedTrees(base) => {
                let mut p = base.clone();
                for (name, &value) in params {
                    match name.as_str() {
                        "n_estimators" => p.n_estimators = as_usize(name, value)?,
                        "max_depth" => p.max_depth = as_usize(name, value)?,
                        "learning_rate" => p.learning_rate = as_f64(name, value)?,
                        "subsample" => p.subsample = as_f64(name, value)?,
                        "colsample_bytree" => p.colsample_bytree = as_f64(name, value)?,
                        "lambda" => p.lambda = as_f64(name, value)?,
                        "min_child_weight" => p.min_child_weight = as_f64(name, value)?,
                        "scale_pos_weight" => p.scale_pos_weight = as_f64(name, value)?,
                        _ => return Err(invalid(name, "unknown boosted trees parameter")),
                    }
                }
                Ok(BoostedTreeClassifier::new(p).into())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CandidateScore {
    pub params: ParamSet,
    pub fold_scores: Vec<f64>,
    pub mean_score: f64,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best_params: ParamSet,
    pub best_score: f64,
    /// Best candidate refitted on all of the search data.
    pub best_estimator: Estimator,
    pub candidates: Vec<CandidateScore>,
}

#[derive(Debug, Clone)]
pub struct RandomizedSearch {
    pub folds: usize,
    pub iterations: usize,
    pub seed: u64,
}

impl Default for RandomizedSearch {
    fn default() -> Self {
        Self {
            folds: 3,
            iterations: 5,
            seed: 42,
        }
    }
}

/// Fails on the first parameter with no candidates.
pub fn validate_grid(grid: &ParamGrid) -> Result<()> {
    match grid.iter().find(|(_, values)| values.is_empty()) {
        Some((name, _)) => Err(PipelineError::EmptyGrid(name.clone())),
        None => Ok(()),
    }
}

/// Decodes `index` as a mixed-radix number over the grid's value lists.
fn combination_at(grid: &ParamGrid, mut index: usize) -> ParamSet {
    let mut params = ParamSet::new();
    for (name, values) in grid.iter().rev() {
        params.insert(name.clone(), values[index % values.len()]);
        index /= values.len();
    }
    params
}

/// Up to `n` distinct combinations, drawn without listing the whole grid.
pub fn sample_combinations(grid: &ParamGrid, n: usize, seed: u64) -> Result<Vec<ParamSet>> {
    validate_grid(grid)?;
    let total = grid
        .values()
        .try_fold(1usize, |acc, values| acc.checked_mul(values.len()))
        .ok_or_else(|| invalid("grid", "too many combinations"))?;
    let amount = n.min(total);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Ok(rand::seq::index::sample(&mut rng, total, amount)
        .into_iter()
        .map(|i| combination_at(grid, i))
        .collect())
}

fn format_params(params: &ParamSet) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

impl RandomizedSearch {
    pub fn new(folds: usize, iterations: usize, seed: u64) -> Self {
        Self {
            folds,
            iterations,
            seed,
        }
    }

    /// Mean validation ROC AUC of one candidate across the folds.
    fn score_candidate(
        &self,
        family: &ModelFamily,
        params: &ParamSet,
        folds: &[(Vec<usize>, Vec<usize>)],
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, usize>,
    ) -> Result<CandidateScore> {
        let mut fold_scores = Vec::with_capacity(folds.len());
        for (train, valid) in folds {
            let mut estimator = family.build(params)?;
            estimator.fit(x.select(Axis(0), train).view(), y.select(Axis(0), train).view())?;
            let scores = estimator.predict_proba(x.select(Axis(0), valid).view())?;
            let y_valid = y.select(Axis(0), valid);
            let auc = roc_auc_score(y_valid.view(), scores.view())
                .ok_or_else(|| PipelineError::InvalidData("validation fold holds a single class".into()))?;
            fold_scores.push(auc);
        }
        let mean_score = fold_scores.iter().sum::<f64>() / fold_scores.len() as f64;
        Ok(CandidateScore {
            params: params.clone(),
            fold_scores,
            mean_score,
        })
    }

    /// Samples combinations from `grid`, keeps the one with the best mean
    /// cross-validated ROC AUC, and refits it on all of `x`/`y`.
    ///
    /// Only the rows passed in are ever used; callers pass the training side.
    pub fn search(
        &self,
        family: &ModelFamily,
        grid: &ParamGrid,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, usize>,
    ) -> Result<SearchOutcome> {
        validate_grid(grid)?;
        if self.iterations == 0 {
            return Err(invalid("iterations", "must be at least 1"));
        }
        if x.nrows() != y.len() {
            return Err(PipelineError::InvalidData(format!(
                "{} feature rows for {} labels",
                x.nrows(),
                y.len()
            )));
        }

        let combinations = sample_combinations(grid, self.iterations, self.seed)?;
        let folds = stratified_folds(y, self.folds)?;

        let candidates: Vec<CandidateScore> = combinations
            .par_iter()
            .map(|params| self.score_candidate(family, params, &folds, x, y))
            .collect::<Result<Vec<_>>>()?;

        for candidate in &candidates {
            info!(
                params = %format_params(&candidate.params),
                mean_roc_auc = candidate.mean_score,
                "search candidate"
            );
        }

        let best = candidates
            .iter()
            .fold(None::<&CandidateScore>, |best, c| match best {
                Some(b) if b.mean_score >= c.mean_score => Some(b),
                _ => Some(c),
            })
            .ok_or_else(|| invalid("grid", "no candidates sampled"))?
            .clone();

        let mut best_estimator = family.build(&best.params)?;
        best_estimator.fit(x, y)?;

        info!(
            params = %format_params(&best.params),
            mean_roc_auc = best.mean_score,
            "search selected best candidate"
        );

        Ok(SearchOutcome {
            best_params: best.params,
            best_score: best.mean_score,
            best_estimator,
            candidates,
        })
    }
}
