//! End-to-end training run: load, preprocess, split, balance, train every
//! model family, evaluate on the held-out rows and save the chosen model.

use std::path::PathBuf;
use std::time::Instant;

use ndarray::{ArrayView1, ArrayView2};
use tracing::{info, warn};

use crate::config::{FinalModel, PipelineConfig};
use crate::csv_reader::read_table;
use crate::error::{PipelineError, Result};
use crate::metrics::{evaluate, Metrics};
use crate::models::{
    class_weight_ratio, BoostedTreeClassifier, Classifier, Estimator, LinearClassifier,
    RandomForestClassifier, StackedClassifier,
};
use crate::persist::{self, ModelArtifact};
use crate::preprocess::FeaturePreprocessor;
use crate::search::{validate_grid, ModelFamily, ParamSet, RandomizedSearch};
use crate::smote::Smote;
use crate::split::stratified_split;
use crate::summary::{summarize, DatasetSummary};

#[derive(Debug, Clone)]
pub struct ModelReport {
    pub name: String,
    pub family: &'static str,
    pub metrics: Metrics,
}

#[derive(Debug, Clone)]
pub struct SearchReport {
    pub name: String,
    pub best_params: ParamSet,
    /// Mean cross-validated ROC AUC of the best candidate
    pub best_score: f64,
    pub candidates: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub summary: DatasetSummary,
    pub train_rows: usize,
    pub test_rows: usize,
    pub balanced_rows: usize,
    pub models: Vec<ModelReport>,
    pub searches: Vec<SearchReport>,
    pub saved_model: String,
    pub artifact_path: PathBuf,
}

/// Loads the configured dataset and reports its summary without training.
pub fn describe_dataset(config: &PipelineConfig) -> Result<DatasetSummary> {
    let table = read_table(&config.data_path, &[config.label_column.as_str()])?;
    summarize(&table, &config.label_column)
}

fn fit_model(
    name: &str,
    mut estimator: Estimator,
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, usize>,
) -> Result<Estimator> {
    let started = Instant::now();
    estimator.fit(x, y)?;
    info!(
        model = name,
        family = estimator.family(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "trained model"
    );
    Ok(estimator)
}

/// Picks the model written to the artifact.
fn choose_final(
    choice: FinalModel,
    trained: Vec<(String, Estimator)>,
    reports: &[ModelReport],
) -> Result<(String, Estimator, Metrics)> {
    let index = match choice {
        FinalModel::Stacked => reports.iter().position(|r| r.family == "stacked"),
        FinalModel::BestRocAuc => reports
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.metrics.roc_auc.map(|auc| (i, auc)))
            .fold(None::<(usize, f64)>, |best, (i, auc)| match best {
                Some((_, b)) if b >= auc => best,
                _ => Some((i, auc)),
            })
            .map(|(i, _)| i)
            .or_else(|| reports.iter().position(|r| r.family == "stacked")),
    };
    let index = index.ok_or_else(|| PipelineError::Training("no model available to save".into()))?;
    let metrics = reports[index].metrics.clone();
    let (name, estimator) = trained
        .into_iter()
        .nth(index)
        .ok_or_else(|| PipelineError::Training("no model available to save".into()))?;
    Ok((name, estimator, metrics))
}

// Runs the full training pipeline
// Inputs: pipeline configuration
// Outputs: report with dataset summary, per-model test metrics and the artifact path
// Key steps:
// 1. Load the CSV and summarize it
// 2. Drop and standardize columns, split off the label
// 3. Stratified train/test split, then oversample the training side only
// 4. Train baseline, forest, boosted trees, both searches and the stack
// 5. Evaluate everything on the untouched test rows and save the chosen model
pub fn run(config: &PipelineConfig) -> Result<PipelineReport> {
    config.validate()?;
    // fail on a misconfigured search before anything is trained
    validate_grid(&config.forest_grid)?;
    validate_grid(&config.boosting_grid)?;

    let table = read_table(&config.data_path, &[config.label_column.as_str()])?;
    let summary = summarize(&table, &config.label_column)?;

    let mut pre = FeaturePreprocessor::new(table);
    for column in &config.drop_columns {
        pre.drop_column(column)?;
    }
    for column in &config.standardize_columns {
        pre.standardize(column)?;
    }
    let features = pre.split_features_label(&config.label_column)?;

    let split = stratified_split(features.x.view(), features.y.view(), config.test_fraction, config.seed)?;
    let (x_bal, y_bal) =
        Smote::new(config.smote_k, config.seed).resample(split.x_train.view(), split.y_train.view())?;
    info!(
        balanced_rows = y_bal.len(),
        fraud_rows = y_bal.iter().filter(|&&l| l == 1).count(),
        "training set balanced"
    );

    let pos_weight = class_weight_ratio(y_bal.view())?;
    let boosting = {
        let mut p = config.boosting.clone();
        p.scale_pos_weight = pos_weight;
        p
    };

    let mut trained: Vec<(String, Estimator)> = Vec::new();
    trained.push((
        "logistic_regression".into(),
        fit_model(
            "logistic_regression",
            LinearClassifier::new(config.linear.clone()).into(),
            x_bal.view(),
            y_bal.view(),
        )?,
    ));
    trained.push((
        "random_forest".into(),
        fit_model(
            "random_forest",
            RandomForestClassifier::new(config.forest.clone()).into(),
            x_bal.view(),
            y_bal.view(),
        )?,
    ));
    trained.push((
        "boosted_trees".into(),
        fit_model(
            "boosted_trees",
            BoostedTreeClassifier::new(boosting.clone()).into(),
            x_bal.view(),
            y_bal.view(),
        )?,
    ));

    let search = RandomizedSearch::new(config.search.folds, config.search.iterations, config.seed);
    let mut searches = Vec::new();
    for (name, family, grid) in [
        (
            "random_forest_tuned",
            ModelFamily::RandomForest(config.forest.clone()),
            &config.forest_grid,
        ),
        (
            "boosted_trees_tuned",
            ModelFamily::BoostedTrees(boosting.clone()),
            &config.boosting_grid,
        ),
    ] {
        let started = Instant::now();
        let outcome = search.search(&family, grid, x_bal.view(), y_bal.view())?;
        info!(
            model = name,
            best_roc_auc = outcome.best_score,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search finished"
        );
        searches.push(SearchReport {
            name: name.to_string(),
            best_params: outcome.best_params,
            best_score: outcome.best_score,
            candidates: outcome.candidates.len(),
        });
        trained.push((name.to_string(), outcome.best_estimator));
    }

    let stacking = {
        let mut p = config.stacking.clone();
        p.base.scale_pos_weight = pos_weight;
        p
    };
    trained.push((
        "stacked".into(),
        fit_model(
            "stacked",
            StackedClassifier::new(stacking).into(),
            x_bal.view(),
            y_bal.view(),
        )?,
    ));

    let mut models = Vec::with_capacity(trained.len());
    for (name, estimator) in &trained {
        let metrics = evaluate(estimator, split.x_test.view(), split.y_test.view())?;
        match metrics.roc_auc {
            Some(auc) => info!(
                model = %name,
                accuracy = metrics.accuracy,
                precision = metrics.precision,
                recall = metrics.recall,
                f1 = metrics.f1,
                roc_auc = auc,
                "test metrics"
            ),
            None => warn!(model = %name, "test partition holds one class, ROC AUC undefined"),
        }
        models.push(ModelReport {
            name: name.clone(),
            family: estimator.family(),
            metrics,
        });
    }

    let (saved_model, estimator, metrics) = choose_final(config.final_model, trained, &models)?;
    let artifact = ModelArtifact {
        model_name: saved_model.clone(),
        feature_names: features.feature_names.clone(),
        scaling: pre.scaling().clone(),
        estimator,
        metrics: Some(metrics),
    };
    persist::save(&artifact, &config.artifact_path)?;

    Ok(PipelineReport {
        summary,
        train_rows: split.y_train.len(),
        test_rows: split.y_test.len(),
        balanced_rows: y_bal.len(),
        models,
        searches,
        saved_model,
        artifact_path: config.artifact_path.clone(),
    })
}
