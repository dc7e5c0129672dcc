//! Pipeline configuration. Every field has a default matching the reference
//! notebook run; a TOML file only needs the values it changes.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::models::{BoostingParams, ForestParams, LinearParams, StackingParams};
use crate::search::{ParamGrid, ParamValue};

/// Which fitted model is written to the artifact.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FinalModel {
    #[default]
    Stacked,
    /// Whichever evaluated model has the highest test ROC AUC
    BestRocAuc,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub folds: usize,
    pub iterations: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            folds: 3,
            iterations: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_path: PathBuf,
    pub artifact_path: PathBuf,
    pub label_column: String,
    pub drop_columns: Vec<String>,
    /// Columns standardized before the split, in addition to the baseline's
    /// internal scaling
    pub standardize_columns: Vec<String>,
    pub test_fraction: f64,
    pub seed: u64,
    pub smote_k: usize,
    pub search: SearchConfig,
    /// Baseline logistic regression
    pub linear: LinearParams,
    pub forest: ForestParams,
    pub boosting: BoostingParams,
    pub forest_grid: ParamGrid,
    pub boosting_grid: ParamGrid,
    pub stacking: StackingParams,
    pub final_model: FinalModel,
    /// Default tracing directive; `RUST_LOG` takes precedence
    pub log_level: String,
}

fn ints(values: &[i64]) -> Vec<ParamValue> {
    values.iter().map(|&v| ParamValue::Int(v)).collect()
}

fn floats(values: &[f64]) -> Vec<ParamValue> {
    values.iter().map(|&v| ParamValue::Float(v)).collect()
}

pub fn default_forest_grid() -> ParamGrid {
    let mut grid = ParamGrid::new();
    grid.insert("n_estimators".into(), ints(&[100, 200]));
    grid.insert(
        "max_depth".into(),
        vec![ParamValue::Unbounded, ParamValue::Int(10), ParamValue::Int(20)],
    );
    grid.insert("min_samples_split".into(), ints(&[2, 5]));
    grid
}

pub fn default_boosting_grid() -> ParamGrid {
    let mut grid = ParamGrid::new();
    grid.insert("n_estimators".into(), ints(&[100, 200]));
    grid.insert("max_depth".into(), ints(&[3, 5]));
    grid.insert("learning_rate".into(), floats(&[0.05, 0.1]));
    grid.insert("subsample".into(), floats(&[0.7, 0.8, 0.9]));
    grid.insert("colsample_bytree".into(), floats(&[0.7, 0.8, 0.9]));
    grid
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("creditcard.csv"),
            artifact_path: PathBuf::from("fraud_detection_model.bin"),
            label_column: "Class".to_string(),
            drop_columns: vec!["Time".to_string()],
            standardize_columns: vec!["Amount".to_string()],
            test_fraction: 0.2,
            seed: 42,
            smote_k: 5,
            search: SearchConfig::default(),
            linear: LinearParams {
                standardize: true,
                ..LinearParams::default()
            },
            forest: ForestParams::default(),
            boosting: BoostingParams {
                subsample: 0.8,
                colsample_bytree: 0.8,
                ..BoostingParams::default()
            },
            forest_grid: default_forest_grid(),
            boosting_grid: default_boosting_grid(),
            stacking: StackingParams::default(),
            final_model: FinalModel::Stacked,
            log_level: "info".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Reads a TOML file over the defaults, then `FRAUD_PIPELINE__*`
    /// environment overrides (e.g. `FRAUD_PIPELINE__SEED=7`).
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("FRAUD_PIPELINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |name: &str, reason: &str| PipelineError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        };
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(invalid("test_fraction", "must be in (0, 1)"));
        }
        if self.smote_k == 0 {
            return Err(invalid("smote_k", "must be at least 1"));
        }
        if self.search.folds < 2 {
            return Err(invalid("search.folds", "must be at least 2"));
        }
        if self.search.iterations == 0 {
            return Err(invalid("search.iterations", "must be at least 1"));
        }
        if self.stacking.cv_folds < 2 {
            return Err(invalid("stacking.cv_folds", "must be at least 2"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // FRAUD_PIPELINE__* variables are process-wide; loads take this lock
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_guard() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn toml_file(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_follow_reference_run() {
        let config = PipelineConfig::default();
        assert_eq!(config.label_column, "Class");
        assert_eq!(config.drop_columns, vec!["Time"]);
        assert_eq!(config.test_fraction, 0.2);
        assert_eq!(config.seed, 42);
        assert_eq!(config.search, SearchConfig { folds: 3, iterations: 5 });
        assert_eq!(config.forest_grid.values().map(Vec::len).product::<usize>(), 12);
        assert_eq!(config.boosting_grid.values().map(Vec::len).product::<usize>(), 72);
        assert_eq!(config.final_model, FinalModel::Stacked);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_overrides_only_given_values() {
        let _env = env_guard();
        let file = toml_file(
            r#"
data_path = "data/cards.csv"
seed = 7
final_model = "best_roc_auc"

[search]
iterations = 2

[boosting]
max_depth = 3

[forest_grid]
max_depth = ["none", 4]
"#,
        );
        let config = PipelineConfig::load_from_path(file.path()).unwrap();

        assert_eq!(config.data_path, PathBuf::from("data/cards.csv"));
        assert_eq!(config.seed, 7);
        assert_eq!(config.final_model, FinalModel::BestRocAuc);
        assert_eq!(config.search.iterations, 2);
        assert_eq!(config.search.folds, 3);
        assert_eq!(config.boosting.max_depth, 3);
        assert_eq!(config.boosting.learning_rate, 0.1);
        assert_eq!(
            config.forest_grid["max_depth"],
            vec![ParamValue::Unbounded, ParamValue::Int(4)]
        );
        assert_eq!(config.label_column, "Class");
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let _env = env_guard();
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/pipeline.toml");
        let config = PipelineConfig::load_from_path(path).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let _env = env_guard();
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn out_of_range_fraction_rejected() {
        let _env = env_guard();
        let file = toml_file("test_fraction = 1.5\n");
        let err = PipelineConfig::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidParameter { .. }));
    }

    #[test]
    fn environment_overrides_file() {
        let _env = env_guard();
        let file = toml_file("seed = 7\n\n[search]\niterations = 2\n");
        std::env::set_var("FRAUD_PIPELINE__SEED", "11");
        std::env::set_var("FRAUD_PIPELINE__SEARCH__FOLDS", "4");
        let loaded = PipelineConfig::load_from_path(file.path());
        std::env::remove_var("FRAUD_PIPELINE__SEED");
        std::env::remove_var("FRAUD_PIPELINE__SEARCH__FOLDS");

        let config = loaded.unwrap();
        assert_eq!(config.seed, 11);
        assert_eq!(config.search, SearchConfig { folds: 4, iterations: 2 });
    }
}
