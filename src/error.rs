//! Error taxonomy shared by every pipeline stage.

use thiserror::Error;

/// Errors raised while loading, training, evaluating or serving a model.
///
/// Every variant aborts the current run; nothing is retried locally.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to load dataset: {0}")]
    DataLoad(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("hyperparameter grid has no candidates for `{0}`")]
    EmptyGrid(String),

    #[error("model artifact error: {0}")]
    Serialization(String),

    #[error("feature vector has {actual} values, expected {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("estimator has not been fitted")]
    NotFitted,

    #[error("training failed: {0}")]
    Training(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::DataLoad(err.to_string())
    }
}

impl From<bincode::Error> for PipelineError {
    fn from(err: bincode::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}
