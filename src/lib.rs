//! Offline training and evaluation pipeline for credit card fraud detection.
//!
//! Loads a transaction CSV, standardizes and splits it, balances the
//! training side with SMOTE, trains logistic regression, random forest,
//! boosted trees and a stacked model, evaluates them on held-out rows and
//! saves the chosen model together with its preprocessing.

pub mod config;
pub mod csv_reader;
pub mod error;
pub mod metrics;
pub mod models;
pub mod persist;
pub mod pipeline;
pub mod predictor;
pub mod preprocess;
pub mod search;
pub mod smote;
pub mod split;
pub mod summary;


pub use error::{PipelineError, Result};
