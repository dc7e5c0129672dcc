// Command-line entry point: trains the fraud models, describes a dataset, or scores one transaction.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fraud_pipeline::config::PipelineConfig;
use fraud_pipeline::pipeline::{self, PipelineReport};
use fraud_pipeline::predictor::{FraudPredictor, PredictorConfig};
use fraud_pipeline::summary::DatasetSummary;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fraud_pipeline")]
#[command(about = "Credit card fraud model training and scoring", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train every model family and save the chosen one
    Train {
        /// TOML file layered over the built-in defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the dataset summary without training
    Describe {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Score one raw transaction with a saved model
    Predict {
        #[arg(short, long)]
        artifact: PathBuf,

        /// Comma-separated feature values in training column order
        #[arg(short, long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        features: Vec<f64>,
    },
}

// Installs the fmt subscriber; RUST_LOG wins over the configured level
fn init_logging(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .with_context(|| format!("invalid log level `{}`", default_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load_from_path(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

// Prints class balance, column statistics and the strongest label correlations
fn print_summary(summary: &DatasetSummary) {
    println!("Rows: {}", summary.rows);
    println!("\nClass distribution:");
    for share in &summary.classes {
        println!("  {}: {} ({:.3}%)", share.class, share.count, share.percentage);
    }
    if summary.invalid_labels > 0 {
        println!("  labels other than 0 or 1: {}", summary.invalid_labels);
    }

    println!("\n{:>10} {:>8} {:>12} {:>12} {:>12} {:>12} {:>12}", "column", "count", "mean", "std", "min", "median", "max");
    for col in &summary.columns {
        println!(
            "{:>10} {:>8} {:>12.4} {:>12.4} {:>12.4} {:>12.4} {:>12.4}",
            col.name, col.count, col.mean, col.std, col.min, col.median, col.max
        );
    }

    let missing: usize = summary.missing.iter().map(|(_, n)| n).sum();
    println!("\nMissing values: {}", missing);
    if let Some(outliers) = summary.amount_outliers {
        println!("Amount outliers (IQR): {}", outliers);
    }

    println!("\nCorrelation with label (top 5):");
    for (name, corr) in summary.correlations.iter().take(5) {
        println!("  {:>10} {:>8.4}", name, corr);
    }
}

fn print_report(report: &PipelineReport) {
    println!(
        "\nTrain rows: {} (balanced to {}), test rows: {}",
        report.train_rows, report.balanced_rows, report.test_rows
    );

    for search in &report.searches {
        let params: Vec<String> = search.best_params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        println!(
            "\n{}: best CV ROC AUC {:.4} over {} candidates [{}]",
            search.name,
            search.best_score,
            search.candidates,
            params.join(", ")
        );
    }

    for model in &report.models {
        println!("\n=== {} ({}) ===", model.name, model.family);
        println!("{}", model.metrics);
    }

    println!("\nSaved {} to {}", report.saved_model, report.artifact_path.display());
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Train { config } => {
            let config = load_config(config.as_deref())?;
            init_logging(&config.log_level)?;
            info!(data = %config.data_path.display(), "starting training run");
            let report = pipeline::run(&config).context("training run failed")?;
            print_summary(&report.summary);
            print_report(&report);
        }
        Commands::Describe { config } => {
            let config = load_config(config.as_deref())?;
            init_logging(&config.log_level)?;
            let summary = pipeline::describe_dataset(&config)
                .with_context(|| format!("failed to describe {}", config.data_path.display()))?;
            print_summary(&summary);
        }
        Commands::Predict { artifact, features } => {
            init_logging("info")?;
            let predictor = FraudPredictor::from_config(&PredictorConfig { artifact_path: artifact })
                .context("failed to load model artifact")?;
            let prediction = predictor.predict(&features)?;
            println!(
                "Model: {}\nPrediction: {} (fraud probability {:.4})",
                predictor.model_name(),
                if prediction.label == 1 { "fraud" } else { "legitimate" },
                prediction.fraud_probability
            );
        }
    }

    Ok(())
}
