//! Model Evaluation Pipeline - Command-line entry point
//!
//! Runs one evaluation over local model and dataset files and prints the
//! full report as JSON.

use anyhow::Result;
use clap::Parser;
use model_eval_pipeline::{
    config::AppConfig,
    pipeline::{EvaluationPipeline, EvaluationRequest},
    types::report::RawMetrics,
    types::task::{ModelFramework, TaskType},
};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(
    name = "model-eval-pipeline",
    about = "Evaluate an ML model artifact against a CSV dataset"
)]
struct Args {
    /// Path to the model artifact.
    model: PathBuf,

    /// Path to the dataset CSV.
    dataset: PathBuf,

    /// Task type: classification, regression, nlp, or cv.
    #[arg(long, value_parser = parse_task)]
    task: TaskType,

    /// Declared framework (native, network_binary, network_json, onnx).
    /// Detected from the file extension when omitted.
    #[arg(long, value_parser = parse_framework)]
    framework: Option<ModelFramework>,

    /// Target column; defaults to the last dataset column.
    #[arg(long)]
    target_column: Option<String>,

    /// Sensitive attribute column for fairness analysis.
    #[arg(long)]
    sensitive_attribute: Option<String>,

    /// JSON file holding training-set metrics for the overfitting check.
    #[arg(long)]
    train_metrics: Option<PathBuf>,

    /// Configuration file path.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_task(s: &str) -> Result<TaskType, String> {
    s.parse()
}

fn parse_framework(s: &str) -> Result<ModelFramework, String> {
    s.parse()
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                format!("model_eval_pipeline={}", config.logging.level).parse()?,
            ),
        )
        .init();

    info!("Starting model evaluation pipeline");

    let train_metrics: Option<RawMetrics> = match &args.train_metrics {
        Some(path) => {
            let bytes = std::fs::read(path)?;
            Some(serde_json::from_slice(&bytes)?)
        }
        None => None,
    };

    let pipeline = EvaluationPipeline::new(config.evaluation.clone());
    let request = EvaluationRequest {
        model_path: args.model,
        dataset_path: args.dataset,
        task_type: args.task,
        framework: args.framework,
        target_column: args.target_column,
        sensitive_attribute: args.sensitive_attribute,
        dataset_sensitive_attribute: None,
        train_metrics,
    };

    match pipeline.evaluate(&request) {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) if e.is_client_error() => {
            // The artifact or dataset needs user action; not a platform fault.
            error!(error = %e, "Evaluation rejected: fix the uploaded artifact or dataset");
            std::process::exit(2);
        }
        Err(e) => {
            error!(error = %e, "Evaluation failed");
            std::process::exit(1);
        }
    }
}
