//! Model Evaluation Pipeline Library
//!
//! Evaluates uploaded machine-learning models against tabular datasets
//! across serialization frameworks: task-specific metrics, a unified
//! comparability score, a meta production-readiness assessment,
//! explainability, and group-fairness analysis.

pub mod config;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod explain;
pub mod fairness;
pub mod models;
pub mod pipeline;
pub mod storage;
pub mod types;

pub use config::AppConfig;
pub use dataset::Dataset;
pub use error::EvalError;
pub use eval::{MetaEvaluator, MetricCalculator, ScoreNormalizer};
pub use explain::ExplainabilityEngine;
pub use fairness::FairnessEngine;
pub use models::ModelLoader;
pub use pipeline::{EvaluationPipeline, EvaluationRequest};
pub use types::{EvaluationReport, ModelFramework, RawMetrics, TaskType};
