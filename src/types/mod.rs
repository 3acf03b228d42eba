//! Type definitions for the evaluation pipeline.

pub mod report;
pub mod task;

pub use report::{
    EvaluationReport, Explanation, FairnessReport, MetaEvaluation, RawMetrics, UnifiedScore,
};
pub use task::{ModelFramework, TaskType};
