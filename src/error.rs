//! Error taxonomy for the evaluation pipeline.

use crate::types::task::{ModelFramework, TaskType};
use std::fmt;
use thiserror::Error;

/// One failed attempt within a load-strategy cascade.
#[derive(Debug, Clone)]
pub struct LoadAttempt {
    /// Name of the strategy that was tried.
    pub strategy: &'static str,
    /// Why it failed.
    pub reason: String,
}

impl fmt::Display for LoadAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.reason)
    }
}

/// Errors surfaced by the evaluation pipeline.
///
/// `Load`, `UnsupportedCombination`, and `DataContract` are client-input
/// errors: the uploaded artifact or dataset needs to change. The remaining
/// variants are platform faults.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Model deserialization exhausted every fallback strategy.
    #[error("failed to load model artifact; attempts:\n{}", format_attempts(.attempts))]
    Load { attempts: Vec<LoadAttempt> },

    /// No evaluation path is defined for this (task type, framework) pair.
    #[error("no evaluation path for task '{task}' with framework '{framework}'")]
    UnsupportedCombination {
        task: TaskType,
        framework: ModelFramework,
    },

    /// Dataset does not satisfy the structural contract of the task.
    #[error("dataset contract violation: {0}")]
    DataContract(String),

    /// Inference against the loaded model failed.
    #[error("inference failed: {0}")]
    Inference(String),

    #[error("storage record not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl EvalError {
    /// Whether the error calls for user action (re-export the model,
    /// fix the dataset) rather than indicating a platform fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EvalError::Load { .. }
                | EvalError::UnsupportedCombination { .. }
                | EvalError::DataContract(_)
        )
    }
}

fn format_attempts(attempts: &[LoadAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("  - {a}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_enumerates_attempts() {
        let err = EvalError::Load {
            attempts: vec![
                LoadAttempt {
                    strategy: "strict",
                    reason: "invalid utf-8".to_string(),
                },
                LoadAttempt {
                    strategy: "latin1",
                    reason: "unknown variant".to_string(),
                },
            ],
        };

        let msg = err.to_string();
        assert!(msg.contains("strict: invalid utf-8"));
        assert!(msg.contains("latin1: unknown variant"));
    }

    #[test]
    fn test_client_error_classification() {
        assert!(EvalError::DataContract("missing target".into()).is_client_error());
        assert!(!EvalError::Inference("shape mismatch".into()).is_client_error());
    }
}
