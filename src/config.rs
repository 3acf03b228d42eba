//! Configuration management for the evaluation pipeline.

use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::Path;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub evaluation: EvaluationConfig,
    pub logging: LoggingConfig,
}

/// Object-storage settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Maximum accepted artifact size.
    #[serde(default = "default_max_upload_size_mb")]
    pub max_upload_size_mb: u64,
    /// Bucket holding model artifacts.
    pub models_bucket: String,
    /// Bucket holding dataset files.
    pub datasets_bucket: String,
}

/// Evaluation-run settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    /// Sample cap for explainability (background and explained sets).
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    /// Intra-op threads per ONNX inference session.
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
    /// Candidate sensitive-attribute column names, matched
    /// case-insensitively against dataset headers.
    #[serde(default = "default_sensitive_candidates")]
    pub sensitive_attribute_candidates: Vec<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log format (json, pretty).
    pub format: String,
}

fn default_max_upload_size_mb() -> u64 {
    1024
}

fn default_max_samples() -> usize {
    100
}

fn default_onnx_threads() -> usize {
    1
}

fn default_sensitive_candidates() -> Vec<String> {
    [
        "gender",
        "sex",
        "race",
        "ethnicity",
        "age_group",
        "religion",
        "nationality",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl AppConfig {
    /// Load configuration from the default file location.
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load configuration from a specific path.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                max_upload_size_mb: default_max_upload_size_mb(),
                models_bucket: "models".to_string(),
                datasets_bucket: "datasets".to_string(),
            },
            evaluation: EvaluationConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_samples: default_max_samples(),
            onnx_threads: default_onnx_threads(),
            sensitive_attribute_candidates: default_sensitive_candidates(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.storage.models_bucket, "models");
        assert_eq!(config.storage.max_upload_size_mb, 1024);
        assert_eq!(config.evaluation.max_samples, 100);
        assert!(config
            .evaluation
            .sensitive_attribute_candidates
            .contains(&"gender".to_string()));
    }

    #[test]
    fn test_load_from_toml_with_partial_evaluation_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[storage]
models_bucket = "models"
datasets_bucket = "datasets"

[evaluation]
max_samples = 25

[logging]
level = "debug"
format = "pretty"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from_path(&path).unwrap();
        assert_eq!(config.evaluation.max_samples, 25);
        // Unset fields fall back to defaults.
        assert_eq!(config.evaluation.onnx_threads, 1);
        assert_eq!(config.logging.level, "debug");
    }
}
