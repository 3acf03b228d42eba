//! Evaluation pipeline orchestration.
//!
//! One synchronous run: load the model, parse the dataset, compute raw
//! metrics, derive the unified score and meta assessment, then run
//! explainability and fairness analysis. Loading and metric failures abort
//! the run; explainability and fairness failures degrade to partial
//! sub-results on an otherwise successful report.

use crate::config::EvaluationConfig;
use crate::dataset::Dataset;
use crate::error::EvalError;
use crate::eval::{MetaEvaluator, MetricCalculator, ScoreNormalizer};
use crate::explain::ExplainabilityEngine;
use crate::fairness::FairnessEngine;
use crate::models::ModelLoader;
use crate::types::report::{EvaluationReport, Explanation, FairnessReport, RawMetrics};
use crate::types::task::{ModelFramework, TaskType};
use chrono::Utc;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Inputs of one evaluation run.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub model_path: PathBuf,
    pub dataset_path: PathBuf,
    pub task_type: TaskType,
    /// Declared framework; falls back to extension detection when absent.
    pub framework: Option<ModelFramework>,
    /// Target column; defaults to the last column.
    pub target_column: Option<String>,
    /// Explicit request-supplied sensitive attribute column.
    pub sensitive_attribute: Option<String>,
    /// Sensitive attribute stored in dataset metadata.
    pub dataset_sensitive_attribute: Option<String>,
    /// Training-set metrics for the overfitting assessment.
    pub train_metrics: Option<RawMetrics>,
}

impl EvaluationRequest {
    pub fn new(
        model_path: impl Into<PathBuf>,
        dataset_path: impl Into<PathBuf>,
        task_type: TaskType,
    ) -> Self {
        Self {
            model_path: model_path.into(),
            dataset_path: dataset_path.into(),
            task_type,
            framework: None,
            target_column: None,
            sensitive_attribute: None,
            dataset_sensitive_attribute: None,
            train_metrics: None,
        }
    }
}

/// Stateless engines wired together for evaluation runs. Constructed once
/// at process start and passed by reference; no global state.
pub struct EvaluationPipeline {
    loader: ModelLoader,
    calculator: MetricCalculator,
    normalizer: ScoreNormalizer,
    meta: MetaEvaluator,
    explainer: ExplainabilityEngine,
    fairness: FairnessEngine,
    config: EvaluationConfig,
}

impl EvaluationPipeline {
    pub fn new(config: EvaluationConfig) -> Self {
        Self {
            loader: ModelLoader::with_threads(config.onnx_threads),
            calculator: MetricCalculator::new(),
            normalizer: ScoreNormalizer::new(),
            meta: MetaEvaluator::new(),
            explainer: ExplainabilityEngine::new(),
            fairness: FairnessEngine::new(),
            config,
        }
    }

    /// Run one evaluation over already-materialized local files.
    pub fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationReport, EvalError> {
        let task = request.task_type;
        info!(
            model = %request.model_path.display(),
            dataset = %request.dataset_path.display(),
            task = %task,
            "Starting evaluation run"
        );

        let (framework, model) = self.loader.load(&request.model_path, request.framework)?;
        let dataset = Dataset::load(&request.dataset_path)?;

        let target = dataset.resolve_target(request.target_column.as_deref());
        let stats = dataset.stats(&target, task);

        // NLP follows a different data contract: a predictions/references
        // text pair instead of a feature/target split.
        let (metrics, predictions, features, targets, feature_names) =
            if task == TaskType::Nlp {
                let (preds, refs) = dataset.nlp_frame()?;
                let metrics = self.calculator.evaluate_nlp(&preds, &refs)?;
                (metrics, Vec::new(), Vec::new(), Vec::new(), Vec::new())
            } else {
                let (x, y, names) = dataset.features_and_target(&target)?;
                let outcome = self.calculator.evaluate(&model, framework, task, &x, &y)?;
                (outcome.metrics, outcome.predictions, x, y, names)
            };

        let unified_score = self.normalizer.score(&metrics, task);
        let meta = self
            .meta
            .evaluate(&metrics, &stats, task, request.train_metrics.as_ref());

        let explanation = if task == TaskType::Nlp {
            Explanation::failed("no feature matrix available under the NLP data contract")
        } else {
            // The dataset serves as both background and explained sets.
            self.explainer.explain_model(
                &model,
                &features,
                &features,
                &feature_names,
                task,
                self.config.max_samples,
            )
        };

        let fairness = self.run_fairness(&dataset, request, task, &targets, &predictions);

        info!(
            unified_score = unified_score.score,
            meta_score = meta.meta_score,
            fairness = fairness.analysis_successful,
            "Evaluation run complete"
        );

        Ok(EvaluationReport {
            evaluation_id: Uuid::new_v4().to_string(),
            model_path: request.model_path.display().to_string(),
            dataset_path: request.dataset_path.display().to_string(),
            task_type: task,
            framework,
            metrics,
            unified_score,
            meta,
            explanation,
            fairness,
            evaluated_at: Utc::now(),
        })
    }

    fn run_fairness(
        &self,
        dataset: &Dataset,
        request: &EvaluationRequest,
        task: TaskType,
        y_true: &[f64],
        y_pred: &[f64],
    ) -> FairnessReport {
        if task != TaskType::Classification {
            return FairnessReport::empty();
        }

        let Some(column) = self.resolve_sensitive_attribute(dataset, request) else {
            debug!("No sensitive attribute resolved; skipping fairness analysis");
            return FairnessReport::empty();
        };

        let Some(values) = dataset.column(&column) else {
            warn!(column = %column, "Resolved sensitive column disappeared from dataset");
            return FairnessReport::empty();
        };
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();

        let mut report = self.fairness.analyze(y_true, y_pred, &values, task);
        if report.analysis_successful {
            report.sensitive_attribute = Some(column);
        }
        report
    }

    /// Sensitive-attribute resolution, in priority order: explicit request
    /// column, dataset metadata, configured candidate list (most non-null
    /// values wins ties). No guess is made beyond the candidate list.
    fn resolve_sensitive_attribute(
        &self,
        dataset: &Dataset,
        request: &EvaluationRequest,
    ) -> Option<String> {
        for declared in [
            request.sensitive_attribute.as_deref(),
            request.dataset_sensitive_attribute.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            if let Some(column) = dataset.find_column_ci(declared) {
                return Some(column.to_string());
            }
            debug!(column = declared, "Declared sensitive attribute not in dataset");
        }

        let mut best: Option<(String, usize)> = None;
        for candidate in &self.config.sensitive_attribute_candidates {
            let Some(column) = dataset.find_column_ci(candidate) else {
                continue;
            };
            let non_null = dataset.non_null_count(column);
            let better = match &best {
                Some((_, count)) => non_null > *count,
                None => true,
            };
            if better {
                best = Some((column.to_string(), non_null));
            }
        }
        best.map(|(column, _)| column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::report::{ExplanationMethod, VerdictStatus};
    use std::path::Path;

    fn write_logistic_model(dir: &Path) -> PathBuf {
        let path = dir.join("model.model");
        // sigmoid(4x - 2) >= 0.5 exactly when x >= 0.5.
        std::fs::write(
            &path,
            r#"{"kind":"logistic_regression","coefficients":[4.0,0.0],"intercept":-2.0}"#,
        )
        .unwrap();
        path
    }

    fn write_classification_dataset(dir: &Path) -> PathBuf {
        let path = dir.join("data.csv");
        let mut rows = String::from("score,gender,label\n");
        for i in 0..30 {
            let x = if i % 2 == 0 { 0.9 } else { 0.1 };
            let label = if i % 2 == 0 { 1 } else { 0 };
            let gender = i % 2;
            rows.push_str(&format!("{x},{gender},{label}\n"));
        }
        std::fs::write(&path, rows).unwrap();
        path
    }

    #[test]
    fn test_classification_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = write_logistic_model(dir.path());
        let dataset_path = write_classification_dataset(dir.path());

        let pipeline = EvaluationPipeline::new(EvaluationConfig::default());
        let request =
            EvaluationRequest::new(&model_path, &dataset_path, TaskType::Classification);
        let report = pipeline.evaluate(&request).unwrap();

        assert_eq!(report.framework, ModelFramework::Native);
        assert_eq!(report.metrics.accuracy, Some(1.0));
        assert!((report.unified_score.score - 100.0).abs() < 0.01);

        // Small sample flag is raised; the meta result still carries a verdict.
        assert!(report
            .meta
            .flags
            .contains(&"small_sample_size".to_string()));
        assert!(!report.meta.recommendations.is_empty());

        // Explainability succeeded through some technique.
        assert_ne!(report.explanation.method, ExplanationMethod::None);

        // Fairness resolved the "gender" candidate column.
        assert!(report.fairness.analysis_successful);
        assert_eq!(report.fairness.sensitive_attribute.as_deref(), Some("gender"));
        assert_eq!(report.fairness.num_groups, 2);
        let overall = report
            .fairness
            .fairness_metrics
            .unwrap()
            .overall_fairness_score;
        assert!((0.0..=1.0).contains(&overall));
    }

    #[test]
    fn test_explicit_sensitive_attribute_wins_over_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model.model");
        std::fs::write(
            &model_path,
            r#"{"kind":"logistic_regression","coefficients":[4.0,0.0,0.0],"intercept":-2.0}"#,
        )
        .unwrap();

        // Both a candidate column ("gender") and a non-candidate one.
        let dataset_path = dir.path().join("data.csv");
        let mut rows = String::from("score,gender,cohort,label\n");
        for i in 0..20 {
            let x = if i % 2 == 0 { 0.9 } else { 0.1 };
            rows.push_str(&format!("{x},{},{},{}\n", i % 2, i % 3, i % 2));
        }
        std::fs::write(&dataset_path, rows).unwrap();

        let pipeline = EvaluationPipeline::new(EvaluationConfig::default());
        let mut request =
            EvaluationRequest::new(&model_path, &dataset_path, TaskType::Classification);
        request.target_column = Some("label".to_string());
        request.sensitive_attribute = Some("COHORT".to_string());
        let report = pipeline.evaluate(&request).unwrap();

        // Case-insensitive match on the requested column beats the
        // candidate list.
        assert_eq!(report.fairness.sensitive_attribute.as_deref(), Some("cohort"));
        assert_eq!(report.fairness.num_groups, 3);
    }

    #[test]
    fn test_dataset_metadata_attribute_used_when_request_is_silent() {
        let pipeline = EvaluationPipeline::new(EvaluationConfig::default());
        let dataset = Dataset::from_rows(
            vec!["score".into(), "region".into(), "label".into()],
            vec![
                vec!["0.9".into(), "north".into(), "1".into()],
                vec!["0.1".into(), "south".into(), "0".into()],
            ],
        );

        let mut request =
            EvaluationRequest::new("m.model", "d.csv", TaskType::Classification);
        request.dataset_sensitive_attribute = Some("Region".to_string());

        let resolved = pipeline.resolve_sensitive_attribute(&dataset, &request);
        assert_eq!(resolved.as_deref(), Some("region"));

        // An explicit request column still wins over the metadata field.
        request.sensitive_attribute = Some("score".to_string());
        let resolved = pipeline.resolve_sensitive_attribute(&dataset, &request);
        assert_eq!(resolved.as_deref(), Some("score"));
    }

    #[test]
    fn test_candidate_tie_break_picks_most_non_null_column() {
        let pipeline = EvaluationPipeline::new(EvaluationConfig::default());
        // Both "gender" and "sex" are configured candidates; "sex" has
        // fewer missing cells.
        let dataset = Dataset::from_rows(
            vec!["gender".into(), "sex".into(), "label".into()],
            vec![
                vec!["".into(), "m".into(), "1".into()],
                vec!["f".into(), "f".into(), "0".into()],
                vec!["".into(), "m".into(), "1".into()],
            ],
        );

        let request = EvaluationRequest::new("m.model", "d.csv", TaskType::Classification);
        let resolved = pipeline.resolve_sensitive_attribute(&dataset, &request);
        assert_eq!(resolved.as_deref(), Some("sex"));

        // No candidate present: resolution declines to guess.
        let bare = Dataset::from_rows(
            vec!["a".into(), "label".into()],
            vec![vec!["1".into(), "1".into()]],
        );
        assert!(pipeline.resolve_sensitive_attribute(&bare, &request).is_none());
    }

    #[test]
    fn test_regression_with_train_metrics_flags_overfitting() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model.model");
        std::fs::write(
            &model_path,
            r#"{"kind":"linear_regression","coefficients":[1.0],"intercept":0.0}"#,
        )
        .unwrap();

        let dataset_path = dir.path().join("data.csv");
        let mut rows = String::from("x,y\n");
        for i in 0..200 {
            let x = i as f64 / 10.0;
            // Noisy linear relation keeps r2 well below the training value.
            let y = x + if i % 2 == 0 { 3.0 } else { -3.0 };
            rows.push_str(&format!("{x},{y}\n"));
        }
        std::fs::write(&dataset_path, rows).unwrap();

        let pipeline = EvaluationPipeline::new(EvaluationConfig::default());
        let mut request = EvaluationRequest::new(&model_path, &dataset_path, TaskType::Regression);
        request.train_metrics = Some(RawMetrics {
            r2_score: Some(0.99),
            ..Default::default()
        });
        let report = pipeline.evaluate(&request).unwrap();

        assert!(report.metrics.r2_score.is_some());
        assert!(report
            .meta
            .flags
            .contains(&"overfitting_detected".to_string()));
        assert!(report.meta.model_complexity_adjustment < 0.0);
        // Regression never gets fairness analysis.
        assert!(!report.fairness.analysis_successful);
    }

    #[test]
    fn test_nlp_contract_and_partial_explanation() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = write_logistic_model(dir.path());

        let dataset_path = dir.path().join("texts.csv");
        std::fs::write(
            &dataset_path,
            "predictions,references\nthe cat sat on the mat,the cat sat on the mat\nevaluation pipelines need careful tests,evaluation pipelines need careful tests\n",
        )
        .unwrap();

        let pipeline = EvaluationPipeline::new(EvaluationConfig::default());
        let request = EvaluationRequest::new(&model_path, &dataset_path, TaskType::Nlp);
        let report = pipeline.evaluate(&request).unwrap();

        assert!(report.metrics.bleu_score.unwrap() > 0.9);
        assert!(report.metrics.rouge_score.is_some());
        // Explainability degrades to an error-carrying result, while the
        // primary metrics and unified score still come back.
        assert_eq!(report.explanation.method, ExplanationMethod::None);
        assert!(report.explanation.error.is_some());
        assert!(report.unified_score.score > 0.0);
    }

    #[test]
    fn test_vision_with_native_framework_is_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = write_logistic_model(dir.path());
        let dataset_path = write_classification_dataset(dir.path());

        let pipeline = EvaluationPipeline::new(EvaluationConfig::default());
        let request =
            EvaluationRequest::new(&model_path, &dataset_path, TaskType::ComputerVision);
        let err = pipeline.evaluate(&request).unwrap_err();
        assert!(matches!(err, EvalError::UnsupportedCombination { .. }));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_verdict_band_for_strong_model() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = write_logistic_model(dir.path());

        let dataset_path = dir.path().join("data.csv");
        let mut rows = String::from("score,other,label\n");
        for i in 0..200 {
            let x = if i % 2 == 0 { 0.9 } else { 0.1 };
            let label = i % 2 == 0;
            rows.push_str(&format!("{x},{},{}\n", i % 7, u8::from(label)));
        }
        std::fs::write(&dataset_path, rows).unwrap();

        let pipeline = EvaluationPipeline::new(EvaluationConfig::default());
        let request =
            EvaluationRequest::new(&model_path, &dataset_path, TaskType::Classification);
        let report = pipeline.evaluate(&request).unwrap();

        assert_eq!(report.meta.verdict.status, VerdictStatus::ProductionReady);
        assert_eq!(report.meta.verdict.critical_issues, 0);
        // No candidate column in this dataset: fairness skipped.
        assert!(!report.fairness.analysis_successful);
        assert!(report.fairness.sensitive_attribute.is_none());
    }
}
