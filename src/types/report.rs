//! Result structures produced by an evaluation run.

use crate::types::task::{ModelFramework, TaskType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Task-specific raw metrics. Sparse: only the fields relevant to the
/// evaluated task type are populated; fields outside that set stay absent,
/// never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMetrics {
    // Classification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recall: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f1_score: Option<f64>,

    // Regression
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mae: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mse: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rmse: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r2_score: Option<f64>,

    // NLP
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bleu_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rouge_score: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perplexity: Option<f64>,

    // Computer vision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iou: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dice_coefficient: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pixel_accuracy: Option<f64>,
}

/// A metric value as seen by the score normalizer: scalar, or a map of
/// sub-scores that gets collapsed to its mean.
#[derive(Debug, Clone)]
pub enum MetricValue {
    Scalar(f64),
    Map(BTreeMap<String, f64>),
}

impl RawMetrics {
    /// Flatten the populated fields into (name, value) entries.
    pub fn entries(&self) -> Vec<(&'static str, MetricValue)> {
        let mut out = Vec::new();
        let scalars = [
            ("accuracy", self.accuracy),
            ("precision", self.precision),
            ("recall", self.recall),
            ("f1_score", self.f1_score),
            ("mae", self.mae),
            ("mse", self.mse),
            ("rmse", self.rmse),
            ("r2_score", self.r2_score),
            ("bleu_score", self.bleu_score),
            ("perplexity", self.perplexity),
            ("iou", self.iou),
            ("dice_coefficient", self.dice_coefficient),
            ("pixel_accuracy", self.pixel_accuracy),
        ];
        for (name, value) in scalars {
            if let Some(v) = value {
                out.push((name, MetricValue::Scalar(v)));
            }
        }
        if let Some(rouge) = &self.rouge_score {
            out.push(("rouge_score", MetricValue::Map(rouge.clone())));
        }
        out
    }
}

/// Unified 0-100 comparability score with its normalization breakdown.
///
/// Invariant: `score == 100 * sum(normalized_metrics[k] * weight_distribution[k])`
/// over the keys of `weight_distribution` present in `normalized_metrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedScore {
    pub score: f64,
    pub normalized_metrics: BTreeMap<String, f64>,
    pub weight_distribution: BTreeMap<String, f64>,
}

/// Dataset statistics consumed by the meta evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub n_rows: usize,
    pub n_features: usize,
    /// Count of empty or unparseable cells across the whole table.
    pub missing_values: usize,
    /// Majority-class fraction of the target column (0.5 when the target
    /// is continuous or absent).
    pub imbalance_ratio: f64,
    /// Fraction of numeric feature columns with near-zero variance.
    pub low_variance_fraction: f64,
}

/// A single actionable recommendation tied to a raised flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: String,
    pub why: String,
    pub priority: String,
}

/// Production-readiness status bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    ProductionReady,
    ProductionReadyWithMonitoring,
    NeedsImprovement,
    NotRecommended,
}

/// Final verdict of the meta evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub message: String,
    /// Equal to the meta score.
    pub confidence: f64,
    pub critical_issues: usize,
    pub total_issues: usize,
}

/// Per-term contribution to the meta score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaBreakdown {
    pub metric_contribution: f64,
    pub dataset_contribution: f64,
    pub complexity_contribution: f64,
}

/// Meta evaluation: blended production-readiness assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaEvaluation {
    pub meta_score: f64,
    pub dataset_health_score: f64,
    pub primary_metric_normalized: f64,
    pub model_complexity_adjustment: f64,
    pub flags: Vec<String>,
    pub recommendations: Vec<Recommendation>,
    pub verdict: Verdict,
    pub breakdown: MetaBreakdown,
}

/// Explainability technique that produced an explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplanationMethod {
    Shapley,
    Surrogate,
    Basic,
    None,
}

/// One feature's ranked global importance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
    pub rank: usize,
}

/// Aggregate statistics over the attribution matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionSummary {
    pub mean_abs_attribution: f64,
    pub max_abs_attribution: f64,
    pub top_features: Vec<String>,
    /// (explained samples, features)
    pub values_shape: (usize, usize),
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_value: Option<f64>,
}

/// Per-sample attribution detail, kept for the first few explained samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleExplanation {
    pub sample_index: usize,
    pub attributions: Vec<f64>,
    pub feature_values: Vec<f64>,
}

/// Explainability result. At most one technique is used per run; internal
/// failures are captured in `error` instead of propagating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub method: ExplanationMethod,
    /// Which explainer within the Shapley cascade succeeded, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explainer: Option<String>,
    pub feature_importance: Vec<FeatureImportance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution_summary: Option<AttributionSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub sample_explanations: Vec<SampleExplanation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Explanation {
    /// Canonical failed explanation carrying only an error message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            method: ExplanationMethod::None,
            explainer: None,
            feature_importance: Vec::new(),
            attribution_summary: None,
            sample_explanations: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// One feature's contribution to a single prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub value: f64,
    pub contribution: f64,
}

/// Explanation of a single prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionExplanation {
    pub prediction: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<Vec<f64>>,
    pub feature_contributions: Vec<FeatureContribution>,
    pub method: ExplanationMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-group performance breakdown for a sensitive attribute value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMetrics {
    pub group: String,
    pub sample_count: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub true_positive_rate: f64,
    pub false_positive_rate: f64,
    pub positive_prediction_rate: f64,
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

/// Named disparity and ratio scores between the first two groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FairnessMetrics {
    pub demographic_parity_difference: f64,
    pub equal_opportunity_difference: f64,
    pub disparate_impact_ratio: f64,
    pub statistical_parity: f64,
    pub predictive_parity: f64,
    pub equalized_odds_difference: f64,
    /// Unweighted mean of the component scores, each on a higher-is-better
    /// 0-1 scale.
    pub overall_fairness_score: f64,
}

/// Group-fairness analysis result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FairnessReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fairness_metrics: Option<FairnessMetrics>,
    pub group_metrics: Vec<GroupMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitive_attribute: Option<String>,
    pub num_groups: usize,
    pub analysis_successful: bool,
}

impl FairnessReport {
    /// Canonical empty result used whenever analysis is skipped or fails.
    pub fn empty() -> Self {
        Self {
            fairness_metrics: None,
            group_metrics: Vec::new(),
            sensitive_attribute: None,
            num_groups: 0,
            analysis_successful: false,
        }
    }
}

/// Complete result of one evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub evaluation_id: String,
    pub model_path: String,
    pub dataset_path: String,
    pub task_type: TaskType,
    pub framework: ModelFramework,
    pub metrics: RawMetrics,
    pub unified_score: UnifiedScore,
    pub meta: MetaEvaluation,
    pub explanation: Explanation,
    pub fairness: FairnessReport,
    pub evaluated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_metrics_serialization_omits_absent_fields() {
        let metrics = RawMetrics {
            accuracy: Some(0.9),
            f1_score: Some(0.87),
            ..Default::default()
        };

        let json = serde_json::to_value(&metrics).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert!(obj.contains_key("accuracy"));
        assert!(!obj.contains_key("mae"));
    }

    #[test]
    fn test_entries_flatten_rouge_map() {
        let mut rouge = BTreeMap::new();
        rouge.insert("rouge1".to_string(), 0.5);
        rouge.insert("rouge2".to_string(), 0.3);

        let metrics = RawMetrics {
            bleu_score: Some(0.4),
            rouge_score: Some(rouge),
            ..Default::default()
        };

        let entries = metrics.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .any(|(name, v)| *name == "rouge_score" && matches!(v, MetricValue::Map(_))));
    }

    #[test]
    fn test_empty_fairness_report() {
        let report = FairnessReport::empty();
        assert!(!report.analysis_successful);
        assert_eq!(report.num_groups, 0);
        assert!(report.group_metrics.is_empty());
    }
}
