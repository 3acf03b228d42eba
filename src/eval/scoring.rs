//! Unified score normalization.
//!
//! Maps heterogeneous raw metrics onto a common 0-100 scale through fixed
//! per-task weight tables. Pure computation: no I/O, no failure mode.

use crate::types::report::{MetricValue, RawMetrics, UnifiedScore};
use crate::types::task::TaskType;
use std::collections::BTreeMap;

const CLASSIFICATION_WEIGHTS: &[(&str, f64)] = &[
    ("accuracy", 0.25),
    ("precision", 0.25),
    ("recall", 0.25),
    ("f1_score", 0.25),
];

const REGRESSION_WEIGHTS: &[(&str, f64)] = &[
    ("r2_score", 0.4),
    ("mae", 0.3),
    ("rmse", 0.3),
];

const NLP_WEIGHTS: &[(&str, f64)] = &[
    ("bleu_score", 0.4),
    ("rouge_score", 0.4),
    ("perplexity", 0.2),
];

const VISION_WEIGHTS: &[(&str, f64)] = &[
    ("accuracy", 0.3),
    ("iou", 0.35),
    ("dice_coefficient", 0.35),
];

/// Metrics where a lower value is better; these invert smoothly via
/// `1 / (1 + v)` instead of a hard threshold.
const LOWER_IS_BETTER: &[&str] = &["mae", "mse", "rmse", "perplexity"];

fn weight_table(task: TaskType) -> &'static [(&'static str, f64)] {
    match task {
        TaskType::Classification => CLASSIFICATION_WEIGHTS,
        TaskType::Regression => REGRESSION_WEIGHTS,
        TaskType::Nlp => NLP_WEIGHTS,
        TaskType::ComputerVision => VISION_WEIGHTS,
    }
}

/// Derives the unified 0-100 comparability score.
pub struct ScoreNormalizer;

impl ScoreNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Score raw metrics for a task. Metrics missing from the input simply
    /// contribute nothing; the applied weight sum may then be below 1.0,
    /// which is accepted behavior rather than silently renormalized.
    pub fn score(&self, metrics: &RawMetrics, task: TaskType) -> UnifiedScore {
        let entries: BTreeMap<&str, MetricValue> = metrics.entries().into_iter().collect();

        let mut normalized_metrics = BTreeMap::new();
        let mut weight_distribution = BTreeMap::new();
        let mut total = 0.0;

        for (name, weight) in weight_table(task) {
            weight_distribution.insert((*name).to_string(), *weight);

            let Some(value) = entries.get(name) else {
                continue;
            };
            let scalar = match value {
                MetricValue::Scalar(v) => *v,
                // Map-valued metrics collapse to their mean.
                MetricValue::Map(m) => {
                    if m.is_empty() {
                        0.0
                    } else {
                        m.values().sum::<f64>() / m.len() as f64
                    }
                }
            };

            let normalized = if LOWER_IS_BETTER.contains(name) {
                if scalar >= 0.0 {
                    1.0 / (1.0 + scalar)
                } else {
                    0.0
                }
            } else {
                scalar.clamp(0.0, 1.0)
            };

            normalized_metrics.insert((*name).to_string(), normalized);
            total += normalized * weight;
        }

        UnifiedScore {
            score: round2(total * 100.0),
            normalized_metrics,
            weight_distribution,
        }
    }
}

impl Default for ScoreNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_classification_score_matches_stated_formula() {
        let metrics = RawMetrics {
            accuracy: Some(0.9),
            precision: Some(0.85),
            recall: Some(0.88),
            f1_score: Some(0.865),
            ..Default::default()
        };
        let result = ScoreNormalizer::new().score(&metrics, TaskType::Classification);

        let expected = 100.0 * (0.9 + 0.85 + 0.88 + 0.865) / 4.0;
        assert!((result.score - expected).abs() < 0.01);

        // Score is reproducible from its own breakdown.
        let recomputed: f64 = result
            .weight_distribution
            .iter()
            .filter_map(|(k, w)| result.normalized_metrics.get(k).map(|n| n * w))
            .sum::<f64>()
            * 100.0;
        assert!((result.score - recomputed).abs() < 0.01);
    }

    #[test]
    fn test_missing_metrics_reduce_applied_weight() {
        let metrics = RawMetrics {
            accuracy: Some(1.0),
            ..Default::default()
        };
        let result = ScoreNormalizer::new().score(&metrics, TaskType::Classification);

        // Only accuracy applied: 1.0 * 0.25 * 100.
        assert!((result.score - 25.0).abs() < 1e-9);
        assert_eq!(result.normalized_metrics.len(), 1);
        // The table itself is reported in full.
        assert_eq!(result.weight_distribution.len(), 4);

        let applied: f64 = result
            .weight_distribution
            .iter()
            .filter(|(k, _)| result.normalized_metrics.contains_key(*k))
            .map(|(_, w)| w)
            .sum();
        assert!(applied < 1.0);
    }

    #[test]
    fn test_lower_is_better_inversion() {
        let metrics = RawMetrics {
            r2_score: Some(1.0),
            mae: Some(0.0),
            rmse: Some(1.0),
            ..Default::default()
        };
        let result = ScoreNormalizer::new().score(&metrics, TaskType::Regression);

        assert_eq!(result.normalized_metrics["mae"], 1.0);
        assert_eq!(result.normalized_metrics["rmse"], 0.5);
        // 0.4*1 + 0.3*1 + 0.3*0.5 = 0.85
        assert!((result.score - 85.0).abs() < 0.01);
    }

    #[test]
    fn test_negative_lower_is_better_value_scores_zero() {
        let metrics = RawMetrics {
            mae: Some(-1.0),
            ..Default::default()
        };
        let result = ScoreNormalizer::new().score(&metrics, TaskType::Regression);
        assert_eq!(result.normalized_metrics["mae"], 0.0);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_rouge_map_collapses_to_mean() {
        let mut rouge = BTreeMap::new();
        rouge.insert("rouge1".to_string(), 0.6);
        rouge.insert("rouge2".to_string(), 0.2);
        rouge.insert("rougeL".to_string(), 0.4);

        let metrics = RawMetrics {
            rouge_score: Some(rouge),
            ..Default::default()
        };
        let result = ScoreNormalizer::new().score(&metrics, TaskType::Nlp);

        assert!((result.normalized_metrics["rouge_score"] - 0.4).abs() < 1e-9);
        assert!((result.score - 16.0).abs() < 0.01);
    }

    #[test]
    fn test_out_of_range_higher_is_better_clamps() {
        let metrics = RawMetrics {
            accuracy: Some(1.7),
            ..Default::default()
        };
        let result = ScoreNormalizer::new().score(&metrics, TaskType::Classification);
        assert_eq!(result.normalized_metrics["accuracy"], 1.0);
    }
}
