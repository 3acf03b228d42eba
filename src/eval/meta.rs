//! Meta evaluation: blends metric quality, dataset health, and overfitting
//! signals into a single production-readiness verdict.

use crate::types::report::{
    DatasetStats, MetaBreakdown, MetaEvaluation, RawMetrics, Recommendation, Verdict,
    VerdictStatus,
};
use crate::types::task::TaskType;
use tracing::debug;

const METRIC_WEIGHT: f64 = 0.65;
const DATASET_WEIGHT: f64 = 0.25;
const COMPLEXITY_WEIGHT: f64 = 0.10;

/// Flag substrings that force the verdict down regardless of score.
const CRITICAL_SUBSTRINGS: &[&str] = &["severe", "critical", "negative", "low_accuracy"];

/// Produces the meta score, dataset health score, warning flags,
/// recommendations, and final verdict. Never fails for valid numeric
/// input; missing optional fields act as neutral defaults.
pub struct MetaEvaluator;

impl MetaEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        metrics: &RawMetrics,
        dataset_stats: &DatasetStats,
        task: TaskType,
        train_metrics: Option<&RawMetrics>,
    ) -> MetaEvaluation {
        let dataset_health = self.dataset_health(dataset_stats);
        let primary_norm = self.normalize_primary_metric(metrics, task);
        let complexity_adj = self.complexity_adjustment(metrics, train_metrics, task);

        let meta_score = (METRIC_WEIGHT * primary_norm
            + DATASET_WEIGHT * dataset_health
            + COMPLEXITY_WEIGHT * (100.0 + complexity_adj))
            .clamp(0.0, 100.0);

        let flags = self.generate_flags(metrics, dataset_stats, train_metrics, task);
        let recommendations = self.generate_recommendations(&flags);
        let verdict = self.generate_verdict(meta_score, &flags);

        debug!(
            meta_score,
            dataset_health,
            flags = flags.len(),
            "Meta evaluation complete"
        );

        MetaEvaluation {
            meta_score: round2(meta_score),
            dataset_health_score: round2(dataset_health),
            primary_metric_normalized: round2(primary_norm),
            model_complexity_adjustment: round2(complexity_adj),
            flags,
            recommendations,
            verdict,
            breakdown: MetaBreakdown {
                metric_contribution: round2(METRIC_WEIGHT * primary_norm),
                dataset_contribution: round2(DATASET_WEIGHT * dataset_health),
                complexity_contribution: round2(COMPLEXITY_WEIGHT * (100.0 + complexity_adj)),
            },
        }
    }

    /// Dataset health (0-100): start at 100, subtract monotonic penalties
    /// for missing data, imbalance, small samples, and low-variance
    /// features; floor at 0.
    fn dataset_health(&self, stats: &DatasetStats) -> f64 {
        let mut score = 100.0;

        let n_rows = stats.n_rows;
        if n_rows > 0 {
            let cells = (n_rows * stats.n_features.max(1)) as f64;
            let missing_ratio = stats.missing_values as f64 / cells;
            score -= (missing_ratio * 100.0).min(30.0);
        }

        if stats.imbalance_ratio > 0.6 {
            score -= (stats.imbalance_ratio - 0.5) * 80.0;
        }

        if n_rows < 100 {
            score -= (1.0 - n_rows as f64 / 100.0) * 20.0;
        }

        score -= stats.low_variance_fraction * 10.0;

        score.clamp(0.0, 100.0)
    }

    /// Primary metric on a 0-100 scale. Classification prefers f1 over
    /// accuracy; regression prefers r2 clipped at 0, falling back to an
    /// inverted mse/mae blend against fixed reference thresholds.
    fn normalize_primary_metric(&self, metrics: &RawMetrics, task: TaskType) -> f64 {
        match task {
            TaskType::Classification => {
                if let Some(f1) = metrics.f1_score {
                    f1 * 100.0
                } else if let Some(acc) = metrics.accuracy {
                    acc * 100.0
                } else {
                    50.0
                }
            }
            TaskType::Regression => {
                if let Some(r2) = metrics.r2_score {
                    r2.max(0.0) * 100.0
                } else if let (Some(mse), Some(mae)) = (metrics.mse, metrics.mae) {
                    let mse_norm = ((0.1 - mse) / 0.1 * 100.0).max(0.0);
                    let mae_norm = ((0.3 - mae) / 0.3 * 100.0).max(0.0);
                    (mse_norm + mae_norm) / 2.0
                } else {
                    50.0
                }
            }
            _ => 50.0,
        }
    }

    /// Overfitting penalty from the train-test gap on the primary metric.
    /// Discrete onset: no penalty band below a gap of 0.1.
    fn complexity_adjustment(
        &self,
        test_metrics: &RawMetrics,
        train_metrics: Option<&RawMetrics>,
        task: TaskType,
    ) -> f64 {
        let Some(train) = train_metrics else {
            return 0.0;
        };

        let (train_metric, test_metric) = match task {
            TaskType::Classification => (
                train.f1_score.or(train.accuracy).unwrap_or(0.0),
                test_metrics.f1_score.or(test_metrics.accuracy).unwrap_or(0.0),
            ),
            _ => (
                train.r2_score.unwrap_or(0.0),
                test_metrics.r2_score.unwrap_or(0.0),
            ),
        };

        let gap = (train_metric - test_metric).abs();
        if gap > 0.1 {
            -gap * 100.0 * 0.3
        } else {
            0.0
        }
    }

    /// Independent boolean checks; multiple flags may co-occur, and the
    /// emission order is fixed.
    fn generate_flags(
        &self,
        metrics: &RawMetrics,
        stats: &DatasetStats,
        train_metrics: Option<&RawMetrics>,
        task: TaskType,
    ) -> Vec<String> {
        let mut flags = Vec::new();

        let missing_ratio = stats.missing_values as f64 / stats.n_rows.max(1) as f64;
        if missing_ratio > 0.05 {
            flags.push("high_missing_values".to_string());
        }

        if stats.imbalance_ratio > 0.7 {
            flags.push("severe_class_imbalance".to_string());
        } else if stats.imbalance_ratio > 0.6 {
            flags.push("moderate_class_imbalance".to_string());
        }

        if stats.n_rows < 100 {
            flags.push("small_sample_size".to_string());
        }

        if stats.low_variance_fraction > 0.3 {
            flags.push("many_low_variance_features".to_string());
        }

        match task {
            TaskType::Classification => {
                let precision = metrics.precision.unwrap_or(0.0);
                let recall = metrics.recall.unwrap_or(0.0);
                if (precision - recall).abs() > 0.15 {
                    flags.push("precision_recall_imbalance".to_string());
                }
                if metrics.accuracy.unwrap_or(0.0) < 0.7 {
                    flags.push("low_accuracy".to_string());
                }
            }
            TaskType::Regression => {
                let r2 = metrics.r2_score.unwrap_or(0.0);
                if r2 < 0.5 {
                    flags.push("low_r2_score".to_string());
                }
                if r2 < 0.0 {
                    flags.push("negative_r2_warning".to_string());
                }
            }
            _ => {}
        }

        if let Some(train) = train_metrics {
            let (train_perf, test_perf) = match task {
                TaskType::Classification => (
                    train.accuracy.unwrap_or(0.0),
                    metrics.accuracy.unwrap_or(0.0),
                ),
                _ => (
                    train.r2_score.unwrap_or(0.0),
                    metrics.r2_score.unwrap_or(0.0),
                ),
            };
            let gap = train_perf - test_perf;
            if gap > 0.1 {
                flags.push("overfitting_detected".to_string());
            } else if gap > 0.05 {
                flags.push("mild_overfitting".to_string());
            }
        }

        flags
    }

    /// One fixed recommendation per raised flag; a generic drift-monitoring
    /// recommendation when nothing was flagged, so the list is never empty.
    fn generate_recommendations(&self, flags: &[String]) -> Vec<Recommendation> {
        let mut recommendations: Vec<Recommendation> = flags
            .iter()
            .filter_map(|f| recommendation_for(f))
            .collect();

        if flags.is_empty() {
            recommendations.push(Recommendation {
                action: "Monitor model drift periodically".to_string(),
                why: "Even good models degrade over time".to_string(),
                priority: "low".to_string(),
            });
        }

        recommendations
    }

    fn generate_verdict(&self, meta_score: f64, flags: &[String]) -> Verdict {
        let (mut status, mut message) = if meta_score >= 85.0 {
            (
                VerdictStatus::ProductionReady,
                "Model is production-ready with high confidence",
            )
        } else if meta_score >= 70.0 {
            (
                VerdictStatus::ProductionReadyWithMonitoring,
                "Model is production-ready but requires monitoring",
            )
        } else if meta_score >= 50.0 {
            (
                VerdictStatus::NeedsImprovement,
                "Model needs improvements before production",
            )
        } else {
            (
                VerdictStatus::NotRecommended,
                "Model not recommended for production use",
            )
        };

        let critical_issues = flags
            .iter()
            .filter(|f| CRITICAL_SUBSTRINGS.iter().any(|s| f.contains(s)))
            .count();

        // Critical flags override the score-based band.
        if critical_issues > 0 {
            status = VerdictStatus::NeedsImprovement;
            message = "Critical issues detected - address before deployment";
        }

        Verdict {
            status,
            message: message.to_string(),
            confidence: round2(meta_score),
            critical_issues,
            total_issues: flags.len(),
        }
    }
}

impl Default for MetaEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn recommendation_for(flag: &str) -> Option<Recommendation> {
    let (action, why, priority) = match flag {
        "high_missing_values" => (
            "Handle missing values with imputation or removal",
            "Missing values can bias model predictions",
            "high",
        ),
        "severe_class_imbalance" => (
            "Apply resampling or class weighting",
            "Severe imbalance leads to biased predictions",
            "high",
        ),
        "moderate_class_imbalance" => (
            "Consider stratified sampling or cost-sensitive learning",
            "Moderate imbalance may affect minority class performance",
            "medium",
        ),
        "small_sample_size" => (
            "Collect more data or use data augmentation",
            "Small datasets lead to unreliable models",
            "high",
        ),
        "many_low_variance_features" => (
            "Remove or transform low-variance features",
            "Low variance features don't contribute to predictions",
            "low",
        ),
        "precision_recall_imbalance" => (
            "Adjust classification threshold or rebalance classes",
            "Imbalanced precision/recall indicates bias",
            "medium",
        ),
        "low_accuracy" => (
            "Try hyperparameter tuning or feature engineering",
            "Low accuracy suggests model needs improvement",
            "high",
        ),
        "low_r2_score" => (
            "Feature engineering or try different model architecture",
            "Low R2 indicates poor fit to data",
            "high",
        ),
        "negative_r2_warning" => (
            "Review model and data - model performs worse than baseline",
            "Negative R2 means model is worse than predicting mean",
            "critical",
        ),
        "overfitting_detected" => (
            "Apply regularization or increase training data",
            "Large train-test gap indicates overfitting",
            "high",
        ),
        "mild_overfitting" => (
            "Monitor train-test gap and consider validation",
            "Slight overfitting may degrade generalization",
            "medium",
        ),
        _ => return None,
    };
    Some(Recommendation {
        action: action.to_string(),
        why: why.to_string(),
        priority: priority.to_string(),
    })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
