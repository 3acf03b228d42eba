//! Group-fairness analysis.
//!
//! Disaggregates classifier performance by a sensitive attribute and
//! computes bias metrics between groups. Classification only; every
//! failure degrades to the canonical empty result instead of aborting the
//! evaluation that requested it.

use crate::types::report::{FairnessMetrics, FairnessReport, GroupMetrics};
use crate::types::task::TaskType;
use tracing::{debug, warn};

/// Computes group-disaggregated performance and bias metrics.
pub struct FairnessEngine;

impl FairnessEngine {
    pub fn new() -> Self {
        Self
    }

    /// Analyze predictions against a sensitive attribute. Labels are
    /// assumed binary {0, 1}.
    pub fn analyze(
        &self,
        y_true: &[f64],
        y_pred: &[f64],
        sensitive_attr: &[String],
        task: TaskType,
    ) -> FairnessReport {
        if task != TaskType::Classification {
            warn!(task = %task, "Fairness analysis is only supported for classification");
            return FairnessReport::empty();
        }
        if y_true.len() != y_pred.len() || y_true.len() != sensitive_attr.len() {
            warn!(
                y_true = y_true.len(),
                y_pred = y_pred.len(),
                sensitive = sensitive_attr.len(),
                "Fairness inputs differ in length"
            );
            return FairnessReport::empty();
        }

        let mut groups: Vec<String> = sensitive_attr.to_vec();
        groups.sort();
        groups.dedup();
        if groups.len() < 2 {
            warn!("Need at least 2 groups for fairness analysis");
            return FairnessReport::empty();
        }

        let truth: Vec<i64> = y_true.iter().map(|v| v.round() as i64).collect();
        let pred: Vec<i64> = y_pred.iter().map(|v| v.round() as i64).collect();

        let group_metrics: Vec<GroupMetrics> = groups
            .iter()
            .filter_map(|g| group_metrics(&truth, &pred, sensitive_attr, g))
            .collect();

        // Pairwise comparison is limited to the first two groups in natural
        // order; not generalized to all pairs.
        let fairness_metrics =
            pairwise_metrics(&truth, &pred, sensitive_attr, &groups[0], &groups[1]);

        debug!(
            num_groups = groups.len(),
            overall = fairness_metrics.overall_fairness_score,
            "Fairness analysis complete"
        );

        FairnessReport {
            fairness_metrics: Some(fairness_metrics),
            group_metrics,
            sensitive_attribute: None,
            num_groups: groups.len(),
            analysis_successful: true,
        }
    }

    /// Textual guidance derived from the computed bias metrics.
    pub fn recommendations(&self, metrics: Option<&FairnessMetrics>) -> Vec<String> {
        let Some(metrics) = metrics else {
            return vec!["Unable to generate recommendations without fairness metrics.".to_string()];
        };

        let mut recommendations = Vec::new();

        if metrics.demographic_parity_difference > 0.2 {
            recommendations.push(
                "High demographic parity difference detected. Consider rebalancing your \
                 training data or applying fairness constraints during model training."
                    .to_string(),
            );
        }
        if metrics.equal_opportunity_difference > 0.2 {
            recommendations.push(
                "Significant equal opportunity difference found. The model has different \
                 true positive rates across groups. Consider post-processing techniques to \
                 equalize opportunities."
                    .to_string(),
            );
        }
        if metrics.disparate_impact_ratio < 0.8 || metrics.disparate_impact_ratio > 1.25 {
            recommendations.push(
                "Disparate impact detected. The ratio of positive predictions differs \
                 significantly between groups. Review feature selection and consider bias \
                 mitigation techniques."
                    .to_string(),
            );
        }
        if recommendations.is_empty() {
            recommendations.push(
                "Your model shows good fairness characteristics. Continue monitoring \
                 fairness metrics as you retrain or update the model."
                    .to_string(),
            );
        }

        recommendations
    }
}

impl Default for FairnessEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn group_metrics(
    truth: &[i64],
    pred: &[i64],
    sensitive: &[String],
    group: &str,
) -> Option<GroupMetrics> {
    let indices: Vec<usize> = sensitive
        .iter()
        .enumerate()
        .filter(|(_, g)| g.as_str() == group)
        .map(|(i, _)| i)
        .collect();
    if indices.is_empty() {
        return None;
    }

    let n = indices.len();
    // Direct counting keeps single-class groups from failing.
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut tn = 0usize;
    let mut fn_ = 0usize;
    let mut correct = 0usize;
    for &i in &indices {
        match (truth[i], pred[i]) {
            (1, 1) => tp += 1,
            (0, 1) => fp += 1,
            (0, 0) => tn += 1,
            (1, 0) => fn_ += 1,
            _ => {}
        }
        if truth[i] == pred[i] {
            correct += 1;
        }
    }

    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    Some(GroupMetrics {
        group: group.to_string(),
        sample_count: n,
        accuracy: correct as f64 / n as f64,
        precision,
        recall,
        f1_score: f1,
        true_positive_rate: ratio(tp, tp + fn_),
        false_positive_rate: ratio(fp, fp + tn),
        positive_prediction_rate: (tp + fp) as f64 / n as f64,
        true_positives: tp,
        false_positives: fp,
        true_negatives: tn,
        false_negatives: fn_,
    })
}

fn pairwise_metrics(
    truth: &[i64],
    pred: &[i64],
    sensitive: &[String],
    group_0: &str,
    group_1: &str,
) -> FairnessMetrics {
    let select = |group: &str| -> (Vec<i64>, Vec<i64>) {
        let mut t = Vec::new();
        let mut p = Vec::new();
        for (i, g) in sensitive.iter().enumerate() {
            if g == group {
                t.push(truth[i]);
                p.push(pred[i]);
            }
        }
        (t, p)
    };
    let (t0, p0) = select(group_0);
    let (t1, p1) = select(group_1);

    let ppr_0 = mean_pred(&p0, None, &t0);
    let ppr_1 = mean_pred(&p1, None, &t1);
    let demographic_parity_difference = (ppr_0 - ppr_1).abs();
    let statistical_parity = 1.0 - demographic_parity_difference;

    let disparate_impact_ratio = if ppr_0 > 0.0 { ppr_1 / ppr_0 } else { 1.0 };

    let tpr_0 = mean_pred(&p0, Some(1), &t0);
    let tpr_1 = mean_pred(&p1, Some(1), &t1);
    let equal_opportunity_difference = (tpr_0 - tpr_1).abs();

    let fpr_0 = mean_pred(&p0, Some(0), &t0);
    let fpr_1 = mean_pred(&p1, Some(0), &t1);
    let equalized_odds_difference =
        (tpr_0 - tpr_1).abs().max((fpr_0 - fpr_1).abs());

    let predictive_parity = 1.0 - (precision_of(&t0, &p0) - precision_of(&t1, &p1)).abs();

    let scores = [
        1.0 - demographic_parity_difference.min(1.0),
        1.0 - equal_opportunity_difference.min(1.0),
        1.0 - equalized_odds_difference.min(1.0),
        // Ratio metric scored by closeness to 1.0.
        1.0 - (disparate_impact_ratio - 1.0).abs().min(1.0),
        statistical_parity,
        predictive_parity,
    ];
    let overall_fairness_score = scores.iter().sum::<f64>() / scores.len() as f64;

    FairnessMetrics {
        demographic_parity_difference,
        equal_opportunity_difference,
        disparate_impact_ratio,
        statistical_parity,
        predictive_parity,
        equalized_odds_difference,
        overall_fairness_score,
    }
}

fn ratio(num: usize, denom: usize) -> f64 {
    if denom > 0 {
        num as f64 / denom as f64
    } else {
        0.0
    }
}

/// Mean prediction over a group, optionally restricted to rows whose true
/// label matches `true_filter`.
fn mean_pred(pred: &[i64], true_filter: Option<i64>, truth: &[i64]) -> f64 {
    let values: Vec<f64> = pred
        .iter()
        .zip(truth)
        .filter(|(_, t)| true_filter.map_or(true, |f| **t == f))
        .map(|(p, _)| *p as f64)
        .collect();
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn precision_of(truth: &[i64], pred: &[i64]) -> f64 {
    let tp = truth
        .iter()
        .zip(pred)
        .filter(|(t, p)| **t == 1 && **p == 1)
        .count();
    let fp = truth
        .iter()
        .zip(pred)
        .filter(|(t, p)| **t != 1 && **p == 1)
        .count();
    ratio(tp, tp + fp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_single_group_returns_empty_result() {
        let engine = FairnessEngine::new();
        let report = engine.analyze(
            &[1.0, 0.0, 1.0],
            &[1.0, 0.0, 0.0],
            &attrs(&["a", "a", "a"]),
            TaskType::Classification,
        );
        assert!(!report.analysis_successful);
        assert!(report.group_metrics.is_empty());
        assert_eq!(report.num_groups, 0);
    }

    #[test]
    fn test_regression_task_returns_empty_result() {
        let engine = FairnessEngine::new();
        let report = engine.analyze(
            &[1.0, 0.0],
            &[1.0, 0.0],
            &attrs(&["a", "b"]),
            TaskType::Regression,
        );
        assert!(!report.analysis_successful);
    }

    #[test]
    fn test_identical_positive_rates_yield_unit_disparate_impact() {
        let engine = FairnessEngine::new();
        // Both groups: half the predictions positive.
        let y_true = vec![1.0, 0.0, 1.0, 0.0];
        let y_pred = vec![1.0, 0.0, 1.0, 0.0];
        let report = engine.analyze(
            &y_true,
            &y_pred,
            &attrs(&["a", "a", "b", "b"]),
            TaskType::Classification,
        );
        let m = report.fairness_metrics.unwrap();
        assert_eq!(m.disparate_impact_ratio, 1.0);
        assert_eq!(m.demographic_parity_difference, 0.0);

        // Zero-rate on both sides still counts as parity.
        let report = engine.analyze(
            &[1.0, 0.0, 1.0, 0.0],
            &[0.0, 0.0, 0.0, 0.0],
            &attrs(&["a", "a", "b", "b"]),
            TaskType::Classification,
        );
        let m = report.fairness_metrics.unwrap();
        assert_eq!(m.disparate_impact_ratio, 1.0);
    }

    #[test]
    fn test_two_group_analysis_produces_populated_report() {
        let engine = FairnessEngine::new();
        let y_true = vec![1.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0];
        let y_pred = vec![1.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0];
        let sensitive = attrs(&["f", "f", "f", "f", "m", "m", "m", "m"]);

        let report = engine.analyze(&y_true, &y_pred, &sensitive, TaskType::Classification);
        assert!(report.analysis_successful);
        assert_eq!(report.num_groups, 2);
        assert_eq!(report.group_metrics.len(), 2);

        let m = report.fairness_metrics.unwrap();
        assert!(m.overall_fairness_score >= 0.0 && m.overall_fairness_score <= 1.0);

        let g0 = &report.group_metrics[0];
        assert_eq!(g0.sample_count, 4);
        assert_eq!(
            g0.true_positives + g0.false_positives + g0.true_negatives + g0.false_negatives,
            4
        );
    }

    #[test]
    fn test_single_class_group_counts_directly() {
        let engine = FairnessEngine::new();
        // Group "b" holds only true-negative subjects.
        let y_true = vec![1.0, 0.0, 0.0, 0.0];
        let y_pred = vec![1.0, 0.0, 1.0, 0.0];
        let report = engine.analyze(
            &y_true,
            &y_pred,
            &attrs(&["a", "a", "b", "b"]),
            TaskType::Classification,
        );

        let b = report
            .group_metrics
            .iter()
            .find(|g| g.group == "b")
            .unwrap();
        assert_eq!(b.true_positives, 0);
        assert_eq!(b.false_positives, 1);
        assert_eq!(b.true_negatives, 1);
        assert_eq!(b.false_negatives, 0);
        assert_eq!(b.positive_prediction_rate, 0.5);
    }

    #[test]
    fn test_recommendations_flag_disparate_impact() {
        let engine = FairnessEngine::new();
        let metrics = FairnessMetrics {
            demographic_parity_difference: 0.1,
            equal_opportunity_difference: 0.05,
            disparate_impact_ratio: 0.5,
            statistical_parity: 0.9,
            predictive_parity: 0.95,
            equalized_odds_difference: 0.05,
            overall_fairness_score: 0.8,
        };
        let recs = engine.recommendations(Some(&metrics));
        assert_eq!(recs.len(), 1);
        assert!(recs[0].contains("Disparate impact"));

        let fair = FairnessMetrics {
            disparate_impact_ratio: 1.0,
            demographic_parity_difference: 0.0,
            equal_opportunity_difference: 0.0,
            statistical_parity: 1.0,
            predictive_parity: 1.0,
            equalized_odds_difference: 0.0,
            overall_fairness_score: 1.0,
        };
        assert!(engine.recommendations(Some(&fair))[0].contains("good fairness"));
    }
}
