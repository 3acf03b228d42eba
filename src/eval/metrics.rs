//! Task-specific metric computation.
//!
//! Dispatch is a closed match over (task type, framework family); each cell
//! maps to one prediction-extraction strategy. An unsupported pairing is a
//! typed error, never a zero-filled result.

use crate::error::EvalError;
use crate::eval::text;
use crate::models::LoadedModel;
use crate::types::report::RawMetrics;
use crate::types::task::{ModelFramework, TaskType};
use tracing::debug;

/// Metrics plus the prediction vector they were computed from, so
/// downstream fairness analysis reuses inference output.
#[derive(Debug, Clone)]
pub struct MetricOutcome {
    pub metrics: RawMetrics,
    pub predictions: Vec<f64>,
}

/// Computes task-specific raw metrics by running inference against
/// held-out data.
pub struct MetricCalculator;

impl MetricCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a feature/target task (classification, regression, vision).
    ///
    /// NLP uses a different data contract; see [`MetricCalculator::evaluate_nlp`].
    pub fn evaluate(
        &self,
        model: &LoadedModel,
        framework: ModelFramework,
        task: TaskType,
        x: &[Vec<f64>],
        y: &[f64],
    ) -> Result<MetricOutcome, EvalError> {
        let predictions = match task {
            TaskType::Classification => self.classification_predictions(model, framework, x)?,
            TaskType::Regression => self.regression_predictions(model, framework, x)?,
            TaskType::ComputerVision => self.vision_predictions(model, framework, x)?,
            TaskType::Nlp => {
                return Err(EvalError::DataContract(
                    "NLP evaluation requires the predictions/references contract".to_string(),
                ))
            }
        };

        if predictions.len() != y.len() {
            return Err(EvalError::Inference(format!(
                "model produced {} predictions for {} rows",
                predictions.len(),
                y.len()
            )));
        }

        let metrics = match task {
            TaskType::Classification => classification_metrics(y, &predictions),
            TaskType::Regression => regression_metrics(y, &predictions),
            TaskType::ComputerVision => vision_metrics(y, &predictions),
            TaskType::Nlp => unreachable!(),
        };

        debug!(task = %task, framework = %framework, rows = y.len(), "Metrics computed");
        Ok(MetricOutcome {
            metrics,
            predictions,
        })
    }

    /// Evaluate NLP output quality from a predictions/references text pair.
    pub fn evaluate_nlp(
        &self,
        predictions: &[String],
        references: &[String],
    ) -> Result<RawMetrics, EvalError> {
        if predictions.len() != references.len() {
            return Err(EvalError::DataContract(format!(
                "predictions ({}) and references ({}) differ in length",
                predictions.len(),
                references.len()
            )));
        }

        Ok(RawMetrics {
            bleu_score: Some(text::corpus_bleu(predictions, references)),
            rouge_score: Some(text::rouge_scores(predictions, references)),
            ..Default::default()
        })
    }

    fn classification_predictions(
        &self,
        model: &LoadedModel,
        framework: ModelFramework,
        x: &[Vec<f64>],
    ) -> Result<Vec<f64>, EvalError> {
        match framework {
            ModelFramework::Native | ModelFramework::Onnx => model.predict(x),
            ModelFramework::NetworkBinary | ModelFramework::NetworkJson => {
                let net = network_of(model, framework)?;
                // Inference mode, outputs down to an array, arg-max class.
                Ok(net.infer(x)?.iter().map(|row| argmax(row)).collect())
            }
        }
    }

    fn regression_predictions(
        &self,
        model: &LoadedModel,
        framework: ModelFramework,
        x: &[Vec<f64>],
    ) -> Result<Vec<f64>, EvalError> {
        match framework {
            ModelFramework::Native | ModelFramework::Onnx => model.predict(x),
            ModelFramework::NetworkBinary | ModelFramework::NetworkJson => {
                let net = network_of(model, framework)?;
                net.infer(x)?
                    .into_iter()
                    .map(|row| {
                        row.first().copied().ok_or_else(|| {
                            EvalError::Inference("network produced empty output row".to_string())
                        })
                    })
                    .collect()
            }
        }
    }

    fn vision_predictions(
        &self,
        model: &LoadedModel,
        framework: ModelFramework,
        x: &[Vec<f64>],
    ) -> Result<Vec<f64>, EvalError> {
        match framework {
            ModelFramework::NetworkBinary | ModelFramework::NetworkJson => {
                let net = network_of(model, framework)?;
                Ok(net.infer(x)?.iter().map(|row| argmax(row)).collect())
            }
            ModelFramework::Native | ModelFramework::Onnx => {
                Err(EvalError::UnsupportedCombination {
                    task: TaskType::ComputerVision,
                    framework,
                })
            }
        }
    }
}

impl Default for MetricCalculator {
    fn default() -> Self {
        Self::new()
    }
}

fn network_of<'a>(
    model: &'a LoadedModel,
    framework: ModelFramework,
) -> Result<&'a crate::models::network::DenseNetwork, EvalError> {
    model.as_network().ok_or_else(|| EvalError::Inference(format!(
        "artifact declared as {framework} is not a network checkpoint"
    )))
}

fn argmax(row: &[f64]) -> f64 {
    row.iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i as f64)
        .unwrap_or(0.0)
}

fn as_label(v: f64) -> i64 {
    v.round() as i64
}

fn classification_metrics(y_true: &[f64], y_pred: &[f64]) -> RawMetrics {
    let truth: Vec<i64> = y_true.iter().copied().map(as_label).collect();
    let pred: Vec<i64> = y_pred.iter().copied().map(as_label).collect();

    let correct = truth.iter().zip(&pred).filter(|(t, p)| t == p).count();
    let accuracy = correct as f64 / truth.len().max(1) as f64;

    let (precision, recall, f1) = weighted_prf(&truth, &pred);

    RawMetrics {
        accuracy: Some(accuracy),
        precision: Some(precision),
        recall: Some(recall),
        f1_score: Some(f1),
        ..Default::default()
    }
}

/// Precision/recall/f1 weighted by true-class support. A class absent from
/// predictions contributes zero for its terms instead of failing.
fn weighted_prf(y_true: &[i64], y_pred: &[i64]) -> (f64, f64, f64) {
    let mut classes: Vec<i64> = y_true.to_vec();
    classes.sort_unstable();
    classes.dedup();

    let total = y_true.len() as f64;
    let mut precision = 0.0;
    let mut recall = 0.0;
    let mut f1 = 0.0;

    for class in classes {
        let tp = y_true
            .iter()
            .zip(y_pred)
            .filter(|(t, p)| **t == class && **p == class)
            .count() as f64;
        let fp = y_true
            .iter()
            .zip(y_pred)
            .filter(|(t, p)| **t != class && **p == class)
            .count() as f64;
        let fn_ = y_true
            .iter()
            .zip(y_pred)
            .filter(|(t, p)| **t == class && **p != class)
            .count() as f64;
        let support = tp + fn_;

        let p = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
        let r = if support > 0.0 { tp / support } else { 0.0 };
        let f = if p + r > 0.0 {
            2.0 * p * r / (p + r)
        } else {
            0.0
        };

        let weight = support / total;
        precision += p * weight;
        recall += r * weight;
        f1 += f * weight;
    }

    (precision, recall, f1)
}

fn regression_metrics(y_true: &[f64], y_pred: &[f64]) -> RawMetrics {
    let n = y_true.len().max(1) as f64;
    let mae = y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).abs())
        .sum::<f64>()
        / n;
    let mse = y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).powi(2))
        .sum::<f64>()
        / n;

    let mean = y_true.iter().sum::<f64>() / n;
    let ss_res: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
    let r2 = if ss_tot > f64::EPSILON {
        1.0 - ss_res / ss_tot
    } else if ss_res < f64::EPSILON {
        1.0
    } else {
        0.0
    };

    RawMetrics {
        mae: Some(mae),
        mse: Some(mse),
        rmse: Some(mse.sqrt()),
        r2_score: Some(r2),
        ..Default::default()
    }
}

/// Vision metrics are exact-match approximations of IoU/Dice, not true
/// pixel-level overlap.
fn vision_metrics(y_true: &[f64], y_pred: &[f64]) -> RawMetrics {
    let truth: Vec<i64> = y_true.iter().copied().map(as_label).collect();
    let pred: Vec<i64> = y_pred.iter().copied().map(as_label).collect();

    let intersection = truth.iter().zip(&pred).filter(|(t, p)| t == p).count();
    let union = truth.len();
    let iou = if union > 0 {
        intersection as f64 / union as f64
    } else {
        0.0
    };
    let dice = if truth.len() + pred.len() > 0 {
        2.0 * intersection as f64 / (truth.len() + pred.len()) as f64
    } else {
        0.0
    };

    RawMetrics {
        pixel_accuracy: Some(iou),
        iou: Some(iou),
        dice_coefficient: Some(dice),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::native::{LinearModel, NativeModel};
    use crate::models::network::{Activation, DenseLayer, DenseNetwork};

    fn logistic_model() -> LoadedModel {
        LoadedModel::Native(NativeModel::LogisticRegression(LinearModel {
            coefficients: vec![4.0],
            intercept: -2.0,
        }))
    }

    #[test]
    fn test_classification_metrics_perfect_predictions() {
        // sigmoid(4x - 2) >= 0.5 exactly when x >= 0.5.
        let model = logistic_model();
        let x = vec![vec![0.0], vec![1.0], vec![0.9], vec![0.1]];
        let y = vec![0.0, 1.0, 1.0, 0.0];

        let outcome = MetricCalculator::new()
            .evaluate(&model, ModelFramework::Native, TaskType::Classification, &x, &y)
            .unwrap();

        assert_eq!(outcome.metrics.accuracy, Some(1.0));
        assert_eq!(outcome.metrics.f1_score, Some(1.0));
        assert_eq!(outcome.predictions, vec![0.0, 1.0, 1.0, 0.0]);
        assert!(outcome.metrics.mae.is_none());
    }

    #[test]
    fn test_weighted_prf_with_class_absent_from_predictions() {
        // Class 2 never predicted: its precision/recall are 0, weighted in
        // by support instead of erroring out.
        let y_true = vec![0, 0, 1, 2];
        let y_pred = vec![0, 0, 1, 1];
        let (p, r, f1) = weighted_prf(&y_true, &y_pred);

        assert!(p > 0.0 && p < 1.0);
        assert!((r - 0.75).abs() < 1e-9);
        assert!(f1 > 0.0 && f1 < 1.0);
    }

    #[test]
    fn test_regression_metrics() {
        let model = LoadedModel::Native(NativeModel::LinearRegression(LinearModel {
            coefficients: vec![1.0],
            intercept: 0.0,
        }));
        let x = vec![vec![1.0], vec![2.0], vec![3.0]];
        let y = vec![1.0, 2.0, 4.0];

        let outcome = MetricCalculator::new()
            .evaluate(&model, ModelFramework::Native, TaskType::Regression, &x, &y)
            .unwrap();

        let m = outcome.metrics;
        assert!((m.mae.unwrap() - 1.0 / 3.0).abs() < 1e-9);
        assert!((m.mse.unwrap() - 1.0 / 3.0).abs() < 1e-9);
        assert!((m.rmse.unwrap() - (1.0f64 / 3.0).sqrt()).abs() < 1e-9);
        assert!(m.r2_score.unwrap() > 0.0);
        assert!(m.accuracy.is_none());
    }

    #[test]
    fn test_network_classification_argmax() {
        let net = DenseNetwork {
            layers: vec![DenseLayer {
                in_dim: 2,
                out_dim: 2,
                weights: vec![1.0, 0.0, 0.0, 1.0],
                bias: vec![0.0, 0.0],
                activation: Activation::Softmax,
                dropout: None,
            }],
        };
        let model = LoadedModel::Network(net);
        let x = vec![vec![3.0, 1.0], vec![0.0, 2.0]];
        let y = vec![0.0, 1.0];

        let outcome = MetricCalculator::new()
            .evaluate(
                &model,
                ModelFramework::NetworkBinary,
                TaskType::Classification,
                &x,
                &y,
            )
            .unwrap();
        assert_eq!(outcome.metrics.accuracy, Some(1.0));
    }

    #[test]
    fn test_vision_rejects_native_framework() {
        let model = logistic_model();
        let err = MetricCalculator::new()
            .evaluate(
                &model,
                ModelFramework::Native,
                TaskType::ComputerVision,
                &[vec![1.0]],
                &[1.0],
            )
            .unwrap_err();
        assert!(matches!(err, EvalError::UnsupportedCombination { .. }));
    }

    #[test]
    fn test_vision_metrics_exact_match_approximation() {
        let y_true = vec![1.0, 0.0, 1.0, 1.0];
        let y_pred = vec![1.0, 0.0, 0.0, 1.0];
        let m = vision_metrics(&y_true, &y_pred);
        assert!((m.iou.unwrap() - 0.75).abs() < 1e-9);
        assert!((m.dice_coefficient.unwrap() - 0.75).abs() < 1e-9);
        assert!(m.accuracy.is_none());
    }

    #[test]
    fn test_nlp_metrics() {
        let texts = vec!["the cat sat on the mat today ok".to_string()];
        let metrics = MetricCalculator::new().evaluate_nlp(&texts, &texts).unwrap();
        assert!((metrics.bleu_score.unwrap() - 1.0).abs() < 1e-9);
        assert!(metrics.rouge_score.is_some());
        assert!(metrics.perplexity.is_none());
    }
}
