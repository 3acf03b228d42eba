//! Post-hoc explainability.
//!
//! Derives global and local feature attributions through a cascading
//! fallback of techniques: Shapley-style attribution (tree-path, sampling,
//! or linear explainers), a local-surrogate technique, and finally the
//! model's own intrinsic importances. The first technique that succeeds
//! wins; the engine never raises to its caller.

use crate::error::EvalError;
use crate::models::LoadedModel;
use crate::types::report::{
    AttributionSummary, Explanation, ExplanationMethod, FeatureContribution, FeatureImportance,
    PredictionExplanation, SampleExplanation,
};
use crate::types::task::TaskType;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

/// Ridge regularization for the local surrogate fit.
const SURROGATE_RIDGE_LAMBDA: f64 = 1e-3;

/// Feature-attribution engine over loaded models.
pub struct ExplainabilityEngine {
    /// Background rows for the sampling-based Shapley explainer.
    background_samples: usize,
    /// Perturbations per sample for the surrogate explainer.
    surrogate_samples: usize,
    /// Test samples the surrogate technique explains.
    surrogate_explained: usize,
    seed: u64,
}

impl ExplainabilityEngine {
    pub fn new() -> Self {
        Self {
            background_samples: 50,
            surrogate_samples: 200,
            surrogate_explained: 10,
            seed: 42,
        }
    }

    /// Explain a model over a test set. Internal failures land in the
    /// result's `error` field; this never returns an error.
    pub fn explain_model(
        &self,
        model: &LoadedModel,
        x_train: &[Vec<f64>],
        x_test: &[Vec<f64>],
        feature_names: &[String],
        task: TaskType,
        max_samples: usize,
    ) -> Explanation {
        let train = &x_train[..x_train.len().min(max_samples)];
        let test = &x_test[..x_test.len().min(max_samples)];

        match self.try_shapley(model, train, test, feature_names, task) {
            Ok(explanation) => return explanation,
            Err(e) => debug!(error = %e, "Shapley technique unavailable, falling back"),
        }

        match self.try_surrogate(model, train, test, feature_names, task) {
            Ok(explanation) => return explanation,
            Err(e) => debug!(error = %e, "Surrogate technique unavailable, falling back"),
        }

        if let Some(importance) = basic_importance(model, feature_names) {
            return Explanation {
                method: ExplanationMethod::Basic,
                explainer: None,
                feature_importance: rank_importances(&importance, feature_names),
                attribution_summary: None,
                sample_explanations: Vec::new(),
                error: None,
            };
        }

        warn!("No explainability method available for this model");
        Explanation::failed("no explainability method available")
    }

    /// Explain one prediction: the same cascade, plus the model's raw
    /// prediction and class probabilities when available.
    pub fn explain_prediction(
        &self,
        model: &LoadedModel,
        x_train: &[Vec<f64>],
        sample: &[f64],
        feature_names: &[String],
        task: TaskType,
    ) -> PredictionExplanation {
        let batch = vec![sample.to_vec()];
        let prediction = match model.predict(&batch) {
            Ok(values) => values.first().copied().unwrap_or(0.0),
            Err(e) => {
                return PredictionExplanation {
                    prediction: 0.0,
                    probabilities: None,
                    feature_contributions: Vec::new(),
                    method: ExplanationMethod::None,
                    base_value: None,
                    error: Some(e.to_string()),
                }
            }
        };
        let probabilities = match task {
            TaskType::Classification => model
                .predict_proba(&batch)
                .ok()
                .flatten()
                .and_then(|rows| rows.into_iter().next()),
            _ => None,
        };

        let train = &x_train[..x_train.len().min(self.background_samples)];

        let (attributions, base_value, method) =
            match self.try_shapley(model, train, &batch, feature_names, task) {
                Ok(explanation) => (
                    explanation
                        .sample_explanations
                        .first()
                        .map(|s| s.attributions.clone()),
                    explanation.attribution_summary.and_then(|s| s.base_value),
                    ExplanationMethod::Shapley,
                ),
                Err(_) => match self.try_surrogate(model, train, &batch, feature_names, task) {
                    Ok(explanation) => (
                        explanation
                            .sample_explanations
                            .first()
                            .map(|s| s.attributions.clone()),
                        None,
                        ExplanationMethod::Surrogate,
                    ),
                    Err(_) => (None, None, ExplanationMethod::None),
                },
            };

        let Some(attributions) = attributions else {
            return PredictionExplanation {
                prediction,
                probabilities,
                feature_contributions: Vec::new(),
                method: ExplanationMethod::None,
                base_value: None,
                error: Some("no explainability method available".to_string()),
            };
        };

        let mut contributions: Vec<FeatureContribution> = feature_names
            .iter()
            .zip(sample)
            .zip(&attributions)
            .map(|((name, value), contribution)| FeatureContribution {
                feature: name.clone(),
                value: *value,
                contribution: *contribution,
            })
            .collect();
        contributions.sort_by(|a, b| {
            b.contribution
                .abs()
                .partial_cmp(&a.contribution.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        PredictionExplanation {
            prediction,
            probabilities,
            feature_contributions: contributions,
            method,
            base_value,
            error: None,
        }
    }

    /// Shapley-style attribution: tree-path, then sampling, then linear.
    /// Each explainer attempt is caught silently and the next one tried.
    fn try_shapley(
        &self,
        model: &LoadedModel,
        train: &[Vec<f64>],
        test: &[Vec<f64>],
        feature_names: &[String],
        task: TaskType,
    ) -> Result<Explanation, String> {
        if test.is_empty() {
            return Err("no test samples to explain".to_string());
        }
        let n_features = feature_names.len();
        let mut failures = Vec::new();

        match tree_attributions(model, test, n_features) {
            Ok((attributions, base)) => {
                return Ok(self.build_explanation(
                    attributions,
                    base,
                    test,
                    feature_names,
                    "tree_path",
                ))
            }
            Err(e) => failures.push(format!("tree_path: {e}")),
        }

        match self.kernel_attributions(model, train, test, n_features, task) {
            Ok((attributions, base)) => {
                return Ok(self.build_explanation(
                    attributions,
                    base,
                    test,
                    feature_names,
                    "kernel_sampling",
                ))
            }
            Err(e) => failures.push(format!("kernel_sampling: {e}")),
        }

        match linear_attributions(model, train, test, n_features) {
            Ok((attributions, base)) => {
                return Ok(self.build_explanation(attributions, base, test, feature_names, "linear"))
            }
            Err(e) => failures.push(format!("linear: {e}")),
        }

        Err(failures.join("; "))
    }

    /// Sampling-based Shapley estimate: walk random feature permutations
    /// from a background row toward the explained row, crediting each
    /// feature with the output change it causes.
    fn kernel_attributions(
        &self,
        model: &LoadedModel,
        train: &[Vec<f64>],
        test: &[Vec<f64>],
        n_features: usize,
        task: TaskType,
    ) -> Result<(Vec<Vec<f64>>, Option<f64>), String> {
        if train.is_empty() {
            return Err("no background data".to_string());
        }
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut background: Vec<Vec<f64>> = train.to_vec();
        background.shuffle(&mut rng);
        background.truncate(self.background_samples);

        let bg_outputs =
            scalar_outputs(model, task, &background).map_err(|e| e.to_string())?;
        let base = bg_outputs.iter().sum::<f64>() / bg_outputs.len() as f64;

        let mut attributions = Vec::with_capacity(test.len());
        for x in test {
            if x.len() != n_features {
                return Err(format!(
                    "sample has {} features, expected {n_features}",
                    x.len()
                ));
            }
            let mut phi = vec![0.0; n_features];
            for (b, f_b) in background.iter().zip(&bg_outputs) {
                let mut order: Vec<usize> = (0..n_features).collect();
                order.shuffle(&mut rng);

                let mut rows = Vec::with_capacity(n_features);
                let mut z = b.clone();
                for &j in &order {
                    z[j] = x[j];
                    rows.push(z.clone());
                }
                let outputs = scalar_outputs(model, task, &rows).map_err(|e| e.to_string())?;

                let mut prev = *f_b;
                for (k, &j) in order.iter().enumerate() {
                    phi[j] += outputs[k] - prev;
                    prev = outputs[k];
                }
            }
            let n = background.len() as f64;
            for p in &mut phi {
                *p /= n;
            }
            attributions.push(phi);
        }

        Ok((attributions, Some(base)))
    }

    /// Local-surrogate technique: fit a distance-weighted ridge model on
    /// perturbations around each explained sample.
    fn try_surrogate(
        &self,
        model: &LoadedModel,
        train: &[Vec<f64>],
        test: &[Vec<f64>],
        feature_names: &[String],
        task: TaskType,
    ) -> Result<Explanation, String> {
        if train.is_empty() {
            return Err("no background data".to_string());
        }
        if test.is_empty() {
            return Err("no test samples to explain".to_string());
        }
        let n_features = feature_names.len();
        let mut rng = StdRng::seed_from_u64(self.seed);

        let stats = FeatureStats::from_rows(train, n_features)?;
        let kernel_width = 0.75 * (n_features as f64).sqrt();

        let explained = &test[..test.len().min(self.surrogate_explained)];
        let mut importance_sum = vec![0.0; n_features];
        let mut sample_explanations = Vec::new();

        for (index, x) in explained.iter().enumerate() {
            let mut rows = Vec::with_capacity(self.surrogate_samples);
            for _ in 0..self.surrogate_samples {
                let mut z = Vec::with_capacity(n_features);
                for j in 0..n_features {
                    let value = match task {
                        // Classification mode discretizes continuous
                        // features into quartile bins.
                        TaskType::Classification => stats.sample_bin(j, &mut rng),
                        _ => x[j] + gaussian(&mut rng) * stats.stds[j],
                    };
                    z.push(value);
                }
                rows.push(z);
            }

            let outputs = scalar_outputs(model, task, &rows).map_err(|e| e.to_string())?;

            let weights: Vec<f64> = rows
                .iter()
                .map(|z| {
                    let d2: f64 = z
                        .iter()
                        .zip(x)
                        .zip(&stats.stds)
                        .map(|((zv, xv), std)| {
                            let scale = if *std > 0.0 { *std } else { 1.0 };
                            ((zv - xv) / scale).powi(2)
                        })
                        .sum();
                    (-d2 / kernel_width.powi(2)).exp()
                })
                .collect();

            let coefficients = weighted_ridge_fit(&rows, &outputs, &weights)?;

            for (sum, coef) in importance_sum.iter_mut().zip(&coefficients) {
                *sum += coef.abs();
            }
            if sample_explanations.len() < 5 {
                sample_explanations.push(SampleExplanation {
                    sample_index: index,
                    attributions: coefficients,
                    feature_values: x.clone(),
                });
            }
        }

        let n = explained.len() as f64;
        let importance: Vec<f64> = importance_sum.iter().map(|s| s / n).collect();

        Ok(Explanation {
            method: ExplanationMethod::Surrogate,
            explainer: None,
            feature_importance: rank_importances(&importance, feature_names),
            attribution_summary: None,
            sample_explanations,
            error: None,
        })
    }

    fn build_explanation(
        &self,
        attributions: Vec<Vec<f64>>,
        base_value: Option<f64>,
        test: &[Vec<f64>],
        feature_names: &[String],
        explainer: &str,
    ) -> Explanation {
        let n_features = feature_names.len();
        let n_samples = attributions.len();

        // Global importance: mean absolute attribution per feature.
        let mut importance = vec![0.0; n_features];
        let mut max_abs: f64 = 0.0;
        let mut total_abs = 0.0;
        for row in &attributions {
            for (j, value) in row.iter().enumerate() {
                importance[j] += value.abs();
                max_abs = max_abs.max(value.abs());
                total_abs += value.abs();
            }
        }
        for v in &mut importance {
            *v /= n_samples.max(1) as f64;
        }

        let feature_importance = rank_importances(&importance, feature_names);
        let top_features: Vec<String> = feature_importance
            .iter()
            .take(5)
            .map(|f| f.feature.clone())
            .collect();

        let sample_explanations: Vec<SampleExplanation> = attributions
            .iter()
            .zip(test)
            .take(5)
            .enumerate()
            .map(|(i, (attr, values))| SampleExplanation {
                sample_index: i,
                attributions: attr.clone(),
                feature_values: values.clone(),
            })
            .collect();

        Explanation {
            method: ExplanationMethod::Shapley,
            explainer: Some(explainer.to_string()),
            feature_importance,
            attribution_summary: Some(AttributionSummary {
                mean_abs_attribution: total_abs / (n_samples * n_features).max(1) as f64,
                max_abs_attribution: max_abs,
                top_features,
                values_shape: (n_samples, n_features),
                base_value,
            }),
            sample_explanations,
            error: None,
        }
    }
}

impl Default for ExplainabilityEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Scalar model output used for attribution: first-class probability for
/// classifiers that expose probabilities, raw prediction otherwise.
/// Multi-class attribution deliberately uses the first class only.
fn scalar_outputs(
    model: &LoadedModel,
    task: TaskType,
    x: &[Vec<f64>],
) -> Result<Vec<f64>, EvalError> {
    if task == TaskType::Classification {
        if let Some(proba) = model.predict_proba(x)? {
            return Ok(proba
                .iter()
                .map(|row| row.first().copied().unwrap_or(0.0))
                .collect());
        }
    }
    model.predict(x)
}

fn tree_attributions(
    model: &LoadedModel,
    test: &[Vec<f64>],
    n_features: usize,
) -> Result<(Vec<Vec<f64>>, Option<f64>), String> {
    let native = model
        .as_native()
        .ok_or_else(|| "not a native model".to_string())?;

    let mut attributions = Vec::with_capacity(test.len());
    for row in test {
        let transitions = native
            .tree_paths(row)
            .ok_or_else(|| "not a tree model".to_string())?
            .map_err(|e| e.to_string())?;
        let mut phi = vec![0.0; n_features];
        for (parent, child, feature) in transitions {
            if feature >= n_features {
                return Err(format!("split feature {feature} out of range"));
            }
            phi[feature] += child - parent;
        }
        attributions.push(phi);
    }

    Ok((attributions, native.tree_base_value()))
}

fn linear_attributions(
    model: &LoadedModel,
    train: &[Vec<f64>],
    test: &[Vec<f64>],
    n_features: usize,
) -> Result<(Vec<Vec<f64>>, Option<f64>), String> {
    let native = model
        .as_native()
        .ok_or_else(|| "not a native model".to_string())?;
    let coefficients = native
        .coefficients()
        .ok_or_else(|| "not a linear model".to_string())?;
    if train.is_empty() {
        return Err("no background data".to_string());
    }
    if coefficients.len() != n_features {
        return Err(format!(
            "{} coefficients for {n_features} features",
            coefficients.len()
        ));
    }

    let mut means = vec![0.0; n_features];
    for row in train {
        for (m, v) in means.iter_mut().zip(row) {
            *m += v;
        }
    }
    for m in &mut means {
        *m /= train.len() as f64;
    }

    let attributions: Vec<Vec<f64>> = test
        .iter()
        .map(|row| {
            coefficients
                .iter()
                .zip(row)
                .zip(&means)
                .map(|((c, v), m)| c * (v - m))
                .collect()
        })
        .collect();

    let base = native.intercept().map(|intercept| {
        intercept
            + coefficients
                .iter()
                .zip(&means)
                .map(|(c, m)| c * m)
                .sum::<f64>()
    });

    Ok((attributions, base))
}

fn basic_importance(model: &LoadedModel, feature_names: &[String]) -> Option<Vec<f64>> {
    let importance = model
        .feature_importances()
        .or_else(|| model.coefficients().map(|c| c.iter().map(|v| v.abs()).collect()))?;
    (importance.len() == feature_names.len()).then_some(importance)
}

/// Rank descending by importance; ties keep original feature order via
/// stable sort.
fn rank_importances(importance: &[f64], feature_names: &[String]) -> Vec<FeatureImportance> {
    let mut indexed: Vec<(usize, f64)> = importance.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    indexed
        .into_iter()
        .enumerate()
        .map(|(rank, (i, value))| FeatureImportance {
            feature: feature_names
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("feature_{i}")),
            importance: value,
            rank: rank + 1,
        })
        .collect()
}

/// Standard normal sample via Box-Muller.
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Per-feature background statistics for the surrogate perturber.
struct FeatureStats {
    stds: Vec<f64>,
    /// Quartile-bin representative values per feature.
    bin_values: Vec<[f64; 4]>,
}

impl FeatureStats {
    fn from_rows(rows: &[Vec<f64>], n_features: usize) -> Result<Self, String> {
        if rows.iter().any(|r| r.len() != n_features) {
            return Err("ragged background rows".to_string());
        }
        let mut stds = Vec::with_capacity(n_features);
        let mut bin_values = Vec::with_capacity(n_features);
        for j in 0..n_features {
            let mut values: Vec<f64> = rows.iter().map(|r| r[j]).collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

            let mean = values.iter().sum::<f64>() / values.len() as f64;
            let var =
                values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
            stds.push(var.sqrt());

            let quantile = |q: f64| -> f64 {
                let pos = q * (values.len() - 1) as f64;
                values[pos.round() as usize]
            };
            bin_values.push([
                quantile(0.125),
                quantile(0.375),
                quantile(0.625),
                quantile(0.875),
            ]);
        }
        Ok(Self { stds, bin_values })
    }

    fn sample_bin(&self, feature: usize, rng: &mut StdRng) -> f64 {
        self.bin_values[feature][rng.gen_range(0..4)]
    }
}

/// Solve the distance-weighted ridge fit and return the feature
/// coefficients (intercept excluded).
fn weighted_ridge_fit(
    rows: &[Vec<f64>],
    outputs: &[f64],
    weights: &[f64],
) -> Result<Vec<f64>, String> {
    let n_features = rows.first().map(|r| r.len()).unwrap_or(0);
    let dim = n_features + 1;

    // Normal equations: (A^T W A + lambda I) beta = A^T W y, with an
    // intercept column prepended.
    let mut ata = vec![vec![0.0; dim]; dim];
    let mut aty = vec![0.0; dim];
    for ((row, y), w) in rows.iter().zip(outputs).zip(weights) {
        let mut a = Vec::with_capacity(dim);
        a.push(1.0);
        a.extend_from_slice(row);
        for i in 0..dim {
            aty[i] += w * a[i] * y;
            for j in 0..dim {
                ata[i][j] += w * a[i] * a[j];
            }
        }
    }
    for (i, row) in ata.iter_mut().enumerate() {
        if i > 0 {
            row[i] += SURROGATE_RIDGE_LAMBDA;
        }
    }

    let beta = solve_linear_system(ata, aty)?;
    Ok(beta[1..].to_vec())
}

/// Gaussian elimination with partial pivoting.
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, String> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| {
                a[i][col]
                    .abs()
                    .partial_cmp(&a[j][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .ok_or_else(|| "empty system".to_string())?;
        if a[pivot][col].abs() < 1e-12 {
            return Err("singular system in surrogate fit".to_string());
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in row + 1..n {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }
    Ok(x)
}
