//! Native serde-JSON model family.
//!
//! Models exported by the platform's own tooling: linear regression,
//! logistic regression, decision trees, and random forests. Artifacts in
//! the wild were produced by several exporter generations and toolchains,
//! so decoding runs a fixed cascade of strategies; the first one that
//! succeeds wins and every failure is kept for the final diagnostic.

use crate::error::{EvalError, LoadAttempt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Linear model parameters shared by the regression and logistic variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

/// One node of a decision tree. Internal nodes carry both children;
/// leaves carry neither. `value` is the node's prediction state: a
/// single-element mean for regression trees, a class distribution for
/// classification trees. Internal nodes keep their value too, which the
/// path-attribution explainer relies on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub feature: usize,
    pub threshold: f64,
    #[serde(default)]
    pub left: Option<usize>,
    #[serde(default)]
    pub right: Option<usize>,
    pub value: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeModel {
    pub nodes: Vec<TreeNode>,
    #[serde(default)]
    pub feature_importances: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestModel {
    pub trees: Vec<TreeModel>,
    #[serde(default)]
    pub feature_importances: Option<Vec<f64>>,
}

/// A model in the native serde family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NativeModel {
    LinearRegression(LinearModel),
    LogisticRegression(LinearModel),
    DecisionTree(TreeModel),
    RandomForest(ForestModel),
}

impl NativeModel {
    /// Predict one value per row: regression output, or the class label for
    /// classifier variants.
    pub fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, EvalError> {
        x.iter().map(|row| self.predict_row(row)).collect()
    }

    fn predict_row(&self, row: &[f64]) -> Result<f64, EvalError> {
        match self {
            NativeModel::LinearRegression(m) => linear_output(m, row),
            NativeModel::LogisticRegression(m) => {
                let p = sigmoid(linear_output(m, row)?);
                Ok(if p >= 0.5 { 1.0 } else { 0.0 })
            }
            NativeModel::DecisionTree(t) => {
                let leaf = walk_tree(t, row)?;
                Ok(leaf_prediction(leaf))
            }
            NativeModel::RandomForest(f) => {
                let dist = forest_distribution(f, row)?;
                Ok(distribution_prediction(&dist))
            }
        }
    }

    /// Per-class probabilities for classifier variants; `None` for
    /// regression models.
    pub fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Option<Vec<Vec<f64>>>, EvalError> {
        match self {
            NativeModel::LinearRegression(_) => Ok(None),
            NativeModel::LogisticRegression(m) => {
                let mut out = Vec::with_capacity(x.len());
                for row in x {
                    let p = sigmoid(linear_output(m, row)?);
                    out.push(vec![1.0 - p, p]);
                }
                Ok(Some(out))
            }
            NativeModel::DecisionTree(t) => {
                let mut out = Vec::with_capacity(x.len());
                for row in x {
                    let leaf = walk_tree(t, row)?;
                    match normalize_distribution(&leaf.value) {
                        Some(dist) => out.push(dist),
                        None => return Ok(None),
                    }
                }
                Ok(Some(out))
            }
            NativeModel::RandomForest(f) => {
                let mut out = Vec::with_capacity(x.len());
                for row in x {
                    let dist = forest_distribution(f, row)?;
                    match normalize_distribution(&dist) {
                        Some(d) => out.push(d),
                        None => return Ok(None),
                    }
                }
                Ok(Some(out))
            }
        }
    }

    /// Intrinsic feature importances, when the artifact carries them.
    pub fn feature_importances(&self) -> Option<Vec<f64>> {
        match self {
            NativeModel::DecisionTree(t) => t.feature_importances.clone(),
            NativeModel::RandomForest(f) => f.feature_importances.clone(),
            _ => None,
        }
    }

    /// Linear coefficients, when the model is linear.
    pub fn coefficients(&self) -> Option<&[f64]> {
        match self {
            NativeModel::LinearRegression(m) | NativeModel::LogisticRegression(m) => {
                Some(&m.coefficients)
            }
            _ => None,
        }
    }

    pub fn intercept(&self) -> Option<f64> {
        match self {
            NativeModel::LinearRegression(m) | NativeModel::LogisticRegression(m) => {
                Some(m.intercept)
            }
            _ => None,
        }
    }

    /// Decision path through a tree model as (parent value, child value,
    /// split feature) transitions, for path attribution. `None` for
    /// non-tree models.
    pub fn tree_paths(&self, row: &[f64]) -> Option<Result<Vec<(f64, f64, usize)>, EvalError>> {
        match self {
            NativeModel::DecisionTree(t) => Some(tree_path(t, row)),
            NativeModel::RandomForest(f) => Some(forest_paths(f, row)),
            _ => None,
        }
    }

    /// Root node value of tree models (the attribution base).
    pub fn tree_base_value(&self) -> Option<f64> {
        match self {
            NativeModel::DecisionTree(t) => t.nodes.first().map(|n| node_scalar(n)),
            NativeModel::RandomForest(f) => {
                let values: Vec<f64> = f
                    .trees
                    .iter()
                    .filter_map(|t| t.nodes.first().map(node_scalar))
                    .collect();
                if values.is_empty() {
                    None
                } else {
                    Some(values.iter().sum::<f64>() / values.len() as f64)
                }
            }
            _ => None,
        }
    }
}

fn linear_output(m: &LinearModel, row: &[f64]) -> Result<f64, EvalError> {
    if row.len() != m.coefficients.len() {
        return Err(EvalError::Inference(format!(
            "expected {} features, got {}",
            m.coefficients.len(),
            row.len()
        )));
    }
    Ok(m.coefficients
        .iter()
        .zip(row)
        .map(|(c, v)| c * v)
        .sum::<f64>()
        + m.intercept)
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn walk_tree<'a>(tree: &'a TreeModel, row: &[f64]) -> Result<&'a TreeNode, EvalError> {
    let mut node = tree
        .nodes
        .first()
        .ok_or_else(|| EvalError::Inference("tree model has no nodes".to_string()))?;
    loop {
        let (Some(left), Some(right)) = (node.left, node.right) else {
            return Ok(node);
        };
        if node.feature >= row.len() {
            return Err(EvalError::Inference(format!(
                "tree split on feature {} but row has {} features",
                node.feature,
                row.len()
            )));
        }
        let next = if row[node.feature] <= node.threshold {
            left
        } else {
            right
        };
        node = tree.nodes.get(next).ok_or_else(|| {
            EvalError::Inference(format!("tree node index {next} out of bounds"))
        })?;
    }
}

fn tree_path(tree: &TreeModel, row: &[f64]) -> Result<Vec<(f64, f64, usize)>, EvalError> {
    let mut transitions = Vec::new();
    let mut node = tree
        .nodes
        .first()
        .ok_or_else(|| EvalError::Inference("tree model has no nodes".to_string()))?;
    loop {
        let (Some(left), Some(right)) = (node.left, node.right) else {
            return Ok(transitions);
        };
        if node.feature >= row.len() {
            return Err(EvalError::Inference(format!(
                "tree split on feature {} but row has {} features",
                node.feature,
                row.len()
            )));
        }
        let next_idx = if row[node.feature] <= node.threshold {
            left
        } else {
            right
        };
        let next = tree.nodes.get(next_idx).ok_or_else(|| {
            EvalError::Inference(format!("tree node index {next_idx} out of bounds"))
        })?;
        transitions.push((node_scalar(node), node_scalar(next), node.feature));
        node = next;
    }
}

fn forest_paths(forest: &ForestModel, row: &[f64]) -> Result<Vec<(f64, f64, usize)>, EvalError> {
    let mut all = Vec::new();
    let n = forest.trees.len().max(1) as f64;
    for tree in &forest.trees {
        for (parent, child, feature) in tree_path(tree, row)? {
            // Average tree contributions across the ensemble.
            all.push((parent / n, child / n, feature));
        }
    }
    Ok(all)
}

/// Scalar view of a node value: the mean for regression nodes, the
/// first-class probability for classification nodes.
fn node_scalar(node: &TreeNode) -> f64 {
    if node.value.len() == 1 {
        node.value[0]
    } else {
        let total: f64 = node.value.iter().sum();
        if total > 0.0 {
            node.value[0] / total
        } else {
            0.0
        }
    }
}

fn leaf_prediction(leaf: &TreeNode) -> f64 {
    if leaf.value.len() == 1 {
        leaf.value[0]
    } else {
        distribution_prediction(&leaf.value)
    }
}

fn distribution_prediction(dist: &[f64]) -> f64 {
    if dist.len() == 1 {
        return dist[0];
    }
    dist.iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i as f64)
        .unwrap_or(0.0)
}

fn normalize_distribution(value: &[f64]) -> Option<Vec<f64>> {
    if value.len() < 2 {
        return None;
    }
    let total: f64 = value.iter().sum();
    if total <= 0.0 {
        return None;
    }
    Some(value.iter().map(|v| v / total).collect())
}

fn forest_distribution(forest: &ForestModel, row: &[f64]) -> Result<Vec<f64>, EvalError> {
    if forest.trees.is_empty() {
        return Err(EvalError::Inference("forest model has no trees".to_string()));
    }
    let mut acc: Vec<f64> = Vec::new();
    for tree in &forest.trees {
        let leaf = walk_tree(tree, row)?;
        let dist = normalize_distribution(&leaf.value)
            .unwrap_or_else(|| leaf.value.clone());
        if acc.is_empty() {
            acc = vec![0.0; dist.len()];
        }
        if acc.len() != dist.len() {
            return Err(EvalError::Inference(
                "forest trees disagree on output width".to_string(),
            ));
        }
        for (a, d) in acc.iter_mut().zip(&dist) {
            *a += d;
        }
    }
    let n = forest.trees.len() as f64;
    Ok(acc.into_iter().map(|v| v / n).collect())
}

// --- Decode strategy cascade -------------------------------------------------

/// Historical type-tag renames applied by the legacy-schema strategy.
const KIND_RENAMES: &[(&str, &str)] = &[
    ("linreg", "linear_regression"),
    ("logit", "logistic_regression"),
    ("tree", "decision_tree"),
    ("forest", "random_forest"),
];

/// Historical field renames applied by the legacy-schema strategy.
const FIELD_RENAMES: &[(&str, &str)] = &[
    ("weights", "coefficients"),
    ("bias", "intercept"),
    ("importances", "feature_importances"),
];

/// Decode a native artifact, trying each strategy in order. Returns the
/// first success, or every attempt's failure for the load error.
pub fn decode(bytes: &[u8]) -> Result<NativeModel, Vec<LoadAttempt>> {
    let strategies: [(&'static str, fn(&[u8]) -> Result<NativeModel, String>); 4] = [
        ("strict_json", decode_strict),
        ("latin1_transcode", decode_latin1),
        ("lossy_utf8", decode_lossy),
        ("legacy_schema_remap", decode_legacy),
    ];

    let mut attempts = Vec::new();
    for (name, strategy) in strategies {
        match strategy(bytes) {
            Ok(model) => return Ok(model),
            Err(reason) => {
                warn!(strategy = name, error = %reason, "Native decode strategy failed");
                attempts.push(LoadAttempt {
                    strategy: name,
                    reason,
                });
            }
        }
    }
    Err(attempts)
}

fn decode_strict(bytes: &[u8]) -> Result<NativeModel, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
    serde_json::from_str(text).map_err(|e| e.to_string())
}

/// Legacy single-byte encodings: every byte maps 1:1 onto the first
/// Unicode page.
fn decode_latin1(bytes: &[u8]) -> Result<NativeModel, String> {
    let text: String = bytes.iter().map(|&b| b as char).collect();
    serde_json::from_str(&text).map_err(|e| e.to_string())
}

fn decode_lossy(bytes: &[u8]) -> Result<NativeModel, String> {
    let text = String::from_utf8_lossy(bytes);
    serde_json::from_str(&text).map_err(|e| e.to_string())
}

/// Rewrite historical type tags and field names, then decode.
fn decode_legacy(bytes: &[u8]) -> Result<NativeModel, String> {
    let text = String::from_utf8_lossy(bytes);
    let mut value: Value = serde_json::from_str(&text).map_err(|e| e.to_string())?;
    remap_value(&mut value);
    serde_json::from_value(value).map_err(|e| e.to_string())
}

fn remap_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if let Some((_, new_key)) = FIELD_RENAMES.iter().find(|(old, _)| *old == key) {
                    if let Some(v) = map.remove(&key) {
                        map.insert((*new_key).to_string(), v);
                    }
                }
            }
            if let Some(Value::String(kind)) = map.get_mut("kind") {
                if let Some((_, new_kind)) = KIND_RENAMES.iter().find(|(old, _)| old == kind) {
                    *kind = (*new_kind).to_string();
                }
            }
            for v in map.values_mut() {
                remap_value(v);
            }
        }
        Value::Array(items) => {
            for v in items {
                remap_value(v);
            }
        }
        _ => {}
    }
}
