//! ONNX graph-exchange adapter.
//!
//! Wraps an ONNX Runtime inference session behind a uniform
//! `predict` / `predict_proba` surface so downstream metric code never
//! special-cases this format. Inputs are coerced to f32 as the runtime
//! requires; sessions run on CPU.

use crate::error::EvalError;
use anyhow::{Context, Result};
use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session, SessionOutputs};
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, Tensor};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// A loaded ONNX model with its resolved tensor names.
pub struct OnnxModel {
    session: Mutex<Session>,
    input_name: String,
    /// Output carrying probabilities or regression values.
    output_name: String,
    /// Output carrying class labels, when the graph exposes one.
    label_name: Option<String>,
}

impl std::fmt::Debug for OnnxModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxModel")
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .field("label_name", &self.label_name)
            .finish()
    }
}

impl OnnxModel {
    /// Load an ONNX artifact into an inference session.
    pub fn load<P: AsRef<Path>>(path: P, intra_threads: usize) -> Result<Self> {
        let path = path.as_ref();

        ort::init().commit()?;

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?
            .commit_from_file(path)
            .context(format!("failed to build inference session from {path:?}"))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob") || o.name.contains("output"))
            .map(|o| o.name.clone())
            .unwrap_or_else(|| {
                session
                    .outputs
                    .last()
                    .map(|o| o.name.clone())
                    .unwrap_or_else(|| "probabilities".to_string())
            });

        let label_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("label"))
            .map(|o| o.name.clone());

        info!(
            path = %path.display(),
            input = %input_name,
            output = %output_name,
            label = ?label_name,
            "ONNX session ready"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            label_name,
        })
    }

    /// One prediction per row: the label output when the graph exposes one,
    /// otherwise the value output collapsed (arg-max for multi-column rows).
    pub fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, EvalError> {
        let (labels, rows) = self
            .run(x)
            .map_err(|e| EvalError::Inference(e.to_string()))?;

        if let Some(labels) = labels {
            return Ok(labels);
        }
        Ok(rows
            .into_iter()
            .map(|row| {
                if row.len() <= 1 {
                    row.first().copied().unwrap_or(0.0)
                } else {
                    argmax(&row)
                }
            })
            .collect())
    }

    /// Per-row probability vectors, when the graph produces them.
    pub fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Option<Vec<Vec<f64>>>, EvalError> {
        let (_, rows) = self
            .run(x)
            .map_err(|e| EvalError::Inference(e.to_string()))?;
        if rows.iter().all(|r| r.len() >= 2) && !rows.is_empty() {
            Ok(Some(rows))
        } else {
            Ok(None)
        }
    }

    /// Run the session over a batch, returning optional labels plus the
    /// value rows.
    fn run(&self, x: &[Vec<f64>]) -> Result<(Option<Vec<f64>>, Vec<Vec<f64>>)> {
        let n_rows = x.len();
        let n_cols = x.first().map(|r| r.len()).unwrap_or(0);

        let mut data = Vec::with_capacity(n_rows * n_cols);
        for row in x {
            if row.len() != n_cols {
                anyhow::bail!("ragged input batch: expected {n_cols} columns");
            }
            // Graph-exchange inputs are 32-bit float.
            data.extend(row.iter().map(|v| *v as f32));
        }

        let shape = vec![n_rows as i64, n_cols as i64];
        let input_tensor =
            Tensor::from_array((shape, data)).context("failed to create input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs![&self.input_name => input_tensor])?;

        let labels = self
            .label_name
            .as_deref()
            .and_then(|name| extract_labels(&outputs, name, n_rows));
        let rows = extract_value_rows(&outputs, &self.output_name, n_rows)?;

        Ok((labels, rows))
    }
}

fn argmax(row: &[f64]) -> f64 {
    row.iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i as f64)
        .unwrap_or(0.0)
}

/// Read the label output as one value per row, tolerating both i64 and f32
/// tensor element types.
fn extract_labels(outputs: &SessionOutputs, name: &str, n_rows: usize) -> Option<Vec<f64>> {
    let output = outputs.get(name)?;

    if let Ok((_, data)) = output.try_extract_tensor::<i64>() {
        if data.len() == n_rows {
            return Some(data.iter().map(|v| *v as f64).collect());
        }
    }
    if let Ok((_, data)) = output.try_extract_tensor::<f32>() {
        if data.len() == n_rows {
            return Some(data.iter().map(|v| f64::from(*v)).collect());
        }
    }
    debug!(output = name, "Label output present but not extractable");
    None
}

/// Extract the value output as per-row vectors. Handles plain tensors
/// (shape `[n, c]` or `[n]`) and the seq(map(int64, float)) layout some
/// exporters use for classifier probabilities.
fn extract_value_rows(
    outputs: &SessionOutputs,
    output_name: &str,
    n_rows: usize,
) -> Result<Vec<Vec<f64>>> {
    if let Some(output) = outputs.get(output_name) {
        let dtype = output.dtype();

        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            return tensor_rows(&shape.iter().copied().collect::<Vec<i64>>(), data, n_rows);
        }

        if DynSequenceValueType::can_downcast(&dtype) {
            if let Ok(rows) = sequence_map_rows(output) {
                return Ok(rows);
            }
        }
    }

    // Fallback: scan every output, skipping label tensors.
    for (name, output) in outputs.iter() {
        if name.contains("label") {
            continue;
        }
        let dtype = output.dtype();

        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            debug!(output = %name, "Extracted values from fallback output");
            return tensor_rows(&shape.iter().copied().collect::<Vec<i64>>(), data, n_rows);
        }
        if DynSequenceValueType::can_downcast(&dtype) {
            if let Ok(rows) = sequence_map_rows(&output) {
                return Ok(rows);
            }
        }
    }

    warn!("no extractable value output in session results");
    anyhow::bail!("no extractable value output")
}

fn tensor_rows(dims: &[i64], data: &[f32], n_rows: usize) -> Result<Vec<Vec<f64>>> {
    let width = match dims.len() {
        2 => dims[1].max(1) as usize,
        1 => {
            if n_rows > 0 && dims[0] as usize == n_rows {
                1
            } else {
                dims[0].max(1) as usize
            }
        }
        _ => {
            if n_rows > 0 && data.len() % n_rows == 0 {
                data.len() / n_rows
            } else {
                anyhow::bail!("unexpected output rank {}", dims.len())
            }
        }
    };

    Ok(data
        .chunks(width.max(1))
        .map(|chunk| chunk.iter().map(|v| f64::from(*v)).collect())
        .collect())
}

/// seq(map(int64, float)): one class-to-probability map per row.
fn sequence_map_rows(output: &ort::value::DynValue) -> Result<Vec<Vec<f64>>> {
    let allocator = Allocator::default();

    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(|e| anyhow::anyhow!("failed to downcast to sequence: {e}"))?;

    let maps = sequence.try_extract_sequence::<DynMapValueType>(&allocator)?;
    if maps.is_empty() {
        anyhow::bail!("empty sequence output");
    }

    let mut rows = Vec::with_capacity(maps.len());
    for map_value in &maps {
        let mut kv_pairs = map_value.try_extract_key_values::<i64, f32>()?;
        kv_pairs.sort_by_key(|(class_id, _)| *class_id);
        rows.push(kv_pairs.iter().map(|(_, p)| f64::from(*p)).collect());
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_rows_two_dimensional() {
        let rows = tensor_rows(&[2, 3], &[0.1, 0.2, 0.7, 0.5, 0.3, 0.2], 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 3);
        assert!((rows[0][2] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_tensor_rows_flat_batch() {
        let rows = tensor_rows(&[3], &[1.0, 2.0, 3.0], 3).unwrap();
        assert_eq!(rows, vec![vec![1.0], vec![2.0], vec![3.0]]);
    }

    #[test]
    fn test_argmax_picks_largest() {
        assert_eq!(argmax(&[0.1, 0.8, 0.1]), 1.0);
        assert_eq!(argmax(&[0.9, 0.05, 0.05]), 0.0);
    }
}
