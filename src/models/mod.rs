//! Model loading and the uniform inference surface.

pub mod loader;
pub mod native;
pub mod network;
pub mod onnx;

use crate::error::EvalError;
use native::NativeModel;
use network::DenseNetwork;
use onnx::OnnxModel;

pub use loader::ModelLoader;

/// A loaded, predict-capable model from any framework family.
#[derive(Debug)]
pub enum LoadedModel {
    Native(NativeModel),
    Network(DenseNetwork),
    Onnx(OnnxModel),
}

impl LoadedModel {
    /// One value per row: regression output or class label.
    ///
    /// Network outputs are collapsed the way their task requires it
    /// downstream: single-column rows pass through, wider rows arg-max.
    pub fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, EvalError> {
        match self {
            LoadedModel::Native(m) => m.predict(x),
            LoadedModel::Onnx(m) => m.predict(x),
            LoadedModel::Network(net) => Ok(net
                .infer(x)?
                .into_iter()
                .map(|row| collapse_row(&row))
                .collect()),
        }
    }

    /// Per-class probability rows, when the model produces them.
    pub fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Option<Vec<Vec<f64>>>, EvalError> {
        match self {
            LoadedModel::Native(m) => m.predict_proba(x),
            LoadedModel::Onnx(m) => m.predict_proba(x),
            LoadedModel::Network(net) => {
                if net.output_dim() >= 2 {
                    Ok(Some(net.infer(x)?))
                } else {
                    Ok(None)
                }
            }
        }
    }

    pub fn as_native(&self) -> Option<&NativeModel> {
        match self {
            LoadedModel::Native(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_network(&self) -> Option<&DenseNetwork> {
        match self {
            LoadedModel::Network(net) => Some(net),
            _ => None,
        }
    }

    /// Intrinsic feature importances, when the artifact carries them.
    pub fn feature_importances(&self) -> Option<Vec<f64>> {
        self.as_native().and_then(|m| m.feature_importances())
    }

    /// Linear coefficients, when the model is linear.
    pub fn coefficients(&self) -> Option<Vec<f64>> {
        self.as_native()
            .and_then(|m| m.coefficients().map(|c| c.to_vec()))
    }
}

fn collapse_row(row: &[f64]) -> f64 {
    if row.len() <= 1 {
        return row.first().copied().unwrap_or(0.0);
    }
    row.iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i as f64)
        .unwrap_or(0.0)
}
