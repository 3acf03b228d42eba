//! Model artifact loader.
//!
//! Turns an opaque artifact plus a declared framework into a
//! predict-capable [`LoadedModel`]. The declared framework from upload
//! metadata wins; the file extension is only a convenience fallback.

use crate::error::{EvalError, LoadAttempt};
use crate::models::native;
use crate::models::network::DenseNetwork;
use crate::models::onnx::OnnxModel;
use crate::models::LoadedModel;
use crate::types::task::ModelFramework;
use std::path::Path;
use tracing::info;

/// Loader for model artifacts across all framework families.
pub struct ModelLoader {
    /// Intra-op thread count for ONNX inference sessions.
    onnx_threads: usize,
}

impl ModelLoader {
    pub fn new() -> Self {
        Self::with_threads(1)
    }

    pub fn with_threads(onnx_threads: usize) -> Self {
        Self { onnx_threads }
    }

    /// Resolve the framework for an artifact: declared metadata first,
    /// extension detection second.
    pub fn resolve_framework(
        &self,
        path: &Path,
        declared: Option<ModelFramework>,
    ) -> Result<ModelFramework, EvalError> {
        declared
            .or_else(|| ModelFramework::from_extension(path))
            .ok_or_else(|| EvalError::Load {
                attempts: vec![LoadAttempt {
                    strategy: "framework_detection",
                    reason: format!(
                        "no framework declared and extension of {} is not recognized",
                        path.display()
                    ),
                }],
            })
    }

    /// Load an artifact. Every deserialization failure is captured in the
    /// returned error; nothing is swallowed silently.
    pub fn load<P: AsRef<Path>>(
        &self,
        path: P,
        declared: Option<ModelFramework>,
    ) -> Result<(ModelFramework, LoadedModel), EvalError> {
        let path = path.as_ref();
        let framework = self.resolve_framework(path, declared)?;

        info!(path = %path.display(), framework = %framework, "Loading model artifact");

        let model = match framework {
            ModelFramework::Native => {
                let bytes = std::fs::read(path)?;
                let model =
                    native::decode(&bytes).map_err(|attempts| EvalError::Load { attempts })?;
                LoadedModel::Native(model)
            }
            ModelFramework::NetworkBinary => {
                let bytes = std::fs::read(path)?;
                let network =
                    DenseNetwork::from_binary(&bytes).map_err(|reason| EvalError::Load {
                        attempts: vec![LoadAttempt {
                            strategy: "network_binary",
                            reason,
                        }],
                    })?;
                LoadedModel::Network(network)
            }
            ModelFramework::NetworkJson => {
                let bytes = std::fs::read(path)?;
                let network =
                    DenseNetwork::from_json(&bytes).map_err(|reason| EvalError::Load {
                        attempts: vec![LoadAttempt {
                            strategy: "network_json",
                            reason,
                        }],
                    })?;
                LoadedModel::Network(network)
            }
            ModelFramework::Onnx => {
                let model =
                    OnnxModel::load(path, self.onnx_threads).map_err(|e| EvalError::Load {
                        attempts: vec![LoadAttempt {
                            strategy: "onnx_session",
                            reason: e.to_string(),
                        }],
                    })?;
                LoadedModel::Onnx(model)
            }
        };

        info!(path = %path.display(), framework = %framework, "Model loaded");
        Ok((framework, model))
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::network::{Activation, DenseLayer};

    #[test]
    fn test_declared_framework_takes_precedence_over_extension() {
        let loader = ModelLoader::new();
        let framework = loader
            .resolve_framework(Path::new("artifact.onnx"), Some(ModelFramework::Native))
            .unwrap();
        assert_eq!(framework, ModelFramework::Native);
    }

    #[test]
    fn test_unrecognized_extension_without_declaration_fails() {
        let loader = ModelLoader::new();
        let err = loader
            .resolve_framework(Path::new("artifact.xyz"), None)
            .unwrap_err();
        assert!(matches!(err, EvalError::Load { .. }));
    }

    #[test]
    fn test_load_native_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.model");
        std::fs::write(
            &path,
            r#"{"kind":"linear_regression","coefficients":[1.0],"intercept":2.0}"#,
        )
        .unwrap();

        let loader = ModelLoader::new();
        let (framework, model) = loader.load(&path, None).unwrap();
        assert_eq!(framework, ModelFramework::Native);
        assert_eq!(model.predict(&[vec![3.0]]).unwrap(), vec![5.0]);
    }

    #[test]
    fn test_load_network_binary_artifact() {
        let net = DenseNetwork {
            layers: vec![DenseLayer {
                in_dim: 1,
                out_dim: 1,
                weights: vec![2.0],
                bias: vec![0.0],
                activation: Activation::Identity,
                dropout: None,
            }],
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.netbin");
        std::fs::write(&path, net.to_binary()).unwrap();

        let loader = ModelLoader::new();
        let (framework, model) = loader.load(&path, None).unwrap();
        assert_eq!(framework, ModelFramework::NetworkBinary);
        assert_eq!(model.predict(&[vec![4.0]]).unwrap(), vec![8.0]);
    }

    #[test]
    fn test_corrupted_native_artifact_enumerates_strategies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.model");
        std::fs::write(&path, [0x00, 0xFF, 0x13, 0x37]).unwrap();

        let loader = ModelLoader::new();
        let err = loader.load(&path, None).unwrap_err();
        match err {
            EvalError::Load { attempts } => assert_eq!(attempts.len(), 4),
            other => panic!("unexpected error: {other}"),
        }
    }
}
