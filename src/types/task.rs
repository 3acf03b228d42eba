//! Task type and model framework tags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Evaluation task family. Determines which metric set and scoring
/// weights apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Classification,
    Regression,
    Nlp,
    ComputerVision,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskType::Classification => "classification",
            TaskType::Regression => "regression",
            TaskType::Nlp => "nlp",
            TaskType::ComputerVision => "cv",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "classification" => Ok(TaskType::Classification),
            "regression" => Ok(TaskType::Regression),
            "nlp" => Ok(TaskType::Nlp),
            "cv" | "computer_vision" => Ok(TaskType::ComputerVision),
            other => Err(format!("unknown task type '{other}'")),
        }
    }
}

/// Serialization/runtime family of a model artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFramework {
    /// serde-JSON models exported by the platform's native tooling (`.model`).
    Native,
    /// Dense-network checkpoint, binary tensor container (`.netbin`).
    NetworkBinary,
    /// Dense-network checkpoint, legacy JSON flavor (`.netjson`).
    NetworkJson,
    /// ONNX graph-exchange artifact (`.onnx`).
    Onnx,
}

impl ModelFramework {
    /// Detect a framework from the artifact file extension. A declared
    /// framework from upload metadata always takes precedence over this.
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "model" => Some(ModelFramework::Native),
            "netbin" => Some(ModelFramework::NetworkBinary),
            "netjson" => Some(ModelFramework::NetworkJson),
            "onnx" => Some(ModelFramework::Onnx),
            _ => None,
        }
    }
}

impl fmt::Display for ModelFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelFramework::Native => "native",
            ModelFramework::NetworkBinary => "network_binary",
            ModelFramework::NetworkJson => "network_json",
            ModelFramework::Onnx => "onnx",
        };
        f.write_str(s)
    }
}

impl FromStr for ModelFramework {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(ModelFramework::Native),
            "network_binary" | "netbin" => Ok(ModelFramework::NetworkBinary),
            "network_json" | "netjson" => Ok(ModelFramework::NetworkJson),
            "onnx" => Ok(ModelFramework::Onnx),
            other => Err(format!("unknown framework '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framework_from_extension() {
        assert_eq!(
            ModelFramework::from_extension(Path::new("m.model")),
            Some(ModelFramework::Native)
        );
        assert_eq!(
            ModelFramework::from_extension(Path::new("checkpoint.netbin")),
            Some(ModelFramework::NetworkBinary)
        );
        assert_eq!(
            ModelFramework::from_extension(Path::new("export.ONNX")),
            Some(ModelFramework::Onnx)
        );
        assert_eq!(ModelFramework::from_extension(Path::new("weights.bin")), None);
    }

    #[test]
    fn test_task_round_trip() {
        for s in ["classification", "regression", "nlp", "cv"] {
            let task: TaskType = s.parse().unwrap();
            assert_eq!(task.to_string(), s);
        }
    }
}
