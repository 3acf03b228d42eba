//! Storage collaborator interfaces and the evaluation workflow over them.
//!
//! The core pipeline operates on local files; this layer fetches artifacts
//! from a blob store into a scoped temporary directory, runs the pipeline,
//! and persists the result through the metadata store with update-or-insert
//! semantics. Temporary files are cleaned up on every exit path.

use crate::error::EvalError;
use crate::pipeline::{EvaluationPipeline, EvaluationRequest};
use crate::types::report::{EvaluationReport, RawMetrics};
use crate::types::task::{ModelFramework, TaskType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Stored model metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: String,
    pub name: String,
    pub task_type: TaskType,
    pub framework: ModelFramework,
    /// Blob-store path of the artifact.
    pub file_path: String,
}

/// Stored dataset metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: String,
    pub name: String,
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitive_attribute: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_count: Option<usize>,
}

/// A persisted evaluation run. Re-evaluating the same (model, dataset)
/// pair overwrites this record rather than appending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub id: String,
    pub model_id: String,
    pub dataset_id: String,
    pub report: EvaluationReport,
}

/// Object storage for model and dataset blobs.
pub trait BlobStore {
    fn download(&self, path: &str) -> Result<Vec<u8>, EvalError>;
    fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<(), EvalError>;
    fn remove(&self, paths: &[String]) -> Result<(), EvalError>;
}

/// Record-oriented metadata persistence.
pub trait MetadataStore {
    fn model(&self, id: &str) -> Result<ModelRecord, EvalError>;
    fn dataset(&self, id: &str) -> Result<DatasetRecord, EvalError>;
    fn evaluation(&self, model_id: &str, dataset_id: &str) -> Option<EvaluationRecord>;
    /// Update-or-insert keyed on (model_id, dataset_id); the stored record
    /// keeps its original id across overwrites.
    fn upsert_evaluation(&self, record: EvaluationRecord) -> Result<EvaluationRecord, EvalError>;
}

/// Filesystem-backed blob store.
pub struct LocalBlobStore {
    root: PathBuf,
    max_upload_bytes: u64,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, max_upload_size_mb: u64) -> Self {
        Self {
            root: root.into(),
            max_upload_bytes: max_upload_size_mb * 1024 * 1024,
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl BlobStore for LocalBlobStore {
    fn download(&self, path: &str) -> Result<Vec<u8>, EvalError> {
        Ok(std::fs::read(self.resolve(path))?)
    }

    fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<(), EvalError> {
        if bytes.len() as u64 > self.max_upload_bytes {
            return Err(EvalError::DataContract(format!(
                "upload of {} bytes exceeds the {} byte limit",
                bytes.len(),
                self.max_upload_bytes
            )));
        }
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full, bytes)?;
        debug!(path, content_type, size = bytes.len(), "Blob stored");
        Ok(())
    }

    fn remove(&self, paths: &[String]) -> Result<(), EvalError> {
        for path in paths {
            std::fs::remove_file(self.resolve(path))?;
        }
        Ok(())
    }
}

/// In-memory metadata store used by tests and the CLI. Production deploys
/// implement [`MetadataStore`] against the real relational backend.
#[derive(Default)]
pub struct MemoryMetadataStore {
    models: Mutex<HashMap<String, ModelRecord>>,
    datasets: Mutex<HashMap<String, DatasetRecord>>,
    evaluations: Mutex<HashMap<(String, String), EvaluationRecord>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_model(&self, record: ModelRecord) {
        self.models.lock().unwrap().insert(record.id.clone(), record);
    }

    pub fn insert_dataset(&self, record: DatasetRecord) {
        self.datasets
            .lock()
            .unwrap()
            .insert(record.id.clone(), record);
    }

    pub fn evaluation_count(&self) -> usize {
        self.evaluations.lock().unwrap().len()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn model(&self, id: &str) -> Result<ModelRecord, EvalError> {
        self.models
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| EvalError::NotFound(format!("model {id}")))
    }

    fn dataset(&self, id: &str) -> Result<DatasetRecord, EvalError> {
        self.datasets
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| EvalError::NotFound(format!("dataset {id}")))
    }

    fn evaluation(&self, model_id: &str, dataset_id: &str) -> Option<EvaluationRecord> {
        self.evaluations
            .lock()
            .unwrap()
            .get(&(model_id.to_string(), dataset_id.to_string()))
            .cloned()
    }

    fn upsert_evaluation(&self, mut record: EvaluationRecord) -> Result<EvaluationRecord, EvalError> {
        let key = (record.model_id.clone(), record.dataset_id.clone());
        let mut evaluations = self.evaluations.lock().unwrap();
        if let Some(existing) = evaluations.get(&key) {
            record.id = existing.id.clone();
        }
        evaluations.insert(key, record.clone());
        Ok(record)
    }
}

/// Evaluation workflow over stored artifacts: download, evaluate, persist.
pub struct EvaluationService<B: BlobStore, M: MetadataStore> {
    blobs: B,
    records: M,
    pipeline: EvaluationPipeline,
}

impl<B: BlobStore, M: MetadataStore> EvaluationService<B, M> {
    pub fn new(blobs: B, records: M, pipeline: EvaluationPipeline) -> Self {
        Self {
            blobs,
            records,
            pipeline,
        }
    }

    pub fn records(&self) -> &M {
        &self.records
    }

    /// Evaluate a stored (model, dataset) pair. Last writer wins when the
    /// same pair is evaluated concurrently.
    pub fn evaluate_pair(
        &self,
        model_id: &str,
        dataset_id: &str,
        sensitive_attribute: Option<String>,
        train_metrics: Option<RawMetrics>,
    ) -> Result<EvaluationRecord, EvalError> {
        let model = self.records.model(model_id)?;
        let dataset = self.records.dataset(dataset_id)?;

        // Scoped acquisition: the directory and everything in it are
        // removed on every exit path, including errors.
        let temp_dir = tempfile::tempdir()?;
        let model_path = temp_dir.path().join(artifact_file_name(&model.file_path));
        std::fs::write(&model_path, self.blobs.download(&model.file_path)?)?;
        let dataset_path = temp_dir.path().join("dataset.csv");
        std::fs::write(&dataset_path, self.blobs.download(&dataset.file_path)?)?;

        let request = EvaluationRequest {
            model_path,
            dataset_path,
            task_type: model.task_type,
            framework: Some(model.framework),
            target_column: dataset.target_column.clone(),
            sensitive_attribute,
            dataset_sensitive_attribute: dataset.sensitive_attribute.clone(),
            train_metrics,
        };
        let report = self.pipeline.evaluate(&request)?;

        let record = self.records.upsert_evaluation(EvaluationRecord {
            id: Uuid::new_v4().to_string(),
            model_id: model_id.to_string(),
            dataset_id: dataset_id.to_string(),
            report,
        })?;

        info!(
            model_id,
            dataset_id,
            evaluation_id = %record.id,
            "Evaluation persisted"
        );
        Ok(record)
    }
}

fn artifact_file_name(blob_path: &str) -> String {
    Path::new(blob_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact.model")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluationConfig;

    fn service_with_fixtures(
        root: &Path,
    ) -> EvaluationService<LocalBlobStore, MemoryMetadataStore> {
        let blobs = LocalBlobStore::new(root, 16);
        blobs
            .upload(
                "models/m1.model",
                br#"{"kind":"logistic_regression","coefficients":[4.0,0.0],"intercept":-2.0}"#,
                "application/json",
            )
            .unwrap();

        let mut csv = String::from("score,gender,label\n");
        for i in 0..20 {
            let x = if i % 2 == 0 { 0.9 } else { 0.1 };
            csv.push_str(&format!("{x},{},{}\n", i % 2, u8::from(i % 2 == 0)));
        }
        blobs
            .upload("datasets/d1.csv", csv.as_bytes(), "text/csv")
            .unwrap();

        let records = MemoryMetadataStore::new();
        records.insert_model(ModelRecord {
            id: "m1".to_string(),
            name: "baseline".to_string(),
            task_type: TaskType::Classification,
            framework: ModelFramework::Native,
            file_path: "models/m1.model".to_string(),
        });
        records.insert_dataset(DatasetRecord {
            id: "d1".to_string(),
            name: "sample".to_string(),
            file_path: "datasets/d1.csv".to_string(),
            target_column: Some("label".to_string()),
            sensitive_attribute: None,
            row_count: Some(20),
            column_count: Some(3),
        });

        EvaluationService::new(
            blobs,
            records,
            EvaluationPipeline::new(EvaluationConfig::default()),
        )
    }

    #[test]
    fn test_service_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_fixtures(dir.path());

        let record = service.evaluate_pair("m1", "d1", None, None).unwrap();
        assert_eq!(record.model_id, "m1");
        assert_eq!(record.report.metrics.accuracy, Some(1.0));
        assert!(record.report.fairness.analysis_successful);
    }

    #[test]
    fn test_reevaluation_overwrites_prior_record() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_fixtures(dir.path());

        let first = service.evaluate_pair("m1", "d1", None, None).unwrap();
        let second = service.evaluate_pair("m1", "d1", None, None).unwrap();

        // Update semantics: one stored record, stable id, fresh report.
        assert_eq!(service.records().evaluation_count(), 1);
        assert_eq!(first.id, second.id);
        assert_ne!(
            first.report.evaluation_id,
            second.report.evaluation_id
        );

        let stored = service.records().evaluation("m1", "d1").unwrap();
        assert_eq!(stored.report.evaluation_id, second.report.evaluation_id);
    }

    #[test]
    fn test_missing_model_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_fixtures(dir.path());
        let err = service.evaluate_pair("ghost", "d1", None, None).unwrap_err();
        assert!(matches!(err, EvalError::NotFound(_)));
    }

    #[test]
    fn test_blob_store_enforces_upload_limit() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = LocalBlobStore::new(dir.path(), 0);
        let err = blobs
            .upload("models/too-big.model", b"x", "application/octet-stream")
            .unwrap_err();
        assert!(matches!(err, EvalError::DataContract(_)));
    }

    #[test]
    fn test_blob_remove() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = LocalBlobStore::new(dir.path(), 1);
        blobs.upload("a/b.bin", b"data", "application/octet-stream").unwrap();
        assert_eq!(blobs.download("a/b.bin").unwrap(), b"data");

        blobs.remove(&["a/b.bin".to_string()]).unwrap();
        assert!(blobs.download("a/b.bin").is_err());
    }
}
