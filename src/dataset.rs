//! Tabular dataset loading and statistics.
//!
//! Datasets are CSV files parsed once at load time. The raw string table is
//! kept so categorical columns (sensitive attributes, NLP text pairs) stay
//! accessible next to the numeric feature view.

use crate::error::EvalError;
use crate::types::report::DatasetStats;
use crate::types::task::TaskType;
use std::path::Path;
use tracing::{debug, info};

/// Variance below this marks a feature column as effectively constant.
const LOW_VARIANCE_THRESHOLD: f64 = 1e-6;

/// A parsed tabular dataset.
#[derive(Debug, Clone)]
pub struct Dataset {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Dataset {
    /// Load a dataset from a CSV file on local disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EvalError> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)?;

        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(|c| c.trim().to_string()).collect());
        }

        if headers.is_empty() || rows.is_empty() {
            return Err(EvalError::DataContract(format!(
                "dataset {} is empty",
                path.display()
            )));
        }

        info!(
            path = %path.display(),
            rows = rows.len(),
            columns = headers.len(),
            "Dataset loaded"
        );

        Ok(Self { headers, rows })
    }

    /// Build a dataset from already-parsed cells. Used by tests and by the
    /// workflow layer when the table comes from elsewhere than a CSV file.
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_columns(&self) -> usize {
        self.headers.len()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Resolve the target column: the requested name when it exists,
    /// otherwise the last column.
    pub fn resolve_target(&self, requested: Option<&str>) -> String {
        if let Some(name) = requested {
            if self.headers.iter().any(|h| h == name) {
                return name.to_string();
            }
            debug!(requested = name, "Requested target column absent, using last column");
        }
        self.headers.last().cloned().unwrap_or_default()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Case-insensitive column lookup, returning the canonical header name.
    pub fn find_column_ci(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.eq_ignore_ascii_case(name))
            .map(|h| h.as_str())
    }

    /// Raw values of one column.
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx].as_str()).collect())
    }

    /// Number of non-missing cells in a column. Used to break ties when
    /// several candidate sensitive-attribute columns match.
    pub fn non_null_count(&self, name: &str) -> usize {
        match self.column(name) {
            Some(values) => values.iter().filter(|v| !is_missing(v)).count(),
            None => 0,
        }
    }

    /// Split into a numeric feature matrix, target vector, and feature names.
    ///
    /// Missing cells become NaN; a non-numeric feature or target cell is a
    /// contract violation.
    pub fn features_and_target(
        &self,
        target: &str,
    ) -> Result<(Vec<Vec<f64>>, Vec<f64>, Vec<String>), EvalError> {
        let target_idx = self.column_index(target).ok_or_else(|| {
            EvalError::DataContract(format!("target column '{target}' not found"))
        })?;

        let feature_names: Vec<String> = self
            .headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != target_idx)
            .map(|(_, h)| h.clone())
            .collect();

        let mut features = Vec::with_capacity(self.rows.len());
        let mut target_values = Vec::with_capacity(self.rows.len());

        for (row_idx, row) in self.rows.iter().enumerate() {
            let mut x = Vec::with_capacity(feature_names.len());
            for (col_idx, cell) in row.iter().enumerate() {
                if col_idx == target_idx {
                    continue;
                }
                x.push(parse_cell(cell).ok_or_else(|| {
                    EvalError::DataContract(format!(
                        "non-numeric value '{}' in feature column '{}' (row {})",
                        cell, self.headers[col_idx], row_idx
                    ))
                })?);
            }
            let y = parse_cell(&row[target_idx]).ok_or_else(|| {
                EvalError::DataContract(format!(
                    "non-numeric value '{}' in target column '{}' (row {})",
                    row[target_idx], target, row_idx
                ))
            })?;
            features.push(x);
            target_values.push(y);
        }

        Ok((features, target_values, feature_names))
    }

    /// The two-column text contract required by NLP evaluation.
    pub fn nlp_frame(&self) -> Result<(Vec<String>, Vec<String>), EvalError> {
        let predictions = self.column("predictions").ok_or_else(|| {
            EvalError::DataContract("NLP dataset requires a 'predictions' column".to_string())
        })?;
        let references = self.column("references").ok_or_else(|| {
            EvalError::DataContract("NLP dataset requires a 'references' column".to_string())
        })?;
        Ok((
            predictions.iter().map(|s| s.to_string()).collect(),
            references.iter().map(|s| s.to_string()).collect(),
        ))
    }

    /// Dataset statistics consumed by the meta evaluator.
    pub fn stats(&self, target: &str, task: TaskType) -> DatasetStats {
        let n_rows = self.rows.len();
        let target_idx = self.column_index(target);
        let n_features = self.headers.len().saturating_sub(1).max(1);

        let missing_values = self
            .rows
            .iter()
            .flat_map(|r| r.iter())
            .filter(|c| is_missing(c))
            .count();

        let imbalance_ratio = match task {
            TaskType::Classification | TaskType::ComputerVision => target_idx
                .map(|idx| majority_fraction(self.rows.iter().map(|r| r[idx].as_str())))
                .unwrap_or(0.5),
            _ => 0.5,
        };

        let mut numeric_features = 0usize;
        let mut low_variance = 0usize;
        for (col_idx, _) in self.headers.iter().enumerate() {
            if Some(col_idx) == target_idx {
                continue;
            }
            let values: Vec<f64> = self
                .rows
                .iter()
                .filter_map(|r| parse_cell(&r[col_idx]))
                .filter(|v| v.is_finite())
                .collect();
            if values.is_empty() {
                continue;
            }
            numeric_features += 1;
            if variance(&values) < LOW_VARIANCE_THRESHOLD {
                low_variance += 1;
            }
        }
        let low_variance_fraction = if numeric_features > 0 {
            low_variance as f64 / numeric_features as f64
        } else {
            0.0
        };

        DatasetStats {
            n_rows,
            n_features,
            missing_values,
            imbalance_ratio,
            low_variance_fraction,
        }
    }
}

fn is_missing(cell: &str) -> bool {
    cell.is_empty()
        || cell.eq_ignore_ascii_case("nan")
        || cell.eq_ignore_ascii_case("na")
        || cell.eq_ignore_ascii_case("null")
}

fn parse_cell(cell: &str) -> Option<f64> {
    if is_missing(cell) {
        return Some(f64::NAN);
    }
    cell.parse::<f64>().ok()
}

fn majority_fraction<'a>(values: impl Iterator<Item = &'a str>) -> f64 {
    let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    let mut total = 0usize;
    for v in values {
        if is_missing(v) {
            continue;
        }
        *counts.entry(v).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.5;
    }
    let majority = counts.values().copied().max().unwrap_or(0);
    majority as f64 / total as f64
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        Dataset::from_rows(
            vec![
                "f1".to_string(),
                "f2".to_string(),
                "gender".to_string(),
                "label".to_string(),
            ],
            vec![
                vec!["1.0".into(), "5.0".into(), "0".into(), "1".into()],
                vec!["2.0".into(), "5.0".into(), "1".into(), "0".into()],
                vec!["3.0".into(), "5.0".into(), "0".into(), "1".into()],
                vec!["4.0".into(), "5.0".into(), "1".into(), "1".into()],
            ],
        )
    }

    #[test]
    fn test_target_resolution_defaults_to_last_column() {
        let ds = sample();
        assert_eq!(ds.resolve_target(None), "label");
        assert_eq!(ds.resolve_target(Some("f2")), "f2");
        assert_eq!(ds.resolve_target(Some("absent")), "label");
    }

    #[test]
    fn test_features_and_target_split() {
        let ds = sample();
        let (x, y, names) = ds.features_and_target("label").unwrap();
        assert_eq!(x.len(), 4);
        assert_eq!(x[0], vec![1.0, 5.0, 0.0]);
        assert_eq!(y, vec![1.0, 0.0, 1.0, 1.0]);
        assert_eq!(names, vec!["f1", "f2", "gender"]);
    }

    #[test]
    fn test_non_numeric_feature_is_contract_error() {
        let ds = Dataset::from_rows(
            vec!["a".into(), "y".into()],
            vec![vec!["oops".into(), "1".into()]],
        );
        let err = ds.features_and_target("y").unwrap_err();
        assert!(matches!(err, EvalError::DataContract(_)));
    }

    #[test]
    fn test_stats_flag_constant_column() {
        let ds = sample();
        let stats = ds.stats("label", TaskType::Classification);
        assert_eq!(stats.n_rows, 4);
        assert_eq!(stats.missing_values, 0);
        // f2 is constant: 1 of 3 feature columns.
        assert!((stats.low_variance_fraction - 1.0 / 3.0).abs() < 1e-9);
        // 3 of 4 labels are 1.
        assert!((stats.imbalance_ratio - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_missing_cells_counted_and_nan_in_features() {
        let ds = Dataset::from_rows(
            vec!["a".into(), "y".into()],
            vec![
                vec!["".into(), "1".into()],
                vec!["2".into(), "0".into()],
            ],
        );
        let stats = ds.stats("y", TaskType::Regression);
        assert_eq!(stats.missing_values, 1);
        assert_eq!(stats.imbalance_ratio, 0.5);

        let (x, _, _) = ds.features_and_target("y").unwrap();
        assert!(x[0][0].is_nan());
    }

    #[test]
    fn test_nlp_frame_contract() {
        let ds = Dataset::from_rows(
            vec!["predictions".into(), "references".into()],
            vec![vec!["the cat".into(), "the cat".into()]],
        );
        let (preds, refs) = ds.nlp_frame().unwrap();
        assert_eq!(preds, vec!["the cat"]);
        assert_eq!(refs, vec!["the cat"]);

        let bad = sample();
        assert!(matches!(
            bad.nlp_frame().unwrap_err(),
            EvalError::DataContract(_)
        ));
    }

    #[test]
    fn test_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "x,y\n1.5,0\n2.5,1\n").unwrap();

        let ds = Dataset::load(&path).unwrap();
        assert_eq!(ds.n_rows(), 2);
        assert_eq!(ds.headers(), &["x".to_string(), "y".to_string()]);
    }
}
