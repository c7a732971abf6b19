use crate::error::ServiceError;
use crate::features::FeatureRow;
use crate::forest::{ForestError, RandomForestRegressor};
use crate::schema::TrainingSchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_MODEL_PATH: &str = "ml_prediction/gdp_prediction_model.json";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Model file not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to access model file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("model file {} is not a valid artifact: {source}", .path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported artifact format version {found} (expected {FORMAT_VERSION})")]
    UnsupportedVersion { found: u32 },
    #[error("artifact schema has {schema} columns but the forest expects {forest}")]
    Inconsistent { schema: usize, forest: usize },
    #[error("artifact forest is invalid: {0}")]
    InvalidForest(#[from] ForestError),
}

/// Held-out evaluation recorded by the trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub r2: f64,
    pub mae: f64,
    pub rmse: f64,
    pub test_rows: usize,
}

/// Trained forest together with the column layout it was fitted on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedModel {
    pub format_version: u32,
    pub trained_at: DateTime<Utc>,
    pub schema: TrainingSchema,
    /// World Bank country code -> display name, as seen at training time.
    pub countries: BTreeMap<String, String>,
    pub metrics: Option<EvaluationMetrics>,
    pub forest: RandomForestRegressor,
}

impl PersistedModel {
    pub fn new(
        schema: TrainingSchema,
        countries: BTreeMap<String, String>,
        forest: RandomForestRegressor,
    ) -> Result<Self, ArtifactError> {
        let model = Self {
            format_version: FORMAT_VERSION,
            trained_at: Utc::now(),
            schema,
            countries,
            metrics: None,
            forest,
        };
        model.check_consistency()?;
        Ok(model)
    }

    pub fn with_metrics(mut self, metrics: EvaluationMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn check_consistency(&self) -> Result<(), ArtifactError> {
        if self.format_version != FORMAT_VERSION {
            return Err(ArtifactError::UnsupportedVersion {
                found: self.format_version,
            });
        }
        if self.schema.len() != self.forest.n_features() {
            return Err(ArtifactError::Inconsistent {
                schema: self.schema.len(),
                forest: self.forest.n_features(),
            });
        }
        self.forest.validate()?;
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ArtifactError> {
        let path = path.as_ref();
        let io_err = |source: io::Error| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
        serde_json::to_writer(&mut writer, self).map_err(|source| ArtifactError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(io_err)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound(path.to_path_buf()))
            }
            Err(source) => {
                return Err(ArtifactError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let model: Self =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| ArtifactError::Format {
                path: path.to_path_buf(),
                source,
            })?;
        model.check_consistency()?;
        Ok(model)
    }

    /// Applies the forest to one row. The row must follow the schema exactly.
    pub fn predict(&self, row: &FeatureRow) -> Result<f64, ServiceError> {
        if !row.matches(&self.schema) {
            return Err(ServiceError::InvalidFeatures(format!(
                "expected columns {:?}, got {:?}",
                self.schema.columns(),
                row.names().collect::<Vec<_>>()
            )));
        }
        let predicted = self
            .forest
            .predict_row(row.to_array().view())
            .map_err(|e: ForestError| ServiceError::InvalidFeatures(e.to_string()))?;
        if !predicted.is_finite() {
            return Err(ServiceError::InvalidFeatures(format!(
                "forest produced a non-finite prediction ({predicted})"
            )));
        }
        Ok(predicted)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::features::{build_feature_row, FeatureInput};
    use crate::forest::ForestParams;
    use ndarray::{Array1, Array2};
    use serde_json::json;

    /// Small forest over two countries where the target tracks lag 1.
    pub(crate) fn tiny_model() -> PersistedModel {
        let schema = TrainingSchema::for_countries(["China", "United States"]).unwrap();
        let mut rows = Vec::new();
        let mut targets = Vec::new();
        for (k, country) in ["China", "United States"].into_iter().enumerate() {
            for year in 2000..2020 {
                let base = (year - 1990) as f64 * 1e12 * (k + 1) as f64;
                let row = build_feature_row(
                    &schema,
                    &FeatureInput {
                        country,
                        year,
                        lags: [base, base * 0.95, base * 0.9],
                    },
                )
                .unwrap();
                rows.extend(row.to_array().iter().copied());
                targets.push(base * 1.05);
            }
        }
        let x = Array2::from_shape_vec((targets.len(), schema.len()), rows).unwrap();
        let y = Array1::from(targets);
        let params = ForestParams {
            n_estimators: 8,
            ..ForestParams::default()
        };
        let forest = RandomForestRegressor::fit(params, x.view(), y.view()).unwrap();
        let countries = BTreeMap::from([
            ("CN".to_string(), "China".to_string()),
            ("US".to_string(), "United States".to_string()),
        ]);
        PersistedModel::new(schema, countries, forest).unwrap()
    }

    #[test]
    fn save_then_load_preserves_schema_and_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/model.json");
        let model = tiny_model();
        model.save(&path).unwrap();

        let loaded = PersistedModel::load(&path).unwrap();
        assert_eq!(loaded.schema, model.schema);
        assert_eq!(loaded.countries, model.countries);

        let row = build_feature_row(
            &loaded.schema,
            &FeatureInput {
                country: "China",
                year: 2021,
                lags: [3e13, 2.9e13, 2.8e13],
            },
        )
        .unwrap();
        assert_eq!(loaded.predict(&row).unwrap(), model.predict(&row).unwrap());
    }

    #[test]
    fn missing_file_is_reported_as_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let err = PersistedModel::load(&path).unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound(p) if p == path));
    }

    #[test]
    fn garbage_file_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            PersistedModel::load(&path),
            Err(ArtifactError::Format { .. })
        ));
    }

    #[test]
    fn schema_and_forest_width_must_agree() {
        let model = tiny_model();
        let wider = TrainingSchema::for_countries(["China", "India", "United States"]).unwrap();
        let err = PersistedModel::new(wider, BTreeMap::new(), model.forest).unwrap_err();
        assert!(matches!(err, ArtifactError::Inconsistent { schema: 7, forest: 6 }));
    }

    #[test]
    fn misaligned_row_is_rejected() {
        let model = tiny_model();
        let other = TrainingSchema::for_countries(["Brazil", "China"]).unwrap();
        let row = build_feature_row(
            &other,
            &FeatureInput {
                country: "Brazil",
                year: 2021,
                lags: [1.0, 1.0, 1.0],
            },
        )
        .unwrap();
        assert!(matches!(
            model.predict(&row),
            Err(ServiceError::InvalidFeatures(_))
        ));
    }

    fn write_json(path: &Path, value: &serde_json::Value) {
        fs::write(path, serde_json::to_vec(value).unwrap()).unwrap();
    }

    #[test]
    fn structurally_broken_forest_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let original = serde_json::to_value(tiny_model()).unwrap();

        let mut no_trees = original.clone();
        no_trees["forest"]["trees"] = json!([]);
        write_json(&path, &no_trees);
        assert!(matches!(
            PersistedModel::load(&path),
            Err(ArtifactError::InvalidForest(ForestError::NoTrees))
        ));

        let mut dangling = original;
        dangling["forest"]["trees"][3]["nodes"][0] =
            json!({"Split": {"feature": 1, "threshold": 2.0, "left": 1, "right": 100000}});
        write_json(&path, &dangling);
        assert!(matches!(
            PersistedModel::load(&path),
            Err(ArtifactError::InvalidForest(ForestError::MalformedTree { tree: 3, node: 0, .. }))
        ));

        let err: ServiceError = PersistedModel::load(&path).unwrap_err().into();
        assert!(matches!(err, ServiceError::Unexpected(_)));
    }

    #[test]
    fn non_finite_prediction_is_an_error() {
        let mut value = serde_json::to_value(tiny_model()).unwrap();
        let huge_leaf = json!({"nodes": [{"Leaf": {"value": 1.5e308}}]});
        value["forest"]["trees"] = json!([huge_leaf.clone(), huge_leaf]);
        let model: PersistedModel = serde_json::from_value(value).unwrap();
        model.check_consistency().unwrap();

        let row = build_feature_row(
            &model.schema,
            &FeatureInput {
                country: "United States",
                year: 2021,
                lags: [1.0, 1.0, 1.0],
            },
        )
        .unwrap();
        assert!(matches!(
            model.predict(&row),
            Err(ServiceError::InvalidFeatures(_))
        ));
    }
}
