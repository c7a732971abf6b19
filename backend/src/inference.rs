use crate::artifact::{EvaluationMetrics, PersistedModel};
use crate::error::ServiceError;
use crate::features::{build_feature_row, FeatureRow};
use crate::models::PredictionRequest;
use chrono::{DateTime, Utc};
use log::{debug, info};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// How often the artifact is read from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelCache {
    /// Loaded on first successful use and shared afterwards.
    #[default]
    Shared,
    /// Read from disk on every call.
    PerRequest,
}

impl FromStr for ModelCache {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(ModelCache::Shared),
            "per-request" | "per_request" => Ok(ModelCache::PerRequest),
            other => Err(format!("unknown model cache mode '{other}'")),
        }
    }
}

/// Loads the persisted forest and answers predictions with it.
///
/// A failed load is never cached, so dropping the artifact into place later
/// starts serving without a restart.
pub struct Predictor {
    model_path: PathBuf,
    cache: ModelCache,
    loaded: OnceCell<Arc<PersistedModel>>,
}

impl Predictor {
    pub fn new(model_path: impl Into<PathBuf>, cache: ModelCache) -> Self {
        Self {
            model_path: model_path.into(),
            cache,
            loaded: OnceCell::new(),
        }
    }

    /// Wraps an already-loaded model.
    pub fn from_model(model: PersistedModel) -> Self {
        Self {
            model_path: PathBuf::new(),
            cache: ModelCache::Shared,
            loaded: OnceCell::with_value(Arc::new(model)),
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    pub fn model(&self) -> Result<Arc<PersistedModel>, ServiceError> {
        match self.cache {
            ModelCache::Shared => self
                .loaded
                .get_or_try_init(|| self.load().map(Arc::new))
                .cloned(),
            ModelCache::PerRequest => self.load().map(Arc::new),
        }
    }

    fn load(&self) -> Result<PersistedModel, ServiceError> {
        let model = PersistedModel::load(&self.model_path)?;
        info!(
            "loaded model from {} ({} trees, {} features)",
            self.model_path.display(),
            model.forest.n_trees(),
            model.schema.len()
        );
        Ok(model)
    }

    pub fn predict(&self, row: &FeatureRow) -> Result<f64, ServiceError> {
        self.model()?.predict(row)
    }

    /// Builds the feature row against the loaded schema and predicts.
    pub fn predict_request(&self, request: &PredictionRequest) -> Result<f64, ServiceError> {
        let model = self.model()?;
        let row = build_feature_row(&model.schema, &request.feature_input())?;
        let predicted = model.predict(&row)?;
        debug!(
            "predicted {predicted:.2} for {} in {}",
            request.country_name, request.prediction_year
        );
        Ok(predicted)
    }

    pub fn model_info(&self) -> Result<ModelInfo, ServiceError> {
        let model = self.model()?;
        Ok(ModelInfo {
            format_version: model.format_version,
            trained_at: model.trained_at,
            n_estimators: model.forest.n_trees(),
            features: model.schema.columns().to_vec(),
            countries: model.schema.countries().map(str::to_string).collect(),
            metrics: model.metrics.clone(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub format_version: u32,
    pub trained_at: DateTime<Utc>,
    pub n_estimators: usize,
    pub features: Vec<String>,
    pub countries: Vec<String>,
    pub metrics: Option<EvaluationMetrics>,
}
