//! GDP forecasting: feature alignment, random forest model, persisted
//! artifacts and the HTTP layer that serves predictions.

pub mod artifact;
pub mod config;
pub mod error;
pub mod features;
pub mod forest;
pub mod inference;
pub mod models;
pub mod routes;
pub mod schema;
pub mod worldbank;

pub use artifact::PersistedModel;
pub use error::ServiceError;
pub use features::{build_feature_row, FeatureInput, FeatureRow};
pub use inference::{ModelCache, Predictor};
pub use schema::TrainingSchema;
