use crate::artifact::ArtifactError;
use crate::features::FeatureError;
use crate::models::ErrorBody;
use crate::worldbank::FetchError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use log::error;
use std::path::PathBuf;
use thiserror::Error;

const GENERIC_MESSAGE: &str = "An unexpected error occurred while processing the request.";

/// Request-scoped failures. None of them leaves state behind for later requests.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Missing data field: '{0}'")]
    MissingField(String),
    #[error("Invalid value for '{field}': {reason}")]
    InvalidField { field: String, reason: String },
    #[error("Malformed request body: {0}")]
    InvalidPayload(String),
    #[error("Country '{0}' was not present in the training data.")]
    UnknownCountry(String),
    #[error("Model file not found at {}. Run the trainer to produce it.", .0.display())]
    ModelNotFound(PathBuf),
    #[error("feature row does not match the model input: {0}")]
    InvalidFeatures(String),
    #[error("upstream data source failed: {0}")]
    Upstream(#[from] FetchError),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<FeatureError> for ServiceError {
    fn from(err: FeatureError) -> Self {
        match err {
            FeatureError::UnknownCountry(country) => ServiceError::UnknownCountry(country),
        }
    }
}

impl From<ArtifactError> for ServiceError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NotFound(path) => ServiceError::ModelNotFound(path),
            other => ServiceError::Unexpected(anyhow::Error::new(other)),
        }
    }
}

impl ServiceError {
    /// Text sent to the caller. Internal failures are reduced to a generic message.
    pub fn public_message(&self) -> String {
        match self {
            ServiceError::InvalidFeatures(_) | ServiceError::Unexpected(_) => {
                GENERIC_MESSAGE.to_string()
            }
            ServiceError::Upstream(_) => "Failed to fetch data".to_string(),
            other => other.to_string(),
        }
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::MissingField(_)
            | ServiceError::InvalidField { .. }
            | ServiceError::InvalidPayload(_)
            | ServiceError::UnknownCountry(_) => StatusCode::BAD_REQUEST,
            ServiceError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServiceError::ModelNotFound(_)
            | ServiceError::InvalidFeatures(_)
            | ServiceError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() || status == StatusCode::BAD_GATEWAY {
            error!("request failed: {self:#}");
        }
        HttpResponse::build(status).json(ErrorBody::new(self.public_message()))
    }
}
