use crate::error::ServiceError;
use crate::features::FeatureInput;
use serde::{Deserialize, Serialize};

/// Body of `POST /predict` as received. Every field is optional so that an
/// absent one can be reported by name instead of as a parse failure.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct RawPredictionRequest {
    pub country_name: Option<String>,
    pub prediction_year: Option<i32>,
    pub gdp_lags: Option<RawGdpLags>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct RawGdpLags {
    #[serde(rename = "GDP_lag_1")]
    pub lag_1: Option<f64>,
    #[serde(rename = "GDP_lag_2")]
    pub lag_2: Option<f64>,
    #[serde(rename = "GDP_lag_3")]
    pub lag_3: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GdpLags {
    #[serde(rename = "GDP_lag_1")]
    pub lag_1: f64,
    #[serde(rename = "GDP_lag_2")]
    pub lag_2: f64,
    #[serde(rename = "GDP_lag_3")]
    pub lag_3: f64,
}

impl GdpLags {
    pub fn as_array(&self) -> [f64; 3] {
        [self.lag_1, self.lag_2, self.lag_3]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRequest {
    pub country_name: String,
    pub prediction_year: i32,
    pub gdp_lags: GdpLags,
}

impl PredictionRequest {
    pub fn feature_input(&self) -> FeatureInput<'_> {
        FeatureInput {
            country: &self.country_name,
            year: self.prediction_year,
            lags: self.gdp_lags.as_array(),
        }
    }
}

impl RawPredictionRequest {
    pub fn validate(self) -> Result<PredictionRequest, ServiceError> {
        let country_name = self
            .country_name
            .ok_or_else(|| ServiceError::MissingField("country_name".into()))?;
        let prediction_year = self
            .prediction_year
            .ok_or_else(|| ServiceError::MissingField("prediction_year".into()))?;
        let lags = self
            .gdp_lags
            .ok_or_else(|| ServiceError::MissingField("gdp_lags".into()))?;

        let gdp_lags = GdpLags {
            lag_1: lag_value("GDP_lag_1", lags.lag_1)?,
            lag_2: lag_value("GDP_lag_2", lags.lag_2)?,
            lag_3: lag_value("GDP_lag_3", lags.lag_3)?,
        };

        Ok(PredictionRequest {
            country_name,
            prediction_year,
            gdp_lags,
        })
    }
}

fn lag_value(name: &str, value: Option<f64>) -> Result<f64, ServiceError> {
    let field = format!("gdp_lags.{name}");
    match value {
        None => Err(ServiceError::MissingField(field)),
        Some(v) if !v.is_finite() || v < 0.0 => Err(ServiceError::InvalidField {
            field,
            reason: format!("expected a non-negative GDP value, got {v}"),
        }),
        Some(v) => Ok(v),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub country: String,
    pub prediction_year: i32,
    pub predicted_gdp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// One point of a country's GDP series as returned by `/api/gdp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GdpPoint {
    pub date: String,
    pub gdp: Option<f64>,
}

/// One point of an indicator series as returned by `/api/data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorPoint {
    pub date: String,
    pub value: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct GdpQuery {
    pub country: Option<String>,
    pub start: Option<i32>,
    pub end: Option<i32>,
}

/// Envelope used by the operational endpoints.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: &str) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message.to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> RawPredictionRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn complete_request_validates() {
        let req = raw(
            r#"{"country_name":"United States","prediction_year":2023,
                "gdp_lags":{"GDP_lag_1":26006893000000,"GDP_lag_2":2.36811710e13,"GDP_lag_3":2.13541050e13},
                "extra":"ignored"}"#,
        )
        .validate()
        .unwrap();

        assert_eq!(req.country_name, "United States");
        assert_eq!(req.prediction_year, 2023);
        assert_eq!(req.gdp_lags.as_array(), [2.6006893e13, 2.36811710e13, 2.13541050e13]);
        assert_eq!(req.feature_input().country, "United States");
    }

    #[test]
    fn missing_fields_are_named() {
        let err = raw(r#"{"country_name":"China","prediction_year":2023}"#)
            .validate()
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing data field: 'gdp_lags'");

        let err = raw(r#"{"prediction_year":2023,"gdp_lags":{}}"#)
            .validate()
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing data field: 'country_name'");

        let err = raw(
            r#"{"country_name":"China","prediction_year":2023,
                "gdp_lags":{"GDP_lag_1":1.0,"GDP_lag_3":1.0}}"#,
        )
        .validate()
        .unwrap_err();
        assert!(matches!(err, ServiceError::MissingField(f) if f == "gdp_lags.GDP_lag_2"));
    }

    #[test]
    fn negative_lag_is_rejected() {
        let err = raw(
            r#"{"country_name":"China","prediction_year":2023,
                "gdp_lags":{"GDP_lag_1":-1.0,"GDP_lag_2":1.0,"GDP_lag_3":1.0}}"#,
        )
        .validate()
        .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidField { field, .. } if field == "gdp_lags.GDP_lag_1"));
    }

    #[test]
    fn non_numeric_lag_fails_to_parse() {
        let parsed = serde_json::from_str::<RawPredictionRequest>(
            r#"{"country_name":"China","prediction_year":2023,
                "gdp_lags":{"GDP_lag_1":"lots","GDP_lag_2":1.0,"GDP_lag_3":1.0}}"#,
        );
        assert!(parsed.is_err());
    }
}
