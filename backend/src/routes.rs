use crate::config::ServerConfig;
use crate::error::ServiceError;
use crate::inference::Predictor;
use crate::models::{
    ApiResponse, ErrorBody, GdpPoint, GdpQuery, IndicatorPoint, PredictionResponse,
    RawPredictionRequest,
};
use crate::worldbank::{indicator_id, IndicatorQuery, Observation, WorldBankClient, GDP_INDICATOR};
use actix_files::Files;
use actix_web::dev::{fn_service, ServiceRequest, ServiceResponse};
use actix_web::error::{JsonPayloadError, QueryPayloadError};
use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use anyhow::anyhow;
use log::{error, info, warn};
use serde::Serialize;
use std::path::Path;

const SERIES_COUNTRY: &str = "IND";
const SERIES_START: i32 = 2012;
const SERIES_END: i32 = 2022;
const DATA_START: i32 = 1960;
const DATA_END: i32 = 2022;

/// Registers the API routes. Static pages are mounted separately with
/// [`static_files`] so they stay last in the resolution order.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(query_config())
        .route("/predict", web::post().to(predict))
        .route("/api/health", web::get().to(health_check))
        .route("/api/model-info", web::get().to(model_info))
        .route("/api/gdp", web::get().to(gdp_series))
        .route(
            "/api/data/{indicator}/{country}",
            web::get().to(indicator_series),
        );
}

/// Bodies are parsed as JSON whatever their declared content type.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(64 * 1024)
        .content_type_required(false)
        .content_type(|_| true)
        .error_handler(|err, _req| {
            let message = match &err {
                JsonPayloadError::Deserialize(e) => e.to_string(),
                other => other.to_string(),
            };
            ServiceError::InvalidPayload(message).into()
        })
}

fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| {
        let message = match &err {
            QueryPayloadError::Deserialize(e) => e.to_string(),
            other => other.to_string(),
        };
        ServiceError::InvalidPayload(message).into()
    })
}

pub fn static_files(dir: impl AsRef<Path>) -> Files {
    Files::new("/", dir.as_ref())
        .index_file("index.html")
        .prefer_utf8(true)
        .default_handler(fn_service(|req: ServiceRequest| async move {
            let (req, _) = req.into_parts();
            Ok::<_, actix_web::Error>(ServiceResponse::new(req, not_found().await))
        }))
}

pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(ErrorBody::new("Endpoint not found"))
}

fn blocking_failed(e: actix_web::error::BlockingError) -> ServiceError {
    ServiceError::Unexpected(anyhow!("blocking task failed: {e}"))
}

async fn predict(
    predictor: web::Data<Predictor>,
    body: web::Json<RawPredictionRequest>,
    request: HttpRequest,
) -> Result<HttpResponse, ServiceError> {
    let peer = request
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    info!("[predict] incoming request from {peer}: {:?}", body);

    let req = body.into_inner().validate().inspect_err(|e| {
        warn!("[predict] rejected request from {peer}: {e}");
    })?;

    let predictor = predictor.into_inner();
    let job = req.clone();
    let outcome = web::block(move || predictor.predict_request(&job))
        .await
        .map_err(blocking_failed)?;

    match outcome {
        Ok(predicted_gdp) => {
            info!(
                "[predict] {} {} -> {predicted_gdp:.2}",
                req.country_name, req.prediction_year
            );
            Ok(HttpResponse::Ok().json(PredictionResponse {
                country: req.country_name,
                prediction_year: req.prediction_year,
                predicted_gdp,
            }))
        }
        Err(e) => {
            if !e.status_code().is_server_error() {
                warn!("[predict] {e}");
            }
            Err(e)
        }
    }
}

#[derive(Serialize)]
struct HealthStatus {
    service: &'static str,
    model_loaded: bool,
}

async fn health_check(predictor: web::Data<Predictor>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(HealthStatus {
        service: "gdp-forecast",
        model_loaded: predictor.is_loaded(),
    }))
}

async fn model_info(predictor: web::Data<Predictor>) -> HttpResponse {
    let predictor = predictor.into_inner();
    let outcome = match web::block(move || predictor.model_info()).await {
        Ok(outcome) => outcome,
        Err(e) => Err(blocking_failed(e)),
    };

    match outcome {
        Ok(info) => HttpResponse::Ok().json(ApiResponse::success(info)),
        Err(e) => {
            error!("model info unavailable: {e:#}");
            HttpResponse::build(e.status_code()).json(ApiResponse::<()>::error(&e.public_message()))
        }
    }
}

fn check_country_code(code: &str) -> Result<(), ServiceError> {
    let valid = (2..=3).contains(&code.len()) && code.chars().all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(ServiceError::InvalidField {
            field: "country".into(),
            reason: format!("'{code}' is not a country code"),
        })
    }
}

async fn fetch_series(
    base_url: &str,
    indicator: &'static str,
    country: String,
    start: i32,
    end: i32,
) -> Result<Vec<Observation>, ServiceError> {
    let base_url = base_url.to_string();
    web::block(move || {
        let client = WorldBankClient::new(base_url);
        client.fetch(&IndicatorQuery::new(indicator, [country], start, end))
    })
    .await
    .map_err(blocking_failed)?
    .map_err(ServiceError::from)
}

async fn gdp_series(
    config: web::Data<ServerConfig>,
    query: web::Query<GdpQuery>,
) -> Result<HttpResponse, ServiceError> {
    let GdpQuery {
        country,
        start,
        end,
    } = query.into_inner();
    let country = country.unwrap_or_else(|| SERIES_COUNTRY.to_string());
    let (start, end) = (start.unwrap_or(SERIES_START), end.unwrap_or(SERIES_END));
    check_country_code(&country)?;
    if start > end {
        return Err(ServiceError::InvalidField {
            field: "start".into(),
            reason: format!("{start} is after end year {end}"),
        });
    }

    info!("[gdp] fetching {country} {start}:{end}");
    let points: Vec<GdpPoint> = fetch_series(&config.world_bank_url, GDP_INDICATOR, country, start, end)
        .await?
        .into_iter()
        .map(|o| GdpPoint {
            date: o.year.to_string(),
            gdp: o.value,
        })
        .collect();
    Ok(HttpResponse::Ok().json(points))
}

async fn indicator_series(
    config: web::Data<ServerConfig>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ServiceError> {
    let (indicator, country) = path.into_inner();
    let indicator = indicator_id(&indicator).ok_or_else(|| ServiceError::InvalidField {
        field: "indicator".into(),
        reason: format!("unknown indicator '{indicator}'"),
    })?;
    check_country_code(&country)?;

    let points: Vec<IndicatorPoint> =
        fetch_series(&config.world_bank_url, indicator, country, DATA_START, DATA_END)
            .await?
            .into_iter()
            .map(|o| IndicatorPoint {
                date: o.year.to_string(),
                value: o.value,
            })
            .collect();
    Ok(HttpResponse::Ok().json(points))
}
