use actix_cors::Cors;
use actix_web::middleware::{DefaultHeaders, Logger};
use actix_web::{http::header, web, App, HttpServer};
use gdp_backend::config::ServerConfig;
use gdp_backend::inference::Predictor;
use gdp_backend::routes;
use log::{info, warn};
use std::io;

fn build_cors(origins: &[String]) -> Cors {
    if origins.is_empty() {
        return Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();
    }

    origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allowed_methods(vec!["GET", "POST"])
        .allowed_headers(vec![header::CONTENT_TYPE, header::ACCEPT])
        .max_age(3600)
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .format_module_path(false)
        .init();

    let config = ServerConfig::from_env()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    info!("Starting GDP forecast service");

    // A missing artifact is not fatal: /predict reports it per request.
    let predictor = Predictor::new(&config.model_path, config.model_cache);
    match predictor.model() {
        Ok(model) => info!(
            "Model ready: {} countries, trained {}",
            model.schema.countries().count(),
            model.trained_at.to_rfc3339()
        ),
        Err(e) => warn!(
            "Model not loaded from {}: {e}",
            predictor.model_path().display()
        ),
    }

    let predictor = web::Data::new(predictor);
    let shared_config = web::Data::new(config.clone());
    let bind_address = config.bind_address();
    let workers = config.workers;

    info!("Listening on http://{bind_address} with {workers} workers");
    info!("Model cache mode: {:?}", config.model_cache);
    info!("Endpoints:");
    info!("   POST /predict                          - GDP prediction");
    info!("   GET  /api/gdp                          - GDP series (World Bank)");
    info!("   GET  /api/data/{{indicator}}/{{country}} - indicator series");
    info!("   GET  /api/health                       - health check");
    info!("   GET  /api/model-info                   - model information");
    info!("   GET  /                                 - static pages from {}", config.static_dir.display());

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(DefaultHeaders::new().add(("X-Content-Type-Options", "nosniff")))
            .wrap(build_cors(&config.cors_origins))
            .app_data(predictor.clone())
            .app_data(shared_config.clone())
            .configure(routes::configure)
            .service(routes::static_files(&config.static_dir))
            .default_service(web::to(routes::not_found))
    })
    .workers(workers)
    .bind(&bind_address)?
    .run()
    .await
}
