use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use deeptrust_models::routes::{AppState, configure_routes};
use deeptrust_models::{Ensemble, ModelsConfig};
use std::env;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = ModelsConfig::from_env().map_err(|e| {
        log::error!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    log::info!("Loading analyzers...");
    let ensemble = Ensemble::from_config(&config).map_err(|e| {
        log::error!("Failed to initialize analyzers: {}", e);
        std::io::Error::other(format!("Analyzer initialization failed: {}", e))
    })?;
    log::info!("All analyzers loaded successfully");

    let state = web::Data::new(
        AppState::new(ensemble, config.server.max_concurrent_analyses)
            .with_max_upload_bytes(config.server.max_upload_bytes),
    );
    let allowed_origins = config.server.allowed_origins.clone();
    let bind_address = format!("0.0.0.0:{}", config.server.port);

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        let cors = allowed_origins.iter().fold(
            Cors::default()
                .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                .allowed_headers(vec![
                    actix_web::http::header::AUTHORIZATION,
                    actix_web::http::header::ACCEPT,
                    actix_web::http::header::CONTENT_TYPE,
                ])
                .max_age(3600),
            |cors, origin| {
                if origin == "*" {
                    cors.allow_any_origin()
                } else {
                    cors.allowed_origin(origin)
                }
            },
        );

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
