use actix_multipart::Multipart;
use actix_web::error::{ErrorPayloadTooLarge, ErrorServiceUnavailable};
use actix_web::{Error, HttpResponse, web};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::{StreamExt, TryStreamExt};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use shared::{FileInfo, InferenceRequest, ModelKind, PredictionResponse};
use std::sync::Arc;
use strum::IntoEnumIterator;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::MAX_UPLOAD_BYTES;
use crate::ensemble::Ensemble;
use crate::error::DecodeError;
use crate::imaging::{DecodedImage, detect_format};

const SERVICE_NAME: &str = "DeepTrust Models Service";
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// JSON bodies carry the image as base64, plus room for a data-URL prefix.
const MAX_INLINE_BODY_BYTES: usize = MAX_UPLOAD_BYTES.div_ceil(3) * 4 + 64 * 1024;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Shared handler state: the combiner, the analysis concurrency limit and
/// the per-image upload limit.
#[derive(Clone)]
pub struct AppState {
    pub ensemble: Arc<Ensemble>,
    permits: Arc<Semaphore>,
    max_upload_bytes: usize,
}

impl AppState {
    pub fn new(ensemble: Ensemble, max_concurrent_analyses: usize) -> Self {
        Self {
            ensemble: Arc::new(ensemble),
            permits: Arc::new(Semaphore::new(max_concurrent_analyses.max(1))),
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }

    /// Lowers the per-image limit; it never exceeds [`MAX_UPLOAD_BYTES`].
    pub fn with_max_upload_bytes(mut self, limit: usize) -> Self {
        self.max_upload_bytes = limit.min(MAX_UPLOAD_BYTES);
        self
    }
}

struct Upload {
    filename: Option<String>,
    bytes: Vec<u8>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().limit(MAX_INLINE_BODY_BYTES))
        .service(web::resource("/").route(web::get().to(root)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/predict/{model}").route(web::post().to(predict_model)))
        .service(web::resource("/api/inference").route(web::post().to(handle_inference)));
}

async fn root() -> HttpResponse {
    let models: Vec<&str> = ModelKind::iter().map(|kind| kind.display_name()).collect();
    HttpResponse::Ok().json(json!({
        "message": SERVICE_NAME,
        "version": VERSION,
        "models": models,
        "endpoints": {
            "predict": "/predict",
            "predict_model": "/predict/{model}",
            "inference": "/api/inference",
            "health": "/health"
        }
    }))
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    let mut available = serde_json::Map::new();
    for kind in ModelKind::iter() {
        available.insert(kind.to_string(), json!(true));
    }
    available.insert("ensemble".to_string(), json!(true));

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "models",
        "version": VERSION,
        "models_loaded": true,
        "available_models": available,
        "workers_in_flight": state.ensemble.workers_in_flight()
    }))
}

async fn predict(state: web::Data<AppState>, payload: Multipart) -> Result<HttpResponse, Error> {
    let request_id = Uuid::new_v4();
    let Some(upload) = read_upload(payload, state.max_upload_bytes).await? else {
        return Ok(bad_request(request_id, DecodeError::MissingFile));
    };
    info!(
        "[{}] Analyzing {} ({} bytes)",
        request_id,
        upload.filename.as_deref().unwrap_or("<unnamed>"),
        upload.bytes.len()
    );
    analyze(state, request_id, upload).await
}

async fn handle_inference(
    state: web::Data<AppState>,
    request: web::Json<InferenceRequest>,
) -> Result<HttpResponse, Error> {
    let request_id = Uuid::new_v4();
    let encoded = request.image_data.trim();
    // Accept data URLs as well as bare base64.
    let encoded = match encoded.split_once(',') {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let bytes = match STANDARD.decode(encoded) {
        Ok(bytes) => bytes,
        Err(e) => return Ok(bad_request(request_id, DecodeError::from(e))),
    };
    if bytes.len() > state.max_upload_bytes {
        let e = DecodeError::TooLarge {
            size: bytes.len(),
            limit: state.max_upload_bytes,
        };
        warn!("[{}] Rejecting inline image: {}", request_id, e);
        return Ok(HttpResponse::PayloadTooLarge().json(ErrorResponse {
            error: e.to_string(),
        }));
    }
    info!("[{}] Analyzing inline image ({} bytes)", request_id, bytes.len());

    let upload = Upload {
        filename: None,
        bytes,
    };
    analyze(state, request_id, upload).await
}

async fn predict_model(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: Multipart,
) -> Result<HttpResponse, Error> {
    let request_id = Uuid::new_v4();
    let name = path.into_inner();
    let kind: ModelKind = match name.parse() {
        Ok(kind) => kind,
        Err(_) => {
            warn!("[{}] Unknown model requested: {}", request_id, name);
            return Ok(HttpResponse::NotFound().json(ErrorResponse {
                error: format!("unknown model '{}'", name),
            }));
        }
    };

    let Some(upload) = read_upload(payload, state.max_upload_bytes).await? else {
        return Ok(bad_request(request_id, DecodeError::MissingFile));
    };
    let image = match DecodedImage::decode(&upload.bytes) {
        Ok(image) => image,
        Err(e) => return Ok(bad_request(request_id, e)),
    };

    let _permit = state
        .permits
        .acquire()
        .await
        .map_err(ErrorServiceUnavailable)?;
    let ensemble = Arc::clone(&state.ensemble);
    let result = web::block(move || ensemble.analyzer(kind).predict(&image)).await?;
    info!(
        "[{}] {} score {:.4}",
        request_id,
        kind.display_name(),
        result.score
    );
    Ok(HttpResponse::Ok().json(result))
}

async fn analyze(
    state: web::Data<AppState>,
    request_id: Uuid,
    upload: Upload,
) -> Result<HttpResponse, Error> {
    let image = match DecodedImage::decode(&upload.bytes) {
        Ok(image) => image,
        Err(e) => return Ok(bad_request(request_id, e)),
    };
    let file_info = FileInfo {
        filename: upload.filename,
        size: upload.bytes.len(),
        dimensions: image.dimensions(),
        format: detect_format(&upload.bytes).map(|f| format!("{:?}", f).to_lowercase()),
        sha256: hex::encode(Sha256::digest(&upload.bytes)),
    };

    let permit = Arc::clone(&state.permits)
        .acquire_owned()
        .await
        .map_err(ErrorServiceUnavailable)?;
    let ensemble = Arc::clone(&state.ensemble);
    let result = web::block(move || match ensemble.engine().deadline() {
        // Workers abandoned at the deadline hold the permit until they exit.
        Some(deadline) => ensemble.predict_within_holding(&image, deadline, permit),
        None => ensemble.predict(&image),
    })
    .await?;

    if let Some(e) = &result.error {
        error!("[{}] Ensemble fell back to the safe default: {}", request_id, e);
    }
    Ok(HttpResponse::Ok().json(PredictionResponse { result, file_info }))
}

/// Reads the first file field of the upload, or the first field if none
/// carries a filename. Fields after the first file field are not read, and
/// more than `limit` bytes across the fields read is an error.
async fn read_upload(mut payload: Multipart, limit: usize) -> Result<Option<Upload>, Error> {
    let mut upload: Option<Upload> = None;
    let mut total = 0usize;

    while let Some(mut field) = payload.try_next().await? {
        let filename = field
            .content_disposition()
            .and_then(|disposition| disposition.get_filename())
            .map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk?;
            total += chunk.len();
            if total > limit {
                return Err(ErrorPayloadTooLarge(format!(
                    "upload exceeds the {} byte limit",
                    limit
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        let is_file = filename.is_some();
        if upload.is_none() || is_file {
            upload = Some(Upload { filename, bytes });
        }
        if is_file {
            break;
        }
    }

    Ok(upload)
}

fn bad_request(request_id: Uuid, e: DecodeError) -> HttpResponse {
    warn!("[{}] Rejecting undecodable input: {}", request_id, e);
    HttpResponse::BadRequest().json(ErrorResponse {
        error: e.to_string(),
    })
}
