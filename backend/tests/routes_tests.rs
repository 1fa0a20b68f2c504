use actix_web::http::{StatusCode, header};
use actix_web::{App, test, web};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use deeptrust_models::routes::{AppState, configure_routes};
use deeptrust_models::{Ensemble, ModelsConfig};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::{Value, json};
use std::io::Cursor;

const BOUNDARY: &str = "deeptrust-test-boundary";

fn state() -> web::Data<AppState> {
    let ensemble = Ensemble::from_config(&ModelsConfig::default()).unwrap();
    web::Data::new(AppState::new(ensemble, 2))
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 3) as u8, (y * 3) as u8, ((x * y) % 256) as u8])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn multipart_body(filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload(uri: &str, filename: &str, bytes: &[u8]) -> test::TestRequest {
    test::TestRequest::post()
        .uri(uri)
        .insert_header((
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(multipart_body(filename, bytes))
}

#[actix_web::test]
async fn test_root_lists_models() {
    let app = test::init_service(App::new().app_data(state()).configure(configure_routes)).await;
    let request = test::TestRequest::get().uri("/").to_request();
    let body: Value = test::call_and_read_body_json(&app, request).await;

    assert_eq!(body["message"], "DeepTrust Models Service");
    assert_eq!(
        body["models"],
        json!(["MesoNet", "XceptionNet", "Frequency", "Biological"])
    );
    assert_eq!(body["endpoints"]["predict"], "/predict");
}

#[actix_web::test]
async fn test_health_reports_all_models() {
    let app = test::init_service(App::new().app_data(state()).configure(configure_routes)).await;
    let request = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, request).await;

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["models_loaded"], true);
    for name in ["mesonet", "xception", "frequency", "biological", "ensemble"] {
        assert_eq!(body["available_models"][name], true, "{name}");
    }
    assert_eq!(body["workers_in_flight"], 0);
}

#[actix_web::test]
async fn test_predict_returns_ensemble_and_file_info() {
    let app = test::init_service(App::new().app_data(state()).configure(configure_routes)).await;
    let bytes = png_bytes(48, 40);
    let request = upload("/predict", "sample.png", &bytes).to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = test::read_body_json(response).await;
    assert!(body["ensemble_score"].is_f64());
    assert!(body.get("error").is_none());
    assert_eq!(body["model_details"].as_object().unwrap().len(), 4);
    assert_eq!(body["file_info"]["filename"], "sample.png");
    assert_eq!(body["file_info"]["size"], bytes.len());
    assert_eq!(body["file_info"]["dimensions"], json!([48, 40]));
    assert_eq!(body["file_info"]["format"], "png");
    assert_eq!(body["file_info"]["sha256"].as_str().unwrap().len(), 64);
}

#[actix_web::test]
async fn test_single_model_endpoint() {
    let app = test::init_service(App::new().app_data(state()).configure(configure_routes)).await;
    let request = upload("/predict/frequency", "sample.png", &png_bytes(32, 32)).to_request();
    let body: Value = test::call_and_read_body_json(&app, request).await;

    assert!(body["score"].is_f64());
    assert!(body["fft_anomaly"].is_f64());
    assert!(body.get("ensemble_score").is_none());
}

#[actix_web::test]
async fn test_unknown_model_is_not_found() {
    let app = test::init_service(App::new().app_data(state()).configure(configure_routes)).await;
    let request = upload("/predict/resnet", "sample.png", &png_bytes(8, 8)).to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_undecodable_upload_is_bad_request() {
    let app = test::init_service(App::new().app_data(state()).configure(configure_routes)).await;
    let request = upload("/predict", "notes.txt", b"plain text, not pixels").to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = test::read_body_json(response).await;
    assert!(body["error"].is_string());
}

#[actix_web::test]
async fn test_inline_inference() {
    let app = test::init_service(App::new().app_data(state()).configure(configure_routes)).await;
    let encoded = STANDARD.encode(png_bytes(24, 24));

    let request = test::TestRequest::post()
        .uri("/api/inference")
        .set_json(json!({ "image_data": encoded }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, request).await;
    assert!(body["is_deepfake"].is_boolean());
    assert_eq!(body["file_info"]["filename"], Value::Null);
    assert_eq!(body["file_info"]["dimensions"], json!([24, 24]));

    let data_url = format!("data:image/png;base64,{}", encoded);
    let request = test::TestRequest::post()
        .uri("/api/inference")
        .set_json(json!({ "image_data": data_url }))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_invalid_base64_is_bad_request() {
    let app = test::init_service(App::new().app_data(state()).configure(configure_routes)).await;
    let request = test::TestRequest::post()
        .uri("/api/inference")
        .set_json(json!({ "image_data": "@@not base64@@" }))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

fn noise_png(width: u32, height: u32) -> Vec<u8> {
    let mut state: u32 = 0x9e37_79b9;
    let image = RgbImage::from_fn(width, height, |_, _| {
        let mut channel = || {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        };
        Rgb([channel(), channel(), channel()])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

#[actix_web::test]
async fn test_inline_inference_accepts_multi_megabyte_images() {
    let app = test::init_service(App::new().app_data(state()).configure(configure_routes)).await;
    let bytes = noise_png(900, 700);
    assert!(bytes.len() > 1_500_000);

    let request = test::TestRequest::post()
        .uri("/api/inference")
        .set_json(json!({ "image_data": STANDARD.encode(&bytes) }))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["file_info"]["size"], bytes.len());
    assert_eq!(body["file_info"]["dimensions"], json!([900, 700]));
}

#[actix_web::test]
async fn test_uploads_over_the_limit_are_rejected() {
    let state = web::Data::new(
        AppState::new(Ensemble::from_config(&ModelsConfig::default()).unwrap(), 1)
            .with_max_upload_bytes(256),
    );
    let app = test::init_service(App::new().app_data(state).configure(configure_routes)).await;
    let bytes = png_bytes(64, 64);
    assert!(bytes.len() > 256);

    let request = upload("/predict", "large.png", &bytes).to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let request = test::TestRequest::post()
        .uri("/api/inference")
        .set_json(json!({ "image_data": STANDARD.encode(&bytes) }))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[actix_web::test]
async fn test_first_file_field_wins() {
    let app = test::init_service(App::new().app_data(state()).configure(configure_routes)).await;
    let bytes = png_bytes(20, 10);

    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nnot an image\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"first.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(&bytes);
    body.extend_from_slice(
        format!(
            "\r\n--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"extra\"; filename=\"second.txt\"\r\n\r\nignored\r\n--{BOUNDARY}--\r\n"
        )
        .as_bytes(),
    );

    let request = test::TestRequest::post()
        .uri("/predict")
        .insert_header((
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(body)
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["file_info"]["filename"], "first.png");
    assert_eq!(body["file_info"]["dimensions"], json!([20, 10]));
}
