pub mod health;
pub mod proposals;
pub mod risk;
pub mod uploads;

use axum::{
    extract::rejection::JsonRejection,
    routing::{get, post},
    Json, Router,
};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

/// Build the API router with all routes
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health_check))
        // Proposal pipeline
        .route("/api/generate-propose", post(proposals::generate_proposal))
        .route("/api/service-types", get(proposals::list_service_types))
        // Landing page tools
        .route("/api/calculate-risk", post(risk::calculate_risk))
        .route(
            "/api/upload-inspection-image",
            post(uploads::upload_inspection_image),
        )
}

/// Unwrap a JSON body that must be an object.
pub(crate) fn json_object(payload: Result<Json<Value>, JsonRejection>) -> ApiResult<Map<String, Value>> {
    match payload? {
        Json(Value::Object(body)) => Ok(body),
        Json(_) => Err(ApiError::BadRequest("Request body must be a JSON object".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{create_app, AppState};
    use crate::config::Settings;
    use crate::domain::pricing::PricingPolicy;
    use crate::services::fixtures::{formula_cell, num_cell, para, write_docx, write_png, write_xlsx};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, HeaderMap, Request, StatusCode};
    use serde_json::json;
    use std::io::Cursor;
    use tower::ServiceExt;

    struct TestApp {
        dir: tempfile::TempDir,
        router: Router,
    }

    impl TestApp {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let settings = Settings::for_dirs(&dir.path().join("storage"), &dir.path().join("public"));
            let state = AppState::new(settings, PricingPolicy::default());
            Self {
                router: create_app(state),
                dir,
            }
        }

        fn settings(&self) -> Settings {
            Settings::for_dirs(&self.dir.path().join("storage"), &self.dir.path().join("public"))
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let headers = response.headers().clone();
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, headers, body.to_vec())
        }

        async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
            let (status, _, body) = self.send(Request::get(uri).body(Body::empty()).unwrap()).await;
            (status, serde_json::from_slice(&body).unwrap())
        }

        async fn post_json(&self, uri: &str, payload: Value) -> (StatusCode, HeaderMap, Vec<u8>) {
            let request = Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap();
            self.send(request).await
        }
    }

    fn proposal_payload(service_type: &str) -> Value {
        json!({
            "client_name": "Budi Santoso!",
            "address": "Jl. Darmo 12, Surabaya",
            "service_type": service_type,
            "area_treatment": 100,
            "floor_count": 1,
            "distance_km": 4,
            "transport": "motor",
            "monitoring_duration_months": 2,
            "preparation_set_items": [],
            "additional_set_items": [],
        })
    }

    #[tokio::test]
    async fn test_health_reports_missing_templates_as_degraded() {
        let app = TestApp::new();
        let (status, body) = app.get_json("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["checks"]["calculation_template"], "missing");
        assert_eq!(body["checks"]["generated_dir"], "ok");
    }

    #[tokio::test]
    async fn test_service_types_by_proposal_type() {
        let app = TestApp::new();

        let (status, body) = app.get_json("/api/service-types").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["proposal_type"], "pest_control");
        assert_eq!(
            body["available_service_types"],
            json!(["pipanasi", "spraying", "inject_spraying", "refill_pipanasi"])
        );

        let (_, body) = app.get_json("/api/service-types?proposal_type=rat_control").await;
        assert_eq!(body["available_service_types"], json!(["baiting", "trapping", "exclusion"]));

        let (_, body) = app.get_json("/api/service-types?proposal_type=termite").await;
        assert_eq!(body["proposal_type"], "termite");
        assert_eq!(body["available_service_types"], json!([]));
    }

    #[tokio::test]
    async fn test_calculate_risk() {
        let app = TestApp::new();
        let payload = json!({
            "luasRumah": 120,
            "umurBangunan": 5,
            "lokasiRumah": "perkotaan",
            "materialBangunan": "beton-dominan",
            "riwayatRayap": "tidak",
            "tingkatKelembaban": 60,
            "jumlahPerabotKayu": 4,
            "adaDanauSebelumnya": "tidak",
            "jenisTanah": "liat",
        });
        let (status, _, body) = app.post_json("/api/calculate-risk", payload).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["skorRisiko"], 59);
        assert_eq!(body["kategoriRisiko"], "Sedang");

        let (status, _, body) = app.post_json("/api/calculate-risk", json!({"luasRumah": 120})).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["code"], "VALIDATION_FAILED");
        assert_eq!(body["fields"]["jenisTanah"][0], "The jenisTanah field is required.");
    }

    #[tokio::test]
    async fn test_generate_rejects_invalid_requests() {
        let app = TestApp::new();

        let (status, _, body) = app
            .post_json("/api/generate-propose", proposal_payload("fumigation"))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["fields"]["service_type"][0], "The selected service type is invalid.");

        let (status, _, _) = app.post_json("/api/generate-propose", json!([1, 2])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Valid request, but no templates on disk.
        let (status, _, body) = app
            .post_json("/api/generate-propose", proposal_payload("baiting"))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["message"], "Proposal template not found");
    }

    #[tokio::test]
    async fn test_generate_returns_zip_attachment() {
        let app = TestApp::new();
        let paths = app.settings().paths();
        std::fs::create_dir_all(&paths.proposal_templates).unwrap();
        std::fs::create_dir_all(&paths.contract_templates).unwrap();
        write_xlsx(
            &paths.calculation_template,
            &[
                format!(r#"<row r="17">{}</row>"#, formula_cell("O17", "C22*10000")),
                format!(r#"<row r="22">{}</row>"#, num_cell("C22", 0.0)),
            ]
            .concat(),
        );
        let body = para("${client_name} ${final_price}");
        write_docx(&paths.proposal_templates.join("baiting.docx"), &body);
        write_docx(&paths.contract_templates.join("baiting.docx"), &body);

        let (status, headers, bytes) = app
            .post_json("/api/generate-propose", proposal_payload("baiting"))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/zip");
        let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename=\"document_baiting_Budi-Santoso_"));
        assert!(headers.contains_key(proposals::FILL_WARNINGS_HEADER));
        assert!(headers.contains_key("x-request-id"));

        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<_> = archive.file_names().collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().any(|n| n.starts_with("proposal_baiting_Budi-Santoso_")));
        assert!(names.iter().any(|n| n.starts_with("contract_baiting_Budi-Santoso_")));

        // Nothing is left in the output directory once the archive is sent.
        assert_eq!(std::fs::read_dir(&paths.generated).unwrap().count(), 0);
    }

    fn multipart(field: &str, bytes: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--BOUNDARY\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"photo.png\"\r\nContent-Type: image/png\r\n\r\n",
            field
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n--BOUNDARY--\r\n");
        Request::post("/api/upload-inspection-image")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=BOUNDARY")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_then_serve_image() {
        let app = TestApp::new();
        let source = app.dir.path().join("photo.png");
        write_png(&source, 4, 4, [200, 10, 10]);
        let png = std::fs::read(&source).unwrap();

        let (status, _, body) = app.send(multipart("image", &png)).await;
        assert_eq!(status, StatusCode::CREATED);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["message"], "Image uploaded successfully");
        let url = body["url"].as_str().unwrap().to_string();
        assert!(url.starts_with("/storage/inspections/"));

        let (status, _, served) = app.send(Request::get(url.as_str()).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(served, png);
    }

    #[tokio::test]
    async fn test_upload_validation() {
        let app = TestApp::new();

        let (status, _, body) = app.send(multipart("photo", b"whatever")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["fields"]["image"][0], "The image field is required.");

        let (status, _, body) = app.send(multipart("image", b"not an image")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body["fields"]["image"][0],
            "The image must be a file of type: jpeg, png, jpg, gif, webp."
        );
    }
}
