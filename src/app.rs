use axum::{extract::DefaultBodyLimit, http::HeaderValue, Router};
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, CorsLayer, ExposeHeaders},
    limit::RequestBodyLimitLayer,
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::config::Settings;
use crate::domain::pricing::PricingPolicy;
use crate::middleware::{request_id::X_REQUEST_ID, request_id_layer};
use crate::routes;
use crate::services::{DocumentAssembler, UploadStore};

/// Room for multipart framing and the JSON fields around an upload.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

/// Shared application state
pub struct AppState {
    pub settings: Settings,
    pub assembler: DocumentAssembler,
    pub uploads: UploadStore,
}

impl AppState {
    pub fn new(settings: Settings, policy: PricingPolicy) -> Arc<Self> {
        let paths = settings.paths();
        let assembler = DocumentAssembler::new(&settings, policy);
        let uploads = UploadStore::new(paths.inspection_uploads, settings.max_upload_bytes);
        Arc::new(Self {
            settings,
            assembler,
            uploads,
        })
    }
}

/// Build the complete application with all middleware
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.settings);

    // DEBUG spans keep INFO output to one line per event
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let (set_request_id, propagate_request_id) = request_id_layer();

    let public_storage = ServeDir::new(state.settings.public_dir.join("storage"));
    let body_limit = state.settings.max_upload_bytes + BODY_LIMIT_SLACK;

    Router::new()
        .merge(routes::api_router())
        .nest_service("/storage", public_storage)
        // Middleware stack (applied bottom-up)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(propagate_request_id)
        .layer(trace_layer)
        .layer(set_request_id)
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_allow_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let max_age = if settings.env.is_dev() {
        std::time::Duration::from_secs(86400)
    } else {
        std::time::Duration::from_secs(3600)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::list([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::HeaderName::from_static(X_REQUEST_ID),
        ]))
        // Browsers hide these from scripts unless exposed
        .expose_headers(ExposeHeaders::list([
            axum::http::header::CONTENT_DISPOSITION,
            axum::http::HeaderName::from_static(routes::proposals::FILL_WARNINGS_HEADER),
        ]))
        .max_age(max_age)
}
