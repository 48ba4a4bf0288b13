use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
};
use serde::Serialize;
use std::sync::Arc;

use crate::api::{Created, ValidationErrors};
use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::services::uploads::UploadError;

const IMAGE_FIELD: &str = "image";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub url: String,
}

fn image_error(message: impl Into<String>) -> ApiError {
    let mut errors = ValidationErrors::new();
    errors.add(IMAGE_FIELD, message);
    ApiError::Validation(errors)
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::BadRequest(e.body_text())
    }
}

/// Store an inspection photo and return its public URL
pub async fn upload_inspection_image(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Created<UploadResponse>> {
    let mut multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let mut image = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some(IMAGE_FIELD) {
            image = Some(field.bytes().await.map_err(multipart_error)?);
            break;
        }
    }
    let image = image.ok_or_else(|| image_error(UploadError::Empty.to_string()))?;

    let stored = state.uploads.store(&image).await.map_err(|e| match e {
        UploadError::Io { .. } => ApiError::Internal(e.into()),
        other => image_error(other.to_string()),
    })?;

    Ok(Created(UploadResponse {
        message: "Image uploaded successfully".to_string(),
        url: stored.url,
    }))
}
