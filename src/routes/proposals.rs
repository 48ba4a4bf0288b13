use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderName, HeaderValue},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::api::Attachment;
use crate::app::AppState;
use crate::domain::proposals::{ProposalType, ServiceRequest, ServiceType};
use crate::error::ApiResult;

use super::json_object;

/// Number of non-fatal fill problems in the returned documents.
pub const FILL_WARNINGS_HEADER: &str = "x-fill-warnings";

/// Generate the proposal and contract for a request and send both as a zip
pub async fn generate_proposal(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Attachment> {
    let body = json_object(payload)?;
    let request = ServiceRequest::from_payload(&body)?;

    tracing::info!(
        service = %request.service_type,
        client = %request.client_name,
        area = request.area_treatment,
        image_groups = request.images.len(),
        "Generating proposal"
    );

    let worker = Arc::clone(&state);
    let (filename, bytes, warnings) = tokio::task::spawn_blocking(move || -> ApiResult<_> {
        let package = worker.assembler.generate_package(&request)?;
        let bytes = package
            .archive
            .take_bytes()
            .with_context(|| format!("failed to read {}", package.archive.path.display()))?;
        Ok((package.archive.filename, bytes, package.report.warning_count()))
    })
    .await
    .context("proposal worker stopped")??;

    tracing::info!(filename = %filename, size = bytes.len(), warnings, "Proposal archive ready");

    Ok(
        Attachment::new(filename, "application/zip", bytes).with_header(
            HeaderName::from_static(FILL_WARNINGS_HEADER),
            HeaderValue::from(warnings),
        ),
    )
}

#[derive(Debug, Deserialize)]
pub struct ServiceTypesQuery {
    pub proposal_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ServiceTypesResponse {
    pub proposal_type: String,
    pub available_service_types: Vec<ServiceType>,
}

/// Service types offered for a proposal family; unknown families have none
pub async fn list_service_types(Query(query): Query<ServiceTypesQuery>) -> Json<ServiceTypesResponse> {
    let proposal_type = query.proposal_type.unwrap_or_else(|| "pest_control".to_string());
    let available_service_types = ProposalType::parse(&proposal_type)
        .map(|t| t.service_types().to_vec())
        .unwrap_or_default();

    Json(ServiceTypesResponse {
        proposal_type,
        available_service_types,
    })
}

