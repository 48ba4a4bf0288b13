use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: StorageHealth,
}

#[derive(Serialize)]
pub struct StorageHealth {
    pub calculation_template: String,
    pub proposal_templates: String,
    pub contract_templates: String,
    pub generated_dir: String,
}

fn presence(ok: bool) -> String {
    let label = if ok { "ok" } else { "missing" };
    label.to_string()
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

/// Health check endpoint - public
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let paths = state.assembler.paths();

    let (calculation, proposals, contracts, generated) = tokio::join!(
        is_file(&paths.calculation_template),
        is_dir(&paths.proposal_templates),
        is_dir(&paths.contract_templates),
        tokio::fs::create_dir_all(&paths.generated),
    );

    if let Err(e) = &generated {
        tracing::error!(path = %paths.generated.display(), error = %e, "Output directory is not writable");
    }

    // Nothing can be generated without an output directory; missing templates
    // only break some requests.
    let status = if generated.is_err() {
        "unhealthy"
    } else if calculation && proposals && contracts {
        "healthy"
    } else {
        "degraded"
    };

    let status_code = if status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: StorageHealth {
                calculation_template: presence(calculation),
                proposal_templates: presence(proposals),
                contract_templates: presence(contracts),
                generated_dir: if generated.is_ok() { "ok" } else { "error" }.to_string(),
            },
        }),
    )
}
