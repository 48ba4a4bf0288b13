use axum::{extract::rejection::JsonRejection, Json};
use serde_json::Value;

use crate::domain::risk::{RiskAssessment, RiskAssessmentRequest};
use crate::error::ApiResult;

use super::json_object;

/// Score a house's termite risk - public
pub async fn calculate_risk(payload: Result<Json<Value>, JsonRejection>) -> ApiResult<Json<RiskAssessment>> {
    let body = json_object(payload)?;
    let request = RiskAssessmentRequest::from_payload(&body)?;
    let assessment = request.assess();

    tracing::info!(
        score = assessment.score,
        category = ?assessment.category,
        "Risk calculated"
    );

    Ok(Json(assessment))
}
