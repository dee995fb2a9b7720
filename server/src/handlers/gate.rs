use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use super::AuthUser;
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::success;

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    /// Scanned QR payload or a manually typed validation code.
    pub code: String,
    pub gate_id: String,
}

pub async fn validate_ticket(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<ValidateRequest>,
) -> AppResult<Response> {
    auth.require_staff()?;
    let admission = state
        .services
        .gate()
        .validate(&request.code, &request.gate_id)
        .await?;
    Ok(success(admission, "Ticket accepted"))
}
