use axum::extract::State;
use axum::response::Response;

use super::AuthUser;
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::success;

pub async fn my_loyalty(State(state): State<AppState>, auth: AuthUser) -> AppResult<Response> {
    let account = state.services.loyalty().account(auth.user_id).await?;
    Ok(success(account, "Loyalty account retrieved"))
}
