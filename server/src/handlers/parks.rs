use axum::extract::{Path, Query, State};
use axum::response::Response;
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::success;

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: NaiveDate,
}

pub async fn get_availability(
    State(state): State<AppState>,
    Path(park_id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> AppResult<Response> {
    let slots = state
        .services
        .availability()
        .slots(park_id, query.date)
        .await?;
    Ok(success(slots, "Availability retrieved"))
}
