use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::AuthUser;
use crate::models::{BookingChanges, NewBooking};
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::{created, success};

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

pub async fn create_booking(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<NewBooking>,
) -> AppResult<Response> {
    let booking = state
        .services
        .bookings()
        .create(auth.user_id, request)
        .await?;
    Ok(created(booking, "Booking created"))
}

pub async fn get_booking(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let booking = state.services.bookings().get(id).await?;
    auth.require_owner(booking.user_id)?;
    Ok(success(booking, "Booking retrieved"))
}

pub async fn modify_booking(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(changes): Json<BookingChanges>,
) -> AppResult<Response> {
    let bookings = state.services.bookings();
    auth.require_owner(bookings.get(id).await?.user_id)?;

    let booking = bookings.modify(id, changes).await?;
    Ok(success(booking, "Booking updated"))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let bookings = state.services.bookings();
    auth.require_owner(bookings.get(id).await?.user_id)?;

    let booking = bookings.cancel(id).await?;
    Ok(success(booking, "Booking cancelled"))
}

pub async fn confirm_booking(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    auth.require_staff()?;
    let booking = state.services.bookings().confirm(id).await?;
    Ok(success(booking, "Booking confirmed"))
}

pub async fn reject_booking(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<RejectRequest>,
) -> AppResult<Response> {
    auth.require_staff()?;
    let booking = state
        .services
        .bookings()
        .reject(id, &request.reason)
        .await?;
    Ok(success(booking, "Booking rejected"))
}

pub async fn complete_booking(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    auth.require_staff()?;
    let booking = state.services.bookings().complete(id).await?;
    Ok(success(booking, "Booking completed"))
}

pub async fn list_tickets(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    auth.require_owner(state.services.bookings().get(id).await?.user_id)?;

    let tickets = state.services.tickets().for_booking(id).await?;
    Ok(success(tickets, "Tickets retrieved"))
}
