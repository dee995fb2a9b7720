use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::AuthUser;
use crate::collaborators::SIGNATURE_HEADER;
use crate::models::{Money, PaymentMethod};
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::{created, success};

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub method: PaymentMethod,
    pub amount: Money,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundRequest {
    pub amount: Option<Money>,
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(booking_id): Path<Uuid>,
    Json(request): Json<InitiatePaymentRequest>,
) -> AppResult<Response> {
    auth.require_owner(state.services.bookings().get(booking_id).await?.user_id)?;

    let payment = state
        .services
        .payments()
        .initiate(booking_id, request.method, request.amount)
        .await?;
    Ok(created(payment, "Payment initiated"))
}

pub async fn list_payments(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> AppResult<Response> {
    auth.require_owner(state.services.bookings().get(booking_id).await?.user_id)?;

    let payments = state.services.payments().for_booking(booking_id).await?;
    Ok(success(payments, "Payments retrieved"))
}

/// Outcome callback from the payment provider. The raw body is needed to
/// check its signature before it is parsed.
pub async fn provider_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let payment = state
        .services
        .payments()
        .reconcile_signed(&body, signature)
        .await?;
    Ok(success(payment, "Payment outcome recorded"))
}

pub async fn refund_payment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(payment_id): Path<Uuid>,
    Json(request): Json<RefundRequest>,
) -> AppResult<Response> {
    auth.require_staff()?;
    let payment = state
        .services
        .payments()
        .refund(payment_id, request.amount)
        .await?;
    Ok(success(payment, "Payment refunded"))
}
