use axum::response::Response;
use serde::Serialize;

use crate::utils::response::success;

pub mod auth;
pub mod bookings;
pub mod gate;
pub mod loyalty;
pub mod parks;
pub mod payments;

pub use auth::AuthUser;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "parkpass-api",
    };

    success(payload, "Health check successful")
}
