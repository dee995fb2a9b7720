use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer};
use crate::handlers::{bookings, gate, health_check, loyalty, parks, payments};
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    let cors = create_cors_layer(&state.config.cors_allowed_origins);
    let include_hsts = state.config.production;

    let router = Router::new()
        .route("/health", get(health_check))
        .route("/parks/:park_id/availability", get(parks::get_availability))
        .route("/bookings", post(bookings::create_booking))
        .route(
            "/bookings/:id",
            get(bookings::get_booking).patch(bookings::modify_booking),
        )
        .route("/bookings/:id/cancel", post(bookings::cancel_booking))
        .route("/bookings/:id/confirm", post(bookings::confirm_booking))
        .route("/bookings/:id/reject", post(bookings::reject_booking))
        .route("/bookings/:id/complete", post(bookings::complete_booking))
        .route("/bookings/:id/tickets", get(bookings::list_tickets))
        .route(
            "/bookings/:id/payments",
            get(payments::list_payments).post(payments::initiate_payment),
        )
        .route("/payments/webhook", post(payments::provider_webhook))
        .route("/payments/:id/refund", post(payments::refund_payment))
        .route("/gate/validate", post(gate::validate_ticket))
        .route("/me/loyalty", get(loyalty::my_loyalty))
        .with_state(state);

    create_security_headers_layer(router, include_hsts)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
