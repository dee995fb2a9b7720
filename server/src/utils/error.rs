use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::config::ConfigError;
use crate::models::{Money, PaymentStatus};
use crate::store::StoreError;
use crate::utils::response::error as error_response;

pub type AppResult<T> = Result<T, AppError>;

/// Provider-reported or policy failures around taking money.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("booking in status '{0}' cannot be paid")]
    BookingNotPayable(String),

    #[error("payment amount {actual} does not match booking total {expected}")]
    AmountMismatch { expected: Money, actual: Money },

    #[error("booking is already paid")]
    AlreadyPaid,

    #[error("payment has already been refunded")]
    AlreadyRefunded,

    #[error("payment in status '{0}' cannot be refunded")]
    NotRefundable(PaymentStatus),

    #[error("payment provider error: {0}")]
    Provider(String),
}

/// Why a gate scan was refused. Every variant is final for that scan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateRejection {
    #[error("code is not a readable ticket")]
    InvalidFormat,

    #[error("no ticket matches this code")]
    TicketNotFound,

    #[error("ticket code failed its integrity check")]
    TamperedCode,

    #[error("ticket was already used at gate {gate} ({used_at})")]
    AlreadyUsed { used_at: DateTime<Utc>, gate: String },

    #[error("ticket expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("ticket is not valid before {0}")]
    NotYetValid(DateTime<Utc>),

    #[error("ticket has been cancelled")]
    TicketRevoked,
}

impl GateRejection {
    pub fn code(&self) -> &'static str {
        match self {
            GateRejection::InvalidFormat => "INVALID_FORMAT",
            GateRejection::TicketNotFound => "TICKET_NOT_FOUND",
            GateRejection::TamperedCode => "TAMPERED_CODE",
            GateRejection::AlreadyUsed { .. } => "ALREADY_USED",
            GateRejection::Expired(_) => "EXPIRED",
            GateRejection::NotYetValid(_) => "NOT_YET_VALID",
            GateRejection::TicketRevoked => "TICKET_REVOKED",
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error on '{field}': {message}")]
    Validation { field: &'static str, message: String },

    #[error("Slot is full, choose another slot")]
    Capacity,

    #[error("Slot starts too soon, bookings close {lead_minutes} minutes before start")]
    SlotTooSoon { lead_minutes: i64 },

    #[error("Cannot move {entity} from '{from}' to '{to}'")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Booking can no longer be modified")]
    ModificationWindowClosed,

    #[error("Visit has not finished yet")]
    VisitNotOver,

    #[error("Concurrent update: {0}")]
    Conflict(String),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Gate(#[from] GateRejection),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Configuration error")]
    Config(#[from] ConfigError),

    #[error("Storage error")]
    Store(StoreError),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidTransition { entity, from, to } => {
                AppError::InvalidTransition { entity, from, to }
            }
            other => AppError::Store(other),
        }
    }
}

impl AppError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn transition(entity: &'static str, from: impl ToString, to: impl ToString) -> Self {
        AppError::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Capacity | AppError::SlotTooSoon { .. } => StatusCode::CONFLICT,
            AppError::InvalidTransition { .. }
            | AppError::ModificationWindowClosed
            | AppError::VisitNotOver
            | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Payment(PaymentError::Provider(_)) => StatusCode::PAYMENT_REQUIRED,
            AppError::Payment(_) => StatusCode::CONFLICT,
            AppError::Gate(GateRejection::InvalidFormat) => StatusCode::BAD_REQUEST,
            AppError::Gate(GateRejection::TicketNotFound) => StatusCode::NOT_FOUND,
            AppError::Gate(_) => StatusCode::CONFLICT,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
            AppError::Store(StoreError::Conflict) => StatusCode::CONFLICT,
            AppError::Config(_) | AppError::Store(_) | AppError::InternalServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::Capacity => "CAPACITY_ERROR",
            AppError::SlotTooSoon { .. } => "SLOT_TOO_SOON",
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::ModificationWindowClosed => "MODIFICATION_WINDOW_CLOSED",
            AppError::VisitNotOver => "VISIT_NOT_OVER",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Payment(_) => "PAYMENT_ERROR",
            AppError::Gate(rejection) => rejection.code(),
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Store(_) => "DATABASE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// User-fixable and policy outcomes are routine; only infrastructure faults are errors.
    fn log(&self) {
        match self {
            AppError::Config(e) => error!(error = ?e, "Configuration error"),
            AppError::Store(e) => error!(error = ?e, "Storage error"),
            AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error")
            }
            _ => warn!(code = self.code(), message = %self, "Request rejected"),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Validation { field, .. } => Some(json!({ "field": field })),
            AppError::Payment(PaymentError::AmountMismatch { expected, actual }) => {
                Some(json!({ "expected": expected, "actual": actual }))
            }
            AppError::Gate(GateRejection::AlreadyUsed { used_at, gate }) => {
                Some(json!({ "used_at": used_at, "gate": gate }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        let public_message = match &self {
            AppError::Config(_) | AppError::Store(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        error_response(code, public_message, self.details(), status)
    }
}
