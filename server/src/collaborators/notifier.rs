use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// The delivery channel is down; the message may succeed later.
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),

    #[error("recipient cannot be reached: {0}")]
    Undeliverable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationEvent {
    BookingCreated,
    BookingConfirmed,
    BookingRejected,
    BookingCancelled,
    BookingCompleted,
    PaymentCompleted,
    PaymentFailed,
    PaymentRefunded,
    PaymentSuperseded,
    TicketsIssued,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::BookingCreated => "booking.created",
            NotificationEvent::BookingConfirmed => "booking.confirmed",
            NotificationEvent::BookingRejected => "booking.rejected",
            NotificationEvent::BookingCancelled => "booking.cancelled",
            NotificationEvent::BookingCompleted => "booking.completed",
            NotificationEvent::PaymentCompleted => "payment.completed",
            NotificationEvent::PaymentFailed => "payment.failed",
            NotificationEvent::PaymentRefunded => "payment.refunded",
            NotificationEvent::PaymentSuperseded => "payment.superseded",
            NotificationEvent::TicketsIssued => "tickets.issued",
        }
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery of user-facing messages (push, SMS, email) lives behind this.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: Uuid, event: NotificationEvent, payload: Value)
        -> Result<(), NotifyError>;
}

/// Writes every notification to the log instead of delivering it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        user_id: Uuid,
        event: NotificationEvent,
        payload: Value,
    ) -> Result<(), NotifyError> {
        info!(user_id = %user_id, event = %event, payload = %payload, "Notification");
        Ok(())
    }
}

/// Sends notifications off the request path. Failures are logged and dropped.
#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub fn emit(&self, user_id: Uuid, event: NotificationEvent, payload: Value) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(user_id, event, payload).await {
                warn!(user_id = %user_id, event = %event, error = %e, "Notification failed");
            }
        });
    }
}
