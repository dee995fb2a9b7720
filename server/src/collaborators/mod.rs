//! Outside systems the booking core talks to but does not own.

pub mod notifier;
pub mod provider;
pub mod webhook;

pub use notifier::{Dispatcher, LogNotifier, NotificationEvent, Notifier, NotifyError};
pub use provider::{
    ChargeReceipt, ChargeRequest, ChargeStatus, PaymentProvider, ProviderError, SimulatedProvider,
};
pub use webhook::{sign_webhook, verify_webhook_signature, SignatureError, SIGNATURE_HEADER};
