//! Payment attempts against a booking.
//!
//! A booking may see several attempts, but only the first one to capture
//! money counts. Provider outcomes are applied at most once per transaction;
//! a repeated delivery returns the payment as it already stands.
//!
//! Refunds are claimed (`completed -> refunding`) before the provider is
//! called. The claim is then either released back to `completed` or
//! finished as `refunded` together with voiding the booking's tickets.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{Bookings, Context, Tickets};
use crate::collaborators::{
    verify_webhook_signature, ChargeRequest, ChargeStatus, NotificationEvent, SignatureError,
};
use crate::models::{
    BookingStatus, Money, Payment, PaymentMethod, PaymentOutcome, PaymentStatus,
    ProviderCallback, TicketStatus,
};
use crate::store::StoreError;
use crate::utils::error::{AppError, AppResult, PaymentError};

pub const SUPERSEDED_REASON: &str = "superseded";

pub struct Payments<'a> {
    pub(crate) ctx: &'a Arc<Context>,
}

impl Payments<'_> {
    pub async fn get(&self, id: Uuid) -> AppResult<Payment> {
        self.ctx.payment(id).await
    }

    pub async fn for_booking(&self, booking_id: Uuid) -> AppResult<Vec<Payment>> {
        Ok(self.ctx.store.payments_for_booking(booking_id).await?)
    }

    /// Records a payment attempt for the full booking total and hands it to
    /// the provider.
    pub async fn initiate(
        &self,
        booking_id: Uuid,
        method: PaymentMethod,
        amount: Money,
    ) -> AppResult<Payment> {
        let booking = self.ctx.booking(booking_id).await?;
        if !matches!(booking.status, BookingStatus::Pending | BookingStatus::Confirmed) {
            return Err(PaymentError::BookingNotPayable(booking.status.to_string()).into());
        }
        if amount != booking.total_cost {
            return Err(PaymentError::AmountMismatch {
                expected: booking.total_cost,
                actual: amount,
            }
            .into());
        }

        let existing = self.ctx.store.payments_for_booking(booking_id).await?;
        if existing.iter().any(|p| p.status.is_captured()) {
            return Err(PaymentError::AlreadyPaid.into());
        }

        let now = self.ctx.clock.now();
        let fee_amount = self.ctx.config.fees.fee_for(method, amount);
        let mut payment = Payment {
            id: Uuid::new_v4(),
            booking_id,
            user_id: booking.user_id,
            amount,
            fee_amount,
            net_amount: amount - fee_amount,
            refund_amount: None,
            method,
            provider: self.ctx.provider.name().to_string(),
            status: PaymentStatus::Pending,
            provider_transaction_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            captured_at: None,
            failed_at: None,
            refunded_at: None,
        };
        self.ctx.store.insert_payment(&payment).await?;

        info!(
            payment_id = %payment.id,
            booking_id = %booking_id,
            method = method.as_str(),
            amount = %amount,
            fee = %fee_amount,
            "Payment initiated"
        );

        let request = ChargeRequest {
            payment_id: payment.id,
            amount,
            method,
        };
        let receipt = match self.ctx.provider.charge(&request).await {
            Ok(receipt) => receipt,
            Err(e) => {
                let failed = self.fail(&payment, &e.to_string()).await?;
                warn!(payment_id = %failed.id, error = %e, "Provider refused charge");
                return Err(PaymentError::Provider(e.to_string()).into());
            }
        };

        let expected = payment.status;
        payment.status = PaymentStatus::Processing;
        payment.provider_transaction_id = Some(receipt.transaction_id);
        payment.updated_at = self.ctx.clock.now();
        self.ctx.store.update_payment(&payment, expected).await?;

        match receipt.status {
            ChargeStatus::Processing => Ok(payment),
            ChargeStatus::Completed => self.apply_outcome(payment, PaymentOutcome::Succeeded).await,
            ChargeStatus::Failed(reason) => {
                self.apply_outcome(payment, PaymentOutcome::Failed { reason })
                    .await
            }
        }
    }

    /// Applies the provider's final outcome for `transaction_id`.
    pub async fn reconcile(&self, transaction_id: &str, outcome: PaymentOutcome) -> AppResult<Payment> {
        let payment = self
            .ctx
            .store
            .find_payment_by_transaction(transaction_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("No payment for transaction '{transaction_id}'"))
            })?;

        self.apply_outcome(payment, outcome).await
    }

    /// Checks a raw provider callback against the webhook secret before
    /// applying the outcome it carries. Unsigned or forged callbacks never
    /// reach the payment.
    pub async fn reconcile_signed(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> AppResult<Payment> {
        let policy = &self.ctx.config.provider;
        signature
            .ok_or(SignatureError::Missing)
            .and_then(|header| {
                verify_webhook_signature(
                    body,
                    header,
                    &policy.webhook_secret,
                    self.ctx.clock.now(),
                    policy.webhook_tolerance,
                )
            })
            .map_err(|e| AppError::AuthError(e.to_string()))?;

        let callback: ProviderCallback = serde_json::from_slice(body)
            .map_err(|e| AppError::validation("body", e.to_string()))?;
        self.reconcile(&callback.transaction_id, callback.outcome)
            .await
    }

    async fn apply_outcome(&self, payment: Payment, outcome: PaymentOutcome) -> AppResult<Payment> {
        if !payment.status.is_open() {
            return self.replayed(payment, &outcome).await;
        }

        match outcome {
            PaymentOutcome::Succeeded => self.capture(payment).await,
            PaymentOutcome::Failed { reason } => {
                let failed = self.fail(&payment, &reason).await?;
                Ok(failed)
            }
        }
    }

    /// A repeated delivery. Re-running issuance is safe and covers a crash
    /// between capture and ticketing.
    async fn replayed(&self, payment: Payment, outcome: &PaymentOutcome) -> AppResult<Payment> {
        let consistent = match outcome {
            PaymentOutcome::Succeeded => payment.status.is_captured(),
            PaymentOutcome::Failed { .. } => payment.status == PaymentStatus::Failed,
        };
        if consistent {
            info!(payment_id = %payment.id, status = %payment.status, "Duplicate payment outcome ignored");
        } else {
            warn!(payment_id = %payment.id, status = %payment.status, outcome = ?outcome, "Late payment outcome contradicts recorded status");
        }

        if payment.status == PaymentStatus::Completed {
            self.issue_if_ticketable(&payment).await?;
        }
        Ok(payment)
    }

    async fn capture(&self, payment: Payment) -> AppResult<Payment> {
        let now = self.ctx.clock.now();
        let mut captured = payment.clone();
        captured.status = PaymentStatus::Completed;
        captured.captured_at = Some(now);
        captured.updated_at = now;

        match self.ctx.store.update_payment(&captured, payment.status).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => return self.supersede(payment).await,
            Err(StoreError::Conflict) => {
                let latest = self.ctx.payment(payment.id).await?;
                return self.replayed(latest, &PaymentOutcome::Succeeded).await;
            }
            Err(e) => return Err(e.into()),
        }

        info!(payment_id = %captured.id, booking_id = %captured.booking_id, amount = %captured.amount, "Payment captured");
        self.notify(&captured, NotificationEvent::PaymentCompleted);

        let booking = self.ctx.booking(captured.booking_id).await?;
        if booking.status == BookingStatus::Pending {
            let bookings = Bookings { ctx: self.ctx };
            match bookings.confirm_pending(&booking).await {
                Ok(_) | Err(AppError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.issue_if_ticketable(&captured).await?;
        Ok(captured)
    }

    /// Another attempt already captured money for this booking; this one is
    /// closed out and flagged for manual settlement.
    async fn supersede(&self, payment: Payment) -> AppResult<Payment> {
        let now = self.ctx.clock.now();
        let mut superseded = payment.clone();
        superseded.status = PaymentStatus::Cancelled;
        superseded.failure_reason = Some(SUPERSEDED_REASON.to_string());
        superseded.updated_at = now;

        self.ctx
            .store
            .update_payment(&superseded, payment.status)
            .await?;

        warn!(payment_id = %payment.id, booking_id = %payment.booking_id, "Second capture for booking, payment superseded");
        self.notify(&superseded, NotificationEvent::PaymentSuperseded);
        Ok(superseded)
    }

    async fn fail(&self, payment: &Payment, reason: &str) -> AppResult<Payment> {
        let now = self.ctx.clock.now();
        let mut failed = payment.clone();
        failed.status = PaymentStatus::Failed;
        failed.failure_reason = Some(reason.to_string());
        failed.failed_at = Some(now);
        failed.updated_at = now;

        match self.ctx.store.update_payment(&failed, payment.status).await {
            Ok(()) => {}
            Err(StoreError::Conflict) => return self.ctx.payment(payment.id).await,
            Err(e) => return Err(e.into()),
        }

        info!(payment_id = %failed.id, booking_id = %failed.booking_id, reason, "Payment failed");
        self.notify(&failed, NotificationEvent::PaymentFailed);
        Ok(failed)
    }

    /// Tickets are only minted while the booking can still be visited.
    async fn issue_if_ticketable(&self, payment: &Payment) -> AppResult<()> {
        let booking = self.ctx.booking(payment.booking_id).await?;
        if booking.status.releases_capacity() {
            warn!(
                payment_id = %payment.id,
                booking_id = %booking.id,
                status = %booking.status,
                "Payment captured for a closed booking, no tickets issued"
            );
            return Ok(());
        }

        match (Tickets { ctx: self.ctx }).issue(booking.id, payment.id).await {
            Ok(_) => Ok(()),
            Err(AppError::Conflict(_)) => {
                warn!(
                    payment_id = %payment.id,
                    booking_id = %booking.id,
                    "Booking or payment closed while issuing, no tickets issued"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Returns `amount` (the full payment if omitted) and voids the
    /// booking's unused tickets. The booking itself keeps its status.
    pub async fn refund(&self, payment_id: Uuid, amount: Option<Money>) -> AppResult<Payment> {
        let payment = self.ctx.payment(payment_id).await?;
        match payment.status {
            PaymentStatus::Completed => {}
            PaymentStatus::Refunding | PaymentStatus::Refunded => {
                return Err(PaymentError::AlreadyRefunded.into())
            }
            other => return Err(PaymentError::NotRefundable(other).into()),
        }

        let amount = amount.unwrap_or(payment.amount);
        if !amount.is_positive() || amount > payment.amount {
            return Err(AppError::validation(
                "amount",
                format!("refund must be between 1 and {}", payment.amount),
            ));
        }
        let transaction_id = payment.provider_transaction_id.clone().ok_or_else(|| {
            AppError::InternalServerError(format!("payment '{payment_id}' has no transaction id"))
        })?;

        // Claim first so two requests cannot both pay out
        let now = self.ctx.clock.now();
        let mut claimed = payment.clone();
        claimed.status = PaymentStatus::Refunding;
        claimed.refund_amount = Some(amount);
        claimed.updated_at = now;
        match self
            .ctx
            .store
            .update_payment(&claimed, PaymentStatus::Completed)
            .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict) => return Err(PaymentError::AlreadyRefunded.into()),
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.ctx.provider.refund(&transaction_id, amount).await {
            let mut released = claimed.clone();
            released.status = PaymentStatus::Completed;
            released.refund_amount = None;
            released.updated_at = self.ctx.clock.now();
            self.ctx
                .store
                .update_payment(&released, PaymentStatus::Refunding)
                .await?;
            warn!(payment_id = %payment_id, error = %e, "Refund failed at provider, claim released");
            return Err(PaymentError::Provider(e.to_string()).into());
        }

        let finished_at = self.ctx.clock.now();
        let mut refunded = claimed;
        refunded.status = PaymentStatus::Refunded;
        refunded.refunded_at = Some(finished_at);
        refunded.updated_at = finished_at;
        let voided = self
            .ctx
            .store
            .finish_refund(&refunded, TicketStatus::Cancelled)
            .await
            .map_err(|e| {
                error!(
                    payment_id = %payment_id,
                    error = %e,
                    "Provider refunded but the refund could not be recorded"
                );
                e
            })?;

        info!(
            payment_id = %payment_id,
            booking_id = %payment.booking_id,
            amount = %amount,
            voided_tickets = voided,
            "Payment refunded"
        );
        self.notify(&refunded, NotificationEvent::PaymentRefunded);
        Ok(refunded)
    }

    fn notify(&self, payment: &Payment, event: NotificationEvent) {
        self.ctx.events.emit(
            payment.user_id,
            event,
            json!({
                "payment_id": payment.id,
                "booking_id": payment.booking_id,
                "status": payment.status,
                "amount": payment.amount,
                "refund_amount": payment.refund_amount,
                "reason": payment.failure_reason,
            }),
        );
    }
}
