//! Ticket issuance: one signed ticket per guest, minted as a bundle when a
//! payment captures.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::pricing::guest_types;
use super::Context;
use crate::collaborators::NotificationEvent;
use crate::models::{
    Booking, IssuedBundle, Payment, PaymentStatus, Ticket, TicketBundle, TicketStatus, TicketType,
};
use crate::qr::{generate_validation_code, QrPayload};
use crate::store::StoreError;
use crate::utils::error::{AppError, AppResult};

/// Fresh codes are drawn this many times before giving up on a collision.
const ISSUE_ATTEMPTS: usize = 3;

pub struct Tickets<'a> {
    pub(crate) ctx: &'a Arc<Context>,
}

impl Tickets<'_> {
    pub async fn for_booking(&self, booking_id: Uuid) -> AppResult<Vec<Ticket>> {
        Ok(self.ctx.store.tickets_for_booking(booking_id).await?)
    }

    /// Mints the bundle for a completed payment. Calling it again for the
    /// same payment returns the bundle issued the first time.
    pub async fn issue(&self, booking_id: Uuid, payment_id: Uuid) -> AppResult<IssuedBundle> {
        if let Some(existing) = self.existing(booking_id, payment_id).await? {
            return Ok(existing);
        }

        let booking = self.ctx.booking(booking_id).await?;
        let payment = self.ctx.payment(payment_id).await?;
        if payment.booking_id != booking.id {
            return Err(AppError::validation(
                "payment_id",
                "payment belongs to another booking",
            ));
        }
        if payment.status != PaymentStatus::Completed {
            return Err(AppError::transition("payment", payment.status, "ticketed"));
        }

        for attempt in 1..=ISSUE_ATTEMPTS {
            let (bundle, tickets) = self.mint(&booking, &payment);
            match self.ctx.store.insert_ticket_bundle(&bundle, &tickets).await {
                Ok(()) => {
                    info!(
                        booking_id = %booking_id,
                        payment_id = %payment_id,
                        bundle_id = %bundle.id,
                        tickets = tickets.len(),
                        "Tickets issued"
                    );
                    self.ctx.events.emit(
                        booking.user_id,
                        NotificationEvent::TicketsIssued,
                        json!({
                            "booking_id": booking_id,
                            "bundle_id": bundle.id,
                            "ticket_count": bundle.ticket_count,
                        }),
                    );
                    return Ok(IssuedBundle { bundle, tickets });
                }
                Err(StoreError::Duplicate(what)) => {
                    // A concurrent issuance won, or a validation code collided
                    if let Some(existing) = self.existing(booking_id, payment_id).await? {
                        return Ok(existing);
                    }
                    warn!(booking_id = %booking_id, attempt, what, "Ticket insert collided, redrawing codes");
                }
                Err(StoreError::Conflict) => {
                    return Err(AppError::Conflict(format!(
                        "booking '{booking_id}' or payment '{payment_id}' closed before tickets were issued"
                    )))
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::InternalServerError(format!(
            "could not issue tickets for booking '{booking_id}'"
        )))
    }

    async fn existing(&self, booking_id: Uuid, payment_id: Uuid) -> AppResult<Option<IssuedBundle>> {
        let Some(bundle) = self
            .ctx
            .store
            .find_ticket_bundle(booking_id, payment_id)
            .await?
        else {
            return Ok(None);
        };
        let tickets = self.ctx.store.tickets_for_bundle(bundle.id).await?;
        Ok(Some(IssuedBundle { bundle, tickets }))
    }

    fn mint(&self, booking: &Booking, payment: &Payment) -> (TicketBundle, Vec<Ticket>) {
        let policy = &self.ctx.config.tickets;
        let now = self.ctx.clock.now();
        let bundle_id = Uuid::new_v4();
        let valid_from = booking.visit_starts_at() - policy.early_entry;
        let valid_until = end_of_day(booking);

        let tickets: Vec<Ticket> = guest_types(booking.adult_count, booking.child_count)
            .map(|ticket_type| {
                let id = Uuid::new_v4();
                let price = match ticket_type {
                    TicketType::Adult => booking.adult_price,
                    TicketType::Child => booking.child_price,
                };
                let discount_amount = booking.adult_price - price;
                let validation_code = generate_validation_code();
                let security_hash = self.ctx.signer.sign(id, &validation_code, valid_until);
                let qr_payload = QrPayload {
                    ticket_id: id,
                    ticket_type,
                    price,
                    issued_at: now.timestamp(),
                    valid_until: valid_until.timestamp(),
                    validation_code: validation_code.clone(),
                    security_hash: security_hash.clone(),
                }
                .encode(&policy.qr_scheme);

                Ticket {
                    id,
                    bundle_id,
                    booking_id: booking.id,
                    payment_id: payment.id,
                    holder_name: booking.contact.name.clone(),
                    ticket_type,
                    status: TicketStatus::Active,
                    visit_date: booking.visit_date,
                    base_price: booking.adult_price,
                    price,
                    discount_amount,
                    discount_reason: discount_amount
                        .is_positive()
                        .then(|| "child discount".to_string()),
                    qr_payload,
                    validation_code,
                    security_hash,
                    valid_from,
                    valid_until,
                    issued_at: now,
                    used_at: None,
                    used_gate: None,
                }
            })
            .collect();

        let bundle = TicketBundle {
            id: bundle_id,
            booking_id: booking.id,
            payment_id: payment.id,
            ticket_count: tickets.len() as i32,
            issued_at: now,
        };
        (bundle, tickets)
    }
}

/// Tickets stay valid until the last second of the visit day.
fn end_of_day(booking: &Booking) -> DateTime<Utc> {
    let midnight = booking.visit_date.and_time(NaiveTime::MIN).and_utc();
    midnight + Duration::days(1) - Duration::seconds(1)
}
