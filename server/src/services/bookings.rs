use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::availability::bookable_window;
use super::pricing::GuestPrices;
use super::{loyalty, Context};
use crate::collaborators::NotificationEvent;
use crate::models::{Booking, BookingChanges, BookingStatus, NewBooking, TicketStatus};
use crate::store::{CapacityChange, StoreError};
use crate::utils::error::{AppError, AppResult};
use crate::utils::validation::{validate_contact, validate_guests};

const MAX_REASON_LEN: usize = 500;

pub struct Bookings<'a> {
    pub(crate) ctx: &'a Arc<Context>,
}

impl Bookings<'_> {
    pub async fn get(&self, id: Uuid) -> AppResult<Booking> {
        self.ctx.booking(id).await
    }

    /// Validates the request, prices it and reserves its guests in the slot.
    pub async fn create(&self, user_id: Uuid, request: NewBooking) -> AppResult<Booking> {
        let policy = &self.ctx.config.booking;
        validate_guests(request.adult_count, request.child_count, policy.max_guests)?;

        let park = self.ctx.park(request.park_id).await?;
        let contact = validate_contact(&request.contact, &park.country_code)?;

        let now = self.ctx.clock.now();
        let (slot_start, slot_end) = bookable_window(
            &park,
            request.visit_date,
            request.slot_start,
            now,
            policy.lead_time,
        )?;

        let prices = GuestPrices::new(park.adult_price, policy.child_discount_percent);
        let total_cost = prices
            .total(request.adult_count, request.child_count)
            .ok_or_else(|| AppError::validation("adult_count", "booking total is out of range"))?;
        let booking = Booking {
            id: Uuid::new_v4(),
            user_id,
            park_id: park.id,
            visit_date: request.visit_date,
            slot_start,
            slot_end,
            adult_count: request.adult_count,
            child_count: request.child_count,
            adult_price: prices.adult,
            child_price: prices.child,
            total_cost,
            status: BookingStatus::Pending,
            contact,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            cancelled_at: None,
            completed_at: None,
        };

        // One retry on a serialization conflict, then report the slot as full
        let mut retried = false;
        loop {
            match self
                .ctx
                .store
                .create_booking(&booking, park.slot_capacity)
                .await
            {
                Ok(()) => break,
                Err(StoreError::Conflict) if !retried => retried = true,
                Err(StoreError::CapacityExhausted | StoreError::Conflict) => {
                    return Err(AppError::Capacity)
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            booking_id = %booking.id,
            user_id = %user_id,
            park_id = %park.id,
            date = %booking.visit_date,
            slot = %booking.slot_start,
            guests = booking.guest_count(),
            total = %booking.total_cost,
            "Booking created"
        );
        self.notify(&booking, NotificationEvent::BookingCreated);
        Ok(booking)
    }

    /// Reschedules a pending booking or updates its contact details.
    pub async fn modify(&self, id: Uuid, changes: BookingChanges) -> AppResult<Booking> {
        if changes.is_empty() {
            return Err(AppError::validation("changes", "nothing to change"));
        }

        let current = self.ctx.booking(id).await?;
        let now = self.ctx.clock.now();
        let policy = &self.ctx.config.booking;
        if current.status != BookingStatus::Pending
            || current.visit_starts_at() - now <= policy.modification_cutoff
        {
            return Err(AppError::ModificationWindowClosed);
        }

        let park = self.ctx.park(current.park_id).await?;
        let mut updated = current.clone();
        if let Some(contact) = &changes.contact {
            updated.contact = validate_contact(contact, &park.country_code)?;
        }

        let mut capacity = CapacityChange::Keep;
        if changes.moves_slot() {
            let date = changes.visit_date.unwrap_or(current.visit_date);
            let start = changes.slot_start.unwrap_or(current.slot_start);
            let (slot_start, slot_end) =
                bookable_window(&park, date, start, now, policy.lead_time)?;
            updated.visit_date = date;
            updated.slot_start = slot_start;
            updated.slot_end = slot_end;

            if updated.slot_key() != current.slot_key() {
                capacity = CapacityChange::Move {
                    from: current.slot_key(),
                    to: updated.slot_key(),
                    guests: current.guest_count(),
                    capacity_total: park.slot_capacity,
                };
            }
        }
        updated.updated_at = now;

        match self
            .ctx
            .store
            .update_booking(&updated, BookingStatus::Pending, capacity, None)
            .await
        {
            Ok(()) => {}
            Err(StoreError::CapacityExhausted) => return Err(AppError::Capacity),
            Err(StoreError::Conflict) => return Err(AppError::ModificationWindowClosed),
            Err(e) => return Err(e.into()),
        }

        info!(booking_id = %id, date = %updated.visit_date, slot = %updated.slot_start, "Booking modified");
        Ok(updated)
    }

    /// Cancels the booking, frees its capacity and voids its active tickets
    /// in one write. Cancelling an already cancelled booking returns it
    /// unchanged.
    pub async fn cancel(&self, id: Uuid) -> AppResult<Booking> {
        let current = self.ctx.booking(id).await?;
        if current.status == BookingStatus::Cancelled {
            return Ok(current);
        }

        let release = CapacityChange::Release {
            slot: current.slot_key(),
            guests: current.guest_count(),
        };
        let cancelled = match self
            .transition(
                &current,
                BookingStatus::Cancelled,
                release,
                Some(TicketStatus::Cancelled),
                |b, now| b.cancelled_at = Some(now),
            )
            .await
        {
            Ok(booking) => booking,
            Err(AppError::Conflict(_)) => {
                // Lost a race; succeed if the winner also cancelled
                let latest = self.ctx.booking(id).await?;
                if latest.status == BookingStatus::Cancelled {
                    return Ok(latest);
                }
                return Err(AppError::transition("booking", latest.status, BookingStatus::Cancelled));
            }
            Err(e) => return Err(e),
        };

        info!(booking_id = %id, "Booking cancelled");
        self.notify(&cancelled, NotificationEvent::BookingCancelled);
        Ok(cancelled)
    }

    pub async fn confirm(&self, id: Uuid) -> AppResult<Booking> {
        let current = self.ctx.booking(id).await?;
        let confirmed = self.confirm_pending(&current).await?;
        Ok(confirmed)
    }

    /// `pending -> confirmed`, shared with payment capture.
    pub(crate) async fn confirm_pending(&self, current: &Booking) -> AppResult<Booking> {
        let confirmed = self
            .transition(
                current,
                BookingStatus::Confirmed,
                CapacityChange::Keep,
                None,
                |b, now| b.confirmed_at = Some(now),
            )
            .await?;

        info!(booking_id = %confirmed.id, "Booking confirmed");
        self.notify(&confirmed, NotificationEvent::BookingConfirmed);
        Ok(confirmed)
    }

    pub async fn reject(&self, id: Uuid, reason: &str) -> AppResult<Booking> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::validation("reason", "a rejection reason is required"));
        }
        if reason.chars().count() > MAX_REASON_LEN {
            return Err(AppError::validation(
                "reason",
                format!("reason must be at most {MAX_REASON_LEN} characters"),
            ));
        }

        let current = self.ctx.booking(id).await?;
        let release = CapacityChange::Release {
            slot: current.slot_key(),
            guests: current.guest_count(),
        };
        let rejected = self
            .transition(
                &current,
                BookingStatus::Rejected,
                release,
                Some(TicketStatus::Cancelled),
                |b, _| b.rejection_reason = Some(reason.to_string()),
            )
            .await?;

        info!(booking_id = %id, reason, "Booking rejected");
        self.notify(&rejected, NotificationEvent::BookingRejected);
        Ok(rejected)
    }

    /// Closes a confirmed booking once its slot has ended and queues the
    /// loyalty accrual for it.
    pub async fn complete(&self, id: Uuid) -> AppResult<Booking> {
        let current = self.ctx.booking(id).await?;
        if !current.status.can_transition_to(BookingStatus::Completed) {
            return Err(AppError::transition(
                "booking",
                current.status,
                BookingStatus::Completed,
            ));
        }
        if self.ctx.clock.now() < current.visit_ends_at() {
            return Err(AppError::VisitNotOver);
        }

        let completed = self
            .transition(
                &current,
                BookingStatus::Completed,
                CapacityChange::Keep,
                None,
                |b, now| b.completed_at = Some(now),
            )
            .await?;

        info!(booking_id = %id, "Booking completed");
        self.notify(&completed, NotificationEvent::BookingCompleted);
        loyalty::spawn_accrual(Arc::clone(self.ctx), completed.clone());
        Ok(completed)
    }

    async fn transition<F>(
        &self,
        current: &Booking,
        next: BookingStatus,
        capacity: CapacityChange,
        void_tickets: Option<TicketStatus>,
        stamp: F,
    ) -> AppResult<Booking>
    where
        F: FnOnce(&mut Booking, chrono::DateTime<chrono::Utc>),
    {
        if !current.status.can_transition_to(next) {
            return Err(AppError::transition("booking", current.status, next));
        }

        let now = self.ctx.clock.now();
        let mut updated = current.clone();
        updated.status = next;
        updated.updated_at = now;
        stamp(&mut updated, now);

        match self
            .ctx
            .store
            .update_booking(&updated, current.status, capacity, void_tickets)
            .await
        {
            Ok(()) => Ok(updated),
            Err(StoreError::Conflict) => {
                warn!(booking_id = %current.id, from = %current.status, to = %next, "Booking changed concurrently");
                Err(AppError::Conflict(format!(
                    "booking '{}' was changed by another request",
                    current.id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn notify(&self, booking: &Booking, event: NotificationEvent) {
        self.ctx.events.emit(
            booking.user_id,
            event,
            json!({
                "booking_id": booking.id,
                "status": booking.status,
                "visit_date": booking.visit_date,
                "slot_start": booking.slot_start,
                "total_cost": booking.total_cost,
                "rejection_reason": booking.rejection_reason,
            }),
        );
    }
}
