//! Persistence seam for the booking core.
//!
//! Every cross-request race in the core is settled here, by a single
//! conditional write: slot capacity is reserved with an
//! increment-if-below-capacity, status changes are compare-and-set on the
//! expected current status, and ticket bundles are unique per payment.
//! Status writes are also checked against the entity's transition table, so
//! no caller can move a booking or payment along an unlisted edge.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Booking, BookingStatus, LoyaltyAccount, LoyaltyAccrual, LoyaltyTier, Park, Payment,
    PaymentStatus, SlotKey, Ticket, TicketBundle, TicketStatus,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("slot capacity exhausted")]
    CapacityExhausted,

    /// The record no longer has the state the write was conditioned on.
    #[error("concurrent modification")]
    Conflict,

    #[error("duplicate {0}")]
    Duplicate(&'static str),

    #[error("{entity} cannot move from '{from}' to '{to}'")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Capacity bookkeeping that must commit together with a booking update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityChange {
    Keep,
    Release { slot: SlotKey, guests: i32 },
    Move {
        from: SlotKey,
        to: SlotKey,
        guests: i32,
        capacity_total: i32,
    },
}

/// A booking write either keeps its status (an edit) or follows its table.
pub(crate) fn check_booking_write(expected: BookingStatus, next: BookingStatus) -> StoreResult<()> {
    if expected == next || expected.can_transition_to(next) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            entity: "booking",
            from: expected.to_string(),
            to: next.to_string(),
        })
    }
}

/// Every payment write is a listed status transition.
pub(crate) fn check_payment_write(expected: PaymentStatus, next: PaymentStatus) -> StoreResult<()> {
    if expected.can_transition_to(next) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            entity: "payment",
            from: expected.to_string(),
            to: next.to_string(),
        })
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_park(&self, id: Uuid) -> StoreResult<Option<Park>>;

    async fn upsert_park(&self, park: &Park) -> StoreResult<()>;

    /// Reserved guest counts for one park and day, keyed by slot start.
    async fn reserved_by_slot(
        &self,
        park_id: Uuid,
        date: NaiveDate,
    ) -> StoreResult<HashMap<NaiveTime, i32>>;

    /// Reserves the booking's guests in its slot and inserts it, or neither.
    async fn create_booking(&self, booking: &Booking, capacity_total: i32) -> StoreResult<()>;

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>>;

    /// Overwrites the booking if its stored status is still `expected`.
    /// With `void_tickets`, the booking's still-active tickets move to that
    /// status in the same write.
    async fn update_booking(
        &self,
        booking: &Booking,
        expected: BookingStatus,
        capacity: CapacityChange,
        void_tickets: Option<TicketStatus>,
    ) -> StoreResult<()>;

    async fn pending_bookings_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<Booking>>;

    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()>;

    async fn get_payment(&self, id: Uuid) -> StoreResult<Option<Payment>>;

    async fn find_payment_by_transaction(&self, transaction_id: &str)
        -> StoreResult<Option<Payment>>;

    async fn payments_for_booking(&self, booking_id: Uuid) -> StoreResult<Vec<Payment>>;

    /// Overwrites the payment if its stored status is still `expected`.
    /// Fails with `Duplicate` when this would give the booking a second
    /// captured payment.
    async fn update_payment(&self, payment: &Payment, expected: PaymentStatus) -> StoreResult<()>;

    /// Moves a `refunding` payment to its final state and voids the booking's
    /// still-active tickets as `void_tickets`, as one write. Returns the
    /// number of tickets voided.
    async fn finish_refund(&self, payment: &Payment, void_tickets: TicketStatus)
        -> StoreResult<u64>;

    /// Fails with `Duplicate` if a bundle for the same booking and payment
    /// exists, and with `Conflict` if the booking has closed or the payment
    /// is no longer `completed`.
    async fn insert_ticket_bundle(&self, bundle: &TicketBundle, tickets: &[Ticket])
        -> StoreResult<()>;

    async fn find_ticket_bundle(
        &self,
        booking_id: Uuid,
        payment_id: Uuid,
    ) -> StoreResult<Option<TicketBundle>>;

    async fn tickets_for_bundle(&self, bundle_id: Uuid) -> StoreResult<Vec<Ticket>>;

    async fn tickets_for_booking(&self, booking_id: Uuid) -> StoreResult<Vec<Ticket>>;

    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>>;

    async fn find_ticket_by_code(&self, validation_code: &str) -> StoreResult<Option<Ticket>>;

    /// `active -> used`, or `Conflict` if the ticket is no longer active.
    async fn mark_ticket_used(
        &self,
        id: Uuid,
        gate_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Ticket>;

    async fn expire_tickets(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    async fn get_loyalty(&self, user_id: Uuid) -> StoreResult<Option<LoyaltyAccount>>;

    /// Adds the accrual to the account once per booking. `None` means the
    /// booking was already accrued.
    async fn apply_loyalty_accrual(
        &self,
        accrual: &LoyaltyAccrual,
    ) -> StoreResult<Option<LoyaltyAccount>>;

    /// Raises the tier; a lower or equal tier leaves the account untouched.
    async fn promote_tier(&self, user_id: Uuid, tier: LoyaltyTier) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_edits_keep_status() {
        assert!(check_booking_write(BookingStatus::Pending, BookingStatus::Pending).is_ok());
        assert!(check_booking_write(BookingStatus::Confirmed, BookingStatus::Cancelled).is_ok());
        assert!(matches!(
            check_booking_write(BookingStatus::Cancelled, BookingStatus::Confirmed),
            Err(StoreError::InvalidTransition { entity: "booking", .. })
        ));
    }

    #[test]
    fn test_payment_writes_follow_the_table() {
        use PaymentStatus::*;
        assert!(check_payment_write(Completed, Refunding).is_ok());
        assert!(check_payment_write(Refunding, Completed).is_ok());
        assert!(check_payment_write(Refunding, Refunded).is_ok());

        let err = check_payment_write(Refunded, Completed).unwrap_err();
        assert_eq!(err.to_string(), "payment cannot move from 'refunded' to 'completed'");
        assert!(check_payment_write(Completed, Refunded).is_err());
        assert!(check_payment_write(Completed, Completed).is_err());
    }
}
