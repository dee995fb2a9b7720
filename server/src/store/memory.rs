use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    check_booking_write, check_payment_write, CapacityChange, Store, StoreError, StoreResult,
};
use crate::models::{
    Booking, BookingStatus, LoyaltyAccount, LoyaltyAccrual, LoyaltyTier, Park, Payment,
    PaymentStatus, SlotKey, Ticket, TicketBundle, TicketStatus, TicketType,
};

#[derive(Default)]
struct Inner {
    parks: HashMap<Uuid, Park>,
    reserved: HashMap<SlotKey, i32>,
    bookings: HashMap<Uuid, Booking>,
    payments: HashMap<Uuid, Payment>,
    bundles: HashMap<Uuid, TicketBundle>,
    tickets: HashMap<Uuid, Ticket>,
    loyalty: HashMap<Uuid, LoyaltyAccount>,
    accrued_bookings: HashSet<Uuid>,
}

impl Inner {
    fn reserve(&mut self, slot: SlotKey, guests: i32, capacity_total: i32) -> StoreResult<()> {
        let reserved = self.reserved.entry(slot).or_insert(0);
        if *reserved + guests > capacity_total {
            return Err(StoreError::CapacityExhausted);
        }
        *reserved += guests;
        Ok(())
    }

    fn release(&mut self, slot: SlotKey, guests: i32) {
        if let Some(reserved) = self.reserved.get_mut(&slot) {
            *reserved = (*reserved - guests).max(0);
        }
    }

    fn void_active_tickets(&mut self, booking_id: Uuid, status: TicketStatus) -> u64 {
        let mut voided = 0;
        for ticket in self.tickets.values_mut() {
            if ticket.booking_id == booking_id && ticket.status == TicketStatus::Active {
                ticket.status = status;
                voided += 1;
            }
        }
        voided
    }

    fn expect_payment(&self, payment: &Payment, expected: PaymentStatus) -> StoreResult<()> {
        let current = self.payments.get(&payment.id).ok_or(StoreError::NotFound)?;
        if current.status != expected {
            return Err(StoreError::Conflict);
        }
        check_payment_write(expected, payment.status)
    }
}

/// Process-local store. One lock guards all state, which makes every trait
/// method a single atomic step.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_park(&self, id: Uuid) -> StoreResult<Option<Park>> {
        Ok(self.inner.lock().await.parks.get(&id).cloned())
    }

    async fn upsert_park(&self, park: &Park) -> StoreResult<()> {
        self.inner.lock().await.parks.insert(park.id, park.clone());
        Ok(())
    }

    async fn reserved_by_slot(
        &self,
        park_id: Uuid,
        date: NaiveDate,
    ) -> StoreResult<HashMap<NaiveTime, i32>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .reserved
            .iter()
            .filter(|(slot, _)| slot.park_id == park_id && slot.date == date)
            .map(|(slot, reserved)| (slot.start_time, *reserved))
            .collect())
    }

    async fn create_booking(&self, booking: &Booking, capacity_total: i32) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.bookings.contains_key(&booking.id) {
            return Err(StoreError::Duplicate("booking"));
        }
        inner.reserve(booking.slot_key(), booking.guest_count(), capacity_total)?;
        inner.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self.inner.lock().await.bookings.get(&id).cloned())
    }

    async fn update_booking(
        &self,
        booking: &Booking,
        expected: BookingStatus,
        capacity: CapacityChange,
        void_tickets: Option<TicketStatus>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let current = inner
            .bookings
            .get(&booking.id)
            .ok_or(StoreError::NotFound)?;
        if current.status != expected {
            return Err(StoreError::Conflict);
        }
        check_booking_write(expected, booking.status)?;

        match capacity {
            CapacityChange::Keep => {}
            CapacityChange::Release { slot, guests } => inner.release(slot, guests),
            CapacityChange::Move {
                from,
                to,
                guests,
                capacity_total,
            } => {
                // Release first so moving within the same slot never fails
                inner.release(from, guests);
                if let Err(e) = inner.reserve(to, guests, capacity_total) {
                    *inner.reserved.entry(from).or_insert(0) += guests;
                    return Err(e);
                }
            }
        }

        if let Some(status) = void_tickets {
            inner.void_active_tickets(booking.id, status);
        }
        inner.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn pending_bookings_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<Booking>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Pending && b.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.payments.contains_key(&payment.id) {
            return Err(StoreError::Duplicate("payment"));
        }
        inner.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get_payment(&self, id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(self.inner.lock().await.payments.get(&id).cloned())
    }

    async fn find_payment_by_transaction(
        &self,
        transaction_id: &str,
    ) -> StoreResult<Option<Payment>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .payments
            .values()
            .find(|p| p.provider_transaction_id.as_deref() == Some(transaction_id))
            .cloned())
    }

    async fn payments_for_booking(&self, booking_id: Uuid) -> StoreResult<Vec<Payment>> {
        let inner = self.inner.lock().await;
        let mut payments: Vec<Payment> = inner
            .payments
            .values()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn update_payment(&self, payment: &Payment, expected: PaymentStatus) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.expect_payment(payment, expected)?;

        if payment.status.is_captured() {
            let other_captured = inner.payments.values().any(|p| {
                p.booking_id == payment.booking_id && p.id != payment.id && p.status.is_captured()
            });
            if other_captured {
                return Err(StoreError::Duplicate("captured payment"));
            }
        }

        inner.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn finish_refund(
        &self,
        payment: &Payment,
        void_tickets: TicketStatus,
    ) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        inner.expect_payment(payment, PaymentStatus::Refunding)?;

        inner.payments.insert(payment.id, payment.clone());
        Ok(inner.void_active_tickets(payment.booking_id, void_tickets))
    }

    async fn insert_ticket_bundle(
        &self,
        bundle: &TicketBundle,
        tickets: &[Ticket],
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let booking_open = inner
            .bookings
            .get(&bundle.booking_id)
            .is_some_and(|b| !b.status.releases_capacity());
        let payment_completed = inner
            .payments
            .get(&bundle.payment_id)
            .is_some_and(|p| p.status == PaymentStatus::Completed);
        if !booking_open || !payment_completed {
            return Err(StoreError::Conflict);
        }

        let exists = inner
            .bundles
            .values()
            .any(|b| b.booking_id == bundle.booking_id && b.payment_id == bundle.payment_id);
        if exists {
            return Err(StoreError::Duplicate("ticket bundle"));
        }

        inner.bundles.insert(bundle.id, bundle.clone());
        for ticket in tickets {
            inner.tickets.insert(ticket.id, ticket.clone());
        }
        Ok(())
    }

    async fn find_ticket_bundle(
        &self,
        booking_id: Uuid,
        payment_id: Uuid,
    ) -> StoreResult<Option<TicketBundle>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .bundles
            .values()
            .find(|b| b.booking_id == booking_id && b.payment_id == payment_id)
            .cloned())
    }

    async fn tickets_for_bundle(&self, bundle_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let inner = self.inner.lock().await;
        let mut tickets: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| t.bundle_id == bundle_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| (t.ticket_type != TicketType::Adult, t.id));
        Ok(tickets)
    }

    async fn tickets_for_booking(&self, booking_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let inner = self.inner.lock().await;
        let mut tickets: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| t.booking_id == booking_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| (t.issued_at, t.ticket_type != TicketType::Adult, t.id));
        Ok(tickets)
    }

    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        Ok(self.inner.lock().await.tickets.get(&id).cloned())
    }

    async fn find_ticket_by_code(&self, validation_code: &str) -> StoreResult<Option<Ticket>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tickets
            .values()
            .find(|t| t.validation_code == validation_code)
            .cloned())
    }

    async fn mark_ticket_used(
        &self,
        id: Uuid,
        gate_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Ticket> {
        let mut inner = self.inner.lock().await;
        let ticket = inner.tickets.get_mut(&id).ok_or(StoreError::NotFound)?;
        if ticket.status != TicketStatus::Active {
            return Err(StoreError::Conflict);
        }
        ticket.status = TicketStatus::Used;
        ticket.used_at = Some(at);
        ticket.used_gate = Some(gate_id.to_string());
        Ok(ticket.clone())
    }

    async fn expire_tickets(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let mut expired = 0;
        for ticket in inner.tickets.values_mut() {
            if ticket.status == TicketStatus::Active && ticket.valid_until < now {
                ticket.status = TicketStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn get_loyalty(&self, user_id: Uuid) -> StoreResult<Option<LoyaltyAccount>> {
        Ok(self.inner.lock().await.loyalty.get(&user_id).cloned())
    }

    async fn apply_loyalty_accrual(
        &self,
        accrual: &LoyaltyAccrual,
    ) -> StoreResult<Option<LoyaltyAccount>> {
        let mut inner = self.inner.lock().await;
        if !inner.accrued_bookings.insert(accrual.booking_id) {
            return Ok(None);
        }

        let account = inner
            .loyalty
            .entry(accrual.user_id)
            .or_insert_with(|| LoyaltyAccount::new(accrual.user_id, accrual.at));
        account.points += accrual.points;
        account.total_spent = account.total_spent + accrual.amount;
        account.total_visits += 1;
        account.updated_at = accrual.at;
        Ok(Some(account.clone()))
    }

    async fn promote_tier(&self, user_id: Uuid, tier: LoyaltyTier) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(account) = inner.loyalty.get_mut(&user_id) {
            if tier > account.tier {
                account.tier = tier;
            }
        }
        Ok(())
    }
}
