//! PostgreSQL-backed store.
//!
//! Conditional writes are plain `UPDATE ... WHERE status = $expected`
//! statements; the partial unique indexes in the migrations back the
//! one-captured-payment and one-bundle-per-payment rules.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{
    check_booking_write, check_payment_write, CapacityChange, Store, StoreError, StoreResult,
};
use crate::models::{
    Booking, BookingStatus, LoyaltyAccount, LoyaltyAccrual, LoyaltyTier, Park, Payment,
    PaymentStatus, SlotKey, Ticket, TicketBundle, TicketStatus,
};

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

/// Maps driver errors, turning unique violations into `Duplicate(what)` and
/// transaction aborts into `Conflict`.
fn db_error(e: sqlx::Error, what: &'static str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return StoreError::Duplicate(what);
        }
        if matches!(
            db_err.code().as_deref(),
            Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
        ) {
            return StoreError::Conflict;
        }
    }
    StoreError::Database(e)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!().run(&self.pool).await
    }

    async fn reserve(
        conn: &mut PgConnection,
        slot: SlotKey,
        guests: i32,
        capacity_total: i32,
    ) -> StoreResult<()> {
        if guests > capacity_total {
            return Err(StoreError::CapacityExhausted);
        }

        let reserved: Option<i32> = sqlx::query_scalar(
            r#"
            INSERT INTO slot_reservations (park_id, visit_date, slot_start, reserved)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (park_id, visit_date, slot_start)
            DO UPDATE SET reserved = slot_reservations.reserved + EXCLUDED.reserved
            WHERE slot_reservations.reserved + EXCLUDED.reserved <= $5
            RETURNING reserved
            "#,
        )
        .bind(slot.park_id)
        .bind(slot.date)
        .bind(slot.start_time)
        .bind(guests)
        .bind(capacity_total)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| db_error(e, "slot reservation"))?;

        reserved.map(|_| ()).ok_or(StoreError::CapacityExhausted)
    }

    async fn release(conn: &mut PgConnection, slot: SlotKey, guests: i32) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE slot_reservations
            SET reserved = GREATEST(reserved - $4, 0)
            WHERE park_id = $1 AND visit_date = $2 AND slot_start = $3
            "#,
        )
        .bind(slot.park_id)
        .bind(slot.date)
        .bind(slot.start_time)
        .bind(guests)
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error(e, "slot reservation"))?;
        Ok(())
    }

    async fn void_tickets(
        conn: &mut PgConnection,
        booking_id: Uuid,
        status: TicketStatus,
    ) -> StoreResult<u64> {
        let voided = sqlx::query(
            "UPDATE tickets SET status = $2 WHERE booking_id = $1 AND status = $3",
        )
        .bind(booking_id)
        .bind(status)
        .bind(TicketStatus::Active)
        .execute(&mut *conn)
        .await?
        .rows_affected();
        Ok(voided)
    }

    /// Conditional overwrite; returns the number of rows written.
    async fn write_payment(
        conn: &mut PgConnection,
        payment: &Payment,
        expected: PaymentStatus,
    ) -> StoreResult<u64> {
        let updated = sqlx::query(
            r#"
            UPDATE payments SET
                status = $2, refund_amount = $3, provider_transaction_id = $4,
                failure_reason = $5, updated_at = $6, captured_at = $7, failed_at = $8,
                refunded_at = $9
            WHERE id = $1 AND status = $10
            "#,
        )
        .bind(payment.id)
        .bind(payment.status)
        .bind(payment.refund_amount)
        .bind(&payment.provider_transaction_id)
        .bind(&payment.failure_reason)
        .bind(payment.updated_at)
        .bind(payment.captured_at)
        .bind(payment.failed_at)
        .bind(payment.refunded_at)
        .bind(expected)
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error(e, "captured payment"))?
        .rows_affected();
        Ok(updated)
    }

    async fn exists(&self, table: &'static str, id: Uuid) -> StoreResult<bool> {
        let query = format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE id = $1)");
        let exists: bool = sqlx::query_scalar(&query)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn missing_or_conflict(&self, table: &'static str, id: Uuid) -> StoreError {
        match self.exists(table, id).await {
            Ok(true) => StoreError::Conflict,
            Ok(false) => StoreError::NotFound,
            Err(e) => e,
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_park(&self, id: Uuid) -> StoreResult<Option<Park>> {
        let park = sqlx::query_as::<_, Park>("SELECT * FROM parks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(park)
    }

    async fn upsert_park(&self, park: &Park) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO parks
                (id, name, country_code, opens_at, closes_at, slot_minutes, slot_capacity,
                 adult_price, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                country_code = EXCLUDED.country_code,
                opens_at = EXCLUDED.opens_at,
                closes_at = EXCLUDED.closes_at,
                slot_minutes = EXCLUDED.slot_minutes,
                slot_capacity = EXCLUDED.slot_capacity,
                adult_price = EXCLUDED.adult_price,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(park.id)
        .bind(&park.name)
        .bind(&park.country_code)
        .bind(park.opens_at)
        .bind(park.closes_at)
        .bind(park.slot_minutes)
        .bind(park.slot_capacity)
        .bind(park.adult_price)
        .bind(park.created_at)
        .bind(park.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reserved_by_slot(
        &self,
        park_id: Uuid,
        date: NaiveDate,
    ) -> StoreResult<HashMap<NaiveTime, i32>> {
        let rows: Vec<(NaiveTime, i32)> = sqlx::query_as(
            "SELECT slot_start, reserved FROM slot_reservations WHERE park_id = $1 AND visit_date = $2",
        )
        .bind(park_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn create_booking(&self, booking: &Booking, capacity_total: i32) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        Self::reserve(&mut *tx, booking.slot_key(), booking.guest_count(), capacity_total).await?;

        sqlx::query(
            r#"
            INSERT INTO bookings
                (id, user_id, park_id, visit_date, slot_start, slot_end, adult_count, child_count,
                 adult_price, child_price, total_cost, status, contact_name, contact_phone,
                 contact_email, rejection_reason, created_at, updated_at, confirmed_at,
                 cancelled_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21)
            "#,
        )
        .bind(booking.id)
        .bind(booking.user_id)
        .bind(booking.park_id)
        .bind(booking.visit_date)
        .bind(booking.slot_start)
        .bind(booking.slot_end)
        .bind(booking.adult_count)
        .bind(booking.child_count)
        .bind(booking.adult_price)
        .bind(booking.child_price)
        .bind(booking.total_cost)
        .bind(booking.status)
        .bind(&booking.contact.name)
        .bind(&booking.contact.phone)
        .bind(&booking.contact.email)
        .bind(&booking.rejection_reason)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .bind(booking.confirmed_at)
        .bind(booking.cancelled_at)
        .bind(booking.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error(e, "booking"))?;

        tx.commit().await.map_err(|e| db_error(e, "booking"))?;
        Ok(())
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let booking = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(booking)
    }

    async fn update_booking(
        &self,
        booking: &Booking,
        expected: BookingStatus,
        capacity: CapacityChange,
        void_tickets: Option<TicketStatus>,
    ) -> StoreResult<()> {
        check_booking_write(expected, booking.status)?;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE bookings SET
                visit_date = $2, slot_start = $3, slot_end = $4, status = $5,
                contact_name = $6, contact_phone = $7, contact_email = $8,
                rejection_reason = $9, updated_at = $10, confirmed_at = $11,
                cancelled_at = $12, completed_at = $13
            WHERE id = $1 AND status = $14
            "#,
        )
        .bind(booking.id)
        .bind(booking.visit_date)
        .bind(booking.slot_start)
        .bind(booking.slot_end)
        .bind(booking.status)
        .bind(&booking.contact.name)
        .bind(&booking.contact.phone)
        .bind(&booking.contact.email)
        .bind(&booking.rejection_reason)
        .bind(booking.updated_at)
        .bind(booking.confirmed_at)
        .bind(booking.cancelled_at)
        .bind(booking.completed_at)
        .bind(expected)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error(e, "booking"))?
        .rows_affected();

        if updated == 0 {
            return Err(self.missing_or_conflict("bookings", booking.id).await);
        }

        match capacity {
            CapacityChange::Keep => {}
            CapacityChange::Release { slot, guests } => Self::release(&mut *tx, slot, guests).await?,
            CapacityChange::Move {
                from,
                to,
                guests,
                capacity_total,
            } => {
                Self::release(&mut *tx, from, guests).await?;
                Self::reserve(&mut *tx, to, guests, capacity_total).await?;
            }
        }

        if let Some(status) = void_tickets {
            Self::void_tickets(&mut *tx, booking.id, status).await?;
        }

        tx.commit().await.map_err(|e| db_error(e, "booking"))?;
        Ok(())
    }

    async fn pending_bookings_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<Booking>> {
        let bookings = sqlx::query_as::<_, Booking>(
            "SELECT * FROM bookings WHERE status = 'pending' AND created_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(bookings)
    }

    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments
                (id, booking_id, user_id, amount, fee_amount, net_amount, refund_amount, method,
                 provider, status, provider_transaction_id, failure_reason, created_at,
                 updated_at, captured_at, failed_at, refunded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(payment.id)
        .bind(payment.booking_id)
        .bind(payment.user_id)
        .bind(payment.amount)
        .bind(payment.fee_amount)
        .bind(payment.net_amount)
        .bind(payment.refund_amount)
        .bind(payment.method)
        .bind(&payment.provider)
        .bind(payment.status)
        .bind(&payment.provider_transaction_id)
        .bind(&payment.failure_reason)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .bind(payment.captured_at)
        .bind(payment.failed_at)
        .bind(payment.refunded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(e, "payment"))?;
        Ok(())
    }

    async fn get_payment(&self, id: Uuid) -> StoreResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    async fn find_payment_by_transaction(
        &self,
        transaction_id: &str,
    ) -> StoreResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE provider_transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    async fn payments_for_booking(&self, booking_id: Uuid) -> StoreResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE booking_id = $1 ORDER BY created_at",
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    async fn update_payment(&self, payment: &Payment, expected: PaymentStatus) -> StoreResult<()> {
        check_payment_write(expected, payment.status)?;
        let mut conn = self.pool.acquire().await?;
        if Self::write_payment(&mut *conn, payment, expected).await? == 0 {
            return Err(self.missing_or_conflict("payments", payment.id).await);
        }
        Ok(())
    }

    async fn finish_refund(
        &self,
        payment: &Payment,
        void_tickets: TicketStatus,
    ) -> StoreResult<u64> {
        check_payment_write(PaymentStatus::Refunding, payment.status)?;
        let mut tx = self.pool.begin().await?;

        if Self::write_payment(&mut *tx, payment, PaymentStatus::Refunding).await? == 0 {
            return Err(self.missing_or_conflict("payments", payment.id).await);
        }
        let voided = Self::void_tickets(&mut *tx, payment.booking_id, void_tickets).await?;

        tx.commit().await.map_err(|e| db_error(e, "payment"))?;
        Ok(voided)
    }

    async fn insert_ticket_bundle(
        &self,
        bundle: &TicketBundle,
        tickets: &[Ticket],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        // Share locks hold off a concurrent cancel or refund until the bundle is in
        let parents: Option<(BookingStatus, PaymentStatus)> = sqlx::query_as(
            r#"
            SELECT b.status, p.status
            FROM bookings b
            JOIN payments p ON p.booking_id = b.id
            WHERE b.id = $1 AND p.id = $2
            FOR SHARE
            "#,
        )
        .bind(bundle.booking_id)
        .bind(bundle.payment_id)
        .fetch_optional(&mut *tx)
        .await?;
        match parents {
            Some((booking, payment))
                if !booking.releases_capacity() && payment == PaymentStatus::Completed => {}
            _ => return Err(StoreError::Conflict),
        }

        sqlx::query(
            r#"
            INSERT INTO ticket_bundles (id, booking_id, payment_id, ticket_count, issued_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(bundle.id)
        .bind(bundle.booking_id)
        .bind(bundle.payment_id)
        .bind(bundle.ticket_count)
        .bind(bundle.issued_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error(e, "ticket bundle"))?;

        for ticket in tickets {
            sqlx::query(
                r#"
                INSERT INTO tickets
                    (id, bundle_id, booking_id, payment_id, holder_name, ticket_type, status,
                     visit_date, base_price, price, discount_amount, discount_reason, qr_payload,
                     validation_code, security_hash, valid_from, valid_until, issued_at, used_at,
                     used_gate)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                        $17, $18, $19, $20)
                "#,
            )
            .bind(ticket.id)
            .bind(ticket.bundle_id)
            .bind(ticket.booking_id)
            .bind(ticket.payment_id)
            .bind(&ticket.holder_name)
            .bind(ticket.ticket_type)
            .bind(ticket.status)
            .bind(ticket.visit_date)
            .bind(ticket.base_price)
            .bind(ticket.price)
            .bind(ticket.discount_amount)
            .bind(&ticket.discount_reason)
            .bind(&ticket.qr_payload)
            .bind(&ticket.validation_code)
            .bind(&ticket.security_hash)
            .bind(ticket.valid_from)
            .bind(ticket.valid_until)
            .bind(ticket.issued_at)
            .bind(ticket.used_at)
            .bind(&ticket.used_gate)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(e, "ticket"))?;
        }

        tx.commit().await.map_err(|e| db_error(e, "ticket bundle"))?;
        Ok(())
    }

    async fn find_ticket_bundle(
        &self,
        booking_id: Uuid,
        payment_id: Uuid,
    ) -> StoreResult<Option<TicketBundle>> {
        let bundle = sqlx::query_as::<_, TicketBundle>(
            "SELECT * FROM ticket_bundles WHERE booking_id = $1 AND payment_id = $2",
        )
        .bind(booking_id)
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(bundle)
    }

    async fn tickets_for_bundle(&self, bundle_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let tickets = sqlx::query_as::<_, Ticket>(
            "SELECT * FROM tickets WHERE bundle_id = $1 ORDER BY ticket_type, id",
        )
        .bind(bundle_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tickets)
    }

    async fn tickets_for_booking(&self, booking_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let tickets = sqlx::query_as::<_, Ticket>(
            "SELECT * FROM tickets WHERE booking_id = $1 ORDER BY issued_at, ticket_type, id",
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tickets)
    }

    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        let ticket = sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(ticket)
    }

    async fn find_ticket_by_code(&self, validation_code: &str) -> StoreResult<Option<Ticket>> {
        let ticket = sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE validation_code = $1")
            .bind(validation_code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(ticket)
    }

    async fn mark_ticket_used(
        &self,
        id: Uuid,
        gate_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Ticket> {
        let ticket = sqlx::query_as::<_, Ticket>(
            r#"
            UPDATE tickets SET status = $4, used_at = $2, used_gate = $3
            WHERE id = $1 AND status = $5
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(at)
        .bind(gate_id)
        .bind(TicketStatus::Used)
        .bind(TicketStatus::Active)
        .fetch_optional(&self.pool)
        .await?;

        match ticket {
            Some(ticket) => Ok(ticket),
            None => Err(self.missing_or_conflict("tickets", id).await),
        }
    }

    async fn expire_tickets(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let expired = sqlx::query(
            "UPDATE tickets SET status = $2 WHERE status = $3 AND valid_until < $1",
        )
        .bind(now)
        .bind(TicketStatus::Expired)
        .bind(TicketStatus::Active)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(expired)
    }

    async fn get_loyalty(&self, user_id: Uuid) -> StoreResult<Option<LoyaltyAccount>> {
        let account = sqlx::query_as::<_, LoyaltyAccount>(
            "SELECT * FROM loyalty_accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn apply_loyalty_accrual(
        &self,
        accrual: &LoyaltyAccrual,
    ) -> StoreResult<Option<LoyaltyAccount>> {
        let mut tx = self.pool.begin().await?;

        let recorded = sqlx::query(
            r#"
            INSERT INTO loyalty_accruals (booking_id, user_id, points, amount, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (booking_id) DO NOTHING
            "#,
        )
        .bind(accrual.booking_id)
        .bind(accrual.user_id)
        .bind(accrual.points)
        .bind(accrual.amount)
        .bind(accrual.at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if recorded == 0 {
            return Ok(None);
        }

        let account = sqlx::query_as::<_, LoyaltyAccount>(
            r#"
            INSERT INTO loyalty_accounts (user_id, tier, points, total_spent, total_visits, updated_at)
            VALUES ($1, $2, $3, $4, 1, $5)
            ON CONFLICT (user_id) DO UPDATE SET
                points = loyalty_accounts.points + EXCLUDED.points,
                total_spent = loyalty_accounts.total_spent + EXCLUDED.total_spent,
                total_visits = loyalty_accounts.total_visits + 1,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(accrual.user_id)
        .bind(LoyaltyTier::Beginner)
        .bind(accrual.points)
        .bind(accrual.amount)
        .bind(accrual.at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(account))
    }

    async fn promote_tier(&self, user_id: Uuid, tier: LoyaltyTier) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE loyalty_accounts SET tier = $2
            WHERE user_id = $1
              AND (CASE tier WHEN 'beginner' THEN 0 WHEN 'friend' THEN 1 ELSE 2 END) < $3
            "#,
        )
        .bind(user_id)
        .bind(tier)
        .bind(tier.rank())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
