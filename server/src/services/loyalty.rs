//! Points and tiers from completed visits.
//!
//! Accrual runs after a booking is completed, never inside that transition.
//! It is retried on its own and keyed by booking so a retry cannot count the
//! same visit twice.

use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use super::Context;
use crate::config::LoyaltyPolicy;
use crate::models::{Booking, LoyaltyAccount, LoyaltyAccrual, LoyaltyTier, Money};
use crate::utils::error::AppResult;
use crate::utils::retry::{retry_with_backoff, RetryPolicy};

pub struct Loyalty<'a> {
    pub(crate) ctx: &'a Arc<Context>,
}

/// Highest tier whose spend or visit threshold the customer has reached.
pub fn tier_for(policy: &LoyaltyPolicy, total_spent: Money, total_visits: i32) -> LoyaltyTier {
    if total_spent >= policy.vip_min_spent || total_visits >= policy.vip_min_visits {
        LoyaltyTier::Vip
    } else if total_spent >= policy.friend_min_spent || total_visits >= policy.friend_min_visits {
        LoyaltyTier::Friend
    } else {
        LoyaltyTier::Beginner
    }
}

impl Loyalty<'_> {
    pub async fn account(&self, user_id: Uuid) -> AppResult<LoyaltyAccount> {
        Ok(self
            .ctx
            .store
            .get_loyalty(user_id)
            .await?
            .unwrap_or_else(|| LoyaltyAccount::new(user_id, self.ctx.clock.now())))
    }

    /// Credits the booking's paid amount and one visit. Returns `None` if
    /// this booking was already credited or kept no money, as after a full
    /// refund.
    pub async fn accrue(&self, booking: &Booking) -> AppResult<Option<LoyaltyAccount>> {
        let paid: Money = self
            .ctx
            .store
            .payments_for_booking(booking.id)
            .await?
            .iter()
            .map(|p| p.retained_amount())
            .sum();
        if !paid.is_positive() {
            info!(booking_id = %booking.id, "Nothing paid for booking, no loyalty accrued");
            return Ok(None);
        }

        let policy = &self.ctx.config.loyalty;
        let accrual = LoyaltyAccrual {
            user_id: booking.user_id,
            booking_id: booking.id,
            points: paid.scale_floor(policy.points_per_unit),
            amount: paid,
            at: self.ctx.clock.now(),
        };

        let Some(mut account) = self.ctx.store.apply_loyalty_accrual(&accrual).await? else {
            info!(booking_id = %booking.id, "Loyalty already accrued for booking");
            return Ok(None);
        };

        let earned = tier_for(policy, account.total_spent, account.total_visits);
        if earned > account.tier {
            self.ctx.store.promote_tier(account.user_id, earned).await?;
            info!(user_id = %account.user_id, from = account.tier.as_str(), to = earned.as_str(), "Loyalty tier raised");
            account.tier = earned;
        }

        info!(
            user_id = %account.user_id,
            booking_id = %booking.id,
            points = accrual.points,
            balance = account.points,
            "Loyalty points accrued"
        );
        Ok(Some(account))
    }
}

/// Runs [`Loyalty::accrue`] in the background with retries. The booking's
/// completion stands whatever happens here.
pub(crate) fn spawn_accrual(ctx: Arc<Context>, booking: Booking) {
    tokio::spawn(async move {
        let loyalty = Loyalty { ctx: &ctx };
        let result =
            retry_with_backoff(&RetryPolicy::default(), "loyalty accrual", || {
                loyalty.accrue(&booking)
            })
            .await;

        if let Err(e) = result {
            error!(booking_id = %booking.id, user_id = %booking.user_id, error = %e, "Loyalty accrual abandoned");
        }
    });
}
