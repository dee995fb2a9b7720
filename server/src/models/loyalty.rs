use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::money::Money;

/// Declaration order is rank order: a later variant is a higher tier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum LoyaltyTier {
    Beginner,
    Friend,
    Vip,
}

impl LoyaltyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoyaltyTier::Beginner => "beginner",
            LoyaltyTier::Friend => "friend",
            LoyaltyTier::Vip => "vip",
        }
    }

    pub fn rank(&self) -> i32 {
        match self {
            LoyaltyTier::Beginner => 0,
            LoyaltyTier::Friend => 1,
            LoyaltyTier::Vip => 2,
        }
    }
}

/// Loyalty standing of one customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct LoyaltyAccount {
    pub user_id: Uuid,
    pub tier: LoyaltyTier,
    pub points: i64,
    pub total_spent: Money,
    pub total_visits: i32,
    pub updated_at: DateTime<Utc>,
}

impl LoyaltyAccount {
    pub fn new(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            tier: LoyaltyTier::Beginner,
            points: 0,
            total_spent: Money::ZERO,
            total_visits: 0,
            updated_at: now,
        }
    }
}

/// Increment applied to an account for one completed booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoyaltyAccrual {
    pub user_id: Uuid,
    pub booking_id: Uuid,
    pub points: i64,
    pub amount: Money,
    pub at: DateTime<Utc>,
}
