use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::money::Money;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Park {
    pub id: Uuid,
    pub name: String,
    /// ISO 3166 alpha-2 code, selects the phone number pattern for bookings.
    pub country_code: String,
    pub opens_at: NaiveTime,
    pub closes_at: NaiveTime,
    pub slot_minutes: i32,
    pub slot_capacity: i32,
    pub adult_price: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Park {
    /// Operating hours cut into fixed, non-overlapping windows. A trailing
    /// window that would run past closing time is dropped.
    pub fn slot_windows(&self) -> Vec<(NaiveTime, NaiveTime)> {
        let mut windows = Vec::new();
        if self.slot_minutes <= 0 {
            return windows;
        }

        let length = Duration::minutes(i64::from(self.slot_minutes));
        let mut start = self.opens_at;
        while start < self.closes_at {
            let (end, wrapped) = start.overflowing_add_signed(length);
            if wrapped != 0 || end > self.closes_at {
                break;
            }
            windows.push((start, end));
            start = end;
        }
        windows
    }

    /// The window starting exactly at `start`, if the park has one.
    pub fn window_starting_at(&self, start: NaiveTime) -> Option<(NaiveTime, NaiveTime)> {
        self.slot_windows().into_iter().find(|(s, _)| *s == start)
    }
}

/// Identifies one slot's reservation counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub park_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
}

/// A bookable window as reported to customers. Derived on every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeSlot {
    pub park_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity_total: i32,
    pub capacity_reserved: i32,
    pub available: bool,
}

impl TimeSlot {
    pub fn remaining(&self) -> i32 {
        (self.capacity_total - self.capacity_reserved).max(0)
    }
}
