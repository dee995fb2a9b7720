use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use super::Context;
use crate::models::{Park, TimeSlot};
use crate::utils::error::{AppError, AppResult};

pub struct Availability<'a> {
    pub(crate) ctx: &'a Arc<Context>,
}

impl Availability<'_> {
    /// Every slot of the park's day with its current reservation count.
    pub async fn slots(&self, park_id: Uuid, date: NaiveDate) -> AppResult<Vec<TimeSlot>> {
        let park = self.ctx.park(park_id).await?;
        let reserved = self.ctx.store.reserved_by_slot(park_id, date).await?;
        let now = self.ctx.clock.now();
        let lead_time = self.ctx.config.booking.lead_time;

        Ok(park
            .slot_windows()
            .into_iter()
            .map(|(start, end)| {
                let capacity_reserved = reserved.get(&start).copied().unwrap_or(0);
                let opens_in_time = date.and_time(start).and_utc() - now >= lead_time;
                TimeSlot {
                    park_id,
                    date,
                    start_time: start,
                    end_time: end,
                    capacity_total: park.slot_capacity,
                    capacity_reserved,
                    available: capacity_reserved < park.slot_capacity && opens_in_time,
                }
            })
            .collect())
    }
}

/// Resolves a requested slot start to its window and enforces the lead time.
pub(crate) fn bookable_window(
    park: &Park,
    date: NaiveDate,
    start: NaiveTime,
    now: DateTime<Utc>,
    lead_time: chrono::Duration,
) -> AppResult<(NaiveTime, NaiveTime)> {
    let window = park.window_starting_at(start).ok_or_else(|| {
        AppError::validation("slot_start", format!("{start} is not a slot start at this park"))
    })?;

    if date.and_time(start).and_utc() - now < lead_time {
        return Err(AppError::SlotTooSoon {
            lead_minutes: lead_time.num_minutes(),
        });
    }
    Ok(window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::park::tests::park;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_unknown_start_is_a_validation_error() {
        let park = park((10, 0), (20, 0), 120);
        let date = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();

        let err = bookable_window(&park, date, at(11, 0), now, Duration::minutes(60)).unwrap_err();
        assert!(matches!(err, AppError::Validation { field: "slot_start", .. }));
    }

    #[test]
    fn test_slot_inside_lead_time_is_too_soon() {
        let park = park((10, 0), (20, 0), 120);
        let date = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 11, 30, 0).unwrap();

        let err = bookable_window(&park, date, at(12, 0), now, Duration::minutes(60)).unwrap_err();
        assert!(matches!(err, AppError::SlotTooSoon { lead_minutes: 60 }));

        let window = bookable_window(&park, date, at(14, 0), now, Duration::minutes(60)).unwrap();
        assert_eq!(window, (at(14, 0), at(16, 0)));
    }
}
