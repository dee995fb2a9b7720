use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::money::Money;
use super::park::SlotKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::Rejected
        )
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Pending, Rejected)
                | (Confirmed, Completed)
                | (Confirmed, Cancelled)
        )
    }

    /// Capacity stays reserved for every status except these.
    pub fn releases_capacity(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Rejected)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ContactInfo {
    #[sqlx(rename = "contact_name")]
    pub name: String,
    #[sqlx(rename = "contact_phone")]
    pub phone: String,
    #[sqlx(rename = "contact_email")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub park_id: Uuid,
    pub visit_date: NaiveDate,
    pub slot_start: NaiveTime,
    pub slot_end: NaiveTime,
    pub adult_count: i32,
    pub child_count: i32,
    /// Per-guest prices captured at creation; tickets are priced from these.
    pub adult_price: Money,
    pub child_price: Money,
    pub total_cost: Money,
    pub status: BookingStatus,
    #[sqlx(flatten)]
    pub contact: ContactInfo,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn guest_count(&self) -> i32 {
        self.adult_count + self.child_count
    }

    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            park_id: self.park_id,
            date: self.visit_date,
            start_time: self.slot_start,
        }
    }

    pub fn visit_starts_at(&self) -> DateTime<Utc> {
        self.visit_date.and_time(self.slot_start).and_utc()
    }

    pub fn visit_ends_at(&self) -> DateTime<Utc> {
        self.visit_date.and_time(self.slot_end).and_utc()
    }
}

/// A customer's booking request as received from the auth-verified caller.
#[derive(Debug, Clone, Deserialize)]
pub struct NewBooking {
    pub park_id: Uuid,
    pub visit_date: NaiveDate,
    pub slot_start: NaiveTime,
    pub adult_count: i32,
    pub child_count: i32,
    pub contact: ContactInfo,
}

/// Fields a customer may change on a pending booking. Guest counts are not
/// among them: the price is fixed when the booking is created.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingChanges {
    pub visit_date: Option<NaiveDate>,
    pub slot_start: Option<NaiveTime>,
    pub contact: Option<ContactInfo>,
}

impl BookingChanges {
    pub fn is_empty(&self) -> bool {
        self.visit_date.is_none() && self.slot_start.is_none() && self.contact.is_none()
    }

    pub fn moves_slot(&self) -> bool {
        self.visit_date.is_some() || self.slot_start.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BookingStatus::*;

    const ALL: [BookingStatus; 5] = [Pending, Confirmed, Completed, Cancelled, Rejected];

    #[test]
    fn test_transition_table() {
        let allowed: Vec<_> = ALL
            .iter()
            .flat_map(|from| ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();

        assert_eq!(
            allowed,
            vec![
                (Pending, Confirmed),
                (Pending, Cancelled),
                (Pending, Rejected),
                (Confirmed, Completed),
                (Confirmed, Cancelled),
            ]
        );
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            assert!(ALL.iter().all(|to| !from.can_transition_to(*to)), "{from} must be terminal");
        }
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Confirmed).unwrap(), "\"confirmed\"");
    }

    #[test]
    fn test_changes_emptiness() {
        assert!(BookingChanges::default().is_empty());
        let changes = BookingChanges {
            slot_start: NaiveTime::from_hms_opt(12, 0, 0),
            ..Default::default()
        };
        assert!(!changes.is_empty());
        assert!(changes.moves_slot());
    }
}
