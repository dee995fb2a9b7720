use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum TicketType {
    Adult,
    Child,
}

impl TicketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketType::Adult => "adult",
            TicketType::Child => "child",
        }
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adult" => Ok(TicketType::Adult),
            "child" => Ok(TicketType::Child),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum TicketStatus {
    Active,
    Used,
    Expired,
    Cancelled,
    Refunded,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Active => "active",
            TicketStatus::Used => "used",
            TicketStatus::Expired => "expired",
            TicketStatus::Cancelled => "cancelled",
            TicketStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub bundle_id: Uuid,
    pub booking_id: Uuid,
    pub payment_id: Uuid,
    pub holder_name: String,
    pub ticket_type: TicketType,
    pub status: TicketStatus,
    pub visit_date: NaiveDate,
    /// Adult price for the visit, before the child discount.
    pub base_price: Money,
    pub price: Money,
    pub discount_amount: Money,
    pub discount_reason: Option<String>,
    pub qr_payload: String,
    pub validation_code: String,
    #[serde(skip_serializing)]
    pub security_hash: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub used_gate: Option<String>,
}

/// Tickets minted together from one completed payment.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketBundle {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub payment_id: Uuid,
    pub ticket_count: i32,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedBundle {
    pub bundle: TicketBundle,
    pub tickets: Vec<Ticket>,
}

/// What gate staff see after a successful scan.
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    pub ticket_id: Uuid,
    pub booking_id: Uuid,
    pub holder_name: String,
    pub ticket_type: TicketType,
    pub visit_date: NaiveDate,
    pub gate_id: String,
    pub used_at: DateTime<Utc>,
}

impl Admission {
    pub fn from_ticket(ticket: &Ticket, gate_id: &str, used_at: DateTime<Utc>) -> Self {
        Self {
            ticket_id: ticket.id,
            booking_id: ticket.booking_id,
            holder_name: ticket.holder_name.clone(),
            ticket_type: ticket.ticket_type,
            visit_date: ticket.visit_date,
            gate_id: gate_id.to_string(),
            used_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_type_round_trips_through_str() {
        for ty in [TicketType::Adult, TicketType::Child] {
            assert_eq!(ty.as_str().parse::<TicketType>(), Ok(ty));
        }
        assert!("senior".parse::<TicketType>().is_err());
    }
}
