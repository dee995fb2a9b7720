//! Gate validation.
//!
//! A scan either admits exactly once or is refused with a reason for staff.
//! Refusals are final for that scan and nothing here retries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::Context;
use crate::models::{Admission, Ticket, TicketStatus};
use crate::qr::{is_validation_code, QrPayload};
use crate::store::StoreError;
use crate::utils::error::{AppError, AppResult, GateRejection};

const MAX_GATE_ID_LEN: usize = 64;

pub struct Gate<'a> {
    pub(crate) ctx: &'a Arc<Context>,
}

impl Gate<'_> {
    /// Admits the ticket behind `input`, a scanned QR payload or a manually
    /// typed validation code.
    pub async fn validate(&self, input: &str, gate_id: &str) -> AppResult<Admission> {
        let gate_id = gate_id.trim();
        if gate_id.is_empty() || gate_id.len() > MAX_GATE_ID_LEN {
            return Err(AppError::validation("gate_id", "a gate id is required"));
        }

        match self.admit(input, gate_id).await {
            Ok(admission) => {
                info!(ticket_id = %admission.ticket_id, booking_id = %admission.booking_id, gate_id, "Ticket admitted");
                Ok(admission)
            }
            Err(AppError::Gate(rejection)) => {
                warn!(gate_id, reason = rejection.code(), "Ticket refused");
                Err(rejection.into())
            }
            Err(e) => Err(e),
        }
    }

    async fn admit(&self, input: &str, gate_id: &str) -> AppResult<Admission> {
        let ticket = self.resolve(input.trim()).await?;

        let now = self.ctx.clock.now();
        check_admissible(&ticket, now)?;

        match self.ctx.store.mark_ticket_used(ticket.id, gate_id, now).await {
            Ok(used) => Ok(Admission::from_ticket(&used, gate_id, now)),
            Err(StoreError::Conflict) => {
                // Another scan changed the ticket first; report what it did
                let latest = self
                    .ctx
                    .store
                    .get_ticket(ticket.id)
                    .await?
                    .ok_or(GateRejection::TicketNotFound)?;
                check_admissible(&latest, now)?;
                Err(GateRejection::AlreadyUsed {
                    used_at: latest.used_at.unwrap_or(now),
                    gate: latest.used_gate.unwrap_or_default(),
                }
                .into())
            }
            Err(StoreError::NotFound) => Err(GateRejection::TicketNotFound.into()),
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve(&self, input: &str) -> AppResult<Ticket> {
        let scheme = &self.ctx.config.tickets.qr_scheme;

        if input.contains("://") {
            let payload =
                QrPayload::parse(input, scheme).map_err(|_| GateRejection::InvalidFormat)?;
            let ticket = self
                .ctx
                .store
                .get_ticket(payload.ticket_id)
                .await?
                .ok_or(GateRejection::TicketNotFound)?;

            let signed = self.ctx.signer.verify(
                payload.ticket_id,
                &payload.validation_code,
                payload.valid_until,
                &payload.security_hash,
            );
            let matches_record = payload.validation_code == ticket.validation_code
                && payload.valid_until == ticket.valid_until.timestamp()
                && payload.ticket_type == ticket.ticket_type
                && payload.price == ticket.price;
            if !signed || !matches_record {
                return Err(GateRejection::TamperedCode.into());
            }
            return Ok(ticket);
        }

        let code = input.to_ascii_uppercase();
        if !is_validation_code(&code) {
            return Err(GateRejection::InvalidFormat.into());
        }
        let ticket = self
            .ctx
            .store
            .find_ticket_by_code(&code)
            .await?
            .ok_or(GateRejection::TicketNotFound)?;

        let signed = self.ctx.signer.verify(
            ticket.id,
            &ticket.validation_code,
            ticket.valid_until.timestamp(),
            &ticket.security_hash,
        );
        if !signed {
            return Err(GateRejection::TamperedCode.into());
        }
        Ok(ticket)
    }
}

/// Refusal for a ticket that cannot be admitted at `now`, if any.
fn check_admissible(ticket: &Ticket, now: DateTime<Utc>) -> Result<(), GateRejection> {
    match ticket.status {
        TicketStatus::Used => Err(GateRejection::AlreadyUsed {
            used_at: ticket.used_at.unwrap_or(now),
            gate: ticket.used_gate.clone().unwrap_or_default(),
        }),
        TicketStatus::Expired => Err(GateRejection::Expired(ticket.valid_until)),
        TicketStatus::Cancelled | TicketStatus::Refunded => Err(GateRejection::TicketRevoked),
        TicketStatus::Active if now < ticket.valid_from => {
            Err(GateRejection::NotYetValid(ticket.valid_from))
        }
        TicketStatus::Active if now > ticket.valid_until => {
            Err(GateRejection::Expired(ticket.valid_until))
        }
        TicketStatus::Active => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Money, TicketType};
    use chrono::{Duration, NaiveDate, TimeZone};
    use uuid::Uuid;

    fn ticket(status: TicketStatus) -> Ticket {
        let valid_from = Utc.with_ymd_and_hms(2026, 6, 1, 9, 30, 0).unwrap();
        Ticket {
            id: Uuid::new_v4(),
            bundle_id: Uuid::new_v4(),
            booking_id: Uuid::new_v4(),
            payment_id: Uuid::new_v4(),
            holder_name: "Aida".to_string(),
            ticket_type: TicketType::Adult,
            status,
            visit_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            base_price: Money::new(300),
            price: Money::new(300),
            discount_amount: Money::ZERO,
            discount_reason: None,
            qr_payload: String::new(),
            validation_code: "ABCDEFGH".to_string(),
            security_hash: String::new(),
            valid_from,
            valid_until: Utc.with_ymd_and_hms(2026, 6, 1, 23, 59, 59).unwrap(),
            issued_at: valid_from - Duration::days(3),
            used_at: None,
            used_gate: None,
        }
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let t = ticket(TicketStatus::Active);
        assert_eq!(check_admissible(&t, t.valid_from), Ok(()));
        assert_eq!(check_admissible(&t, t.valid_until), Ok(()));
        assert_eq!(
            check_admissible(&t, t.valid_from - Duration::seconds(1)),
            Err(GateRejection::NotYetValid(t.valid_from))
        );
        assert_eq!(
            check_admissible(&t, t.valid_until + Duration::seconds(1)),
            Err(GateRejection::Expired(t.valid_until))
        );
    }

    #[test]
    fn test_voided_tickets_are_revoked() {
        for status in [TicketStatus::Cancelled, TicketStatus::Refunded] {
            let t = ticket(status);
            assert_eq!(check_admissible(&t, t.valid_from), Err(GateRejection::TicketRevoked));
        }
    }

    #[test]
    fn test_used_ticket_reports_first_gate() {
        let mut t = ticket(TicketStatus::Used);
        let first_scan = t.valid_from + Duration::minutes(45);
        t.used_at = Some(first_scan);
        t.used_gate = Some("A1".to_string());

        assert_eq!(
            check_admissible(&t, first_scan + Duration::minutes(1)),
            Err(GateRejection::AlreadyUsed {
                used_at: first_scan,
                gate: "A1".to_string()
            })
        );
    }
}
