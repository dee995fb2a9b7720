mod common;

use std::sync::Arc;

use chrono::Duration;

use common::harness;
use parkpass_server::models::{TicketStatus, TicketType};
use parkpass_server::utils::error::{AppError, GateRejection};

fn rejection(err: AppError) -> GateRejection {
    match err {
        AppError::Gate(rejection) => rejection,
        other => panic!("expected a gate rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ticket_admits_once() {
    let h = harness().await;
    let booking = h.book(2, 1).await;
    h.pay(&booking).await;
    let tickets = h.services.tickets().for_booking(booking.id).await.unwrap();
    assert_eq!(tickets.len(), 3);

    h.arrive(&booking);
    let gate = h.services.gate();
    let admission = gate.validate(&tickets[0].qr_payload, "A1").await.unwrap();
    assert_eq!(admission.ticket_id, tickets[0].id);
    assert_eq!(admission.holder_name, "Aida Nurlanovna");
    assert_eq!(admission.ticket_type, TicketType::Adult);
    assert_eq!(admission.gate_id, "A1");

    h.clock.advance(Duration::minutes(5));
    let second = rejection(gate.validate(&tickets[0].qr_payload, "B2").await.unwrap_err());
    assert_eq!(
        second,
        GateRejection::AlreadyUsed {
            used_at: admission.used_at,
            gate: "A1".to_string()
        }
    );

    let stored = h.services.tickets().for_booking(booking.id).await.unwrap();
    let used = stored.iter().find(|t| t.id == tickets[0].id).unwrap();
    assert_eq!(used.status, TicketStatus::Used);
    assert_eq!(used.used_gate.as_deref(), Some("A1"));
}

#[tokio::test]
async fn test_manual_code_entry_admits() {
    let h = harness().await;
    let booking = h.book(1, 0).await;
    h.pay(&booking).await;
    let ticket = &h.services.tickets().for_booking(booking.id).await.unwrap()[0];

    h.arrive(&booking);
    let typed = ticket.validation_code.to_lowercase();
    let admission = h.services.gate().validate(&typed, "desk").await.unwrap();
    assert_eq!(admission.ticket_id, ticket.id);
}

#[tokio::test]
async fn test_garbage_is_invalid_format() {
    let h = harness().await;
    let gate = h.services.gate();

    for input in ["", "hello", "parkpass://ticket/v1/nope", "https://example.com/ticket"] {
        assert_eq!(
            rejection(gate.validate(input, "A1").await.unwrap_err()),
            GateRejection::InvalidFormat,
            "input {input:?}"
        );
    }
}

#[tokio::test]
async fn test_unknown_code_is_not_found() {
    let h = harness().await;
    assert_eq!(
        rejection(h.services.gate().validate("ABCDEFGH", "A1").await.unwrap_err()),
        GateRejection::TicketNotFound
    );
}

#[tokio::test]
async fn test_edited_payload_is_tampered() {
    let h = harness().await;
    let booking = h.book(1, 1).await;
    h.pay(&booking).await;
    let tickets = h.services.tickets().for_booking(booking.id).await.unwrap();
    let child = tickets
        .iter()
        .find(|t| t.ticket_type == TicketType::Child)
        .unwrap();
    h.arrive(&booking);

    // Claim the child ticket is an adult one
    let forged = child.qr_payload.replace("/child/", "/adult/");
    assert_eq!(
        rejection(h.services.gate().validate(&forged, "A1").await.unwrap_err()),
        GateRejection::TamperedCode
    );

    // Stretch validity by a day
    let until = child.valid_until.timestamp();
    let stretched = child
        .qr_payload
        .replace(&until.to_string(), &(until + 86_400).to_string());
    assert_eq!(
        rejection(h.services.gate().validate(&stretched, "A1").await.unwrap_err()),
        GateRejection::TamperedCode
    );

    let stored = h.services.tickets().for_booking(booking.id).await.unwrap();
    assert!(stored.iter().all(|t| t.status == TicketStatus::Active));
}

#[tokio::test]
async fn test_validity_window() {
    let h = harness().await;
    let booking = h.book(1, 0).await;
    h.pay(&booking).await;
    let ticket = h.services.tickets().for_booking(booking.id).await.unwrap()[0].clone();
    let gate = h.services.gate();

    h.clock
        .set(booking.visit_starts_at() - Duration::minutes(31));
    assert_eq!(
        rejection(gate.validate(&ticket.qr_payload, "A1").await.unwrap_err()),
        GateRejection::NotYetValid(ticket.valid_from)
    );

    h.clock.set(ticket.valid_until + Duration::seconds(1));
    assert_eq!(
        rejection(gate.validate(&ticket.qr_payload, "A1").await.unwrap_err()),
        GateRejection::Expired(ticket.valid_until)
    );

    h.clock.set(booking.visit_starts_at() - Duration::minutes(30));
    assert!(gate.validate(&ticket.qr_payload, "A1").await.is_ok());
}

#[tokio::test]
async fn test_cancelled_booking_tickets_are_revoked() {
    let h = harness().await;
    let booking = h.book(1, 0).await;
    h.pay(&booking).await;
    let ticket = h.services.tickets().for_booking(booking.id).await.unwrap()[0].clone();
    h.services.bookings().cancel(booking.id).await.unwrap();

    h.arrive(&booking);
    assert_eq!(
        rejection(h.services.gate().validate(&ticket.qr_payload, "A1").await.unwrap_err()),
        GateRejection::TicketRevoked
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_scans_admit_exactly_once() {
    let h = Arc::new(harness().await);
    let booking = h.book(1, 0).await;
    h.pay(&booking).await;
    let payload = h.services.tickets().for_booking(booking.id).await.unwrap()[0]
        .qr_payload
        .clone();
    h.arrive(&booking);

    let scans: Vec<_> = (0..16)
        .map(|i| {
            let h = Arc::clone(&h);
            let payload = payload.clone();
            tokio::spawn(async move {
                h.services
                    .gate()
                    .validate(&payload, &format!("gate-{i}"))
                    .await
            })
        })
        .collect();

    let mut admitted = 0;
    let mut already_used = 0;
    for scan in scans {
        match scan.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(AppError::Gate(GateRejection::AlreadyUsed { .. })) => already_used += 1,
            Err(other) => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(admitted, 1);
    assert_eq!(already_used, 15);
}
