mod common;

use chrono::Duration;

use common::{harness, hm, visit_date, SLOT_CAPACITY};
use parkpass_server::collaborators::NotificationEvent;
use parkpass_server::models::{BookingChanges, BookingStatus, Money, TicketStatus};
use parkpass_server::utils::error::AppError;

#[tokio::test]
async fn test_family_booking_is_priced_per_guest() {
    let h = harness().await;
    let booking = h.book(2, 1).await;

    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.adult_price, Money::new(300));
    assert_eq!(booking.child_price, Money::new(150));
    assert_eq!(booking.total_cost, Money::new(750));
    assert_eq!(booking.slot_end, hm(12, 0));
    assert_eq!(booking.contact.phone, "+77012345678");
    assert_eq!(booking.contact.email.as_deref(), Some("aida@example.com"));

    let slots = h
        .services
        .availability()
        .slots(h.park.id, visit_date())
        .await
        .unwrap();
    assert_eq!(slots[0].capacity_reserved, 3);
    assert!(slots[0].available);
}

#[tokio::test]
async fn test_unaccompanied_children_are_rejected() {
    let h = harness().await;
    let err = h
        .services
        .bookings()
        .create(h.user_id, h.request(0, 2))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation { field: "adult_count", .. }));
}

#[tokio::test]
async fn test_phone_must_match_park_country() {
    let h = harness().await;
    let mut request = h.request(1, 0);
    request.contact.phone = "+998 90 123 45 67".to_string();

    let err = h
        .services
        .bookings()
        .create(h.user_id, request)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { field: "contact.phone", .. }));
}

#[tokio::test]
async fn test_full_slot_fails_without_writing() {
    let h = harness().await;
    h.book(SLOT_CAPACITY, 0).await;

    let err = h
        .services
        .bookings()
        .create(h.user_id, h.request(1, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Capacity));

    let slots = h
        .services
        .availability()
        .slots(h.park.id, visit_date())
        .await
        .unwrap();
    assert_eq!(slots[0].capacity_reserved, SLOT_CAPACITY);
    assert!(!slots[0].available);
    assert!(slots[1].available);
}

#[tokio::test]
async fn test_slot_inside_lead_time_is_too_soon() {
    let h = harness().await;
    h.clock.set(visit_date().and_time(hm(9, 30)).and_utc());

    let err = h
        .services
        .bookings()
        .create(h.user_id, h.request(1, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SlotTooSoon { lead_minutes: 60 }));

    let slots = h
        .services
        .availability()
        .slots(h.park.id, visit_date())
        .await
        .unwrap();
    assert!(!slots[0].available, "10:00 starts within the lead time");
    assert!(slots[1].available);
}

#[tokio::test]
async fn test_reschedule_moves_reserved_capacity() {
    let h = harness().await;
    let booking = h.book(2, 1).await;

    let moved = h
        .services
        .bookings()
        .modify(
            booking.id,
            BookingChanges {
                slot_start: Some(hm(14, 0)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(moved.slot_start, hm(14, 0));
    assert_eq!(moved.slot_end, hm(16, 0));
    assert_eq!(moved.total_cost, booking.total_cost);

    let slots = h
        .services
        .availability()
        .slots(h.park.id, visit_date())
        .await
        .unwrap();
    let reserved: Vec<i32> = slots.iter().map(|s| s.capacity_reserved).collect();
    assert_eq!(reserved, vec![0, 0, 3, 0, 0]);
}

#[tokio::test]
async fn test_modification_closes_before_visit() {
    let h = harness().await;
    let booking = h.book(1, 0).await;
    h.clock
        .set(booking.visit_starts_at() - Duration::hours(23));

    let err = h
        .services
        .bookings()
        .modify(
            booking.id,
            BookingChanges {
                slot_start: Some(hm(12, 0)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ModificationWindowClosed));
}

#[tokio::test]
async fn test_confirmed_booking_cannot_be_modified() {
    let h = harness().await;
    let booking = h.book(1, 0).await;
    h.services.bookings().confirm(booking.id).await.unwrap();

    let mut contact = common::contact();
    contact.name = "Someone Else".to_string();
    let err = h
        .services
        .bookings()
        .modify(
            booking.id,
            BookingChanges {
                contact: Some(contact),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ModificationWindowClosed));
}

#[tokio::test]
async fn test_cancel_is_idempotent_and_releases_capacity() {
    let h = harness().await;
    let booking = h.book(2, 1).await;
    let bookings = h.services.bookings();

    let first = bookings.cancel(booking.id).await.unwrap();
    let second = bookings.cancel(booking.id).await.unwrap();

    assert_eq!(first.status, BookingStatus::Cancelled);
    assert!(first.cancelled_at.is_some());
    assert_eq!(second.cancelled_at, first.cancelled_at);

    let slots = h
        .services
        .availability()
        .slots(h.park.id, visit_date())
        .await
        .unwrap();
    assert_eq!(slots[0].capacity_reserved, 0, "released exactly once");
}

#[tokio::test]
async fn test_cancel_voids_issued_tickets() {
    let h = harness().await;
    let booking = h.book(2, 0).await;
    h.pay(&booking).await;

    h.services.bookings().cancel(booking.id).await.unwrap();

    let tickets = h.services.tickets().for_booking(booking.id).await.unwrap();
    assert_eq!(tickets.len(), 2);
    assert!(tickets.iter().all(|t| t.status == TicketStatus::Cancelled));
}

#[tokio::test]
async fn test_completed_booking_cannot_be_cancelled() {
    let h = harness().await;
    let booking = h.book(1, 0).await;
    let bookings = h.services.bookings();
    bookings.confirm(booking.id).await.unwrap();
    h.clock.set(booking.visit_ends_at());
    bookings.complete(booking.id).await.unwrap();

    let err = bookings.cancel(booking.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_complete_waits_for_visit_to_end() {
    let h = harness().await;
    let booking = h.book(1, 0).await;
    let bookings = h.services.bookings();
    bookings.confirm(booking.id).await.unwrap();

    h.clock.set(booking.visit_ends_at() - Duration::minutes(1));
    assert!(matches!(
        bookings.complete(booking.id).await.unwrap_err(),
        AppError::VisitNotOver
    ));

    h.clock.advance(Duration::minutes(1));
    let completed = bookings.complete(booking.id).await.unwrap();
    assert_eq!(completed.status, BookingStatus::Completed);
}

#[tokio::test]
async fn test_pending_booking_cannot_complete() {
    let h = harness().await;
    let booking = h.book(1, 0).await;
    h.clock.set(booking.visit_ends_at());

    let err = h.services.bookings().complete(booking.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_reject_requires_reason_and_frees_slot() {
    let h = harness().await;
    let booking = h.book(3, 0).await;
    let bookings = h.services.bookings();

    assert!(matches!(
        bookings.reject(booking.id, "  ").await.unwrap_err(),
        AppError::Validation { field: "reason", .. }
    ));

    let rejected = bookings.reject(booking.id, "park closed for event").await.unwrap();
    assert_eq!(rejected.status, BookingStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("park closed for event"));

    let slots = h
        .services
        .availability()
        .slots(h.park.id, visit_date())
        .await
        .unwrap();
    assert_eq!(slots[0].capacity_reserved, 0);

    assert!(matches!(
        bookings.confirm(booking.id).await.unwrap_err(),
        AppError::InvalidTransition { .. }
    ));
}

#[tokio::test]
async fn test_lifecycle_events_are_notified() {
    let h = harness().await;
    let booking = h.book(1, 0).await;
    h.services.bookings().cancel(booking.id).await.unwrap();

    common::eventually(|| h.notifier.events().len() >= 2).await;
    let events = h.notifier.events();
    assert!(events.contains(&NotificationEvent::BookingCreated));
    assert!(events.contains(&NotificationEvent::BookingCancelled));
}
