mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{harness, visit_date, SLOT_CAPACITY};
use parkpass_server::models::{
    BookingChanges, BookingStatus, PaymentMethod, PaymentOutcome, PaymentStatus,
};
use parkpass_server::utils::error::AppError;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_never_overbook() {
    let h = Arc::new(harness().await);

    // 25 parties of two race for a slot of ten
    let attempts: Vec<_> = (0..25)
        .map(|_| {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                h.services
                    .bookings()
                    .create(h.user_id, h.request(2, 0))
                    .await
            })
        })
        .collect();

    let mut booked = 0;
    let mut full = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => booked += 1,
            Err(AppError::Capacity) => full += 1,
            Err(other) => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(booked, SLOT_CAPACITY / 2);
    assert_eq!(full, 25 - SLOT_CAPACITY / 2);

    let slots = h
        .services
        .availability()
        .slots(h.park.id, visit_date())
        .await
        .unwrap();
    assert_eq!(slots[0].capacity_reserved, SLOT_CAPACITY);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancellations_and_bookings_interleave_safely() {
    let h = Arc::new(harness().await);
    let mut existing = Vec::new();
    for _ in 0..5 {
        existing.push(h.book(2, 0).await);
    }

    let cancels: Vec<_> = existing
        .iter()
        .map(|booking| {
            let h = Arc::clone(&h);
            let id = booking.id;
            tokio::spawn(async move { h.services.bookings().cancel(id).await.map(|_| ()) })
        })
        .collect();
    let creates: Vec<_> = (0..5)
        .map(|_| {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                h.services
                    .bookings()
                    .create(h.user_id, h.request(2, 0))
                    .await
                    .map(|_| ())
            })
        })
        .collect();

    for task in cancels {
        task.await.unwrap().unwrap();
    }
    let mut created = 0;
    for task in creates {
        if task.await.unwrap().is_ok() {
            created += 1;
        }
    }

    let slots = h
        .services
        .availability()
        .slots(h.park.id, visit_date())
        .await
        .unwrap();
    assert_eq!(slots[0].capacity_reserved, created * 2);
    assert!(slots[0].capacity_reserved <= SLOT_CAPACITY);
}

#[tokio::test]
async fn test_reschedule_into_full_slot_keeps_original() {
    let h = harness().await;
    let mut blocker = h.request(SLOT_CAPACITY, 0);
    blocker.slot_start = common::hm(12, 0);
    h.services
        .bookings()
        .create(h.user_id, blocker)
        .await
        .unwrap();
    let booking = h.book(2, 0).await;

    let err = h
        .services
        .bookings()
        .modify(
            booking.id,
            BookingChanges {
                slot_start: Some(common::hm(12, 0)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Capacity));

    let unchanged = h.services.bookings().get(booking.id).await.unwrap();
    assert_eq!(unchanged.slot_start, common::hm(10, 0));
    let slots = h
        .services
        .availability()
        .slots(h.park.id, visit_date())
        .await
        .unwrap();
    assert_eq!(slots[0].capacity_reserved, 2);
    assert_eq!(slots[1].capacity_reserved, SLOT_CAPACITY);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_webhook_deliveries_capture_once() {
    let h = Arc::new(harness().await);
    let booking = h.book(2, 1).await;
    let payment = h
        .services
        .payments()
        .initiate(booking.id, PaymentMethod::Card, booking.total_cost)
        .await
        .unwrap();
    let transaction_id = payment.provider_transaction_id.clone().unwrap();

    let deliveries: Vec<_> = (0..8)
        .map(|_| {
            let h = Arc::clone(&h);
            let transaction_id = transaction_id.clone();
            tokio::spawn(async move {
                h.services
                    .payments()
                    .reconcile(&transaction_id, PaymentOutcome::Succeeded)
                    .await
            })
        })
        .collect();

    let mut captured_at = HashSet::new();
    for delivery in deliveries {
        let payment = delivery.await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        captured_at.insert(payment.captured_at);
    }
    assert_eq!(captured_at.len(), 1, "one capture");

    let payments = h.services.payments().for_booking(booking.id).await.unwrap();
    assert_eq!(payments.len(), 1);
    let tickets = h.services.tickets().for_booking(booking.id).await.unwrap();
    assert_eq!(tickets.len(), 3);
    let bundles: HashSet<_> = tickets.iter().map(|t| t.bundle_id).collect();
    assert_eq!(bundles.len(), 1, "one bundle");
    assert_eq!(
        h.services.bookings().get(booking.id).await.unwrap().status,
        BookingStatus::Confirmed
    );
}
