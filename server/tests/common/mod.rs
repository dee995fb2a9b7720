//! Shared setup for integration tests: an in-memory store, a fixed clock
//! and one park open 10:00-20:00 in two-hour slots of ten guests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::Value;
use uuid::Uuid;

use parkpass_server::clock::FixedClock;
use parkpass_server::collaborators::{
    NotificationEvent, Notifier, NotifyError, PaymentProvider, SimulatedProvider,
};
use parkpass_server::config::Config;
use parkpass_server::models::{
    Booking, ContactInfo, LoyaltyAccount, Money, NewBooking, Park, Payment, PaymentMethod,
    PaymentOutcome,
};
use parkpass_server::services::Services;
use parkpass_server::store::{MemoryStore, Store};

pub const SLOT_CAPACITY: i32 = 10;

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Uuid, NotificationEvent, Value)>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.sent.lock().unwrap().iter().map(|(_, e, _)| *e).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        user_id: Uuid,
        event: NotificationEvent,
        payload: Value,
    ) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push((user_id, event, payload));
        Ok(())
    }
}

pub struct Harness {
    pub services: Services,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub config: Arc<Config>,
    pub park: Park,
    pub user_id: Uuid,
}

pub fn test_config() -> Config {
    Config::from_lookup(|key| match key {
        "TICKET_SIGNING_KEY" => Some("integration-test-key".to_string()),
        _ => None,
    })
    .unwrap()
}

/// 2026-06-01 08:00 UTC.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()
}

/// Two days after [`start_time`], outside the modification cutoff.
pub fn visit_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 6, 3).unwrap()
}

pub fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

pub async fn harness() -> Harness {
    harness_with(SimulatedProvider::new()).await
}

pub async fn harness_with(provider: impl PaymentProvider + 'static) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(FixedClock::new(start_time()));
    let notifier = Arc::new(RecordingNotifier::default());
    let config = Arc::new(test_config());

    let park = Park {
        id: Uuid::new_v4(),
        name: "Funland Almaty".to_string(),
        country_code: "KZ".to_string(),
        opens_at: hm(10, 0),
        closes_at: hm(20, 0),
        slot_minutes: 120,
        slot_capacity: SLOT_CAPACITY,
        adult_price: Money::new(300),
        created_at: start_time(),
        updated_at: start_time(),
    };
    store.upsert_park(&park).await.unwrap();

    let services = Services::new(
        store.clone(),
        config.clone(),
        clock.clone(),
        notifier.clone(),
        Arc::new(provider),
    );

    Harness {
        services,
        store,
        clock,
        notifier,
        config,
        park,
        user_id: Uuid::new_v4(),
    }
}

pub fn contact() -> ContactInfo {
    ContactInfo {
        name: "Aida Nurlanovna".to_string(),
        phone: "+7 701 234 5678".to_string(),
        email: Some("Aida@Example.com".to_string()),
    }
}

impl Harness {
    pub fn request(&self, adults: i32, children: i32) -> NewBooking {
        NewBooking {
            park_id: self.park.id,
            visit_date: visit_date(),
            slot_start: hm(10, 0),
            adult_count: adults,
            child_count: children,
            contact: contact(),
        }
    }

    pub async fn book(&self, adults: i32, children: i32) -> Booking {
        self.services
            .bookings()
            .create(self.user_id, self.request(adults, children))
            .await
            .unwrap()
    }

    /// Card payment for the full total, settled through the provider callback.
    pub async fn pay(&self, booking: &Booking) -> Payment {
        let payments = self.services.payments();
        let payment = payments
            .initiate(booking.id, PaymentMethod::Card, booking.total_cost)
            .await
            .unwrap();
        let transaction_id = payment.provider_transaction_id.clone().unwrap();
        payments
            .reconcile(&transaction_id, PaymentOutcome::Succeeded)
            .await
            .unwrap()
    }

    /// Waits for background accrual to bring the user's account to `check`.
    pub async fn loyalty_until<F>(&self, check: F) -> LoyaltyAccount
    where
        F: Fn(&LoyaltyAccount) -> bool,
    {
        for _ in 0..200 {
            let account = self.services.loyalty().account(self.user_id).await.unwrap();
            if check(&account) {
                return account;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        panic!("loyalty account never reached the expected state");
    }

    /// Moves the clock to the booked slot's start.
    pub fn arrive(&self, booking: &Booking) {
        self.clock.set(booking.visit_starts_at());
    }
}

/// Polls `check` until it holds; background tasks finish on their own schedule.
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
