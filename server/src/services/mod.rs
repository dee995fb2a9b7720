//! The booking core: availability, bookings, payments, tickets, gate
//! validation and loyalty, all running against a [`Store`].

use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::collaborators::{Dispatcher, Notifier, PaymentProvider};
use crate::config::Config;
use crate::models::{Booking, Park, Payment};
use crate::qr::TicketSigner;
use crate::store::Store;
use crate::utils::error::{AppError, AppResult};

pub mod availability;
pub mod bookings;
pub mod gate;
pub mod loyalty;
pub mod maintenance;
pub mod payments;
pub mod pricing;
pub mod tickets;

pub use availability::Availability;
pub use bookings::Bookings;
pub use gate::Gate;
pub use loyalty::Loyalty;
pub use maintenance::Maintenance;
pub use payments::Payments;
pub use tickets::Tickets;

/// Shared dependencies of every service.
pub(crate) struct Context {
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub events: Dispatcher,
    pub provider: Arc<dyn PaymentProvider>,
    pub signer: TicketSigner,
}

impl Context {
    pub async fn park(&self, id: Uuid) -> AppResult<Park> {
        self.store
            .get_park(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Park '{id}' was not found")))
    }

    pub async fn booking(&self, id: Uuid) -> AppResult<Booking> {
        self.store
            .get_booking(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Booking '{id}' was not found")))
    }

    pub async fn payment(&self, id: Uuid) -> AppResult<Payment> {
        self.store
            .get_payment(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment '{id}' was not found")))
    }
}

/// Entry point to the core. Cheap to clone; every clone shares state.
#[derive(Clone)]
pub struct Services {
    ctx: Arc<Context>,
}

impl Services {
    pub fn new(
        store: Arc<dyn Store>,
        config: Arc<Config>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        provider: Arc<dyn PaymentProvider>,
    ) -> Self {
        let signer = TicketSigner::new(&config.tickets.signing_key);
        Self {
            ctx: Arc::new(Context {
                store,
                config,
                clock,
                events: Dispatcher::new(notifier),
                provider,
                signer,
            }),
        }
    }

    pub fn availability(&self) -> Availability<'_> {
        Availability { ctx: &self.ctx }
    }

    pub fn bookings(&self) -> Bookings<'_> {
        Bookings { ctx: &self.ctx }
    }

    pub fn payments(&self) -> Payments<'_> {
        Payments { ctx: &self.ctx }
    }

    pub fn tickets(&self) -> Tickets<'_> {
        Tickets { ctx: &self.ctx }
    }

    pub fn gate(&self) -> Gate<'_> {
        Gate { ctx: &self.ctx }
    }

    pub fn loyalty(&self) -> Loyalty<'_> {
        Loyalty { ctx: &self.ctx }
    }

    pub fn maintenance(&self) -> Maintenance<'_> {
        Maintenance { ctx: &self.ctx }
    }
}
