//! Periodic housekeeping: abandoned pending bookings and stale tickets.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Bookings, Context, Services};
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub cancelled_bookings: usize,
    pub expired_tickets: u64,
}

pub struct Maintenance<'a> {
    pub(crate) ctx: &'a Arc<Context>,
}

impl Maintenance<'_> {
    pub async fn run_once(&self) -> AppResult<SweepReport> {
        let now = self.ctx.clock.now();
        let mut report = SweepReport::default();

        if let Some(ttl) = self.ctx.config.booking.pending_ttl {
            let stale = self
                .ctx
                .store
                .pending_bookings_created_before(now - ttl)
                .await?;
            let bookings = Bookings { ctx: self.ctx };

            for booking in stale {
                let payments = self.ctx.store.payments_for_booking(booking.id).await?;
                if payments
                    .iter()
                    .any(|p| p.status.is_open() || p.status.is_captured())
                {
                    continue;
                }

                match bookings.cancel(booking.id).await {
                    Ok(_) => report.cancelled_bookings += 1,
                    Err(AppError::InvalidTransition { .. } | AppError::Conflict(_)) => {
                        debug!(booking_id = %booking.id, "Pending booking moved on before sweep")
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        report.expired_tickets = self.ctx.store.expire_tickets(now).await?;

        if report != SweepReport::default() {
            info!(
                cancelled_bookings = report.cancelled_bookings,
                expired_tickets = report.expired_tickets,
                "Maintenance sweep finished"
            );
        }
        Ok(report)
    }
}

/// Runs the sweep every `interval` until the task is aborted.
pub fn spawn(services: Services, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match services.maintenance().run_once().await {
                Ok(_) => {}
                Err(AppError::Store(e)) => error!(error = %e, "Maintenance sweep failed"),
                Err(e) => warn!(error = %e, "Maintenance sweep stopped early"),
            }
        }
    })
}
