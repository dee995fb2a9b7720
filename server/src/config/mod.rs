use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use chrono::Duration;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{Money, PaymentMethod};

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEV_SIGNING_KEY: &str = "parkpass-development-signing-key";
const DEV_WEBHOOK_SECRET: &str = "parkpass-development-webhook-secret";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error("{0} must be set in production")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct BookingPolicy {
    /// Minimum time between booking and slot start.
    pub lead_time: Duration,
    /// Modifications close this long before the visit starts.
    pub modification_cutoff: Duration,
    pub max_guests: i32,
    pub child_discount_percent: Decimal,
    /// Unpaid pending bookings older than this are cancelled by the sweeper.
    pub pending_ttl: Option<Duration>,
}

/// Provider fee rates in percent of the charged amount.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    pub card: Decimal,
    pub mobile_wallet: Decimal,
    pub cash: Decimal,
}

impl FeeSchedule {
    pub fn rate_for(&self, method: PaymentMethod) -> Decimal {
        match method {
            PaymentMethod::Card => self.card,
            PaymentMethod::MobileWallet => self.mobile_wallet,
            PaymentMethod::Cash => self.cash,
        }
    }

    pub fn fee_for(&self, method: PaymentMethod, amount: Money) -> Money {
        amount.percent(self.rate_for(method))
    }
}

#[derive(Debug, Clone)]
pub struct TicketPolicy {
    pub signing_key: String,
    pub qr_scheme: String,
    /// Gates open this long before the booked slot.
    pub early_entry: Duration,
}

/// Trust settings for callbacks from the payment provider.
#[derive(Debug, Clone)]
pub struct ProviderPolicy {
    pub webhook_secret: String,
    /// How far a callback's signing time may be from now.
    pub webhook_tolerance: Duration,
}

#[derive(Debug, Clone)]
pub struct LoyaltyPolicy {
    pub points_per_unit: Decimal,
    pub friend_min_spent: Money,
    pub friend_min_visits: i32,
    pub vip_min_spent: Money,
    pub vip_min_visits: i32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub production: bool,
    pub cors_allowed_origins: Vec<String>,
    pub sweep_interval: std::time::Duration,
    pub booking: BookingPolicy,
    pub fees: FeeSchedule,
    pub provider: ProviderPolicy,
    pub tickets: TicketPolicy,
    pub loyalty: LoyaltyPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; unset keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);
        let production = vars
            .raw("RUST_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        let signing_key = vars.secret("TICKET_SIGNING_KEY", production, DEV_SIGNING_KEY)?;
        let webhook_secret =
            vars.secret("PAYMENT_WEBHOOK_SECRET", production, DEV_WEBHOOK_SECRET)?;

        let pending_ttl_minutes: i64 = vars.parse("PENDING_BOOKING_TTL_MINUTES", 120)?;

        Ok(Self {
            database_url: vars.raw("DATABASE_URL").filter(|url| !url.is_empty()),
            bind_addr: vars.parse("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3001)))?,
            production,
            cors_allowed_origins: vars
                .raw("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|| cors::DEFAULT_ALLOWED_ORIGINS.to_string())
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            sweep_interval: std::time::Duration::from_secs(vars.parse("SWEEP_INTERVAL_SECS", 60)?),
            booking: BookingPolicy {
                lead_time: Duration::minutes(vars.parse("BOOKING_LEAD_MINUTES", 60)?),
                modification_cutoff: Duration::hours(vars.parse("MODIFICATION_CUTOFF_HOURS", 24)?),
                max_guests: vars.parse("MAX_GUESTS_PER_BOOKING", 20)?,
                child_discount_percent: vars.percent("CHILD_DISCOUNT_PERCENT", Decimal::from(50))?,
                pending_ttl: (pending_ttl_minutes > 0)
                    .then(|| Duration::minutes(pending_ttl_minutes)),
            },
            fees: FeeSchedule {
                card: vars.percent("FEE_RATE_CARD", Decimal::new(25, 1))?,
                mobile_wallet: vars.percent("FEE_RATE_MOBILE_WALLET", Decimal::new(15, 1))?,
                cash: vars.percent("FEE_RATE_CASH", Decimal::ZERO)?,
            },
            provider: ProviderPolicy {
                webhook_secret,
                webhook_tolerance: Duration::seconds(vars.parse("WEBHOOK_TOLERANCE_SECS", 300)?),
            },
            tickets: TicketPolicy {
                signing_key,
                qr_scheme: vars.raw("QR_SCHEME").unwrap_or_else(|| "parkpass".to_string()),
                early_entry: Duration::minutes(vars.parse("EARLY_ENTRY_MINUTES", 30)?),
            },
            loyalty: LoyaltyPolicy {
                points_per_unit: vars.parse("LOYALTY_POINTS_PER_UNIT", Decimal::new(1, 1))?,
                friend_min_spent: Money::new(vars.parse("LOYALTY_FRIEND_MIN_SPENT", 5_000)?),
                friend_min_visits: vars.parse("LOYALTY_FRIEND_MIN_VISITS", 3)?,
                vip_min_spent: Money::new(vars.parse("LOYALTY_VIP_MIN_SPENT", 20_000)?),
                vip_min_visits: vars.parse("LOYALTY_VIP_MIN_VISITS", 10)?,
            },
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string())
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.raw(key) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value }),
        }
    }

    /// Required in production; development falls back to a fixed value.
    fn secret(
        &self,
        key: &'static str,
        production: bool,
        development: &str,
    ) -> Result<String, ConfigError> {
        match self.raw(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ if production => Err(ConfigError::Missing(key)),
            _ => Ok(development.to_string()),
        }
    }

    fn percent(&self, key: &'static str, default: Decimal) -> Result<Decimal, ConfigError> {
        let value: Decimal = self.parse(key, default)?;
        if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
            return Err(ConfigError::Invalid {
                key,
                value: value.to_string(),
            });
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]).unwrap();
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.bind_addr.port(), 3001);
        assert_eq!(cfg.booking.lead_time, Duration::minutes(60));
        assert_eq!(cfg.booking.modification_cutoff, Duration::hours(24));
        assert_eq!(cfg.booking.pending_ttl, Some(Duration::minutes(120)));
        assert_eq!(cfg.fees.rate_for(PaymentMethod::Card), Decimal::new(25, 1));
        assert_eq!(cfg.tickets.qr_scheme, "parkpass");
    }

    #[test]
    fn test_fee_schedule_scenario() {
        let cfg = config(&[]).unwrap();
        let fee = cfg.fees.fee_for(PaymentMethod::Card, Money::new(750));
        assert_eq!(fee, Money::new(19));
        assert_eq!(cfg.fees.fee_for(PaymentMethod::Cash, Money::new(750)), Money::ZERO);
    }

    #[test]
    fn test_invalid_values_are_reported_with_their_key() {
        match config(&[("BOOKING_LEAD_MINUTES", "soon")]) {
            Err(ConfigError::Invalid { key, .. }) => assert_eq!(key, "BOOKING_LEAD_MINUTES"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(config(&[("FEE_RATE_CARD", "120")]).is_err());
    }

    #[test]
    fn test_production_requires_secrets() {
        assert!(matches!(
            config(&[("RUST_ENV", "production")]),
            Err(ConfigError::Missing("TICKET_SIGNING_KEY"))
        ));
        assert!(matches!(
            config(&[("RUST_ENV", "production"), ("TICKET_SIGNING_KEY", "s3cret")]),
            Err(ConfigError::Missing("PAYMENT_WEBHOOK_SECRET"))
        ));
        let cfg = config(&[
            ("RUST_ENV", "production"),
            ("TICKET_SIGNING_KEY", "s3cret"),
            ("PAYMENT_WEBHOOK_SECRET", "whsec"),
        ])
        .unwrap();
        assert!(cfg.production);
        assert_eq!(cfg.tickets.signing_key, "s3cret");
        assert_eq!(cfg.provider.webhook_secret, "whsec");
        assert_eq!(cfg.provider.webhook_tolerance, Duration::minutes(5));
    }

    #[test]
    fn test_zero_ttl_disables_sweeping() {
        let cfg = config(&[("PENDING_BOOKING_TTL_MINUTES", "0")]).unwrap();
        assert!(cfg.booking.pending_ttl.is_none());
    }
}
