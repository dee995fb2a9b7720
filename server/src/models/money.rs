use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Mul, Sub};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// An amount of currency in its minor unit.
///
/// Fee and discount math goes through [`Decimal`] and is rounded back to a
/// whole minor unit, so no floating point value ever touches a balance.
/// Arithmetic saturates at the `i64` bounds instead of wrapping.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn new(minor_units: i64) -> Self {
        Self(minor_units)
    }

    pub const fn minor_units(self) -> i64 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }

    pub fn checked_mul(self, rhs: i32) -> Option<Money> {
        self.0.checked_mul(i64::from(rhs)).map(Money)
    }

    /// `percent` of this amount, rounded half away from zero.
    pub fn percent(self, percent: Decimal) -> Money {
        let scaled = Decimal::from(self.0) * percent / Decimal::ONE_HUNDRED;
        Money(saturating_i64(
            scaled.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero),
        ))
    }

    /// This amount with `percent` taken off, rounded to the minor unit.
    pub fn discounted(self, percent: Decimal) -> Money {
        self - self.percent(percent)
    }

    /// `floor(amount * factor)` as a plain integer, used for point accrual.
    pub fn scale_floor(self, factor: Decimal) -> i64 {
        saturating_i64((Decimal::from(self.0) * factor).floor())
    }
}

fn saturating_i64(value: Decimal) -> i64 {
    value.to_i64().unwrap_or(if value.is_sign_negative() {
        i64::MIN
    } else {
        i64::MAX
    })
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0.saturating_sub(rhs.0))
    }
}

impl Mul<i32> for Money {
    type Output = Money;

    fn mul(self, rhs: i32) -> Money {
        Money(self.0.saturating_mul(i64::from(rhs)))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_rounds_half_away_from_zero() {
        assert_eq!(Money::new(750).percent(Decimal::new(25, 1)), Money::new(19));
        assert_eq!(Money::new(750).percent(Decimal::new(15, 1)), Money::new(11));
        assert_eq!(Money::new(750).percent(Decimal::ZERO), Money::ZERO);
    }

    #[test]
    fn test_discounted_child_price() {
        assert_eq!(Money::new(300).discounted(Decimal::from(50)), Money::new(150));
        assert_eq!(Money::new(301).discounted(Decimal::from(50)), Money::new(150));
    }

    #[test]
    fn test_scale_floor_truncates() {
        assert_eq!(Money::new(755).scale_floor(Decimal::new(1, 1)), 75);
        assert_eq!(Money::new(9).scale_floor(Decimal::new(1, 1)), 0);
    }

    #[test]
    fn test_overflow_saturates() {
        let max = Money::new(i64::MAX);
        assert_eq!(max + Money::new(1), max);
        assert_eq!(Money::new(i64::MIN) - Money::new(1), Money::new(i64::MIN));
        assert_eq!(max * 2, max);
        assert_eq!(max.checked_add(Money::new(1)), None);
        assert_eq!(Money::new(5).checked_sub(Money::new(2)), Some(Money::new(3)));
        assert_eq!(max.scale_floor(Decimal::from(10)), i64::MAX);
        assert_eq!(max.percent(Decimal::from(200)), max);
    }

    #[test]
    fn test_sum_and_mul() {
        let total: Money = [Money::new(300) * 2, Money::new(150)].into_iter().sum();
        assert_eq!(total, Money::new(750));
    }
}
