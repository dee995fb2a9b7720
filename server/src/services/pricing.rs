use rust_decimal::Decimal;

use crate::models::{Money, TicketType};

/// Per-guest prices for one booking, fixed when the booking is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestPrices {
    pub adult: Money,
    pub child: Money,
}

impl GuestPrices {
    pub fn new(adult_price: Money, child_discount_percent: Decimal) -> Self {
        Self {
            adult: adult_price,
            child: adult_price.discounted(child_discount_percent),
        }
    }

    pub fn for_type(&self, ticket_type: TicketType) -> Money {
        match ticket_type {
            TicketType::Adult => self.adult,
            TicketType::Child => self.child,
        }
    }

    /// `None` if the total does not fit in a [`Money`].
    pub fn total(&self, adult_count: i32, child_count: i32) -> Option<Money> {
        self.adult
            .checked_mul(adult_count)?
            .checked_add(self.child.checked_mul(child_count)?)
    }
}

/// Ticket types for a party, adults first.
pub fn guest_types(adult_count: i32, child_count: i32) -> impl Iterator<Item = TicketType> {
    let adults = std::iter::repeat(TicketType::Adult).take(adult_count.max(0) as usize);
    let children = std::iter::repeat(TicketType::Child).take(child_count.max(0) as usize);
    adults.chain(children)
}
