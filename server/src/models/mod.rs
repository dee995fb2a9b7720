pub mod booking;
pub mod loyalty;
pub mod money;
pub mod park;
pub mod payment;
pub mod ticket;

pub use booking::{Booking, BookingChanges, BookingStatus, ContactInfo, NewBooking};
pub use loyalty::{LoyaltyAccount, LoyaltyAccrual, LoyaltyTier};
pub use money::Money;
pub use park::{Park, SlotKey, TimeSlot};
pub use payment::{Payment, PaymentMethod, PaymentOutcome, PaymentStatus, ProviderCallback};
pub use ticket::{Admission, IssuedBundle, Ticket, TicketBundle, TicketStatus, TicketType};
