pub mod user;
pub mod event;
pub mod ticket_type;
pub mod payment_intent;
pub mod ticket;

pub use user::{BuyerIdentity, GuestContact, User, UserRole};
pub use event::{Event, EventStatus};
pub use ticket_type::TicketType;
pub use payment_intent::{IntentStatus, PaymentIntent};
pub use ticket::{Ticket, TicketStatus};
