//! Order domain types
//!
//! Orders are created once by checkout and then mutated only through the
//! engine's guarded transition path. Line items are immutable after
//! creation; partial returns are recorded as separate [`OrderReturn`]
//! records rather than edits to history.

pub mod types;

pub use types::{
    Actor, CancelledBy, DeliveryMethod, GuestContact, Order, OrderItem, OrderReturn, OrderStatus,
    PaymentMethod, ReturnItem,
};
