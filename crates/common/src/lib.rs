//! Identifier types shared across the storefront checkout crates.

mod types;

pub use types::{OrderId, OrderItemId, PetId, ProductId, SubscriptionId, UserId};
