//! Orders, order lines and their status machine.

mod line_item;
mod model;
mod status;

pub use line_item::{LineItemKind, SubscriptionPlan};
pub use model::{Order, OrderItem};
pub use status::OrderStatus;
