//! Domain layer for the storefront checkout system.
//!
//! This crate provides:
//! - `Money` and the order, line item, subscription and cart types
//! - The `OrderStatus` and `SubscriptionStatus` state machines
//! - `OrderRepository` and `CartRepository` with in-memory and PostgreSQL
//!   implementations

pub mod cart;
pub mod error;
pub mod memory;
pub mod money;
pub mod order;
pub mod postgres;
pub mod repository;
pub mod subscription;

pub use cart::CartLine;
pub use common::{OrderId, OrderItemId, PetId, ProductId, SubscriptionId, UserId};
pub use error::{DomainError, Result};
pub use memory::{InMemoryCartRepository, InMemoryOrderRepository};
pub use money::Money;
pub use order::{LineItemKind, Order, OrderItem, OrderStatus, SubscriptionPlan};
pub use postgres::{PostgresCartRepository, PostgresOrderRepository};
pub use repository::{CartRepository, OrderRepository, Transition};
pub use subscription::{PlanType, Subscription, SubscriptionOrigin, SubscriptionStatus};
