//! Subscriptions created from subscription-plan line items.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{
    Money, OrderId, OrderItemId, PetId, SubscriptionId, SubscriptionPlan, UserId,
};

/// Billing period of a subscription plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Weekly,
    Monthly,
    Quarterly,
}

impl PlanType {
    /// Length of one period in days.
    pub fn period_days(&self) -> u32 {
        match self {
            PlanType::Weekly => 7,
            PlanType::Monthly => 30,
            PlanType::Quarterly => 90,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Weekly => "weekly",
            PlanType::Monthly => "monthly",
            PlanType::Quarterly => "quarterly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "weekly" => Some(PlanType::Weekly),
            "monthly" => Some(PlanType::Monthly),
            "quarterly" => Some(PlanType::Quarterly),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a subscription.
///
/// ```text
/// Pending ──┬──► Active ◄──► Paused
///           │      │
///           │      ├──► Expired
///           └──────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created at checkout, parent order not paid yet.
    #[default]
    Pending,
    Active,
    Expired,
    Cancelled,
    Paused,
}

impl SubscriptionStatus {
    /// Returns true if the transition `self -> to` is allowed.
    pub fn can_transition_to(&self, to: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, to),
            (Pending, Active)
                | (Pending, Cancelled)
                | (Active, Paused)
                | (Active, Expired)
                | (Active, Cancelled)
                | (Paused, Active)
                | (Paused, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Paused => "paused",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SubscriptionStatus::Pending),
            "active" => Some(SubscriptionStatus::Active),
            "expired" => Some(SubscriptionStatus::Expired),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            "paused" => Some(SubscriptionStatus::Paused),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recurring delivery plan bought through an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub pet_id: PetId,
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    pub plan_type: PlanType,
    pub status: SubscriptionStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub next_delivery_date: NaiveDate,
    pub daily_grams: u32,
    pub pouches_per_day: u32,
    pub total_pouches: u32,
    pub price_per_period: Money,
}

/// Where a pending subscription comes from.
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionOrigin {
    pub user_id: UserId,
    pub pet_id: PetId,
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
}

impl Subscription {
    /// Builds a pending subscription starting on `start_date`.
    ///
    /// The end date is one plan period after the start; the first delivery
    /// is scheduled for the day after the start.
    pub fn pending(
        origin: SubscriptionOrigin,
        plan: &SubscriptionPlan,
        price_per_period: Money,
        start_date: NaiveDate,
    ) -> Self {
        let period = plan.plan_type.period_days();
        Self {
            id: SubscriptionId::new(),
            user_id: origin.user_id,
            pet_id: origin.pet_id,
            order_id: origin.order_id,
            order_item_id: origin.order_item_id,
            plan_type: plan.plan_type,
            status: SubscriptionStatus::Pending,
            start_date,
            end_date: add_days(start_date, period),
            next_delivery_date: add_days(start_date, 1),
            daily_grams: plan.daily_grams,
            pouches_per_day: plan.pouches_per_day,
            total_pouches: plan.pouches_per_day.saturating_mul(period),
            price_per_period,
        }
    }
}

fn add_days(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_add_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(plan_type: PlanType) -> SubscriptionPlan {
        SubscriptionPlan {
            plan_type,
            pet_id: None,
            daily_grams: 180,
            pouches_per_day: 2,
        }
    }

    fn origin() -> SubscriptionOrigin {
        SubscriptionOrigin {
            user_id: UserId::new(),
            pet_id: PetId::new(),
            order_id: OrderId::new(),
            order_item_id: OrderItemId::new(),
        }
    }

    #[test]
    fn test_period_days() {
        assert_eq!(PlanType::Weekly.period_days(), 7);
        assert_eq!(PlanType::Monthly.period_days(), 30);
        assert_eq!(PlanType::Quarterly.period_days(), 90);
    }

    #[test]
    fn test_monthly_subscription_dates() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        let sub = Subscription::pending(
            origin(),
            &plan(PlanType::Monthly),
            Money::from_cents(4500),
            start,
        );

        assert_eq!(sub.status, SubscriptionStatus::Pending);
        assert_eq!(sub.start_date, start);
        assert_eq!(sub.end_date, NaiveDate::from_ymd_opt(2026, 2, 14).unwrap());
        assert_eq!(
            sub.next_delivery_date,
            NaiveDate::from_ymd_opt(2026, 1, 16).unwrap()
        );
        assert_eq!(sub.total_pouches, 60);
    }

    #[test]
    fn test_weekly_and_quarterly_end_dates() {
        let start = NaiveDate::from_ymd_opt(2026, 12, 30).unwrap();
        let weekly =
            Subscription::pending(origin(), &plan(PlanType::Weekly), Money::zero(), start);
        let quarterly =
            Subscription::pending(origin(), &plan(PlanType::Quarterly), Money::zero(), start);

        assert_eq!(weekly.end_date, NaiveDate::from_ymd_opt(2027, 1, 6).unwrap());
        assert_eq!(
            quarterly.end_date,
            NaiveDate::from_ymd_opt(2027, 3, 30).unwrap()
        );
    }

    #[test]
    fn test_subscription_transitions() {
        use SubscriptionStatus::*;
        assert!(Pending.can_transition_to(Active));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));
        assert!(!Expired.can_transition_to(Active));
        assert!(!Active.can_transition_to(Pending));
    }

    #[test]
    fn test_plan_type_parse() {
        assert_eq!(PlanType::parse("quarterly"), Some(PlanType::Quarterly));
        assert_eq!(PlanType::parse("yearly"), None);
    }
}
