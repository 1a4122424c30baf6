//! Tagged line item kinds.

use serde::{Deserialize, Serialize};

use crate::{DomainError, PetId, PlanType, ProductId, Result};

/// Parameters of a subscription plan line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub plan_type: PlanType,
    /// Pet the plan is portioned for; falls back to the checkout's pet.
    #[serde(default)]
    pub pet_id: Option<PetId>,
    pub daily_grams: u32,
    pub pouches_per_day: u32,
}

/// Stored shape of the line `meta` column.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LineMeta {
    Subscription(SubscriptionPlan),
}

/// What a cart or order line refers to.
///
/// Decided once when a cart row is translated into an order line, so
/// downstream code branches on the variant instead of inspecting JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineItemKind {
    /// A catalog product drawn from inventory.
    Physical { product_id: ProductId },

    /// A subscription plan, optionally backed by a catalog product that is
    /// reserved like a physical line.
    SubscriptionPlan {
        product_id: Option<ProductId>,
        plan: SubscriptionPlan,
    },
}

impl LineItemKind {
    /// Interprets a stored line (nullable product id plus raw meta).
    pub fn from_parts(
        product_id: Option<ProductId>,
        meta: Option<&serde_json::Value>,
    ) -> Result<Self> {
        let is_subscription = meta
            .and_then(|m| m.get("type"))
            .and_then(|t| t.as_str())
            == Some("subscription");

        if let Some(meta) = meta.filter(|_| is_subscription) {
            let LineMeta::Subscription(plan) = serde_json::from_value(meta.clone())
                .map_err(|e| DomainError::InvalidLineItem(format!("subscription meta: {e}")))?;
            return Ok(LineItemKind::SubscriptionPlan { product_id, plan });
        }

        match product_id {
            Some(product_id) => Ok(LineItemKind::Physical { product_id }),
            None => Err(DomainError::InvalidLineItem(
                "line has neither a product nor a subscription plan".to_string(),
            )),
        }
    }

    /// Splits the kind back into its stored columns.
    pub fn to_parts(&self) -> Result<(Option<ProductId>, Option<serde_json::Value>)> {
        match self {
            LineItemKind::Physical { product_id } => Ok((Some(product_id.clone()), None)),
            LineItemKind::SubscriptionPlan { product_id, plan } => {
                let meta = serde_json::to_value(LineMeta::Subscription(plan.clone()))?;
                Ok((product_id.clone(), Some(meta)))
            }
        }
    }

    /// The catalog product whose stock this line consumes, if any.
    pub fn stock_product(&self) -> Option<&ProductId> {
        match self {
            LineItemKind::Physical { product_id } => Some(product_id),
            LineItemKind::SubscriptionPlan { product_id, .. } => product_id.as_ref(),
        }
    }

    /// The subscription plan carried by this line, if any.
    pub fn subscription_plan(&self) -> Option<&SubscriptionPlan> {
        match self {
            LineItemKind::Physical { .. } => None,
            LineItemKind::SubscriptionPlan { plan, .. } => Some(plan),
        }
    }
}
