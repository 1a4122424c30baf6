//! Caller identity as issued by the upstream identity layer.

use serde::{Deserialize, Serialize};

use crate::UserId;

/// The authenticated caller of a checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub email_verified: bool,
}

impl Identity {
    pub fn verified(user_id: UserId) -> Self {
        Self {
            user_id,
            email_verified: true,
        }
    }

    pub fn unverified(user_id: UserId) -> Self {
        Self {
            user_id,
            email_verified: false,
        }
    }
}
