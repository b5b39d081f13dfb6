use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Credits granted to a freshly opened account.
pub const DEFAULT_STARTING_CREDITS: i32 = 3;

/// A user's billing-relevant state. Identity and profile live in the auth subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserAccount {
    pub id: Uuid,
    pub country_code: Option<String>,
    pub credits_remaining: i32,
    /// Credits held by accepted-but-unfinished generations.
    pub credits_reserved: i32,
    pub subscription_active_until: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Which tier a user is metered on at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum Entitlement {
    /// Active subscription or trial: generations are not metered.
    Unlimited,
    /// Metered against the balance; `available` excludes reserved credits.
    Credits { available: i32 },
}

impl UserAccount {
    pub fn available_credits(&self) -> i32 {
        (self.credits_remaining - self.credits_reserved).max(0)
    }

    pub fn has_active_subscription(&self, now: DateTime<Utc>) -> bool {
        self.subscription_active_until.is_some_and(|until| until > now)
    }

    /// Trial windows are time-bounded; always evaluate against the current clock.
    pub fn trial_active(&self, now: DateTime<Utc>) -> bool {
        self.trial_ends_at.is_some_and(|ends| ends > now)
    }

    pub fn entitlement(&self, now: DateTime<Utc>) -> Entitlement {
        if self.has_active_subscription(now) || self.trial_active(now) {
            Entitlement::Unlimited
        } else {
            Entitlement::Credits {
                available: self.available_credits(),
            }
        }
    }

    pub fn can_generate(&self, now: DateTime<Utc>) -> bool {
        match self.entitlement(now) {
            Entitlement::Unlimited => true,
            Entitlement::Credits { available } => available > 0,
        }
    }
}
