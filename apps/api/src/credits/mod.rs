//! Credit ledger: per-user balance, reservations, and entitlement checks.
//!
//! A credit is *reserved* when a metered generation is accepted, *committed*
//! when it succeeds and *released* when it fails or is discarded. Available
//! credits are `credits_remaining - credits_reserved`, so the number of
//! accepted metered requests can never exceed the balance. Every mutation is
//! a single conditional update per user.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::user::UserAccount;
use crate::storage::StoreError;

pub mod handlers;

/// Cost weight of one variation relative to a full generation.
const VARIATION_COST_WEIGHT: f64 = 0.5;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("user {0} not found")]
    UnknownUser(Uuid),

    #[error("insufficient credits")]
    InsufficientCredits,

    #[error("invalid amount: {0}")]
    InvalidAmount(i32),

    #[error("adding {0} credits would overflow the balance")]
    BalanceOverflow(i32),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Store(StoreError::Database(e))
    }
}

/// How an accepted request is metered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reservation {
    /// Subscription or trial at accept time: nothing held.
    Unlimited,
    /// One credit held against the balance.
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChargeOutcome {
    Charged { remaining: i32 },
    /// Unlimited tier: no balance change.
    Waived,
    /// Balance did not cover the cost at charge time; nothing deducted.
    Skipped { available: i32 },
}

/// `max(ceil(count * 0.5), 1)`
pub fn variation_batch_cost(count: u8) -> i32 {
    let weighted = (f64::from(count) * VARIATION_COST_WEIGHT).ceil() as i32;
    weighted.max(1)
}

#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Creates the account with the starting balance, or returns the existing one.
    async fn open_account(
        &self,
        id: Uuid,
        country_code: Option<String>,
    ) -> Result<UserAccount, LedgerError>;

    async fn account(&self, id: Uuid) -> Result<Option<UserAccount>, LedgerError>;

    /// Holds one credit for a metered request. Fails with `InsufficientCredits`
    /// when nothing is available.
    async fn reserve(&self, user_id: Uuid) -> Result<Reservation, LedgerError>;

    /// Turns a held credit into a deduction. If the user has become unlimited
    /// since the reservation, the hold is released instead.
    async fn commit(
        &self,
        user_id: Uuid,
        reservation: Reservation,
    ) -> Result<ChargeOutcome, LedgerError>;

    async fn release(&self, user_id: Uuid, reservation: Reservation) -> Result<(), LedgerError>;

    /// Deducts `cost` once if the available balance covers it. No-op for unlimited users.
    async fn charge_batch(&self, user_id: Uuid, cost: i32) -> Result<ChargeOutcome, LedgerError>;

    async fn add_credits(&self, user_id: Uuid, amount: i32) -> Result<UserAccount, LedgerError>;

    async fn set_subscription(
        &self,
        user_id: Uuid,
        active_until: Option<DateTime<Utc>>,
    ) -> Result<UserAccount, LedgerError>;

    async fn start_trial(
        &self,
        user_id: Uuid,
        ends_at: DateTime<Utc>,
    ) -> Result<UserAccount, LedgerError>;
}
