//! Axum route handlers for accounts, balances and billing settlements.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::{Entitlement, UserAccount};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub user_id: Uuid,
    pub country_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreditsResponse {
    pub user_id: Uuid,
    pub credits_remaining: i32,
    pub credits_reserved: i32,
    pub available: i32,
    pub entitlement: Entitlement,
    pub can_generate: bool,
    pub subscription_active_until: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
}

impl CreditsResponse {
    fn from_account(account: &UserAccount, now: DateTime<Utc>) -> Self {
        Self {
            user_id: account.id,
            credits_remaining: account.credits_remaining,
            credits_reserved: account.credits_reserved,
            available: account.available_credits(),
            entitlement: account.entitlement(now),
            can_generate: account.can_generate(now),
            subscription_active_until: account.subscription_active_until,
            trial_ends_at: account.trial_ends_at,
        }
    }
}

/// Events delivered by the billing gateway once a payment has settled.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SettlementEvent {
    CreditsPurchased {
        user_id: Uuid,
        credits: i32,
    },
    SubscriptionUpdated {
        user_id: Uuid,
        active_until: Option<DateTime<Utc>>,
    },
    TrialStarted {
        user_id: Uuid,
        ends_at: DateTime<Utc>,
    },
}

/// POST /api/v1/users
///
/// Opens the account shell for an identity owned by the auth subsystem.
/// Idempotent: an existing account is returned unchanged.
pub async fn handle_create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<CreditsResponse>), AppError> {
    let country_code = request
        .country_code
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty());
    if country_code.as_deref().is_some_and(|c| c.len() != 2) {
        return Err(AppError::Validation(
            "country_code must be a two-letter code".to_string(),
        ));
    }

    let account = state
        .ledger
        .open_account(request.user_id, country_code)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreditsResponse::from_account(&account, Utc::now())),
    ))
}

/// GET /api/v1/users/:id/credits
pub async fn handle_get_credits(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<CreditsResponse>, AppError> {
    let account = state
        .ledger
        .account(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {user_id}")))?;
    Ok(Json(CreditsResponse::from_account(&account, Utc::now())))
}

/// POST /api/v1/billing/settlements
pub async fn handle_settlement(
    State(state): State<AppState>,
    Json(event): Json<SettlementEvent>,
) -> Result<Json<CreditsResponse>, AppError> {
    let account = match event {
        SettlementEvent::CreditsPurchased { user_id, credits } => {
            info!("Adding {credits} purchased credits to {user_id}");
            state.ledger.add_credits(user_id, credits).await?
        }
        SettlementEvent::SubscriptionUpdated {
            user_id,
            active_until,
        } => {
            info!("Subscription for {user_id} now active until {active_until:?}");
            state.ledger.set_subscription(user_id, active_until).await?
        }
        SettlementEvent::TrialStarted { user_id, ends_at } => {
            info!("Trial for {user_id} ends at {ends_at}");
            state.ledger.start_trial(user_id, ends_at).await?
        }
    };
    Ok(Json(CreditsResponse::from_account(&account, Utc::now())))
}
