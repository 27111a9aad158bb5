use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::dtos::AccountResponse;
use crate::middleware::UserContext;
use crate::models::{CoinTransaction, UnlockRecord};
use crate::startup::AppState;

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn get_account(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<AccountResponse>, AppError> {
    let account = state.coins.account(&user.user_id).await?;
    Ok(Json(account.into()))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn list_transactions(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<Vec<CoinTransaction>>, AppError> {
    let transactions = state.coins.list_transactions(&user.user_id).await?;
    Ok(Json(transactions))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn list_unlocks(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<Vec<UnlockRecord>>, AppError> {
    let unlocks = state.unlocks.list_unlocked_chapters(&user.user_id).await?;
    Ok(Json(unlocks))
}
