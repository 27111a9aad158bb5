use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{CoinPurchaseResponse, CreateCoinInvoiceRequest, CreditCoinsRequest};
use crate::middleware::UserContext;
use crate::services::payment::Invoice;
use crate::startup::AppState;

/// Credit coins for a payment the payment backend already captured.
/// Mounted on the internal router only. A replayed provider reference
/// answers 200 with the original entry instead of 201.
#[tracing::instrument(skip(state, request), fields(user_id = %request.user_id))]
pub async fn credit_coins(
    State(state): State<AppState>,
    Json(request): Json<CreditCoinsRequest>,
) -> Result<(StatusCode, Json<CoinPurchaseResponse>), AppError> {
    request.validate()?;

    let receipt = state
        .coins
        .purchase_coins(
            &request.user_id,
            request.amount,
            Some(request.provider_reference.as_str()),
        )
        .await?;

    let status = if receipt.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(receipt.into())))
}

#[tracing::instrument(skip(state, request), fields(user_id = %user.user_id))]
pub async fn create_invoice(
    State(state): State<AppState>,
    user: UserContext,
    Json(request): Json<CreateCoinInvoiceRequest>,
) -> Result<(StatusCode, Json<Invoice>), AppError> {
    request.validate()?;

    let invoice = state
        .coins
        .create_coin_invoice(&user.user_id, request.amount)
        .await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

/// Redeem a paid top-up invoice. The invoice decides how many coins.
#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn confirm_invoice(
    State(state): State<AppState>,
    user: UserContext,
    Path(invoice_id): Path<String>,
) -> Result<Json<CoinPurchaseResponse>, AppError> {
    let receipt = state
        .coins
        .confirm_coin_invoice(&user.user_id, &invoice_id)
        .await?;
    Ok(Json(receipt.into()))
}
