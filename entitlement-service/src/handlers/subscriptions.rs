use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{CreateSubscriptionRequest, PlanResponse};
use crate::middleware::UserContext;
use crate::models::Subscription;
use crate::services::CreatedSubscription;
use crate::startup::AppState;

pub async fn list_plans(State(state): State<AppState>) -> Result<Json<Vec<PlanResponse>>, AppError> {
    let plans = state.subscriptions.list_active_plans().await?;
    let plans = plans
        .into_iter()
        .filter_map(|plan| {
            let plan_id = plan.plan_id.clone();
            let response = PlanResponse::from_plan(plan);
            if response.is_none() {
                tracing::warn!(plan_id = %plan_id, "Plan price out of range, not listed");
            }
            response
        })
        .collect();
    Ok(Json(plans))
}

/// Start a subscription. 201 with the invoice to pay, or 200 when an
/// existing pending subscription for the same plan is returned.
#[tracing::instrument(skip(state, request), fields(user_id = %user.user_id))]
pub async fn create_subscription(
    State(state): State<AppState>,
    user: UserContext,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<CreatedSubscription>), AppError> {
    request.validate()?;

    let created = state
        .subscriptions
        .create_subscription(&user.user_id, &request.plan_id)
        .await?;

    let status = if created.invoice.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(created)))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn list_subscriptions(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<Vec<Subscription>>, AppError> {
    let subscriptions = state.subscriptions.list_subscriptions(&user.user_id).await?;
    Ok(Json(subscriptions))
}

/// `null` when the user has no pending or active subscription.
#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn current_subscription(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<Option<Subscription>>, AppError> {
    let current = state
        .subscriptions
        .current_subscription(&user.user_id)
        .await?;
    Ok(Json(current))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn get_subscription(
    State(state): State<AppState>,
    user: UserContext,
    Path(subscription_id): Path<Uuid>,
) -> Result<Json<Subscription>, AppError> {
    let subscription = state
        .subscriptions
        .get_subscription(&user.user_id, subscription_id)
        .await?;
    Ok(Json(subscription))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn verify_payment(
    State(state): State<AppState>,
    user: UserContext,
    Path(subscription_id): Path<Uuid>,
) -> Result<Json<Subscription>, AppError> {
    let subscription = state
        .subscriptions
        .verify_payment(&user.user_id, subscription_id)
        .await?;
    Ok(Json(subscription))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn cancel_subscription(
    State(state): State<AppState>,
    user: UserContext,
    Path(subscription_id): Path<Uuid>,
) -> Result<Json<Subscription>, AppError> {
    let subscription = state
        .subscriptions
        .cancel_subscription(&user.user_id, subscription_id)
        .await?;
    Ok(Json(subscription))
}
