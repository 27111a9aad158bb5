use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::middleware::UserContext;
use crate::models::UnlockReceipt;
use crate::services::AccessDecision;
use crate::startup::AppState;

/// Whether the user may read the chapter, and which rule decided it.
#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn check_access(
    State(state): State<AppState>,
    user: UserContext,
    Path(chapter_id): Path<String>,
) -> Result<Json<AccessDecision>, AppError> {
    let decision = state.evaluator.check(&user.user_id, &chapter_id).await?;
    Ok(Json(decision))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn unlock_chapter(
    State(state): State<AppState>,
    user: UserContext,
    Path(chapter_id): Path<String>,
) -> Result<(StatusCode, Json<UnlockReceipt>), AppError> {
    let receipt = state
        .unlocks
        .unlock_chapter(&user.user_id, &chapter_id)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}
