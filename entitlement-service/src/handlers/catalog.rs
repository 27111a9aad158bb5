//! Catalog sync hooks. The CMS pushes chapter pricing and plans here; they
//! are never edited through the user-facing API.

use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{UpsertChapterRequest, UpsertPlanRequest};
use crate::models::{Chapter, SubscriptionPlan};
use crate::startup::AppState;

#[tracing::instrument(skip(state, request))]
pub async fn upsert_chapter(
    State(state): State<AppState>,
    Path(chapter_id): Path<String>,
    Json(request): Json<UpsertChapterRequest>,
) -> Result<Json<Chapter>, AppError> {
    request.validate()?;

    let chapter = state
        .store
        .upsert_chapter(&request.into_chapter(chapter_id))
        .await?;
    tracing::info!(price = chapter.price, is_free = chapter.is_free, "Chapter synced");
    Ok(Json(chapter))
}

#[tracing::instrument(skip(state, request))]
pub async fn upsert_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Json(request): Json<UpsertPlanRequest>,
) -> Result<Json<SubscriptionPlan>, AppError> {
    request.validate()?;

    let plan = request.into_plan(plan_id);
    plan.validate()
        .map_err(|msg| AppError::BadRequest(anyhow::anyhow!(msg)))?;

    let plan = state.store.upsert_plan(&plan).await?;
    tracing::info!(is_active = plan.is_active, "Plan synced");
    Ok(Json(plan))
}
