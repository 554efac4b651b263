use axum::{
    extract::{Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::shields::service::ShieldSummary;
use crate::state::AppState;
use crate::streaks::clock::UserTimezone;
use crate::streaks::ledger::ShieldApplication;

#[derive(Deserialize)]
pub struct ShieldQuery {
    pub user_id: Uuid,
    pub timezone: Option<String>,
}

#[derive(Deserialize)]
pub struct PurchaseRequest {
    pub user_id: Uuid,
    pub timezone: Option<String>,
}

#[derive(Deserialize)]
pub struct ApplyShieldRequest {
    pub user_id: Uuid,
    pub timezone: Option<String>,
    pub date: NaiveDate,
}

/// The summary works without a timezone; only the next reset is left out.
async fn optional_timezone(
    state: &AppState,
    user_id: Uuid,
    explicit: Option<&str>,
) -> Result<Option<UserTimezone>, AppError> {
    match state.ledger.resolve_timezone(user_id, explicit).await {
        Ok(tz) => Ok(Some(tz)),
        Err(AppError::MissingParameter(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// GET /api/v1/shields
pub async fn handle_shield_summary(
    State(state): State<AppState>,
    Query(params): Query<ShieldQuery>,
) -> Result<Json<ShieldSummary>, AppError> {
    let tz = optional_timezone(&state, params.user_id, params.timezone.as_deref()).await?;
    Ok(Json(state.shields.summary(params.user_id, tz).await?))
}

/// POST /api/v1/shields/purchase
/// `InventoryFull` tells the payment layer to refund.
pub async fn handle_purchase(
    State(state): State<AppState>,
    Json(req): Json<PurchaseRequest>,
) -> Result<Json<ShieldSummary>, AppError> {
    let tz = optional_timezone(&state, req.user_id, req.timezone.as_deref()).await?;
    state.shields.purchase_freeze(req.user_id).await?;
    Ok(Json(state.shields.summary(req.user_id, tz).await?))
}

/// POST /api/v1/shields/apply
pub async fn handle_apply_shield(
    State(state): State<AppState>,
    Json(req): Json<ApplyShieldRequest>,
) -> Result<Json<ShieldApplication>, AppError> {
    let tz = state
        .ledger
        .resolve_timezone(req.user_id, req.timezone.as_deref())
        .await?;
    let applied = state
        .orchestrator
        .activate_shield(req.user_id, tz, req.date)
        .await?;
    Ok(Json(applied))
}
