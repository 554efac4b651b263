use axum::{
    extract::{Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::milestone::EarnedMilestone;
use crate::state::AppState;
use crate::streaks::orchestrator::{AutoClaimOutcome, CheckInOutcome, TriggerSource};
use crate::streaks::queries::{
    get_claimable_days, get_earned_milestones, get_streak_summary, ClaimableDay, StreakSummary,
};

#[derive(Deserialize)]
pub struct UserQuery {
    pub user_id: Uuid,
    pub timezone: Option<String>,
}

#[derive(Deserialize)]
pub struct ClaimableQuery {
    pub user_id: Uuid,
    pub timezone: Option<String>,
    pub lookback_days: Option<u32>,
}

#[derive(Deserialize)]
pub struct ClaimRequest {
    pub user_id: Uuid,
    pub timezone: Option<String>,
    /// Local date to claim; defaults to the user's today.
    pub date: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct AutoClaimRequest {
    pub user_id: Uuid,
    pub timezone: Option<String>,
    pub date: Option<NaiveDate>,
    pub source: TriggerSource,
}

#[derive(Deserialize)]
pub struct PauseRequest {
    pub user_id: Uuid,
    pub timezone: Option<String>,
    /// Last paused day, inclusive.
    pub until: NaiveDate,
}

/// POST /api/v1/streaks/claim
pub async fn handle_claim(
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> Result<Json<CheckInOutcome>, AppError> {
    let tz = state
        .ledger
        .resolve_timezone(req.user_id, req.timezone.as_deref())
        .await?;
    let outcome = state.orchestrator.check_in(req.user_id, tz, req.date).await?;
    Ok(Json(outcome))
}

/// POST /api/v1/streaks/auto-claim
/// Called by the metric-entry layer after its write commits. Always 200.
pub async fn handle_auto_claim(
    State(state): State<AppState>,
    Json(req): Json<AutoClaimRequest>,
) -> Json<AutoClaimOutcome> {
    Json(
        state
            .orchestrator
            .try_auto_claim(req.user_id, req.timezone, req.date, req.source)
            .await,
    )
}

/// GET /api/v1/streaks/claimable
pub async fn handle_claimable_days(
    State(state): State<AppState>,
    Query(params): Query<ClaimableQuery>,
) -> Result<Json<Vec<ClaimableDay>>, AppError> {
    let tz = state
        .ledger
        .resolve_timezone(params.user_id, params.timezone.as_deref())
        .await?;
    let lookback = params
        .lookback_days
        .unwrap_or(state.config.default_lookback_days);
    let days = get_claimable_days(
        &state.ledger,
        params.user_id,
        tz,
        lookback,
        state.config.max_lookback_days,
    )
    .await?;
    Ok(Json(days))
}

/// GET /api/v1/streaks/summary
pub async fn handle_streak_summary(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
) -> Result<Json<StreakSummary>, AppError> {
    let tz = state
        .ledger
        .resolve_timezone(params.user_id, params.timezone.as_deref())
        .await?;
    let summary = get_streak_summary(
        &state.ledger,
        &state.shields,
        &state.milestones,
        params.user_id,
        tz,
    )
    .await?;
    Ok(Json(summary))
}

/// GET /api/v1/streaks/milestones
pub async fn handle_earned_milestones(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
) -> Result<Json<Vec<EarnedMilestone>>, AppError> {
    Ok(Json(
        get_earned_milestones(&state.milestones, params.user_id).await?,
    ))
}

/// POST /api/v1/streaks/pause
pub async fn handle_pause(
    State(state): State<AppState>,
    Json(req): Json<PauseRequest>,
) -> Result<Json<StreakSummary>, AppError> {
    let tz = state
        .ledger
        .resolve_timezone(req.user_id, req.timezone.as_deref())
        .await?;
    state.ledger.pause(req.user_id, tz, req.until).await?;
    let summary =
        get_streak_summary(&state.ledger, &state.shields, &state.milestones, req.user_id, tz)
            .await?;
    Ok(Json(summary))
}

/// POST /api/v1/streaks/resume
pub async fn handle_resume(
    State(state): State<AppState>,
    Json(req): Json<UserQuery>,
) -> Result<Json<StreakSummary>, AppError> {
    let tz = state
        .ledger
        .resolve_timezone(req.user_id, req.timezone.as_deref())
        .await?;
    state.ledger.resume(req.user_id, tz).await?;
    let summary =
        get_streak_summary(&state.ledger, &state.shields, &state.milestones, req.user_id, tz)
            .await?;
    Ok(Json(summary))
}
