use axum::{extract::State, Json};

use crate::errors::AppError;
use crate::jobs::daily_validation::run_daily_validation;
use crate::jobs::weekly_reset::run_weekly_reset;
use crate::jobs::JobReport;
use crate::state::AppState;

/// POST /api/v1/jobs/weekly-reset
pub async fn handle_weekly_reset(
    State(state): State<AppState>,
) -> Result<Json<JobReport>, AppError> {
    let report = run_weekly_reset(
        state.store.as_ref(),
        &state.shields,
        state.config.job_concurrency,
    )
    .await?;
    Ok(Json(report))
}

/// POST /api/v1/jobs/daily-validation
pub async fn handle_daily_validation(
    State(state): State<AppState>,
) -> Result<Json<JobReport>, AppError> {
    let report = run_daily_validation(
        state.store.as_ref(),
        &state.ledger,
        state.config.job_concurrency,
    )
    .await?;
    Ok(Json(report))
}
