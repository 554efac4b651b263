pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::jobs::handlers as jobs;
use crate::shields::handlers as shields;
use crate::state::AppState;
use crate::streaks::handlers as streaks;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Streaks
        .route("/api/v1/streaks/claim", post(streaks::handle_claim))
        .route("/api/v1/streaks/auto-claim", post(streaks::handle_auto_claim))
        .route(
            "/api/v1/streaks/claimable",
            get(streaks::handle_claimable_days),
        )
        .route("/api/v1/streaks/summary", get(streaks::handle_streak_summary))
        .route(
            "/api/v1/streaks/milestones",
            get(streaks::handle_earned_milestones),
        )
        .route("/api/v1/streaks/pause", post(streaks::handle_pause))
        .route("/api/v1/streaks/resume", post(streaks::handle_resume))
        // Shields
        .route("/api/v1/shields", get(shields::handle_shield_summary))
        .route("/api/v1/shields/purchase", post(shields::handle_purchase))
        .route("/api/v1/shields/apply", post(shields::handle_apply_shield))
        // Scheduled jobs, also triggerable by an external cron
        .route("/api/v1/jobs/weekly-reset", post(jobs::handle_weekly_reset))
        .route(
            "/api/v1/jobs/daily-validation",
            post(jobs::handle_daily_validation),
        )
        .with_state(state)
}
