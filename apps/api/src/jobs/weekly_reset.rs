use tracing::warn;

use crate::errors::AppError;
use crate::jobs::{for_each_user, stored_timezone, JobReport, UserOutcome};
use crate::shields::service::{ShieldService, WeeklyGrant};
use crate::store::StreakStore;

pub const JOB_NAME: &str = "weekly_reset";

/// Grants the weekly free freeze to every user whose local date is Monday.
/// Users already reset this local week are left untouched.
pub async fn run_weekly_reset(
    store: &dyn StreakStore,
    shields: &ShieldService,
    concurrency: usize,
) -> Result<JobReport, AppError> {
    for_each_user(store, JOB_NAME, concurrency, |streak| async move {
        let Some(tz) = stored_timezone(&streak) else {
            return UserOutcome::Skipped;
        };
        match shields.grant_weekly_freeze(streak.user_id, tz).await {
            Ok(WeeklyGrant::Granted) => UserOutcome::Applied,
            Ok(WeeklyGrant::CapReached | WeeklyGrant::AlreadyReset | WeeklyGrant::NotMonday) => {
                UserOutcome::Unchanged
            }
            Err(e) => {
                warn!(user_id = %streak.user_id, error = %e, "Weekly freeze reset failed");
                UserOutcome::Failed
            }
        }
    })
    .await
}
