use tracing::warn;

use crate::errors::AppError;
use crate::jobs::{for_each_user, stored_timezone, JobReport, UserOutcome};
use crate::store::StreakStore;
use crate::streaks::ledger::StreakLedger;

pub const JOB_NAME: &str = "daily_validation";

/// Resolves every closed, uncovered day for every user: shield if one is
/// available, streak break otherwise. Late or repeated runs catch up from
/// each user's last covered day.
pub async fn run_daily_validation(
    store: &dyn StreakStore,
    ledger: &StreakLedger,
    concurrency: usize,
) -> Result<JobReport, AppError> {
    for_each_user(store, JOB_NAME, concurrency, |streak| async move {
        let Some(tz) = stored_timezone(&streak) else {
            return UserOutcome::Skipped;
        };
        let until = ledger.resolver().latest_closed_day(tz);
        match ledger.resolve_closed_days(streak.user_id, tz, until).await {
            Ok(days) if days.is_empty() => UserOutcome::Unchanged,
            Ok(_) => UserOutcome::Applied,
            Err(e) => {
                warn!(user_id = %streak.user_id, error = %e, "Daily validation failed");
                UserOutcome::Failed
            }
        }
    })
    .await
}
