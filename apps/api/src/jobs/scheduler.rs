use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::jobs::daily_validation::run_daily_validation;
use crate::jobs::weekly_reset::run_weekly_reset;
use crate::state::AppState;

/// Runs both jobs on a fixed cadence. Users live in every timezone, so the
/// loop ticks more often than daily and relies on job idempotency.
pub fn spawn_scheduler(state: AppState) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.job_interval_secs.max(60));
    info!("Job scheduler started (every {}s)", period.as_secs());

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;

            if let Err(e) = run_daily_validation(
                state.store.as_ref(),
                &state.ledger,
                state.config.job_concurrency,
            )
            .await
            {
                error!("Daily validation run failed: {e}");
            }

            if let Err(e) = run_weekly_reset(
                state.store.as_ref(),
                &state.shields,
                state.config.job_concurrency,
            )
            .await
            {
                error!("Weekly reset run failed: {e}");
            }
        }
    })
}
