// Scheduled jobs: weekly free-freeze reset and daily validation of closed days.
// Both derive their effects from persisted state only, so at-least-once
// triggering (cron retries, overlapping scheduler ticks) is safe.

pub mod daily_validation;
pub mod handlers;
pub mod scheduler;
pub mod weekly_reset;

use std::future::Future;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::info;

use crate::errors::AppError;
use crate::models::streak::UserStreak;
use crate::store::StreakStore;
use crate::streaks::clock::UserTimezone;

/// Per-user result of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserOutcome {
    Applied,
    Unchanged,
    /// No usable timezone on record.
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JobReport {
    pub job: &'static str,
    pub processed: usize,
    pub applied: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl JobReport {
    fn record(&mut self, outcome: UserOutcome) {
        self.processed += 1;
        match outcome {
            UserOutcome::Applied => self.applied += 1,
            UserOutcome::Unchanged => self.unchanged += 1,
            UserOutcome::Skipped => self.skipped += 1,
            UserOutcome::Failed => self.failed += 1,
        }
    }
}

pub(crate) fn stored_timezone(streak: &UserStreak) -> Option<UserTimezone> {
    streak
        .timezone
        .as_deref()
        .and_then(|raw| UserTimezone::parse(raw).ok())
}

/// Streak rows fetched per keyset page.
pub(crate) const JOB_PAGE_SIZE: usize = 500;

/// Runs `per_user` for every known user with at most `concurrency` in flight.
/// Users share no mutable state; per-user ordering against interactive
/// requests comes from the store's compare-and-set.
pub(crate) async fn for_each_user<F, Fut>(
    store: &dyn StreakStore,
    job: &'static str,
    concurrency: usize,
    per_user: F,
) -> Result<JobReport, AppError>
where
    F: Fn(UserStreak) -> Fut,
    Fut: Future<Output = UserOutcome>,
{
    walk_users(store, job, concurrency, JOB_PAGE_SIZE, per_user).await
}

/// Walks the users in `user_id` order, one page at a time.
async fn walk_users<F, Fut>(
    store: &dyn StreakStore,
    job: &'static str,
    concurrency: usize,
    page_size: usize,
    per_user: F,
) -> Result<JobReport, AppError>
where
    F: Fn(UserStreak) -> Fut,
    Fut: Future<Output = UserOutcome>,
{
    let page_size = page_size.max(1);
    let mut report = JobReport {
        job,
        ..JobReport::default()
    };
    let mut after = None;
    loop {
        let page = store.list_streaks_page(after, page_size).await?;
        let Some(last) = page.last() else {
            break;
        };
        after = Some(last.user_id);
        let exhausted = page.len() < page_size;

        let outcomes: Vec<UserOutcome> = stream::iter(page)
            .map(&per_user)
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
        for outcome in outcomes {
            report.record(outcome);
        }
        if exhausted {
            break;
        }
    }

    info!(
        job,
        processed = report.processed,
        applied = report.applied,
        unchanged = report.unchanged,
        skipped = report.skipped,
        failed = report.failed,
        "Job run finished"
    );
    Ok(report)
}
