use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::milestone::EarnedMilestone;
use crate::models::streak::{ClaimMethod, StreakStatus};
use crate::shields::service::ShieldService;
use crate::streaks::clock::{claim_cutoff, UserTimezone, WindowState};
use crate::streaks::ledger::StreakLedger;
use crate::streaks::milestones::{MilestoneEvaluator, NextMilestone};

#[derive(Debug, Clone, Serialize)]
pub struct ClaimableDay {
    pub date: NaiveDate,
    /// Claimed by the user. A shield-protected day is not claimed.
    pub claimed: bool,
    pub claim_method: Option<ClaimMethod>,
    pub has_underlying_data: bool,
    pub can_claim: bool,
    /// Human-readable explanation when `can_claim` is false.
    pub reason: Option<String>,
    pub claim_deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreakSummary {
    pub current_streak: i32,
    pub longest_streak: i32,
    pub status: StreakStatus,
    pub last_claim_date: Option<NaiveDate>,
    pub pause_end_date: Option<NaiveDate>,
    pub today: NaiveDate,
    pub claimed_today: bool,
    pub freezes_available: i32,
    pub shields_total: i32,
    pub next_milestone: Option<NextMilestone>,
}

/// Claim status of each of the last `lookback_days` local days, newest first.
pub async fn get_claimable_days(
    ledger: &StreakLedger,
    user_id: Uuid,
    tz: UserTimezone,
    lookback_days: u32,
    max_lookback_days: u32,
) -> Result<Vec<ClaimableDay>, AppError> {
    if lookback_days == 0 || lookback_days > max_lookback_days {
        return Err(AppError::Validation(format!(
            "lookback_days must be between 1 and {max_lookback_days}"
        )));
    }

    let streak = ledger.load(user_id, tz).await?;
    let resolver = ledger.resolver();
    let today = resolver.today(tz);
    let oldest = today - Duration::days(i64::from(lookback_days) - 1);

    let records: HashMap<NaiveDate, _> = ledger
        .days(user_id, oldest, today)
        .await?
        .into_iter()
        .map(|r| (r.claim_date, r))
        .collect();

    let mut days = Vec::with_capacity(lookback_days as usize);
    let mut date = today;
    while date >= oldest {
        let record = records.get(&date);
        let shielded = record.is_some_and(|r| r.is_shielded());
        let claimed = !shielded && record.is_some_and(|r| r.claimed);

        let reason = if shielded {
            Some("Protected by a shield")
        } else if claimed {
            Some("Already claimed")
        } else {
            match resolver.window(tz, date) {
                WindowState::Closed => Some("Claim window has closed"),
                WindowState::NotYetOpen => Some("Day has not started yet"),
                WindowState::Open if streak.is_paused() => Some("Streak is paused"),
                WindowState::Open => None,
            }
        };

        days.push(ClaimableDay {
            date,
            claimed,
            claim_method: record.and_then(|r| r.claim_method),
            has_underlying_data: record.is_some_and(|r| r.has_underlying_data),
            can_claim: reason.is_none(),
            reason: reason.map(str::to_string),
            claim_deadline: claim_cutoff(tz, date),
        });
        date -= Duration::days(1);
    }
    Ok(days)
}

pub async fn get_streak_summary(
    ledger: &StreakLedger,
    shields: &ShieldService,
    milestones: &MilestoneEvaluator,
    user_id: Uuid,
    tz: UserTimezone,
) -> Result<StreakSummary, AppError> {
    let streak = ledger.load(user_id, tz).await?;
    let inventory = shields.inventory(user_id).await?;
    let today = ledger.resolver().today(tz);

    Ok(StreakSummary {
        current_streak: streak.current_streak,
        longest_streak: streak.longest_streak,
        status: streak.status,
        last_claim_date: streak.last_claim_date,
        pause_end_date: streak.pause_end_date,
        today,
        claimed_today: ledger.is_claimed(user_id, today).await?,
        freezes_available: inventory.freezes_available,
        shields_total: inventory.total(),
        next_milestone: NextMilestone::for_streak(milestones.catalog(), streak.current_streak),
    })
}

pub async fn get_earned_milestones(
    milestones: &MilestoneEvaluator,
    user_id: Uuid,
) -> Result<Vec<EarnedMilestone>, AppError> {
    milestones.earned(user_id).await
}
