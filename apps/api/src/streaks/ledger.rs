//! Streak Ledger: the authoritative per-user streak state machine.
//!
//! Streak states: `Active(n)`, `Paused`, `Broken` (transient, re-opened as
//! `Active(0)` in the same write). Per-day states: no record, claimed,
//! frozen by a shield, or missed.
//!
//! Every write goes through two store primitives: insert-if-absent on the
//! `(user_id, date)` claim key, which guarantees a single claim per day, and
//! compare-and-set on the streak row, retried against fresh state.
//!
//! `covered_through` is the last day folded into the counters. Claimed days
//! after it are pending: they are folded in as soon as the run reaches them,
//! so a claim for today made while yesterday is still in its grace period
//! joins the run once yesterday is claimed, shielded or broken. Folding also
//! repairs a claim whose counter write was lost after the claim key landed.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::shield::ShieldKind;
use crate::models::streak::{ClaimMethod, DailyClaimRecord, StreakStatus, UserStreak};
use crate::shields::service::{ShieldService, MAX_CAS_ATTEMPTS};
use crate::store::StreakStore;
use crate::streaks::clock::{TimeResolver, UserTimezone, WindowState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimEffect {
    /// First claim of a new run.
    Started,
    /// Claim the day after the last covered day.
    Extended,
    /// Uncovered days sit between the last covered day and this claim.
    Restarted,
    /// Claim for a day at or before the last covered day; counters unchanged.
    Backfilled,
    /// An earlier day is still open. The claim is recorded and counted once
    /// that day is resolved.
    Pending,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimReceipt {
    pub date: NaiveDate,
    pub method: ClaimMethod,
    pub effect: ClaimEffect,
    pub current_streak: i32,
    pub longest_streak: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShieldApplication {
    pub date: NaiveDate,
    pub kind: ShieldKind,
    pub current_streak: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum DayResolution {
    AlreadyResolved,
    /// Day fell inside a pause window.
    Exempt,
    NothingToProtect,
    Shielded { kind: ShieldKind },
    Broken { lost_streak: i32 },
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResolvedDay {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub resolution: DayResolution,
}

/// Claimed days after `covered_through`, keyed by date.
pub type ClaimedDays = BTreeMap<NaiveDate, ClaimMethod>;

/// Advances `covered_through` over consecutive claimed days. Real claims
/// extend the run; shielded days only keep it alive. With nothing covered
/// yet, the run starts right before `first_open`, the earliest day whose
/// claim window is still open.
pub fn fold_run(streak: &mut UserStreak, first_open: NaiveDate, claimed: &ClaimedDays) {
    let mut covered = match streak.covered_through {
        Some(covered) => covered,
        None if claimed.is_empty() => return,
        None => first_open - Duration::days(1),
    };
    while let Some(method) = claimed.get(&(covered + Duration::days(1))) {
        covered += Duration::days(1);
        if *method != ClaimMethod::ShieldApplied {
            streak.current_streak += 1;
        }
    }
    streak.covered_through = Some(covered);
    streak.longest_streak = streak.longest_streak.max(streak.current_streak);
}

/// Applies a successful claim for `date` to the counters. `claimed` must
/// already hold `date`.
pub fn apply_claim(
    streak: &mut UserStreak,
    date: NaiveDate,
    first_open: NaiveDate,
    claimed: &ClaimedDays,
) -> ClaimEffect {
    streak.last_claim_date = streak.last_claim_date.max(Some(date));
    if streak.status == StreakStatus::Broken {
        streak.status = StreakStatus::Active;
    }
    if streak.covered_through.is_some_and(|covered| date <= covered) {
        return ClaimEffect::Backfilled;
    }

    let previous = streak.current_streak;
    fold_run(streak, first_open, claimed);

    // A closed day between the run and this claim was never resolved.
    let anchor = first_open.min(date) - Duration::days(1);
    let restarted = streak.covered_through.map_or(true, |covered| covered < anchor);
    if restarted {
        streak.covered_through = Some(anchor);
        streak.current_streak = 0;
        fold_run(streak, first_open, claimed);
    }

    if streak.covered_through.is_some_and(|covered| covered < date) {
        ClaimEffect::Pending
    } else if restarted && previous > 0 {
        ClaimEffect::Restarted
    } else if restarted || previous == 0 {
        ClaimEffect::Started
    } else {
        ClaimEffect::Extended
    }
}

/// Ends a paused streak whose window lies entirely before `today`.
fn expire_pause(streak: &mut UserStreak, today: NaiveDate) -> bool {
    match (streak.status, streak.pause_end_date) {
        (StreakStatus::Paused, Some(end)) if end < today => {
            streak.status = StreakStatus::Active;
            streak.pause_end_date = None;
            streak.covered_through = streak.covered_through.max(Some(end));
            streak.resumed_on = Some(end);
            true
        }
        _ => false,
    }
}

fn is_exempt(streak: &UserStreak, date: NaiveDate) -> bool {
    streak.is_paused() || streak.resumed_on.is_some_and(|resumed| date <= resumed)
}

#[derive(Clone)]
pub struct StreakLedger {
    store: Arc<dyn StreakStore>,
    shields: ShieldService,
    resolver: TimeResolver,
}

impl StreakLedger {
    pub fn new(store: Arc<dyn StreakStore>, shields: ShieldService, resolver: TimeResolver) -> Self {
        Self {
            store,
            shields,
            resolver,
        }
    }

    pub fn resolver(&self) -> &TimeResolver {
        &self.resolver
    }

    /// Explicit timezone first, then the one stored for the user.
    pub async fn resolve_timezone(
        &self,
        user_id: Uuid,
        explicit: Option<&str>,
    ) -> Result<UserTimezone, AppError> {
        if let Some(raw) = explicit {
            return UserTimezone::parse(raw);
        }
        let streak = self.store.get_or_create_streak(user_id).await?;
        match streak.timezone.as_deref() {
            Some(stored) => UserTimezone::parse(stored),
            None => Err(AppError::MissingParameter("timezone")),
        }
    }

    /// Writes `next` over `current`. `None` means the row moved underneath.
    async fn commit(
        &self,
        current: UserStreak,
        mut next: UserStreak,
    ) -> Result<Option<UserStreak>, AppError> {
        debug_assert!(next.longest_streak >= next.current_streak);
        if next == current {
            return Ok(Some(current));
        }
        if self.store.compare_and_set_streak(current.version, &next).await? {
            next.version = current.version + 1;
            return Ok(Some(next));
        }
        debug!(user_id = %current.user_id, "streak changed concurrently, retrying");
        Ok(None)
    }

    async fn update<T, F>(&self, user_id: Uuid, f: F) -> Result<(T, UserStreak), AppError>
    where
        T: Send,
        F: Fn(&mut UserStreak) -> Result<T, AppError> + Send + Sync,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.store.get_or_create_streak(user_id).await?;
            let mut next = current.clone();
            let value = f(&mut next)?;
            if let Some(stored) = self.commit(current, next).await? {
                return Ok((value, stored));
            }
        }
        Err(AppError::StorageConflict(format!("streak for user {user_id}")))
    }

    async fn claimed_after(
        &self,
        user_id: Uuid,
        tz: UserTimezone,
        streak: &UserStreak,
    ) -> Result<ClaimedDays, AppError> {
        let from = match streak.covered_through {
            Some(covered) => covered + Duration::days(1),
            None => self.resolver.latest_closed_day(tz) + Duration::days(1),
        };
        let today = self.resolver.today(tz);
        Ok(self
            .store
            .list_days(user_id, from, today)
            .await?
            .into_iter()
            .filter(|record| record.claimed)
            .filter_map(|record| record.claim_method.map(|method| (record.claim_date, method)))
            .collect())
    }

    /// Like `update`, then folds pending claimed days into the run. The
    /// claimed days are re-read on every attempt.
    async fn update_folding<T, F>(
        &self,
        user_id: Uuid,
        tz: UserTimezone,
        f: F,
    ) -> Result<(T, UserStreak), AppError>
    where
        T: Send,
        F: Fn(&mut UserStreak, &ClaimedDays) -> Result<T, AppError> + Send + Sync,
    {
        let first_open = self.resolver.latest_closed_day(tz) + Duration::days(1);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.store.get_or_create_streak(user_id).await?;
            let claimed = self.claimed_after(user_id, tz, &current).await?;
            let mut next = current.clone();
            let value = f(&mut next, &claimed)?;
            fold_run(&mut next, first_open, &claimed);
            if let Some(stored) = self.commit(current, next).await? {
                return Ok((value, stored));
            }
        }
        Err(AppError::StorageConflict(format!("streak for user {user_id}")))
    }

    /// Folds any claimed days the counters have not caught up with yet.
    pub async fn settle(&self, user_id: Uuid, tz: UserTimezone) -> Result<UserStreak, AppError> {
        let ((), streak) = self.update_folding(user_id, tz, |_, _| Ok(())).await?;
        Ok(streak)
    }

    /// Loads the streak, remembering the timezone and expiring a finished pause.
    pub async fn load(&self, user_id: Uuid, tz: UserTimezone) -> Result<UserStreak, AppError> {
        let today = self.resolver.today(tz);
        let name = tz.name();
        let (expired, streak) = self
            .update(user_id, |s| {
                if s.timezone.as_deref() != Some(name) {
                    s.timezone = Some(name.to_string());
                }
                Ok(expire_pause(s, today))
            })
            .await?;
        if expired {
            info!(user_id = %user_id, "Pause window expired, streak resumed");
        }
        Ok(streak)
    }

    pub async fn claim(
        &self,
        user_id: Uuid,
        tz: UserTimezone,
        date: NaiveDate,
        method: ClaimMethod,
    ) -> Result<ClaimReceipt, AppError> {
        match self.resolver.window(tz, date) {
            WindowState::NotYetOpen => {
                return Err(AppError::Validation(format!(
                    "cannot claim {date} before the day starts"
                )))
            }
            WindowState::Closed => return Err(AppError::WindowExpired(date)),
            WindowState::Open => {}
        }

        let streak = self.load(user_id, tz).await?;
        if streak.is_paused() {
            return Err(AppError::StreakPaused);
        }
        if streak.last_claim_date == Some(date) {
            return Err(AppError::AlreadyClaimed(date));
        }

        let claimed_at = self.resolver.now();
        if !self
            .store
            .insert_claim_if_absent(user_id, date, method, claimed_at)
            .await?
        {
            return Err(AppError::AlreadyClaimed(date));
        }

        let first_open = self.resolver.latest_closed_day(tz) + Duration::days(1);
        let (effect, streak) = self
            .update_folding(user_id, tz, |s, claimed| {
                Ok(apply_claim(s, date, first_open, claimed))
            })
            .await?;

        info!(
            user_id = %user_id,
            date = %date,
            method = method.as_str(),
            effect = ?effect,
            current_streak = streak.current_streak,
            "Day claimed"
        );

        Ok(ClaimReceipt {
            date,
            method,
            effect,
            current_streak: streak.current_streak,
            longest_streak: streak.longest_streak,
        })
    }

    /// Freezes `date` with one shield. Counters are left untouched. The claim
    /// key is taken before the shield is spent and released if spending fails.
    async fn freeze_day(
        &self,
        user_id: Uuid,
        tz: UserTimezone,
        date: NaiveDate,
    ) -> Result<ShieldKind, AppError> {
        if !self
            .store
            .insert_claim_if_absent(user_id, date, ClaimMethod::ShieldApplied, self.resolver.now())
            .await?
        {
            return Err(AppError::AlreadyClaimed(date));
        }

        let kind = match self.shields.consume(user_id).await {
            Ok(kind) => kind,
            Err(e) => {
                self.store.release_shield_claim(user_id, date).await?;
                return Err(e);
            }
        };

        self.update_folding(user_id, tz, |s, _| {
            s.covered_through = s.covered_through.max(Some(date));
            Ok(())
        })
        .await?;

        info!(user_id = %user_id, date = %date, kind = %kind, "Shield applied");
        Ok(kind)
    }

    /// User-requested shield activation for a missed past day. Running out of
    /// shields here is a plain rejection; the streak is left as it is.
    pub async fn apply_shield(
        &self,
        user_id: Uuid,
        tz: UserTimezone,
        date: NaiveDate,
    ) -> Result<ShieldApplication, AppError> {
        if self.resolver.window(tz, date) != WindowState::Closed {
            return Err(AppError::Validation(format!(
                "{date} can still be claimed; shields only protect closed days"
            )));
        }

        let streak = self.load(user_id, tz).await?;
        if streak.is_paused() {
            return Err(AppError::StreakPaused);
        }
        if streak.current_streak == 0 {
            return Err(AppError::Validation(
                "there is no active streak to protect".to_string(),
            ));
        }
        if let Some(covered) = streak.covered_through {
            if date <= covered {
                return Err(AppError::AlreadyClaimed(date));
            }
            if date > covered + Duration::days(1) {
                return Err(AppError::Validation(format!(
                    "days between {covered} and {date} must be resolved first"
                )));
            }
        }

        let kind = self.freeze_day(user_id, tz, date).await?;
        let streak = self.store.get_or_create_streak(user_id).await?;
        Ok(ShieldApplication {
            date,
            kind,
            current_streak: streak.current_streak,
        })
    }

    /// Resolves one day whose claim window has closed: nothing if it is
    /// covered or exempt, otherwise a shield, otherwise a streak break.
    pub async fn validate_day(
        &self,
        user_id: Uuid,
        tz: UserTimezone,
        date: NaiveDate,
    ) -> Result<DayResolution, AppError> {
        if self.resolver.window(tz, date) != WindowState::Closed {
            return Err(AppError::Validation(format!(
                "claim window for {date} is still open"
            )));
        }

        let streak = self.load(user_id, tz).await?;
        if let Some(covered) = streak.covered_through {
            if date <= covered {
                return Ok(DayResolution::AlreadyResolved);
            }
            if date > covered + Duration::days(1) {
                return Err(AppError::Validation(format!(
                    "days between {covered} and {date} must be resolved first"
                )));
            }
        }

        let claimed = self
            .store
            .get_day(user_id, date)
            .await?
            .is_some_and(|record| record.claimed);
        let resolution = if claimed {
            // Folded below.
            DayResolution::AlreadyResolved
        } else if is_exempt(&streak, date) {
            DayResolution::Exempt
        } else if streak.current_streak == 0 {
            DayResolution::NothingToProtect
        } else {
            return self.protect_or_break(user_id, tz, date).await;
        };

        self.update_folding(user_id, tz, |s, _| {
            if !claimed {
                s.covered_through = s.covered_through.max(Some(date));
            }
            Ok(())
        })
        .await?;
        Ok(resolution)
    }

    async fn protect_or_break(
        &self,
        user_id: Uuid,
        tz: UserTimezone,
        date: NaiveDate,
    ) -> Result<DayResolution, AppError> {
        match self.freeze_day(user_id, tz, date).await {
            Ok(kind) => Ok(DayResolution::Shielded { kind }),
            Err(AppError::AlreadyClaimed(_)) => {
                // Claimed since the read above.
                self.settle(user_id, tz).await?;
                Ok(DayResolution::AlreadyResolved)
            }
            Err(AppError::NoShieldsAvailable) => {
                let (lost, streak) = self
                    .update_folding(user_id, tz, |s, _| {
                        if s.covered_through.is_some_and(|covered| date <= covered) {
                            return Ok(None);
                        }
                        let lost = s.current_streak;
                        s.current_streak = 0;
                        s.covered_through = Some(date);
                        // Broken re-opens as Active(0) in the same write.
                        s.status = StreakStatus::Active;
                        Ok(Some(lost))
                    })
                    .await?;
                match lost {
                    Some(lost_streak) => {
                        warn!(
                            user_id = %user_id,
                            date = %date,
                            lost_streak,
                            longest_streak = streak.longest_streak,
                            "Streak broken, no shields available"
                        );
                        Ok(DayResolution::Broken { lost_streak })
                    }
                    None => Ok(DayResolution::AlreadyResolved),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Resolves every closed, uncovered day up to and including `until`.
    /// Idle days with no run to protect are skipped up to the next claimed
    /// day and are not reported.
    pub async fn resolve_closed_days(
        &self,
        user_id: Uuid,
        tz: UserTimezone,
        until: NaiveDate,
    ) -> Result<Vec<ResolvedDay>, AppError> {
        let latest = self.resolver.latest_closed_day(tz).min(until);
        let mut streak = self.load(user_id, tz).await?;
        let mut resolved = Vec::new();

        while let Some(covered) = streak.covered_through {
            let day = covered + Duration::days(1);
            if day > latest {
                break;
            }

            if streak.current_streak == 0 && !is_exempt(&streak, day) {
                let next_claim = self
                    .store
                    .list_days(user_id, day, latest)
                    .await?
                    .into_iter()
                    .find(|record| record.claimed)
                    .map(|record| record.claim_date);
                let idle_through = next_claim.map_or(latest, |d| d - Duration::days(1));
                let ((), next) = self
                    .update_folding(user_id, tz, |s, _| {
                        if s.current_streak == 0 && !is_exempt(s, day) {
                            s.covered_through = s.covered_through.max(Some(idle_through));
                        }
                        Ok(())
                    })
                    .await?;
                streak = next;
            } else {
                let resolution = self.validate_day(user_id, tz, day).await?;
                resolved.push(ResolvedDay {
                    date: day,
                    resolution,
                });
                streak = self.store.get_or_create_streak(user_id).await?;
            }

            if streak.covered_through <= Some(covered) {
                warn!(user_id = %user_id, date = %day, "Closed day did not resolve");
                break;
            }
        }
        Ok(resolved)
    }

    /// Suspends validation through `until` (inclusive). Closed days are
    /// resolved first so a pause cannot retroactively excuse a miss.
    pub async fn pause(
        &self,
        user_id: Uuid,
        tz: UserTimezone,
        until: NaiveDate,
    ) -> Result<UserStreak, AppError> {
        let today = self.resolver.today(tz);
        if until < today {
            return Err(AppError::Validation(
                "pause end date must not be in the past".to_string(),
            ));
        }

        self.resolve_closed_days(user_id, tz, today).await?;
        let ((), streak) = self
            .update(user_id, |s| {
                s.status = StreakStatus::Paused;
                s.pause_end_date = Some(until);
                Ok(())
            })
            .await?;
        info!(user_id = %user_id, until = %until, "Streak paused");
        Ok(streak)
    }

    /// Ends a pause today. Validation picks up again from tomorrow.
    pub async fn resume(&self, user_id: Uuid, tz: UserTimezone) -> Result<UserStreak, AppError> {
        self.load(user_id, tz).await?;
        let today = self.resolver.today(tz);
        let ((), streak) = self
            .update(user_id, |s| {
                if !s.is_paused() {
                    return Err(AppError::NotPaused);
                }
                s.status = StreakStatus::Active;
                s.pause_end_date = None;
                s.covered_through = s.covered_through.max(Some(today - Duration::days(1)));
                s.resumed_on = Some(today);
                Ok(())
            })
            .await?;
        info!(user_id = %user_id, "Streak resumed");
        Ok(streak)
    }

    pub async fn streak(&self, user_id: Uuid) -> Result<UserStreak, AppError> {
        self.store.get_or_create_streak(user_id).await
    }

    pub async fn is_claimed(&self, user_id: Uuid, date: NaiveDate) -> Result<bool, AppError> {
        Ok(self
            .store
            .get_day(user_id, date)
            .await?
            .is_some_and(|record| record.claimed))
    }

    pub async fn days(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyClaimRecord>, AppError> {
        self.store.list_days(user_id, from, to).await
    }

    /// Marks that metric data exists for the day, whatever its source.
    pub async fn record_activity(&self, user_id: Uuid, date: NaiveDate) -> Result<(), AppError> {
        self.store.mark_underlying_data(user_id, date).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::models::milestone::EarnedMilestone;
    use crate::models::shield::ShieldInventory;
    use crate::store::MemoryStreakStore;
    use crate::streaks::clock::FixedClock;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    struct Harness {
        ledger: StreakLedger,
        store: Arc<MemoryStreakStore>,
        clock: Arc<FixedClock>,
        tz: UserTimezone,
        user: Uuid,
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn harness(now: &str) -> Harness {
        let store = Arc::new(MemoryStreakStore::new());
        let clock = Arc::new(FixedClock::new(utc(now)));
        let resolver = TimeResolver::new(clock.clone());
        let shields = ShieldService::new(store.clone(), resolver.clone());
        Harness {
            ledger: StreakLedger::new(store.clone(), shields, resolver),
            store,
            clock,
            tz: UserTimezone::parse("UTC").unwrap(),
            user: Uuid::new_v4(),
        }
    }

    impl Harness {
        fn at(&self, now: &str) {
            self.clock.set(utc(now));
        }

        async fn claim(&self, d: u32) -> Result<ClaimReceipt, AppError> {
            self.ledger
                .claim(self.user, self.tz, day(d), ClaimMethod::Manual)
                .await
        }

        async fn set_shields(&self, freezes: i32, milestone: i32, purchased: i32) {
            let current = self.store.get_or_create_inventory(self.user).await.unwrap();
            let next = ShieldInventory {
                freezes_available: freezes,
                milestone_shields: milestone,
                purchased_shields: purchased,
                ..current.clone()
            };
            assert!(self
                .store
                .compare_and_set_inventory(current.version, &next)
                .await
                .unwrap());
        }

        async fn shields(&self) -> (i32, i32, i32) {
            let inv = self.store.get_or_create_inventory(self.user).await.unwrap();
            (inv.freezes_available, inv.milestone_shields, inv.purchased_shields)
        }

        async fn streak(&self) -> UserStreak {
            self.ledger.streak(self.user).await.unwrap()
        }
    }

    fn claim_on(
        s: &mut UserStreak,
        claimed: &mut ClaimedDays,
        d: u32,
        first_open: u32,
    ) -> ClaimEffect {
        claimed.insert(day(d), ClaimMethod::Manual);
        apply_claim(s, day(d), day(first_open), claimed)
    }

    #[test]
    fn test_apply_claim_transitions() {
        let mut s = UserStreak::new(Uuid::new_v4());
        let mut claimed = ClaimedDays::new();
        assert_eq!(claim_on(&mut s, &mut claimed, 1, 1), ClaimEffect::Started);
        assert_eq!(claim_on(&mut s, &mut claimed, 2, 2), ClaimEffect::Extended);
        assert_eq!(s.current_streak, 2);
        assert_eq!(claim_on(&mut s, &mut claimed, 5, 5), ClaimEffect::Restarted);
        assert_eq!((s.current_streak, s.longest_streak), (1, 2));
        assert_eq!(claim_on(&mut s, &mut claimed, 4, 4), ClaimEffect::Backfilled);
        assert_eq!(s.covered_through, Some(day(5)));
        assert_eq!(s.last_claim_date, Some(day(5)));

        // Day 6 is still in its grace period when day 7 is claimed.
        assert_eq!(claim_on(&mut s, &mut claimed, 7, 6), ClaimEffect::Pending);
        assert_eq!((s.current_streak, s.covered_through), (1, Some(day(5))));
        assert_eq!(claim_on(&mut s, &mut claimed, 6, 6), ClaimEffect::Extended);
        assert_eq!((s.current_streak, s.longest_streak), (3, 3));
        assert_eq!(s.covered_through, Some(day(7)));
    }

    #[test]
    fn test_fold_run_skips_counting_shielded_days() {
        let mut s = UserStreak::new(Uuid::new_v4());
        s.current_streak = 2;
        s.longest_streak = 2;
        s.covered_through = Some(day(2));
        let claimed = ClaimedDays::from([
            (day(3), ClaimMethod::ShieldApplied),
            (day(4), ClaimMethod::Auto),
            (day(6), ClaimMethod::Manual),
        ]);
        fold_run(&mut s, day(7), &claimed);
        assert_eq!(s.covered_through, Some(day(4)));
        assert_eq!((s.current_streak, s.longest_streak), (3, 3));
    }

    #[tokio::test]
    async fn test_consecutive_claims_extend_streak() {
        let h = harness("2026-03-02T10:00:00Z");
        assert_eq!(h.claim(2).await.unwrap().effect, ClaimEffect::Started);
        h.at("2026-03-03T10:00:00Z");
        let receipt = h.claim(3).await.unwrap();
        assert_eq!(receipt.effect, ClaimEffect::Extended);
        assert_eq!(receipt.current_streak, 2);
        assert_eq!(receipt.longest_streak, 2);
    }

    #[tokio::test]
    async fn test_replayed_claim_reports_already_claimed() {
        let h = harness("2026-03-02T10:00:00Z");
        h.claim(2).await.unwrap();
        assert!(matches!(h.claim(2).await, Err(AppError::AlreadyClaimed(_))));
        assert_eq!(h.streak().await.current_streak, 1);
    }

    #[tokio::test]
    async fn test_grace_window_closes_at_three_am() {
        let h = harness("2026-03-03T02:59:59Z");
        h.claim(2).await.unwrap();

        let late = harness("2026-03-03T03:00:00Z");
        assert!(matches!(late.claim(2).await, Err(AppError::WindowExpired(_))));
    }

    #[tokio::test]
    async fn test_today_claimed_during_grace_joins_yesterday() {
        let h = harness("2026-03-01T10:00:00Z");
        h.claim(1).await.unwrap();
        h.at("2026-03-02T10:00:00Z");
        h.claim(2).await.unwrap();

        // 01:00 on the 4th: the 3rd can still be claimed.
        h.at("2026-03-04T01:00:00Z");
        let today = h.claim(4).await.unwrap();
        assert_eq!(today.effect, ClaimEffect::Pending);
        assert_eq!(today.current_streak, 2);

        let yesterday = h.claim(3).await.unwrap();
        assert_eq!(yesterday.effect, ClaimEffect::Extended);
        assert_eq!(yesterday.current_streak, 4);
        assert_eq!(yesterday.longest_streak, 4);
        assert_eq!(h.streak().await.covered_through, Some(day(4)));
    }

    #[tokio::test]
    async fn test_pending_claim_survives_missed_grace_day() {
        let h = harness("2026-03-02T10:00:00Z");
        h.claim(2).await.unwrap();
        h.set_shields(1, 0, 0).await;

        h.at("2026-03-04T01:00:00Z");
        assert_eq!(h.claim(4).await.unwrap().effect, ClaimEffect::Pending);

        // The 3rd is never claimed; validation shields it and the 4th folds in.
        h.at("2026-03-04T03:00:00Z");
        assert_eq!(
            h.ledger.validate_day(h.user, h.tz, day(3)).await.unwrap(),
            DayResolution::Shielded {
                kind: ShieldKind::Freeze
            }
        );
        let streak = h.streak().await;
        assert_eq!(streak.current_streak, 2);
        assert_eq!(streak.covered_through, Some(day(4)));
    }

    #[tokio::test]
    async fn test_future_day_cannot_be_claimed() {
        let h = harness("2026-03-02T10:00:00Z");
        assert!(matches!(h.claim(3).await, Err(AppError::Validation(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_produce_one_claim() {
        let h = harness("2026-03-02T10:00:00Z");
        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = h.ledger.clone();
            let (user, tz) = (h.user, h.tz);
            handles.push(tokio::spawn(async move {
                ledger.claim(user, tz, day(2), ClaimMethod::Auto).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(AppError::AlreadyClaimed(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(h.streak().await.current_streak, 1);
    }

    #[tokio::test]
    async fn test_missed_day_consumes_shield_and_keeps_streak() {
        let h = harness("2026-03-02T10:00:00Z");
        h.claim(2).await.unwrap();
        h.set_shields(1, 2, 0).await;

        h.at("2026-03-04T03:00:00Z");
        let resolution = h.ledger.validate_day(h.user, h.tz, day(3)).await.unwrap();
        assert_eq!(
            resolution,
            DayResolution::Shielded {
                kind: ShieldKind::Freeze
            }
        );
        assert_eq!(h.shields().await, (0, 2, 0));

        let record = h.store.get_day(h.user, day(3)).await.unwrap().unwrap();
        assert!(record.is_shielded());
        assert_eq!(h.streak().await.current_streak, 1);

        // Re-running validation is a no-op.
        let again = h.ledger.validate_day(h.user, h.tz, day(3)).await.unwrap();
        assert_eq!(again, DayResolution::AlreadyResolved);
        assert_eq!(h.shields().await, (0, 2, 0));

        let receipt = h.claim(4).await.unwrap();
        assert_eq!(receipt.effect, ClaimEffect::Extended);
        assert_eq!(receipt.current_streak, 2);
    }

    #[tokio::test]
    async fn test_missed_day_without_shield_breaks_streak() {
        let h = harness("2026-03-02T10:00:00Z");
        h.claim(2).await.unwrap();
        h.at("2026-03-03T10:00:00Z");
        h.claim(3).await.unwrap();

        h.at("2026-03-05T04:00:00Z");
        let resolution = h.ledger.validate_day(h.user, h.tz, day(4)).await.unwrap();
        assert_eq!(resolution, DayResolution::Broken { lost_streak: 2 });

        let streak = h.streak().await;
        assert_eq!(streak.current_streak, 0);
        assert_eq!(streak.longest_streak, 2);
        assert_eq!(streak.status, StreakStatus::Active);

        let receipt = h.claim(5).await.unwrap();
        assert_eq!(receipt.effect, ClaimEffect::Started);
        assert_eq!(receipt.current_streak, 1);
    }

    #[tokio::test]
    async fn test_validation_refuses_open_window() {
        let h = harness("2026-03-03T02:00:00Z");
        assert!(matches!(
            h.ledger.validate_day(h.user, h.tz, day(2)).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_closed_days_skips_idle_days() {
        let h = harness("2026-03-02T10:00:00Z");
        h.claim(2).await.unwrap();
        h.set_shields(0, 0, 1).await;

        h.at("2026-03-07T12:00:00Z");
        let resolved = h
            .ledger
            .resolve_closed_days(h.user, h.tz, day(7))
            .await
            .unwrap();
        let resolutions: Vec<_> = resolved.iter().map(|r| (r.date, r.resolution)).collect();
        assert_eq!(
            resolutions,
            vec![
                (
                    day(3),
                    DayResolution::Shielded {
                        kind: ShieldKind::Purchased
                    }
                ),
                (day(4), DayResolution::Broken { lost_streak: 1 }),
            ]
        );
        assert!(h
            .ledger
            .resolve_closed_days(h.user, h.tz, day(7))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_paused_days_neither_consume_nor_break() {
        let h = harness("2026-03-02T10:00:00Z");
        h.claim(2).await.unwrap();
        h.set_shields(1, 0, 0).await;
        h.ledger.pause(h.user, h.tz, day(5)).await.unwrap();
        assert!(matches!(h.claim(2).await, Err(AppError::StreakPaused)));

        h.at("2026-03-05T12:00:00Z");
        let resolved = h
            .ledger
            .resolve_closed_days(h.user, h.tz, day(5))
            .await
            .unwrap();
        assert!(resolved
            .iter()
            .all(|r| r.resolution == DayResolution::Exempt));
        assert_eq!(h.shields().await, (1, 0, 0));

        h.ledger.resume(h.user, h.tz).await.unwrap();
        let receipt = h.claim(5).await.unwrap();
        assert_eq!(receipt.effect, ClaimEffect::Extended);
        assert_eq!(receipt.current_streak, 2);
    }

    #[tokio::test]
    async fn test_resume_day_is_exempt_from_validation() {
        let h = harness("2026-03-02T10:00:00Z");
        h.claim(2).await.unwrap();
        h.ledger.pause(h.user, h.tz, day(10)).await.unwrap();

        h.at("2026-03-04T10:00:00Z");
        h.ledger.resume(h.user, h.tz).await.unwrap();

        h.at("2026-03-05T04:00:00Z");
        assert_eq!(
            h.ledger.validate_day(h.user, h.tz, day(4)).await.unwrap(),
            DayResolution::Exempt
        );
        assert_eq!(h.streak().await.current_streak, 1);
    }

    #[tokio::test]
    async fn test_resume_requires_pause() {
        let h = harness("2026-03-02T10:00:00Z");
        assert!(matches!(
            h.ledger.resume(h.user, h.tz).await,
            Err(AppError::NotPaused)
        ));
    }

    #[tokio::test]
    async fn test_pause_expires_on_its_own() {
        let h = harness("2026-03-02T10:00:00Z");
        h.claim(2).await.unwrap();
        h.ledger.pause(h.user, h.tz, day(3)).await.unwrap();

        h.at("2026-03-04T10:00:00Z");
        let receipt = h.claim(4).await.unwrap();
        assert_eq!(receipt.effect, ClaimEffect::Extended);
        let streak = h.streak().await;
        assert_eq!(streak.status, StreakStatus::Active);
        assert_eq!(streak.pause_end_date, None);
    }

    #[tokio::test]
    async fn test_explicit_shield_without_inventory_leaves_streak() {
        let h = harness("2026-03-02T10:00:00Z");
        h.claim(2).await.unwrap();

        h.at("2026-03-04T10:00:00Z");
        assert!(matches!(
            h.ledger.apply_shield(h.user, h.tz, day(3)).await,
            Err(AppError::NoShieldsAvailable)
        ));
        assert_eq!(h.streak().await.current_streak, 1);
        assert!(h.store.get_day(h.user, day(3)).await.unwrap().is_none());

        h.set_shields(0, 1, 0).await;
        let applied = h.ledger.apply_shield(h.user, h.tz, day(3)).await.unwrap();
        assert_eq!(applied.kind, ShieldKind::Milestone);
        assert_eq!(applied.current_streak, 1);
    }

    #[tokio::test]
    async fn test_failed_shield_spend_releases_the_day() {
        let h = harness("2026-03-02T10:00:00Z");
        h.claim(2).await.unwrap();
        h.ledger.record_activity(h.user, day(3)).await.unwrap();

        h.at("2026-03-04T10:00:00Z");
        assert!(matches!(
            h.ledger.apply_shield(h.user, h.tz, day(3)).await,
            Err(AppError::NoShieldsAvailable)
        ));
        let record = h.store.get_day(h.user, day(3)).await.unwrap().unwrap();
        assert!(!record.claimed);
        assert_eq!(record.claim_method, None);
        assert!(record.has_underlying_data);
    }

    #[tokio::test]
    async fn test_shield_is_not_spent_on_a_claimed_day() {
        let h = harness("2026-03-02T10:00:00Z");
        h.claim(2).await.unwrap();
        h.set_shields(2, 0, 3).await;
        // A claim whose counter write has not landed yet.
        h.store
            .insert_claim_if_absent(h.user, day(3), ClaimMethod::Auto, utc("2026-03-03T10:00:00Z"))
            .await
            .unwrap();

        h.at("2026-03-04T10:00:00Z");
        assert!(matches!(
            h.ledger.apply_shield(h.user, h.tz, day(3)).await,
            Err(AppError::AlreadyClaimed(_))
        ));
        assert_eq!(h.shields().await, (2, 0, 3));

        let resolved = h
            .ledger
            .resolve_closed_days(h.user, h.tz, day(3))
            .await
            .unwrap();
        assert_eq!(resolved[0].resolution, DayResolution::AlreadyResolved);
        assert_eq!(h.streak().await.current_streak, 2);
        assert_eq!(h.shields().await, (2, 0, 3));
    }

    /// Delegates to a memory store but can refuse every streak write.
    #[derive(Default)]
    struct RefusingStore {
        inner: MemoryStreakStore,
        refuse_streak_writes: AtomicBool,
    }

    #[async_trait]
    impl StreakStore for RefusingStore {
        async fn get_or_create_streak(&self, user_id: Uuid) -> Result<UserStreak, AppError> {
            self.inner.get_or_create_streak(user_id).await
        }

        async fn compare_and_set_streak(
            &self,
            expected_version: i64,
            next: &UserStreak,
        ) -> Result<bool, AppError> {
            if self.refuse_streak_writes.load(Ordering::SeqCst) {
                return Ok(false);
            }
            self.inner.compare_and_set_streak(expected_version, next).await
        }

        async fn list_streaks_page(
            &self,
            after: Option<Uuid>,
            limit: usize,
        ) -> Result<Vec<UserStreak>, AppError> {
            self.inner.list_streaks_page(after, limit).await
        }

        async fn get_day(
            &self,
            user_id: Uuid,
            date: NaiveDate,
        ) -> Result<Option<DailyClaimRecord>, AppError> {
            self.inner.get_day(user_id, date).await
        }

        async fn list_days(
            &self,
            user_id: Uuid,
            from: NaiveDate,
            to: NaiveDate,
        ) -> Result<Vec<DailyClaimRecord>, AppError> {
            self.inner.list_days(user_id, from, to).await
        }

        async fn mark_underlying_data(&self, user_id: Uuid, date: NaiveDate) -> Result<(), AppError> {
            self.inner.mark_underlying_data(user_id, date).await
        }

        async fn insert_claim_if_absent(
            &self,
            user_id: Uuid,
            date: NaiveDate,
            method: ClaimMethod,
            claimed_at: DateTime<Utc>,
        ) -> Result<bool, AppError> {
            self.inner
                .insert_claim_if_absent(user_id, date, method, claimed_at)
                .await
        }

        async fn release_shield_claim(&self, user_id: Uuid, date: NaiveDate) -> Result<(), AppError> {
            self.inner.release_shield_claim(user_id, date).await
        }

        async fn get_or_create_inventory(&self, user_id: Uuid) -> Result<ShieldInventory, AppError> {
            self.inner.get_or_create_inventory(user_id).await
        }

        async fn compare_and_set_inventory(
            &self,
            expected_version: i64,
            next: &ShieldInventory,
        ) -> Result<bool, AppError> {
            self.inner.compare_and_set_inventory(expected_version, next).await
        }

        async fn record_milestone_if_absent(
            &self,
            user_id: Uuid,
            threshold: i32,
            badge_id: &str,
            earned_at: DateTime<Utc>,
        ) -> Result<bool, AppError> {
            self.inner
                .record_milestone_if_absent(user_id, threshold, badge_id, earned_at)
                .await
        }

        async fn list_milestones(&self, user_id: Uuid) -> Result<Vec<EarnedMilestone>, AppError> {
            self.inner.list_milestones(user_id).await
        }
    }

    #[tokio::test]
    async fn test_claim_with_lost_counter_write_is_counted_later() {
        let store = Arc::new(RefusingStore::default());
        let clock = Arc::new(FixedClock::new(utc("2026-03-02T10:00:00Z")));
        let resolver = TimeResolver::new(clock.clone());
        let shields = ShieldService::new(store.clone(), resolver.clone());
        let ledger = StreakLedger::new(store.clone(), shields, resolver);
        let (user, tz) = (Uuid::new_v4(), UserTimezone::parse("UTC").unwrap());
        ledger.load(user, tz).await.unwrap();

        store.refuse_streak_writes.store(true, Ordering::SeqCst);
        assert!(matches!(
            ledger.claim(user, tz, day(2), ClaimMethod::Manual).await,
            Err(AppError::StorageConflict(_))
        ));
        assert!(ledger.is_claimed(user, day(2)).await.unwrap());
        assert_eq!(ledger.streak(user).await.unwrap().current_streak, 0);

        store.refuse_streak_writes.store(false, Ordering::SeqCst);
        assert!(matches!(
            ledger.claim(user, tz, day(2), ClaimMethod::Manual).await,
            Err(AppError::AlreadyClaimed(_))
        ));
        let settled = ledger.settle(user, tz).await.unwrap();
        assert_eq!(settled.current_streak, 1);
        assert_eq!(settled.covered_through, Some(day(2)));

        // Lose the write again on the next day; the day after repairs it.
        clock.set(utc("2026-03-03T10:00:00Z"));
        store.refuse_streak_writes.store(true, Ordering::SeqCst);
        assert!(ledger.claim(user, tz, day(3), ClaimMethod::Auto).await.is_err());
        store.refuse_streak_writes.store(false, Ordering::SeqCst);

        clock.set(utc("2026-03-04T10:00:00Z"));
        let receipt = ledger.claim(user, tz, day(4), ClaimMethod::Manual).await.unwrap();
        assert_eq!(receipt.effect, ClaimEffect::Extended);
        assert_eq!(receipt.current_streak, 3);
    }

    #[tokio::test]
    async fn test_timezone_is_remembered() {
        let h = harness("2026-03-02T10:00:00Z");
        assert!(matches!(
            h.ledger.resolve_timezone(h.user, None).await,
            Err(AppError::MissingParameter(_))
        ));
        let tokyo = UserTimezone::parse("Asia/Tokyo").unwrap();
        h.ledger.load(h.user, tokyo).await.unwrap();
        assert_eq!(h.ledger.resolve_timezone(h.user, None).await.unwrap(), tokyo);
        assert!(matches!(
            h.ledger.resolve_timezone(h.user, Some("Not/AZone")).await,
            Err(AppError::InvalidTimezone(_))
        ));
    }
}
