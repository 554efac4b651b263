use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::milestone::EarnedMilestone;
use crate::models::shield::ShieldInventory;
use crate::models::streak::{ClaimMethod, DailyClaimRecord, UserStreak};
use crate::store::StreakStore;

/// In-process store. Each map sits behind its own mutex, so every primitive is
/// atomic for its key just like the row-level guarantees of `PgStreakStore`.
#[derive(Default)]
pub struct MemoryStreakStore {
    streaks: Mutex<BTreeMap<Uuid, UserStreak>>,
    days: Mutex<BTreeMap<(Uuid, NaiveDate), DailyClaimRecord>>,
    inventories: Mutex<HashMap<Uuid, ShieldInventory>>,
    milestones: Mutex<BTreeMap<(Uuid, i32), EarnedMilestone>>,
}

impl MemoryStreakStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl StreakStore for MemoryStreakStore {
    async fn get_or_create_streak(&self, user_id: Uuid) -> Result<UserStreak, AppError> {
        let mut streaks = lock(&self.streaks);
        Ok(streaks
            .entry(user_id)
            .or_insert_with(|| UserStreak::new(user_id))
            .clone())
    }

    async fn compare_and_set_streak(
        &self,
        expected_version: i64,
        next: &UserStreak,
    ) -> Result<bool, AppError> {
        let mut streaks = lock(&self.streaks);
        match streaks.get_mut(&next.user_id) {
            Some(current) if current.version == expected_version => {
                *current = UserStreak {
                    version: expected_version + 1,
                    ..next.clone()
                };
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(AppError::NotFound(format!("streak for user {}", next.user_id))),
        }
    }

    async fn list_streaks_page(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<UserStreak>, AppError> {
        let streaks = lock(&self.streaks);
        let page = match after {
            Some(cursor) => streaks
                .range((Bound::Excluded(cursor), Bound::Unbounded))
                .map(|(_, s)| s.clone())
                .take(limit)
                .collect(),
            None => streaks.values().take(limit).cloned().collect(),
        };
        Ok(page)
    }

    async fn get_day(
        &self,
        user_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<DailyClaimRecord>, AppError> {
        Ok(lock(&self.days).get(&(user_id, date)).cloned())
    }

    async fn list_days(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyClaimRecord>, AppError> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(lock(&self.days)
            .range((user_id, from)..=(user_id, to))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn mark_underlying_data(&self, user_id: Uuid, date: NaiveDate) -> Result<(), AppError> {
        lock(&self.days)
            .entry((user_id, date))
            .or_insert_with(|| DailyClaimRecord {
                user_id,
                claim_date: date,
                claimed: false,
                claim_method: None,
                has_underlying_data: false,
            })
            .has_underlying_data = true;
        Ok(())
    }

    async fn insert_claim_if_absent(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        method: ClaimMethod,
        _claimed_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut days = lock(&self.days);
        let record = days.entry((user_id, date)).or_insert_with(|| DailyClaimRecord {
            user_id,
            claim_date: date,
            claimed: false,
            claim_method: None,
            has_underlying_data: false,
        });
        if record.claimed {
            return Ok(false);
        }
        record.claimed = true;
        record.claim_method = Some(method);
        Ok(true)
    }

    async fn release_shield_claim(&self, user_id: Uuid, date: NaiveDate) -> Result<(), AppError> {
        let mut days = lock(&self.days);
        let Some(record) = days.get_mut(&(user_id, date)) else {
            return Ok(());
        };
        if record.claim_method != Some(ClaimMethod::ShieldApplied) {
            return Ok(());
        }
        if record.has_underlying_data {
            record.claimed = false;
            record.claim_method = None;
        } else {
            days.remove(&(user_id, date));
        }
        Ok(())
    }

    async fn get_or_create_inventory(&self, user_id: Uuid) -> Result<ShieldInventory, AppError> {
        let mut inventories = lock(&self.inventories);
        Ok(inventories
            .entry(user_id)
            .or_insert_with(|| ShieldInventory::new(user_id))
            .clone())
    }

    async fn compare_and_set_inventory(
        &self,
        expected_version: i64,
        next: &ShieldInventory,
    ) -> Result<bool, AppError> {
        let mut inventories = lock(&self.inventories);
        match inventories.get_mut(&next.user_id) {
            Some(current) if current.version == expected_version => {
                *current = ShieldInventory {
                    version: expected_version + 1,
                    ..next.clone()
                };
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(AppError::NotFound(format!(
                "shield inventory for user {}",
                next.user_id
            ))),
        }
    }

    async fn record_milestone_if_absent(
        &self,
        user_id: Uuid,
        threshold: i32,
        badge_id: &str,
        earned_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut milestones = lock(&self.milestones);
        if milestones.contains_key(&(user_id, threshold)) {
            return Ok(false);
        }
        milestones.insert(
            (user_id, threshold),
            EarnedMilestone {
                user_id,
                threshold,
                badge_id: badge_id.to_string(),
                earned_at,
            },
        );
        Ok(true)
    }

    async fn list_milestones(&self, user_id: Uuid) -> Result<Vec<EarnedMilestone>, AppError> {
        Ok(lock(&self.milestones)
            .range((user_id, i32::MIN)..=(user_id, i32::MAX))
            .map(|(_, m)| m.clone())
            .collect())
    }
}
