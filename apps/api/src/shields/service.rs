use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::shield::{ShieldInventory, ShieldKind};
use crate::shields::inventory::SHIELD_CAP;
use crate::store::StreakStore;
use crate::streaks::clock::{TimeResolver, UserTimezone};

/// Retries before a contended compare-and-set is reported as `StorageConflict`.
pub const MAX_CAS_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Serialize)]
pub struct ShieldSummary {
    pub freezes_available: i32,
    pub milestone_shields: i32,
    pub purchased_shields: i32,
    pub total: i32,
    pub cap: i32,
    pub next_to_consume: Option<ShieldKind>,
    pub last_freeze_reset_at: Option<DateTime<Utc>>,
    /// Next local Monday midnight; absent when the user's timezone is unknown.
    pub next_freeze_reset_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeeklyGrant {
    Granted,
    /// Reset recorded but the pool was already full.
    CapReached,
    AlreadyReset,
    NotMonday,
}

#[derive(Clone)]
pub struct ShieldService {
    store: Arc<dyn StreakStore>,
    resolver: TimeResolver,
}

impl ShieldService {
    pub fn new(store: Arc<dyn StreakStore>, resolver: TimeResolver) -> Self {
        Self { store, resolver }
    }

    /// Read-modify-write of the user's inventory under compare-and-set.
    /// `f` runs against a fresh copy on every attempt; unchanged copies are not written.
    async fn mutate<T, F>(&self, user_id: Uuid, f: F) -> Result<(T, ShieldInventory), AppError>
    where
        T: Send,
        F: Fn(&mut ShieldInventory) -> Result<T, AppError> + Send + Sync,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.store.get_or_create_inventory(user_id).await?;
            let mut next = current.clone();
            let value = f(&mut next)?;
            debug_assert!(next.total() <= SHIELD_CAP);
            if next == current {
                return Ok((value, current));
            }
            if self
                .store
                .compare_and_set_inventory(current.version, &next)
                .await?
            {
                next.version = current.version + 1;
                return Ok((value, next));
            }
            debug!(user_id = %user_id, "shield inventory changed concurrently, retrying");
        }
        Err(AppError::StorageConflict(format!(
            "shield inventory for user {user_id}"
        )))
    }

    pub async fn inventory(&self, user_id: Uuid) -> Result<ShieldInventory, AppError> {
        self.store.get_or_create_inventory(user_id).await
    }

    /// Spends one shield in consumption order.
    pub async fn consume(&self, user_id: Uuid) -> Result<ShieldKind, AppError> {
        let (kind, inventory) = self
            .mutate(user_id, |inv| inv.take_one().ok_or(AppError::NoShieldsAvailable))
            .await?;
        info!(
            user_id = %user_id,
            kind = %kind,
            remaining = inventory.total(),
            "Shield consumed"
        );
        Ok(kind)
    }

    pub async fn purchase_freeze(&self, user_id: Uuid) -> Result<ShieldInventory, AppError> {
        let ((), inventory) = self.mutate(user_id, |inv| inv.add_purchased()).await?;
        info!(user_id = %user_id, total = inventory.total(), "Shield purchased");
        Ok(inventory)
    }

    /// Reward for a newly earned milestone. Dropped silently at the cap.
    pub async fn grant_milestone_shield(&self, user_id: Uuid) -> Result<bool, AppError> {
        let (granted, _) = self
            .mutate(user_id, |inv| Ok(inv.grant(ShieldKind::Milestone)))
            .await?;
        if granted {
            info!(user_id = %user_id, "Milestone shield granted");
        } else {
            debug!(user_id = %user_id, "Milestone shield dropped, inventory full");
        }
        Ok(granted)
    }

    /// Weekly free freeze. Only applies on the user's local Monday and at most
    /// once per local week, judged from `last_freeze_reset_at`.
    pub async fn grant_weekly_freeze(
        &self,
        user_id: Uuid,
        tz: UserTimezone,
    ) -> Result<WeeklyGrant, AppError> {
        if !self.resolver.is_local_monday(tz) {
            return Ok(WeeklyGrant::NotMonday);
        }
        let week_start = self.resolver.current_week_start(tz);
        let now = self.resolver.now();

        let (outcome, inventory) = self
            .mutate(user_id, |inv| {
                if inv.last_freeze_reset_at.is_some_and(|at| at >= week_start) {
                    return Ok(WeeklyGrant::AlreadyReset);
                }
                inv.last_freeze_reset_at = Some(now);
                if inv.grant(ShieldKind::Freeze) {
                    Ok(WeeklyGrant::Granted)
                } else {
                    Ok(WeeklyGrant::CapReached)
                }
            })
            .await?;

        if outcome != WeeklyGrant::AlreadyReset {
            info!(
                user_id = %user_id,
                outcome = ?outcome,
                freezes = inventory.freezes_available,
                "Weekly freeze reset"
            );
        }
        Ok(outcome)
    }

    pub async fn summary(
        &self,
        user_id: Uuid,
        tz: Option<UserTimezone>,
    ) -> Result<ShieldSummary, AppError> {
        let inventory = self.inventory(user_id).await?;
        Ok(ShieldSummary {
            freezes_available: inventory.freezes_available,
            milestone_shields: inventory.milestone_shields,
            purchased_shields: inventory.purchased_shields,
            total: inventory.total(),
            cap: SHIELD_CAP,
            next_to_consume: inventory.next_to_consume(),
            last_freeze_reset_at: inventory.last_freeze_reset_at,
            next_freeze_reset_at: tz.map(|tz| self.resolver.next_week_start(tz)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStreakStore;
    use crate::streaks::clock::FixedClock;
    use chrono::Duration;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    // 2026-03-02 is a Monday.
    fn setup(now: &str) -> (ShieldService, Arc<MemoryStreakStore>, Arc<FixedClock>) {
        let store = Arc::new(MemoryStreakStore::new());
        let clock = Arc::new(FixedClock::new(utc(now)));
        let service = ShieldService::new(store.clone(), TimeResolver::new(clock.clone()));
        (service, store, clock)
    }

    async fn seed(store: &MemoryStreakStore, user: Uuid, freezes: i32, milestone: i32, purchased: i32) {
        let current = store.get_or_create_inventory(user).await.unwrap();
        let next = ShieldInventory {
            freezes_available: freezes,
            milestone_shields: milestone,
            purchased_shields: purchased,
            ..current.clone()
        };
        assert!(store
            .compare_and_set_inventory(current.version, &next)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_weekly_grant_tops_up_to_cap() {
        let (service, store, _) = setup("2026-03-02T09:00:00Z");
        let tz = UserTimezone::parse("UTC").unwrap();
        let user = Uuid::new_v4();
        seed(&store, user, 4, 0, 0).await;

        assert_eq!(
            service.grant_weekly_freeze(user, tz).await.unwrap(),
            WeeklyGrant::Granted
        );
        assert_eq!(service.inventory(user).await.unwrap().freezes_available, 5);
    }

    #[tokio::test]
    async fn test_weekly_grant_at_cap_changes_nothing() {
        let (service, store, _) = setup("2026-03-02T09:00:00Z");
        let tz = UserTimezone::parse("UTC").unwrap();
        let user = Uuid::new_v4();
        seed(&store, user, 1, 2, 2).await;

        assert_eq!(
            service.grant_weekly_freeze(user, tz).await.unwrap(),
            WeeklyGrant::CapReached
        );
        let inv = service.inventory(user).await.unwrap();
        assert_eq!((inv.freezes_available, inv.milestone_shields, inv.purchased_shields), (1, 2, 2));
    }

    #[tokio::test]
    async fn test_weekly_grant_is_idempotent_within_week() {
        let (service, _, clock) = setup("2026-03-02T01:00:00Z");
        let tz = UserTimezone::parse("UTC").unwrap();
        let user = Uuid::new_v4();

        assert_eq!(
            service.grant_weekly_freeze(user, tz).await.unwrap(),
            WeeklyGrant::Granted
        );
        clock.advance(Duration::hours(12));
        assert_eq!(
            service.grant_weekly_freeze(user, tz).await.unwrap(),
            WeeklyGrant::AlreadyReset
        );
        assert_eq!(service.inventory(user).await.unwrap().freezes_available, 1);

        clock.advance(Duration::days(7));
        assert_eq!(
            service.grant_weekly_freeze(user, tz).await.unwrap(),
            WeeklyGrant::Granted
        );
        assert_eq!(service.inventory(user).await.unwrap().freezes_available, 2);
    }

    #[tokio::test]
    async fn test_weekly_grant_waits_for_local_monday() {
        // Monday 09:00 UTC is still Sunday in Honolulu.
        let (service, _, _) = setup("2026-03-02T09:00:00Z");
        let tz = UserTimezone::parse("Pacific/Honolulu").unwrap();
        let user = Uuid::new_v4();
        assert_eq!(
            service.grant_weekly_freeze(user, tz).await.unwrap(),
            WeeklyGrant::NotMonday
        );
        assert_eq!(service.inventory(user).await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_consume_follows_priority_and_reports_empty() {
        let (service, store, _) = setup("2026-03-04T12:00:00Z");
        let user = Uuid::new_v4();
        seed(&store, user, 1, 2, 0).await;

        assert_eq!(service.consume(user).await.unwrap(), ShieldKind::Freeze);
        assert_eq!(service.consume(user).await.unwrap(), ShieldKind::Milestone);
        let inv = service.inventory(user).await.unwrap();
        assert_eq!((inv.freezes_available, inv.milestone_shields, inv.purchased_shields), (0, 1, 0));

        assert_eq!(service.consume(user).await.unwrap(), ShieldKind::Milestone);
        assert!(matches!(
            service.consume(user).await,
            Err(AppError::NoShieldsAvailable)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_consumers_never_double_spend() {
        let (service, store, _) = setup("2026-03-04T12:00:00Z");
        let user = Uuid::new_v4();
        seed(&store, user, 1, 1, 0).await;

        let mut handles = Vec::new();
        for _ in 0..6 {
            let service = service.clone();
            handles.push(tokio::spawn(async move { service.consume(user).await }));
        }
        let mut spent = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => spent += 1,
                Err(AppError::NoShieldsAvailable) | Err(AppError::StorageConflict(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(spent <= 2);
        let inv = service.inventory(user).await.unwrap();
        assert_eq!(inv.total(), 2 - spent);
    }

    #[tokio::test]
    async fn test_purchase_rejected_when_full() {
        let (service, store, _) = setup("2026-03-04T12:00:00Z");
        let user = Uuid::new_v4();
        seed(&store, user, 3, 1, 0).await;

        let inv = service.purchase_freeze(user).await.unwrap();
        assert_eq!(inv.purchased_shields, 1);
        assert!(matches!(
            service.purchase_freeze(user).await,
            Err(AppError::InventoryFull)
        ));
    }

    #[tokio::test]
    async fn test_summary_reports_next_reset() {
        let (service, store, _) = setup("2026-03-04T12:00:00Z");
        let user = Uuid::new_v4();
        seed(&store, user, 1, 0, 1).await;
        let tz = UserTimezone::parse("UTC").unwrap();

        let summary = service.summary(user, Some(tz)).await.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.cap, SHIELD_CAP);
        assert_eq!(summary.next_to_consume, Some(ShieldKind::Freeze));
        assert_eq!(summary.next_freeze_reset_at, Some(utc("2026-03-09T00:00:00Z")));
    }
}
