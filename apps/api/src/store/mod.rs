//! Persistence seam for streak and shield state.
//!
//! The engine only relies on per-key atomic primitives: get-or-create,
//! version-checked compare-and-set, and insert-if-absent. Backends enforce them
//! with their own constraints, never with advisory checks in the caller.
//!
//! `AppState` holds an `Arc<dyn StreakStore>`: `PgStreakStore` in production,
//! `MemoryStreakStore` in tests and local runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::milestone::EarnedMilestone;
use crate::models::shield::ShieldInventory;
use crate::models::streak::{ClaimMethod, DailyClaimRecord, UserStreak};

pub use memory::MemoryStreakStore;
pub use postgres::PgStreakStore;

#[async_trait]
pub trait StreakStore: Send + Sync {
    /// Returns the user's streak row, creating the zero state on first use.
    async fn get_or_create_streak(&self, user_id: Uuid) -> Result<UserStreak, AppError>;

    /// Replaces the streak row with `next` iff its stored version still equals
    /// `expected_version`. The stored version becomes `expected_version + 1`.
    async fn compare_and_set_streak(
        &self,
        expected_version: i64,
        next: &UserStreak,
    ) -> Result<bool, AppError>;

    /// Up to `limit` streak rows with `user_id > after`, ordered by `user_id`.
    /// The scheduled jobs walk the user population with this keyset cursor.
    async fn list_streaks_page(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<UserStreak>, AppError>;

    async fn get_day(
        &self,
        user_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<DailyClaimRecord>, AppError>;

    /// Records in `from..=to`, ordered by date.
    async fn list_days(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyClaimRecord>, AppError>;

    /// Flags that metric data exists for the day, creating an unclaimed row if needed.
    async fn mark_underlying_data(&self, user_id: Uuid, date: NaiveDate) -> Result<(), AppError>;

    /// Atomically claims `(user_id, date)`. Returns `false` when the day was
    /// already claimed by anyone, in which case nothing is written.
    async fn insert_claim_if_absent(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        method: ClaimMethod,
        claimed_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Undoes a `ShieldApplied` claim whose shield could not be consumed. The
    /// row survives as an unclaimed marker if it carries underlying data.
    async fn release_shield_claim(&self, user_id: Uuid, date: NaiveDate) -> Result<(), AppError>;

    async fn get_or_create_inventory(&self, user_id: Uuid) -> Result<ShieldInventory, AppError>;

    /// Same contract as `compare_and_set_streak`, for the shield inventory.
    async fn compare_and_set_inventory(
        &self,
        expected_version: i64,
        next: &ShieldInventory,
    ) -> Result<bool, AppError>;

    /// Returns `false` if the milestone was already recorded for the user.
    async fn record_milestone_if_absent(
        &self,
        user_id: Uuid,
        threshold: i32,
        badge_id: &str,
        earned_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Earned milestones ordered by threshold.
    async fn list_milestones(&self, user_id: Uuid) -> Result<Vec<EarnedMilestone>, AppError>;
}
