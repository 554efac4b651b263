use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::milestone::EarnedMilestone;
use crate::models::shield::ShieldInventory;
use crate::models::streak::{ClaimMethod, DailyClaimRecord, UserStreak};
use crate::store::StreakStore;

/// Postgres-backed store. Claim uniqueness comes from the
/// `(user_id, claim_date)` primary key; counters use `WHERE version = $n` updates.
#[derive(Clone)]
pub struct PgStreakStore {
    pool: PgPool,
}

impl PgStreakStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct UserStreakRow {
    user_id: Uuid,
    current_streak: i32,
    longest_streak: i32,
    last_claim_date: Option<NaiveDate>,
    covered_through: Option<NaiveDate>,
    status: String,
    pause_end_date: Option<NaiveDate>,
    resumed_on: Option<NaiveDate>,
    timezone: Option<String>,
    version: i64,
}

impl TryFrom<UserStreakRow> for UserStreak {
    type Error = AppError;

    fn try_from(row: UserStreakRow) -> Result<Self, Self::Error> {
        Ok(UserStreak {
            user_id: row.user_id,
            current_streak: row.current_streak,
            longest_streak: row.longest_streak,
            last_claim_date: row.last_claim_date,
            covered_through: row.covered_through,
            status: row
                .status
                .parse()
                .map_err(|e: String| AppError::Internal(anyhow::anyhow!(e)))?,
            pause_end_date: row.pause_end_date,
            resumed_on: row.resumed_on,
            timezone: row.timezone,
            version: row.version,
        })
    }
}

#[derive(Debug, FromRow)]
struct DailyClaimRow {
    user_id: Uuid,
    claim_date: NaiveDate,
    claimed: bool,
    claim_method: Option<String>,
    has_underlying_data: bool,
}

impl TryFrom<DailyClaimRow> for DailyClaimRecord {
    type Error = AppError;

    fn try_from(row: DailyClaimRow) -> Result<Self, Self::Error> {
        let claim_method = row
            .claim_method
            .as_deref()
            .map(str::parse::<ClaimMethod>)
            .transpose()
            .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
        Ok(DailyClaimRecord {
            user_id: row.user_id,
            claim_date: row.claim_date,
            claimed: row.claimed,
            claim_method,
            has_underlying_data: row.has_underlying_data,
        })
    }
}

#[derive(Debug, FromRow)]
struct ShieldInventoryRow {
    user_id: Uuid,
    freezes_available: i32,
    milestone_shields: i32,
    purchased_shields: i32,
    last_freeze_reset_at: Option<DateTime<Utc>>,
    version: i64,
}

impl From<ShieldInventoryRow> for ShieldInventory {
    fn from(row: ShieldInventoryRow) -> Self {
        ShieldInventory {
            user_id: row.user_id,
            freezes_available: row.freezes_available,
            milestone_shields: row.milestone_shields,
            purchased_shields: row.purchased_shields,
            last_freeze_reset_at: row.last_freeze_reset_at,
            version: row.version,
        }
    }
}

#[derive(Debug, FromRow)]
struct EarnedMilestoneRow {
    user_id: Uuid,
    threshold: i32,
    badge_id: String,
    earned_at: DateTime<Utc>,
}

const STREAK_COLUMNS: &str = "user_id, current_streak, longest_streak, last_claim_date, \
     covered_through, status, pause_end_date, resumed_on, timezone, version";

#[async_trait]
impl StreakStore for PgStreakStore {
    async fn get_or_create_streak(&self, user_id: Uuid) -> Result<UserStreak, AppError> {
        sqlx::query("INSERT INTO user_streaks (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        let row: UserStreakRow = sqlx::query_as(&format!(
            "SELECT {STREAK_COLUMNS} FROM user_streaks WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn compare_and_set_streak(
        &self,
        expected_version: i64,
        next: &UserStreak,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE user_streaks
            SET current_streak = $3,
                longest_streak = $4,
                last_claim_date = $5,
                covered_through = $6,
                status = $7,
                pause_end_date = $8,
                resumed_on = $9,
                timezone = $10,
                version = version + 1,
                updated_at = now()
            WHERE user_id = $1 AND version = $2
            "#,
        )
        .bind(next.user_id)
        .bind(expected_version)
        .bind(next.current_streak)
        .bind(next.longest_streak)
        .bind(next.last_claim_date)
        .bind(next.covered_through)
        .bind(next.status.as_str())
        .bind(next.pause_end_date)
        .bind(next.resumed_on)
        .bind(next.timezone.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_streaks_page(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<UserStreak>, AppError> {
        let rows: Vec<UserStreakRow> = sqlx::query_as(&format!(
            "SELECT {STREAK_COLUMNS} FROM user_streaks \
             WHERE $1::uuid IS NULL OR user_id > $1 \
             ORDER BY user_id \
             LIMIT $2"
        ))
        .bind(after)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(UserStreak::try_from).collect()
    }

    async fn get_day(
        &self,
        user_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<DailyClaimRecord>, AppError> {
        let row: Option<DailyClaimRow> = sqlx::query_as(
            r#"
            SELECT user_id, claim_date, claimed, claim_method, has_underlying_data
            FROM daily_claims
            WHERE user_id = $1 AND claim_date = $2
            "#,
        )
        .bind(user_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DailyClaimRecord::try_from).transpose()
    }

    async fn list_days(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyClaimRecord>, AppError> {
        let rows: Vec<DailyClaimRow> = sqlx::query_as(
            r#"
            SELECT user_id, claim_date, claimed, claim_method, has_underlying_data
            FROM daily_claims
            WHERE user_id = $1 AND claim_date BETWEEN $2 AND $3
            ORDER BY claim_date ASC
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DailyClaimRecord::try_from).collect()
    }

    async fn mark_underlying_data(&self, user_id: Uuid, date: NaiveDate) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO daily_claims (user_id, claim_date, has_underlying_data)
            VALUES ($1, $2, TRUE)
            ON CONFLICT (user_id, claim_date)
            DO UPDATE SET has_underlying_data = TRUE
            "#,
        )
        .bind(user_id)
        .bind(date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_claim_if_absent(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        method: ClaimMethod,
        claimed_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        // The conflict branch only fires for unclaimed marker rows; a claimed
        // row fails the WHERE and affects nothing.
        let result = sqlx::query(
            r#"
            INSERT INTO daily_claims (user_id, claim_date, claimed, claim_method, claimed_at)
            VALUES ($1, $2, TRUE, $3, $4)
            ON CONFLICT (user_id, claim_date)
            DO UPDATE SET claimed = TRUE,
                          claim_method = EXCLUDED.claim_method,
                          claimed_at = EXCLUDED.claimed_at
            WHERE daily_claims.claimed = FALSE
            "#,
        )
        .bind(user_id)
        .bind(date)
        .bind(method.as_str())
        .bind(claimed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_shield_claim(&self, user_id: Uuid, date: NaiveDate) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            DELETE FROM daily_claims
            WHERE user_id = $1 AND claim_date = $2
              AND claim_method = 'shield_applied' AND has_underlying_data = FALSE
            "#,
        )
        .bind(user_id)
        .bind(date)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            UPDATE daily_claims
            SET claimed = FALSE, claim_method = NULL, claimed_at = NULL
            WHERE user_id = $1 AND claim_date = $2 AND claim_method = 'shield_applied'
            "#,
        )
        .bind(user_id)
        .bind(date)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_or_create_inventory(&self, user_id: Uuid) -> Result<ShieldInventory, AppError> {
        sqlx::query(
            "INSERT INTO shield_inventories (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        let row: ShieldInventoryRow = sqlx::query_as(
            r#"
            SELECT user_id, freezes_available, milestone_shields, purchased_shields,
                   last_freeze_reset_at, version
            FROM shield_inventories
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn compare_and_set_inventory(
        &self,
        expected_version: i64,
        next: &ShieldInventory,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE shield_inventories
            SET freezes_available = $3,
                milestone_shields = $4,
                purchased_shields = $5,
                last_freeze_reset_at = $6,
                version = version + 1
            WHERE user_id = $1 AND version = $2
            "#,
        )
        .bind(next.user_id)
        .bind(expected_version)
        .bind(next.freezes_available)
        .bind(next.milestone_shields)
        .bind(next.purchased_shields)
        .bind(next.last_freeze_reset_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_milestone_if_absent(
        &self,
        user_id: Uuid,
        threshold: i32,
        badge_id: &str,
        earned_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO earned_milestones (user_id, threshold, badge_id, earned_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, threshold) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(threshold)
        .bind(badge_id)
        .bind(earned_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_milestones(&self, user_id: Uuid) -> Result<Vec<EarnedMilestone>, AppError> {
        let rows: Vec<EarnedMilestoneRow> = sqlx::query_as(
            r#"
            SELECT user_id, threshold, badge_id, earned_at
            FROM earned_milestones
            WHERE user_id = $1
            ORDER BY threshold ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| EarnedMilestone {
                user_id: row.user_id,
                threshold: row.threshold,
                badge_id: row.badge_id,
                earned_at: row.earned_at,
            })
            .collect())
    }
}
