//! Claim Orchestrator: single entry point for explicit check-ins, auto-claims
//! fired by metric entry, and explicit shield activation.
//!
//! Auto-claim is a post-commit side effect of a metric write. It runs on its own
//! task and every failure, panics included, is absorbed into an
//! `AutoClaimOutcome` so the metric write never sees it. Nothing is retried.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::streak::ClaimMethod;
use crate::streaks::clock::UserTimezone;
use crate::streaks::ledger::{ClaimEffect, ClaimReceipt, ResolvedDay, ShieldApplication, StreakLedger};
use crate::streaks::milestones::{MilestoneEvaluator, MilestoneProgress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// A value typed by the user (weight, mood, energy, measurement).
    ManualEntry,
    /// Historical batch import from an external health-data source.
    BulkSync,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckInOutcome {
    Claimed {
        receipt: ClaimReceipt,
        milestone: Option<MilestoneProgress>,
        resolved_days: Vec<ResolvedDay>,
    },
    AlreadyClaimed {
        date: NaiveDate,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AutoClaimOutcome {
    Claimed {
        receipt: ClaimReceipt,
        milestone: Option<MilestoneProgress>,
    },
    AlreadyClaimed {
        date: NaiveDate,
    },
    SkippedBulkSync,
    Disabled,
    Failed {
        code: &'static str,
        reason: String,
    },
}

#[derive(Clone)]
pub struct ClaimOrchestrator {
    ledger: StreakLedger,
    milestones: MilestoneEvaluator,
    auto_claim_enabled: bool,
}

impl ClaimOrchestrator {
    pub fn new(
        ledger: StreakLedger,
        milestones: MilestoneEvaluator,
        auto_claim_enabled: bool,
    ) -> Self {
        Self {
            ledger,
            milestones,
            auto_claim_enabled,
        }
    }

    /// Explicit check-in. Defaults to the user's local today.
    pub async fn check_in(
        &self,
        user_id: Uuid,
        tz: UserTimezone,
        date: Option<NaiveDate>,
    ) -> Result<CheckInOutcome, AppError> {
        let date = date.unwrap_or_else(|| self.ledger.resolver().today(tz));
        self.claim(user_id, tz, date, ClaimMethod::Manual).await
    }

    async fn claim(
        &self,
        user_id: Uuid,
        tz: UserTimezone,
        date: NaiveDate,
        method: ClaimMethod,
    ) -> Result<CheckInOutcome, AppError> {
        // A late validation job must not turn a shieldable miss into a restart.
        let resolved_days = self
            .ledger
            .resolve_closed_days(user_id, tz, date - Duration::days(1))
            .await?;

        match self.ledger.claim(user_id, tz, date, method).await {
            Ok(receipt) => {
                let milestone = self.evaluate_milestones(user_id, &receipt).await;
                Ok(CheckInOutcome::Claimed {
                    receipt,
                    milestone,
                    resolved_days,
                })
            }
            Err(AppError::AlreadyClaimed(date)) => {
                // Counts a claim whose counter write was lost earlier.
                self.ledger.settle(user_id, tz).await?;
                Ok(CheckInOutcome::AlreadyClaimed { date })
            }
            Err(AppError::StorageConflict(msg)) => {
                if self.ledger.is_claimed(user_id, date).await? {
                    self.ledger.settle(user_id, tz).await?;
                    Ok(CheckInOutcome::AlreadyClaimed { date })
                } else {
                    Err(AppError::StorageConflict(msg))
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn evaluate_milestones(
        &self,
        user_id: Uuid,
        receipt: &ClaimReceipt,
    ) -> Option<MilestoneProgress> {
        if matches!(receipt.effect, ClaimEffect::Backfilled | ClaimEffect::Pending) {
            return None;
        }
        let now = self.ledger.resolver().now();
        match self
            .milestones
            .evaluate(user_id, receipt.current_streak, now)
            .await
        {
            Ok(progress) => Some(progress),
            Err(e) => {
                // The claim is committed; milestone evaluation reruns on the next claim.
                warn!(user_id = %user_id, error = %e, "Milestone evaluation failed");
                None
            }
        }
    }

    /// Best-effort claim fired after a metric write commits. Never returns an error.
    pub async fn try_auto_claim(
        &self,
        user_id: Uuid,
        timezone: Option<String>,
        date: Option<NaiveDate>,
        source: TriggerSource,
    ) -> AutoClaimOutcome {
        let this = self.clone();
        let task = tokio::spawn(async move {
            this.auto_claim(user_id, timezone.as_deref(), date, source)
                .await
        });

        match task.await {
            Ok(Ok(outcome)) => {
                if let AutoClaimOutcome::AlreadyClaimed { date } = &outcome {
                    debug!(user_id = %user_id, date = %date, "Auto-claim skipped, day already claimed");
                }
                outcome
            }
            Ok(Err(e)) => {
                warn!(
                    user_id = %user_id,
                    source = ?source,
                    code = e.code(),
                    error = %e,
                    "Auto-claim failed"
                );
                AutoClaimOutcome::Failed {
                    code: e.code(),
                    reason: e.to_string(),
                }
            }
            Err(join_error) => {
                error!(user_id = %user_id, error = %join_error, "Auto-claim task aborted");
                AutoClaimOutcome::Failed {
                    code: "INTERNAL_ERROR",
                    reason: "auto-claim task aborted".to_string(),
                }
            }
        }
    }

    async fn auto_claim(
        &self,
        user_id: Uuid,
        timezone: Option<&str>,
        date: Option<NaiveDate>,
        source: TriggerSource,
    ) -> Result<AutoClaimOutcome, AppError> {
        let tz = self.ledger.resolve_timezone(user_id, timezone).await?;
        let date = date.unwrap_or_else(|| self.ledger.resolver().today(tz));
        self.ledger.record_activity(user_id, date).await?;

        if source == TriggerSource::BulkSync {
            return Ok(AutoClaimOutcome::SkippedBulkSync);
        }
        if !self.auto_claim_enabled {
            return Ok(AutoClaimOutcome::Disabled);
        }

        Ok(
            match self.claim(user_id, tz, date, ClaimMethod::Auto).await? {
                CheckInOutcome::Claimed {
                    receipt, milestone, ..
                } => AutoClaimOutcome::Claimed { receipt, milestone },
                CheckInOutcome::AlreadyClaimed { date } => AutoClaimOutcome::AlreadyClaimed { date },
            },
        )
    }

    /// User-requested shield for a missed day. Earlier closed days are
    /// resolved first so the request targets the next uncovered day.
    pub async fn activate_shield(
        &self,
        user_id: Uuid,
        tz: UserTimezone,
        date: NaiveDate,
    ) -> Result<ShieldApplication, AppError> {
        self.ledger
            .resolve_closed_days(user_id, tz, date - Duration::days(1))
            .await?;
        self.ledger.apply_shield(user_id, tz, date).await
    }
}
