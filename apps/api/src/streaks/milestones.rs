use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::milestone::EarnedMilestone;
use crate::shields::service::ShieldService;
use crate::store::StreakStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Milestone {
    pub threshold: i32,
    pub badge_id: String,
}

/// Fixed, strictly ascending list of streak thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MilestoneCatalog {
    milestones: Vec<Milestone>,
}

impl MilestoneCatalog {
    pub fn new(thresholds: &[i32]) -> Result<Self> {
        if thresholds.is_empty() {
            bail!("milestone catalog is empty");
        }
        for pair in thresholds.windows(2) {
            if pair[1] == pair[0] {
                bail!("duplicate milestone threshold {}", pair[0]);
            }
            if pair[1] < pair[0] {
                bail!("milestone thresholds must ascend ({} after {})", pair[1], pair[0]);
            }
        }
        if thresholds[0] <= 0 {
            bail!("milestone thresholds must be positive");
        }
        Ok(Self {
            milestones: thresholds
                .iter()
                .map(|&threshold| Milestone {
                    threshold,
                    badge_id: format!("streak_{threshold}_days"),
                })
                .collect(),
        })
    }

    /// Parses a comma-separated threshold list such as `3,7,14,30`.
    pub fn parse(raw: &str) -> Result<Self> {
        let thresholds = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<i32>()
                    .with_context(|| format!("invalid milestone threshold '{s}'"))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(&thresholds)
    }

    /// Milestones with `threshold <= streak`, ascending.
    pub fn reached(&self, streak: i32) -> std::slice::Iter<'_, Milestone> {
        let end = self.milestones.partition_point(|m| m.threshold <= streak);
        self.milestones[..end].iter()
    }

    /// First milestone strictly above `streak`, if the catalog is not exhausted.
    pub fn next_after(&self, streak: i32) -> Option<&Milestone> {
        self.milestones.iter().find(|m| m.threshold > streak)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NextMilestone {
    pub threshold: i32,
    pub badge_id: String,
    pub days_remaining: i32,
}

impl NextMilestone {
    pub fn for_streak(catalog: &MilestoneCatalog, streak: i32) -> Option<Self> {
        catalog.next_after(streak).map(|m| NextMilestone {
            threshold: m.threshold,
            badge_id: m.badge_id.clone(),
            days_remaining: m.threshold - streak,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MilestoneProgress {
    pub newly_earned: Option<Milestone>,
    pub shield_granted: bool,
    pub next_milestone: Option<NextMilestone>,
}

/// Highest reached milestone that is not yet in `earned`. Pure.
pub fn pending_milestone<'a>(
    catalog: &'a MilestoneCatalog,
    streak: i32,
    earned: &[EarnedMilestone],
) -> Option<&'a Milestone> {
    catalog
        .reached(streak)
        .rev()
        .find(|m| !earned.iter().any(|e| e.threshold == m.threshold))
}

#[derive(Clone)]
pub struct MilestoneEvaluator {
    catalog: Arc<MilestoneCatalog>,
    store: Arc<dyn StreakStore>,
    shields: ShieldService,
}

impl MilestoneEvaluator {
    pub fn new(
        catalog: Arc<MilestoneCatalog>,
        store: Arc<dyn StreakStore>,
        shields: ShieldService,
    ) -> Self {
        Self {
            catalog,
            store,
            shields,
        }
    }

    pub fn catalog(&self) -> &MilestoneCatalog {
        &self.catalog
    }

    /// Records the pending milestone for `streak` once and rewards it with a
    /// milestone shield. Re-evaluating an earned milestone is a no-op.
    pub async fn evaluate(
        &self,
        user_id: Uuid,
        streak: i32,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<MilestoneProgress, AppError> {
        let next_milestone = NextMilestone::for_streak(&self.catalog, streak);
        let earned = self.store.list_milestones(user_id).await?;

        let Some(milestone) = pending_milestone(&self.catalog, streak, &earned) else {
            return Ok(MilestoneProgress {
                newly_earned: None,
                shield_granted: false,
                next_milestone,
            });
        };

        let inserted = self
            .store
            .record_milestone_if_absent(user_id, milestone.threshold, &milestone.badge_id, now)
            .await?;
        if !inserted {
            // A concurrent evaluation recorded it first.
            return Ok(MilestoneProgress {
                newly_earned: None,
                shield_granted: false,
                next_milestone,
            });
        }

        info!(
            user_id = %user_id,
            threshold = milestone.threshold,
            badge_id = %milestone.badge_id,
            "Milestone earned"
        );

        let shield_granted = match self.shields.grant_milestone_shield(user_id).await {
            Ok(granted) => granted,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Failed to grant milestone shield");
                false
            }
        };

        Ok(MilestoneProgress {
            newly_earned: Some(milestone.clone()),
            shield_granted,
            next_milestone,
        })
    }

    pub async fn earned(&self, user_id: Uuid) -> Result<Vec<EarnedMilestone>, AppError> {
        self.store.list_milestones(user_id).await
    }
}
