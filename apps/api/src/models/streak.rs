use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreakStatus {
    Active,
    Paused,
    Broken,
}

impl StreakStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreakStatus::Active => "active",
            StreakStatus::Paused => "paused",
            StreakStatus::Broken => "broken",
        }
    }
}

impl FromStr for StreakStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(StreakStatus::Active),
            "paused" => Ok(StreakStatus::Paused),
            "broken" => Ok(StreakStatus::Broken),
            other => Err(format!("unknown streak status '{other}'")),
        }
    }
}

impl fmt::Display for StreakStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClaimMethod {
    Manual,
    Auto,
    ShieldApplied,
}

impl ClaimMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimMethod::Manual => "manual",
            ClaimMethod::Auto => "auto",
            ClaimMethod::ShieldApplied => "shield_applied",
        }
    }
}

impl FromStr for ClaimMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(ClaimMethod::Manual),
            "auto" => Ok(ClaimMethod::Auto),
            "shield_applied" => Ok(ClaimMethod::ShieldApplied),
            other => Err(format!("unknown claim method '{other}'")),
        }
    }
}

/// Per-user streak counters. `version` is bumped by every successful
/// compare-and-set so concurrent writers detect each other.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserStreak {
    pub user_id: Uuid,
    pub current_streak: i32,
    pub longest_streak: i32,
    /// Last day claimed by the user (manual or auto), user-local.
    pub last_claim_date: Option<NaiveDate>,
    /// Last day protected by a claim, a shield, or a pause. Continuity and
    /// validation are both measured from here.
    pub covered_through: Option<NaiveDate>,
    pub status: StreakStatus,
    /// Present only while `status = Paused`.
    pub pause_end_date: Option<NaiveDate>,
    /// Day a pause ended; that day and earlier are exempt from validation.
    pub resumed_on: Option<NaiveDate>,
    /// Last IANA timezone the user supplied; the jobs resolve local days with it.
    pub timezone: Option<String>,
    pub version: i64,
}

impl UserStreak {
    /// Zero state used when a user first interacts with the engine.
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            current_streak: 0,
            longest_streak: 0,
            last_claim_date: None,
            covered_through: None,
            status: StreakStatus::Active,
            pause_end_date: None,
            resumed_on: None,
            timezone: None,
            version: 0,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.status == StreakStatus::Paused
    }
}

/// One row per `(user_id, claim_date)`. Once `claimed` is set the row never changes
/// again apart from the underlying-data marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyClaimRecord {
    pub user_id: Uuid,
    pub claim_date: NaiveDate,
    pub claimed: bool,
    pub claim_method: Option<ClaimMethod>,
    pub has_underlying_data: bool,
}

impl DailyClaimRecord {
    pub fn is_shielded(&self) -> bool {
        self.claimed && self.claim_method == Some(ClaimMethod::ShieldApplied)
    }
}
