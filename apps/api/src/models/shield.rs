use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ShieldKind {
    Freeze,
    Milestone,
    Purchased,
}

impl ShieldKind {
    /// Consumption priority: free weekly freezes first, purchased shields last.
    pub const CONSUMPTION_ORDER: [ShieldKind; 3] =
        [ShieldKind::Freeze, ShieldKind::Milestone, ShieldKind::Purchased];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShieldKind::Freeze => "freeze",
            ShieldKind::Milestone => "milestone",
            ShieldKind::Purchased => "purchased",
        }
    }
}

impl FromStr for ShieldKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "freeze" => Ok(ShieldKind::Freeze),
            "milestone" => Ok(ShieldKind::Milestone),
            "purchased" => Ok(ShieldKind::Purchased),
            other => Err(format!("unknown shield kind '{other}'")),
        }
    }
}

impl fmt::Display for ShieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShieldInventory {
    pub user_id: Uuid,
    pub freezes_available: i32,
    pub milestone_shields: i32,
    pub purchased_shields: i32,
    pub last_freeze_reset_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl ShieldInventory {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            freezes_available: 0,
            milestone_shields: 0,
            purchased_shields: 0,
            last_freeze_reset_at: None,
            version: 0,
        }
    }
}
