use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EarnedMilestone {
    pub user_id: Uuid,
    pub threshold: i32,
    pub badge_id: String,
    pub earned_at: DateTime<Utc>,
}
