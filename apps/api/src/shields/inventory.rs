//! Allocation rules for the capped shield pool. Pure functions over
//! `ShieldInventory`; the service layer persists the result with compare-and-set.

use crate::errors::AppError;
use crate::models::shield::{ShieldInventory, ShieldKind};

/// Maximum shields of all kinds a user may hold at once.
pub const SHIELD_CAP: i32 = 5;

impl ShieldInventory {
    pub fn total(&self) -> i32 {
        self.freezes_available + self.milestone_shields + self.purchased_shields
    }

    pub fn count(&self, kind: ShieldKind) -> i32 {
        match kind {
            ShieldKind::Freeze => self.freezes_available,
            ShieldKind::Milestone => self.milestone_shields,
            ShieldKind::Purchased => self.purchased_shields,
        }
    }

    fn slot_mut(&mut self, kind: ShieldKind) -> &mut i32 {
        match kind {
            ShieldKind::Freeze => &mut self.freezes_available,
            ShieldKind::Milestone => &mut self.milestone_shields,
            ShieldKind::Purchased => &mut self.purchased_shields,
        }
    }

    /// Kind the next `take_one` would spend.
    pub fn next_to_consume(&self) -> Option<ShieldKind> {
        ShieldKind::CONSUMPTION_ORDER
            .into_iter()
            .find(|kind| self.count(*kind) > 0)
    }

    /// Decrement-if-positive across the pool in consumption order.
    pub fn take_one(&mut self) -> Option<ShieldKind> {
        let kind = self.next_to_consume()?;
        *self.slot_mut(kind) -= 1;
        Some(kind)
    }

    /// Adds one unit unless the pool is full. Returns whether it was added.
    pub fn grant(&mut self, kind: ShieldKind) -> bool {
        if self.total() >= SHIELD_CAP {
            return false;
        }
        *self.slot_mut(kind) += 1;
        true
    }

    /// Purchases are rejected at the cap so the caller can refund the payment.
    pub fn add_purchased(&mut self) -> Result<(), AppError> {
        if self.grant(ShieldKind::Purchased) {
            Ok(())
        } else {
            Err(AppError::InventoryFull)
        }
    }
}
