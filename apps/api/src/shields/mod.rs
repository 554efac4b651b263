// Shield Inventory: capped pool of freezes, milestone shields and purchased
// shields, consumed in that order.

pub mod handlers;
pub mod inventory;
pub mod service;
