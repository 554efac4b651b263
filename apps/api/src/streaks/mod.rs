// Streak claiming engine.
// Implements: timezone-aware claim windows, the per-day claim state machine,
// milestone evaluation, and the auto-claim bulkhead for metric entry.
// All "now" reads go through clock::TimeResolver.

pub mod clock;
pub mod handlers;
pub mod ledger;
pub mod milestones;
pub mod orchestrator;
pub mod queries;
