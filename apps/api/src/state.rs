use std::sync::Arc;

use crate::config::Config;
use crate::shields::service::ShieldService;
use crate::store::StreakStore;
use crate::streaks::clock::{Clock, TimeResolver};
use crate::streaks::ledger::StreakLedger;
use crate::streaks::milestones::MilestoneEvaluator;
use crate::streaks::orchestrator::ClaimOrchestrator;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Pluggable persistence. Postgres in production, in-memory in tests.
    pub store: Arc<dyn StreakStore>,
    pub shields: ShieldService,
    pub ledger: StreakLedger,
    pub milestones: MilestoneEvaluator,
    pub orchestrator: ClaimOrchestrator,
}

impl AppState {
    /// Wires every service onto one store and one clock.
    pub fn new(config: Config, store: Arc<dyn StreakStore>, clock: Arc<dyn Clock>) -> Self {
        let resolver = TimeResolver::new(clock);
        let shields = ShieldService::new(store.clone(), resolver.clone());
        let ledger = StreakLedger::new(store.clone(), shields.clone(), resolver);
        let milestones = MilestoneEvaluator::new(
            Arc::new(config.milestones.clone()),
            store.clone(),
            shields.clone(),
        );
        let orchestrator =
            ClaimOrchestrator::new(ledger.clone(), milestones.clone(), config.auto_claim_enabled);

        Self {
            config,
            store,
            shields,
            ledger,
            milestones,
            orchestrator,
        }
    }
}
