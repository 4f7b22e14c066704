use std::sync::Arc;

use dispatch_service::{DashboardService, RequestLifecycle, RouteLifecycle};
use inventory_service::{InventoryLedger, TransferService};
use matching_engine::{BankMatchingEngine, DemandMatcher, EtaEstimator, RoutePlanner};
use shared::config::AppConfig;
use shared::repository::Store;
use shared::{Clock, EventBus, KeyedLocks};

use crate::websocket::SessionRegistry;

/// Everything the handlers share. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<EventBus>,
    pub ledger: Arc<InventoryLedger>,
    pub transfers: Arc<TransferService>,
    pub planner: Arc<RoutePlanner>,
    pub demand: Arc<DemandMatcher>,
    pub requests: Arc<RequestLifecycle>,
    pub routes: Arc<RouteLifecycle>,
    pub dashboard: Arc<DashboardService>,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: &AppConfig) -> Self {
        let locks = Arc::new(KeyedLocks::new());
        let events = Arc::new(EventBus::new(config.event_buffer));
        let ledger = Arc::new(
            InventoryLedger::new(store.clone(), locks.clone(), clock.clone(), events.clone())
                .with_expiry_flag_days(config.expiry_flag_days)
                .with_reserve_retries(config.reserve_retries),
        );
        let eta = Arc::new(EtaEstimator::from_config(config.eta_jitter_minutes));
        let matcher = Arc::new(BankMatchingEngine::new(store.clone(), ledger.clone()));
        let planner = Arc::new(RoutePlanner::new(store.clone(), eta.clone()));
        let demand = Arc::new(DemandMatcher::new(store.clone(), ledger.clone(), eta.clone()));
        let transfers = Arc::new(
            TransferService::new(store.clone(), locks.clone(), clock.clone(), events.clone())
                .with_policy(ledger.policy()),
        );
        let requests = Arc::new(RequestLifecycle::new(
            store.clone(),
            locks.clone(),
            clock.clone(),
            events.clone(),
            ledger.clone(),
            matcher,
            eta,
        ));
        let routes = Arc::new(RouteLifecycle::new(
            store.clone(),
            locks,
            clock.clone(),
            events.clone(),
            requests.clone(),
        ));
        let dashboard = Arc::new(DashboardService::new(
            store.clone(),
            clock.clone(),
            ledger.policy(),
        ));

        Self {
            store,
            clock,
            events,
            ledger,
            transfers,
            planner,
            demand,
            requests,
            routes,
            dashboard,
            sessions: Arc::new(SessionRegistry::new()),
        }
    }
}
