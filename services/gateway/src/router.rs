use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers::{analytics, inventory, registry, requests, routes, transfers};
use crate::state::AppState;
use crate::websocket;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(analytics::health))
        // Emergency requests
        .route(
            "/api/emergency_requests",
            post(requests::create_request).get(requests::list_requests),
        )
        .route("/api/emergency_requests/:id", get(requests::get_request))
        .route("/api/emergency_requests/:id/items", get(requests::request_items))
        .route("/api/emergency_requests/:id/approve", post(requests::approve_request))
        .route("/api/emergency_requests/:id/cancel", post(requests::cancel_request))
        // Routes and tracking
        .route("/api/routes", get(routes::list_routes))
        .route("/api/routes/tracking/:request_id", get(routes::tracking))
        .route("/api/routes/:id", get(routes::get_route))
        .route("/api/routes/:id/progress", get(routes::route_progress).post(routes::record_progress))
        .route("/api/routes/:id/start", post(routes::start_route))
        .route("/api/routes/:id/complete", post(routes::complete_route))
        .route("/api/routes/:id/simulate", post(routes::simulate_progress))
        // Inventory
        .route(
            "/api/blood_units",
            post(inventory::register_unit).get(inventory::list_units),
        )
        .route("/api/blood_units/flagged", get(inventory::flagged_units))
        .route("/api/blood_units/sweep_expired", post(inventory::sweep_expired))
        .route("/api/blood_units/demand_matching", get(inventory::demand_matching))
        .route("/api/blood_units/:id/demand_matching", get(inventory::unit_demand))
        // Transfers
        .route(
            "/api/transfers",
            post(transfers::create_transfer).get(transfers::list_transfers),
        )
        .route("/api/transfers/:id", get(transfers::get_transfer))
        .route("/api/transfers/:id/complete", post(transfers::complete_transfer))
        .route("/api/transfers/:id/cancel", post(transfers::cancel_transfer))
        // Network registry
        .route(
            "/api/hospitals",
            post(registry::register_hospital).get(registry::list_hospitals),
        )
        .route(
            "/api/blood_banks",
            post(registry::register_bank).get(registry::list_banks),
        )
        .route(
            "/api/drivers",
            post(registry::register_driver).get(registry::list_drivers),
        )
        // Analytics
        .route(
            "/api/routing/:from_kind/:from_id/:to_kind/:to_id",
            get(analytics::routing),
        )
        .route("/api/analytics/dashboard", get(analytics::dashboard))
        .route("/ws/events", get(websocket::events_socket))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
