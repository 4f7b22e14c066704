use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use dispatch_service::Dashboard;
use matching_engine::RoutingEstimate;
use shared::types::{EntityRef, Urgency};

use crate::error::ApiResult;
use crate::extract::CurrentActor;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub event_subscribers: usize,
    pub event_sessions: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        event_subscribers: state.events.subscriber_count(),
        event_sessions: state.sessions.len(),
    })
}

pub async fn dashboard(
    State(state): State<AppState>,
    CurrentActor(_actor): CurrentActor,
) -> ApiResult<Json<Dashboard>> {
    Ok(Json(state.dashboard.snapshot().await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct RoutingQuery {
    /// Defaults to medium.
    pub urgency: Option<String>,
}

pub async fn routing(
    State(state): State<AppState>,
    CurrentActor(_actor): CurrentActor,
    Path((from_kind, from_id, to_kind, to_id)): Path<(String, String, String, String)>,
    Query(query): Query<RoutingQuery>,
) -> ApiResult<Json<RoutingEstimate>> {
    let from = EntityRef::parse(&from_kind, &from_id)?;
    let to = EntityRef::parse(&to_kind, &to_id)?;
    let urgency = match query.urgency.as_deref() {
        Some(u) => u.parse()?,
        None => Urgency::Medium,
    };
    Ok(Json(state.planner.estimate(from, to, urgency).await?))
}
