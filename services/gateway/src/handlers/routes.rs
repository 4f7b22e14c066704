use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use dispatch_service::{RouteCompletion, RouteProgress, TrackingView};
use shared::models::{Route, TrackPoint};
use shared::types::{RequestId, RouteId, RouteStatus};

use crate::error::ApiResult;
use crate::extract::CurrentActor;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RouteListQuery {
    pub status: Option<String>,
}

/// Both halves are optional so a missing one is reported as a validation error.
#[derive(Debug, Default, Deserialize)]
pub struct ProgressUpdate {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct SimulateProgress {
    pub fraction: f64,
}

pub async fn list_routes(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<RouteListQuery>,
) -> ApiResult<Json<Vec<Route>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<RouteStatus>)
        .transpose()?;
    Ok(Json(state.routes.list(&actor, status).await?))
}

pub async fn get_route(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<Route>> {
    let id: RouteId = id.parse()?;
    Ok(Json(state.routes.get(&actor, id).await?))
}

pub async fn route_progress(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<RouteProgress>> {
    let id: RouteId = id.parse()?;
    Ok(Json(state.routes.progress(&actor, id).await?))
}

pub async fn start_route(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<Route>> {
    let id: RouteId = id.parse()?;
    Ok(Json(state.routes.start(&actor, id).await?))
}

pub async fn record_progress(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    Json(update): Json<ProgressUpdate>,
) -> ApiResult<Json<TrackPoint>> {
    let id: RouteId = id.parse()?;
    let point = state
        .routes
        .record_progress(&actor, id, update.latitude, update.longitude)
        .await?;
    Ok(Json(point))
}

pub async fn simulate_progress(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    Json(body): Json<SimulateProgress>,
) -> ApiResult<Json<TrackPoint>> {
    let id: RouteId = id.parse()?;
    Ok(Json(
        state.routes.simulate_progress(&actor, id, body.fraction).await?,
    ))
}

pub async fn complete_route(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<RouteCompletion>> {
    let id: RouteId = id.parse()?;
    Ok(Json(state.routes.complete(&actor, id).await?))
}

pub async fn tracking(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(request_id): Path<String>,
) -> ApiResult<Json<TrackingView>> {
    let request_id: RequestId = request_id.parse()?;
    Ok(Json(state.routes.tracking(&actor, request_id).await?))
}
