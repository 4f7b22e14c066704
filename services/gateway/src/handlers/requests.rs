use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use dispatch_service::{Approval, ApproveOptions, NewRequest};
use shared::models::{EmergencyRequest, RequestItem};
use shared::types::{RequestId, RequestStatus};

use crate::error::ApiResult;
use crate::extract::CurrentActor;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RequestListQuery {
    pub status: Option<String>,
}

pub async fn create_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(input): Json<NewRequest>,
) -> ApiResult<(StatusCode, Json<EmergencyRequest>)> {
    let request = state.requests.create(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn list_requests(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<RequestListQuery>,
) -> ApiResult<Json<Vec<EmergencyRequest>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<RequestStatus>)
        .transpose()?;
    Ok(Json(state.requests.list(&actor, status).await?))
}

pub async fn get_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<EmergencyRequest>> {
    let id: RequestId = id.parse()?;
    Ok(Json(state.requests.get(&actor, id).await?))
}

pub async fn request_items(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<RequestItem>>> {
    let id: RequestId = id.parse()?;
    Ok(Json(state.requests.items(&actor, id).await?))
}

/// The body is optional; without one the first free driver is assigned.
pub async fn approve_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    options: Option<Json<ApproveOptions>>,
) -> ApiResult<Json<Approval>> {
    let id: RequestId = id.parse()?;
    let options = options.map(|Json(o)| o).unwrap_or_default();
    Ok(Json(state.requests.approve(&actor, id, options).await?))
}

pub async fn cancel_request(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<EmergencyRequest>> {
    let id: RequestId = id.parse()?;
    Ok(Json(state.requests.cancel(&actor, id).await?))
}
