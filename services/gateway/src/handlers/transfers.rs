use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use inventory_service::{NewTransfer, TransferDetail};
use shared::models::Transfer;
use shared::types::{TransferId, TransferStatus};

use crate::error::ApiResult;
use crate::extract::CurrentActor;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TransferListQuery {
    pub status: Option<String>,
}

pub async fn create_transfer(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(input): Json<NewTransfer>,
) -> ApiResult<(StatusCode, Json<Transfer>)> {
    let transfer = state.transfers.create(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(transfer)))
}

pub async fn list_transfers(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<TransferListQuery>,
) -> ApiResult<Json<Vec<Transfer>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<TransferStatus>)
        .transpose()?;
    Ok(Json(state.transfers.list(&actor, status).await?))
}

pub async fn get_transfer(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<TransferDetail>> {
    let id: TransferId = id.parse()?;
    Ok(Json(state.transfers.get(&actor, id).await?))
}

pub async fn complete_transfer(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<Transfer>> {
    let id: TransferId = id.parse()?;
    Ok(Json(state.transfers.complete(&actor, id).await?))
}

pub async fn cancel_transfer(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<Transfer>> {
    let id: TransferId = id.parse()?;
    Ok(Json(state.transfers.cancel(&actor, id).await?))
}
