use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use inventory_service::{FlaggedUnit, NewUnit};
use matching_engine::UnitDemand;
use shared::models::{BloodUnit, UnitFilter};
use shared::repository::Repository;
use shared::types::{Actor, BankId, BloodType, Role, UnitId, UnitStatus};
use shared::CoreError;

use crate::error::ApiResult;
use crate::extract::CurrentActor;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct UnitQuery {
    pub bank_id: Option<BankId>,
    pub blood_type: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SweepReport {
    pub expired: Vec<UnitId>,
}

/// Banks are pinned to their own stock; admins may pick any bank or none.
fn scoped_bank(actor: &Actor, requested: Option<BankId>) -> Result<Option<BankId>, CoreError> {
    match actor.role {
        Role::Admin => Ok(requested),
        Role::BloodBank(own) => match requested {
            Some(other) if other != own => Err(CoreError::forbidden(format!(
                "blood bank {own} may not view stock of {other}"
            ))),
            _ => Ok(Some(own)),
        },
        _ => Err(CoreError::forbidden(format!(
            "{} may not view unit stock",
            actor.role.name()
        ))),
    }
}

pub async fn register_unit(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(input): Json<NewUnit>,
) -> ApiResult<(StatusCode, Json<BloodUnit>)> {
    let allowed = actor.is_admin() || actor.bank_id() == Some(input.bank_id);
    if !allowed {
        return Err(CoreError::forbidden(format!(
            "{} may not register units for blood bank {}",
            actor.role.name(),
            input.bank_id
        ))
        .into());
    }
    let unit = state.ledger.intake(input).await?;
    Ok((StatusCode::CREATED, Json(unit)))
}

/// Units with their effective status as of today.
pub async fn list_units(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<UnitQuery>,
) -> ApiResult<Json<Vec<BloodUnit>>> {
    let bank_id = scoped_bank(&actor, query.bank_id)?;
    let blood_type = query
        .blood_type
        .as_deref()
        .map(str::parse::<BloodType>)
        .transpose()?;
    let status = query
        .status
        .as_deref()
        .map(str::parse::<UnitStatus>)
        .transpose()?;

    let filter = UnitFilter {
        bank_id,
        blood_type,
        ..Default::default()
    };
    let today = state.ledger.today();
    let policy = state.ledger.policy();
    let units = state
        .store
        .units()
        .fetch_where(&filter)
        .await
        .map_err(CoreError::from)?
        .iter()
        .map(|unit| policy.refresh(unit, today))
        .filter(|unit| status.map_or(true, |s| unit.status == s))
        .collect();
    Ok(Json(units))
}

pub async fn flagged_units(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<UnitQuery>,
) -> ApiResult<Json<Vec<FlaggedUnit>>> {
    let bank_id = scoped_bank(&actor, query.bank_id)?;
    Ok(Json(state.ledger.flagged_units(bank_id).await?))
}

/// Where each flagged unit in scope could still be used.
pub async fn demand_matching(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<UnitQuery>,
) -> ApiResult<Json<Vec<UnitDemand>>> {
    let bank_id = scoped_bank(&actor, query.bank_id)?;
    Ok(Json(state.demand.flagged(bank_id).await?))
}

pub async fn unit_demand(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<UnitDemand>> {
    let id: UnitId = id.parse()?;
    let bank_id = scoped_bank(&actor, None)?;
    Ok(Json(state.demand.for_unit(id, bank_id).await?))
}

pub async fn sweep_expired(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Json<SweepReport>> {
    if !actor.is_admin() {
        return Err(CoreError::forbidden("admin role required").into());
    }
    let expired = state.ledger.sweep_expired().await?;
    Ok(Json(SweepReport { expired }))
}
