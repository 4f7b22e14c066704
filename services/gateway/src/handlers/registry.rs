//! Registration of the network's sites and couriers. Admin only for writes.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use tracing::info;

use shared::logger::mask;
use shared::models::{BloodBank, Driver, Hospital};
use shared::repository::Repository;
use shared::types::{Actor, BankId, Coordinates, DriverId, HospitalId};
use shared::CoreError;

use crate::error::ApiResult;
use crate::extract::CurrentActor;
use crate::state::AppState;

/// Shared shape of hospital and blood bank registrations.
#[derive(Debug, Deserialize)]
pub struct NewSite {
    pub name: String,
    #[serde(default)]
    pub address: String,
    pub city: String,
    #[serde(default)]
    pub state: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub contact_person: String,
    #[serde(default)]
    pub contact_email: String,
    #[serde(default)]
    pub contact_phone: String,
}

#[derive(Debug, Deserialize)]
pub struct NewDriver {
    pub name: String,
    pub phone: String,
    pub vehicle_id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

fn ensure_admin(actor: &Actor) -> Result<(), CoreError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(CoreError::forbidden(format!(
            "{} may not register network members",
            actor.role.name()
        )))
    }
}

fn required(field: &str, value: &str) -> Result<String, CoreError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CoreError::validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

struct ValidSite {
    name: String,
    city: String,
    location: Coordinates,
}

fn validate_site(site: &NewSite) -> Result<ValidSite, CoreError> {
    Ok(ValidSite {
        name: required("name", &site.name)?,
        city: required("city", &site.city)?,
        location: Coordinates::new(site.latitude, site.longitude)?,
    })
}

pub async fn register_hospital(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(site): Json<NewSite>,
) -> ApiResult<(StatusCode, Json<Hospital>)> {
    ensure_admin(&actor)?;
    let valid = validate_site(&site)?;
    let hospital = Hospital {
        id: HospitalId::new(),
        name: valid.name,
        address: site.address.trim().to_string(),
        city: valid.city,
        state: site.state.trim().to_string(),
        location: valid.location,
        contact_person: site.contact_person.trim().to_string(),
        contact_email: site.contact_email.trim().to_string(),
        contact_phone: site.contact_phone.trim().to_string(),
        created_at: state.clock.now(),
    };
    state
        .store
        .hospitals()
        .insert(&hospital)
        .await
        .map_err(CoreError::from)?;
    info!(
        hospital_id = %hospital.id,
        city = %hospital.city,
        contact = %mask(&hospital.contact_email),
        "hospital registered"
    );
    Ok((StatusCode::CREATED, Json(hospital)))
}

pub async fn list_hospitals(
    State(state): State<AppState>,
    CurrentActor(_actor): CurrentActor,
) -> ApiResult<Json<Vec<Hospital>>> {
    let hospitals = state
        .store
        .hospitals()
        .fetch_all()
        .await
        .map_err(CoreError::from)?;
    Ok(Json(hospitals))
}

pub async fn register_bank(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(site): Json<NewSite>,
) -> ApiResult<(StatusCode, Json<BloodBank>)> {
    ensure_admin(&actor)?;
    let valid = validate_site(&site)?;
    let bank = BloodBank {
        id: BankId::new(),
        name: valid.name,
        address: site.address.trim().to_string(),
        city: valid.city,
        state: site.state.trim().to_string(),
        location: valid.location,
        contact_person: site.contact_person.trim().to_string(),
        contact_email: site.contact_email.trim().to_string(),
        contact_phone: site.contact_phone.trim().to_string(),
        created_at: state.clock.now(),
    };
    state
        .store
        .banks()
        .insert(&bank)
        .await
        .map_err(CoreError::from)?;
    info!(
        bank_id = %bank.id,
        city = %bank.city,
        contact = %mask(&bank.contact_email),
        "blood bank registered"
    );
    Ok((StatusCode::CREATED, Json(bank)))
}

pub async fn list_banks(
    State(state): State<AppState>,
    CurrentActor(_actor): CurrentActor,
) -> ApiResult<Json<Vec<BloodBank>>> {
    let banks = state
        .store
        .banks()
        .fetch_all()
        .await
        .map_err(CoreError::from)?;
    Ok(Json(banks))
}

pub async fn register_driver(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(input): Json<NewDriver>,
) -> ApiResult<(StatusCode, Json<Driver>)> {
    ensure_admin(&actor)?;
    let location = match (input.latitude, input.longitude) {
        (None, None) => None,
        (lat, lon) => Some(Coordinates::from_parts(lat, lon)?),
    };
    let driver = Driver {
        id: DriverId::new(),
        name: required("name", &input.name)?,
        phone: required("phone", &input.phone)?,
        vehicle_id: required("vehicle_id", &input.vehicle_id)?,
        location,
        available: true,
        created_at: state.clock.now(),
    };
    state
        .store
        .drivers()
        .insert(&driver)
        .await
        .map_err(CoreError::from)?;
    info!(
        driver_id = %driver.id,
        phone = %mask(&driver.phone),
        "driver registered"
    );
    Ok((StatusCode::CREATED, Json(driver)))
}

pub async fn list_drivers(
    State(state): State<AppState>,
    CurrentActor(_actor): CurrentActor,
) -> ApiResult<Json<Vec<Driver>>> {
    let drivers = state
        .store
        .drivers()
        .fetch_all()
        .await
        .map_err(CoreError::from)?;
    Ok(Json(drivers))
}
