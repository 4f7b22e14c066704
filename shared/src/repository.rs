//! Repository-style persistence boundary.
//!
//! Services only ever see these traits; the concrete backend (in-memory or
//! PostgreSQL) lives in the `storage` crate.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::{
    BloodBank, BloodUnit, Driver, EmergencyRequest, Hospital, RequestItem, Route, TrackPoint,
    Transfer,
};
use crate::types::{Coordinates, EntityId, EntityRef, UnitId, UnitStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("failed to decode {table} row: {reason}")]
    Decode { table: &'static str, reason: String },
    #[error("{table} row {id} does not exist")]
    Missing { table: &'static str, id: String },
    #[error("{table} row {id} already exists")]
    Duplicate { table: &'static str, id: String },
}

/// A single column value as both backends understand it.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Uuid(Uuid),
    OptUuid(Option<Uuid>),
    Text(String),
    Int(i64),
    Float(f64),
    OptFloat(Option<f64>),
    Bool(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    OptTimestamp(Option<DateTime<Utc>>),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl From<Option<DateTime<Utc>>> for Value {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        Value::OptTimestamp(value)
    }
}

impl From<Option<f64>> for Value {
    fn from(value: Option<f64>) -> Self {
        Value::OptFloat(value)
    }
}

/// Conjunction of equality predicates.
pub trait Filter: Default + Send + Sync {
    fn conditions(&self) -> Vec<(&'static str, Value)>;
}

pub trait Entity: Clone + Send + Sync + 'static {
    type Id: EntityId;
    type Filter: Filter;

    const TABLE: &'static str;

    fn id(&self) -> Self::Id;

    /// Every persisted column, `id` first.
    fn columns(&self) -> Vec<(&'static str, Value)>;

    fn matches(&self, filter: &Self::Filter) -> bool {
        let columns = self.columns();
        filter.conditions().iter().all(|(name, expected)| {
            columns
                .iter()
                .any(|(column, actual)| column == name && actual == expected)
        })
    }
}

#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    async fn fetch(&self, id: T::Id) -> Result<Option<T>, StoreError>;

    /// Rows matching `filter`, ascending by id.
    async fn fetch_where(&self, filter: &T::Filter) -> Result<Vec<T>, StoreError>;

    async fn insert(&self, entity: &T) -> Result<(), StoreError>;

    /// Fails with `StoreError::Missing` if the row is gone.
    async fn update(&self, entity: &T) -> Result<(), StoreError>;

    async fn delete(&self, id: T::Id) -> Result<bool, StoreError>;

    async fn fetch_all(&self) -> Result<Vec<T>, StoreError> {
        self.fetch_where(&T::Filter::default()).await
    }
}

#[async_trait]
pub trait UnitRepository: Repository<BloodUnit> {
    /// Sets `to` only if the stored status is still `from`. Returns whether the row changed.
    async fn transition_status(
        &self,
        id: UnitId,
        from: UnitStatus,
        to: UnitStatus,
    ) -> Result<bool, StoreError>;
}

pub trait Store: Send + Sync {
    fn hospitals(&self) -> &dyn Repository<Hospital>;
    fn banks(&self) -> &dyn Repository<BloodBank>;
    fn units(&self) -> &dyn UnitRepository;
    fn requests(&self) -> &dyn Repository<EmergencyRequest>;
    fn request_items(&self) -> &dyn Repository<RequestItem>;
    fn routes(&self) -> &dyn Repository<Route>;
    fn track_points(&self) -> &dyn Repository<TrackPoint>;
    fn drivers(&self) -> &dyn Repository<Driver>;
    fn transfers(&self) -> &dyn Repository<Transfer>;
}

/// A registered site with its position and display fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Site {
    pub entity: EntityRef,
    pub name: String,
    pub city: String,
    pub state: String,
    pub location: Coordinates,
}

/// Loads the hospital or bank behind `entity`.
pub async fn site(store: &dyn Store, entity: EntityRef) -> CoreResult<Site> {
    match entity {
        EntityRef::Hospital(id) => {
            let h = store
                .hospitals()
                .fetch(id)
                .await?
                .ok_or_else(|| CoreError::not_found("hospital", id))?;
            Ok(Site {
                entity,
                name: h.name,
                city: h.city,
                state: h.state,
                location: h.location,
            })
        }
        EntityRef::BloodBank(id) => {
            let b = store
                .banks()
                .fetch(id)
                .await?
                .ok_or_else(|| CoreError::not_found("blood bank", id))?;
            Ok(Site {
                entity,
                name: b.name,
                city: b.city,
                state: b.state,
                location: b.location,
            })
        }
    }
}

/// Every registered hospital and bank, hospitals first, each ascending by id.
pub async fn all_sites(store: &dyn Store) -> CoreResult<Vec<Site>> {
    let hospitals = store.hospitals().fetch_all().await?;
    let banks = store.banks().fetch_all().await?;
    let mut sites = Vec::with_capacity(hospitals.len() + banks.len());
    sites.extend(hospitals.into_iter().map(|h| Site {
        entity: EntityRef::Hospital(h.id),
        name: h.name,
        city: h.city,
        state: h.state,
        location: h.location,
    }));
    sites.extend(banks.into_iter().map(|b| Site {
        entity: EntityRef::BloodBank(b.id),
        name: b.name,
        city: b.city,
        state: b.state,
        location: b.location,
    }));
    Ok(sites)
}
