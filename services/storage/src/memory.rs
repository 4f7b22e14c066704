//! In-process store. Each table is a `BTreeMap` behind a `parking_lot::RwLock`,
//! so iteration is already in ascending id order.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use shared::models::{
    BloodBank, BloodUnit, Driver, EmergencyRequest, Hospital, RequestItem, Route, TrackPoint,
    Transfer,
};
use shared::repository::{Entity, Repository, Store, StoreError, UnitRepository};
use shared::types::{UnitId, UnitStatus};

pub struct MemoryTable<T: Entity> {
    rows: RwLock<BTreeMap<T::Id, T>>,
}

impl<T: Entity> MemoryTable<T> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Entity> Default for MemoryTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for MemoryTable<T> {
    async fn fetch(&self, id: T::Id) -> Result<Option<T>, StoreError> {
        Ok(self.rows.read().get(&id).cloned())
    }

    async fn fetch_where(&self, filter: &T::Filter) -> Result<Vec<T>, StoreError> {
        let rows = self.rows.read();
        Ok(rows.values().filter(|row| row.matches(filter)).cloned().collect())
    }

    async fn insert(&self, entity: &T) -> Result<(), StoreError> {
        let mut rows = self.rows.write();
        if rows.contains_key(&entity.id()) {
            return Err(StoreError::Duplicate {
                table: T::TABLE,
                id: entity.id().to_string(),
            });
        }
        rows.insert(entity.id(), entity.clone());
        Ok(())
    }

    async fn update(&self, entity: &T) -> Result<(), StoreError> {
        let mut rows = self.rows.write();
        match rows.get_mut(&entity.id()) {
            Some(row) => {
                *row = entity.clone();
                Ok(())
            }
            None => Err(StoreError::Missing {
                table: T::TABLE,
                id: entity.id().to_string(),
            }),
        }
    }

    async fn delete(&self, id: T::Id) -> Result<bool, StoreError> {
        Ok(self.rows.write().remove(&id).is_some())
    }
}

#[async_trait]
impl UnitRepository for MemoryTable<BloodUnit> {
    async fn transition_status(
        &self,
        id: UnitId,
        from: UnitStatus,
        to: UnitStatus,
    ) -> Result<bool, StoreError> {
        let mut rows = self.rows.write();
        match rows.get_mut(&id) {
            Some(unit) if unit.status == from => {
                unit.status = to;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::Missing {
                table: BloodUnit::TABLE,
                id: id.to_string(),
            }),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub hospitals: MemoryTable<Hospital>,
    pub banks: MemoryTable<BloodBank>,
    pub units: MemoryTable<BloodUnit>,
    pub requests: MemoryTable<EmergencyRequest>,
    pub request_items: MemoryTable<RequestItem>,
    pub routes: MemoryTable<Route>,
    pub track_points: MemoryTable<TrackPoint>,
    pub drivers: MemoryTable<Driver>,
    pub transfers: MemoryTable<Transfer>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn hospitals(&self) -> &dyn Repository<Hospital> {
        &self.hospitals
    }

    fn banks(&self) -> &dyn Repository<BloodBank> {
        &self.banks
    }

    fn units(&self) -> &dyn UnitRepository {
        &self.units
    }

    fn requests(&self) -> &dyn Repository<EmergencyRequest> {
        &self.requests
    }

    fn request_items(&self) -> &dyn Repository<RequestItem> {
        &self.request_items
    }

    fn routes(&self) -> &dyn Repository<Route> {
        &self.routes
    }

    fn track_points(&self) -> &dyn Repository<TrackPoint> {
        &self.track_points
    }

    fn drivers(&self) -> &dyn Repository<Driver> {
        &self.drivers
    }

    fn transfers(&self) -> &dyn Repository<Transfer> {
        &self.transfers
    }
}
