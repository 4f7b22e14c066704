//! Wiring shared by the end-to-end suites: one in-memory network on a fixed day.

#![allow(dead_code)]

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use dispatch_service::{DashboardService, RequestLifecycle, RouteLifecycle};
use inventory_service::InventoryLedger;
use matching_engine::{BankMatchingEngine, EtaEstimator};
use shared::models::{BloodBank, BloodUnit, Driver, Hospital};
use shared::repository::{Repository, Store};
use shared::types::{
    BankId, BloodType, Coordinates, DriverId, HospitalId, UnitId, UnitStatus,
};
use shared::{EventBus, FixedClock, KeyedLocks};
use std::sync::Arc;
use storage::MemoryStore;

pub const KM_PER_DEGREE_LAT: f64 = 111.194_926_644_558_73;

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

pub fn hospital_site() -> Coordinates {
    Coordinates {
        latitude: 13.0,
        longitude: 80.0,
    }
}

/// A point `km` due north of the hospital.
pub fn north(km: f64) -> Coordinates {
    Coordinates {
        latitude: 13.0 + km / KM_PER_DEGREE_LAT,
        longitude: 80.0,
    }
}

pub struct Network {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    pub events: Arc<EventBus>,
    pub ledger: Arc<InventoryLedger>,
    pub requests: Arc<RequestLifecycle>,
    pub routes: Arc<RouteLifecycle>,
    pub dashboard: DashboardService,
}

impl Network {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let locks = Arc::new(KeyedLocks::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap(),
        ));
        let events = Arc::new(EventBus::new(256));
        let ledger = Arc::new(InventoryLedger::new(
            store.clone(),
            locks.clone(),
            clock.clone(),
            events.clone(),
        ));
        let matcher = Arc::new(BankMatchingEngine::new(store.clone(), ledger.clone()));
        let requests = Arc::new(RequestLifecycle::new(
            store.clone(),
            locks.clone(),
            clock.clone(),
            events.clone(),
            ledger.clone(),
            matcher,
            Arc::new(EtaEstimator::new()),
        ));
        let routes = Arc::new(RouteLifecycle::new(
            store.clone(),
            locks,
            clock.clone(),
            events.clone(),
            requests.clone(),
        ));
        let dashboard = DashboardService::new(store.clone(), clock.clone(), ledger.policy());
        Self {
            store,
            clock,
            events,
            ledger,
            requests,
            routes,
            dashboard,
        }
    }

    pub async fn hospital(&self, id: u128, location: Coordinates) -> HospitalId {
        let hospital = Hospital {
            id: HospitalId::from_u128(id),
            name: format!("Hospital {id}"),
            address: "Poonamallee High Road".to_string(),
            city: "Chennai".to_string(),
            state: "Tamil Nadu".to_string(),
            location,
            contact_person: "Duty doctor".to_string(),
            contact_email: "er@hospital.example".to_string(),
            contact_phone: "044-2000".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        };
        self.store.hospitals().insert(&hospital).await.unwrap();
        hospital.id
    }

    pub async fn bank(&self, id: u128, city: &str, location: Coordinates) -> BankId {
        let bank = BloodBank {
            id: BankId::from_u128(id),
            name: format!("Bank {id}"),
            address: "Anna Salai".to_string(),
            city: city.to_string(),
            state: "Tamil Nadu".to_string(),
            location,
            contact_person: "Stock keeper".to_string(),
            contact_email: "stock@bank.example".to_string(),
            contact_phone: "044-3000".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        };
        self.store.banks().insert(&bank).await.unwrap();
        bank.id
    }

    pub async fn unit(
        &self,
        id: u128,
        bank: BankId,
        blood_type: BloodType,
        volume_ml: u32,
        days_to_expiry: i64,
    ) -> UnitId {
        let location = self.store.banks().fetch(bank).await.unwrap().unwrap().location;
        let unit = BloodUnit {
            id: UnitId::from_u128(id),
            bank_id: bank,
            blood_type,
            volume_ml,
            collection_date: today() - Duration::days(5),
            expiry_date: today() + Duration::days(days_to_expiry),
            status: UnitStatus::Available,
            flagged_for_expiry: false,
            location,
            created_at: Utc.with_ymd_and_hms(2026, 10, 14, 0, 0, 0).unwrap(),
        };
        self.store.units().insert(&unit).await.unwrap();
        unit.id
    }

    pub async fn driver(&self, id: u128) -> DriverId {
        let driver = Driver {
            id: DriverId::from_u128(id),
            name: format!("Driver {id}"),
            phone: "98400-00000".to_string(),
            vehicle_id: format!("TN-01-{id:04}"),
            location: None,
            available: true,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        };
        self.store.drivers().insert(&driver).await.unwrap();
        driver.id
    }

    pub async fn unit_status(&self, id: UnitId) -> UnitStatus {
        self.store.units().fetch(id).await.unwrap().unwrap().status
    }

    pub async fn units_with(&self, status: UnitStatus) -> usize {
        self.store
            .units()
            .fetch_all()
            .await
            .unwrap()
            .iter()
            .filter(|u| u.status == status)
            .count()
    }
}
