//! Tests for the in-memory store: CRUD, filters and the unit status CAS.

use crate::memory::{MemoryStore, MemoryTable};
use chrono::{NaiveDate, TimeZone, Utc};
use shared::models::{
    BloodUnit, Driver, DriverFilter, EmergencyRequest, RequestFilter, Transfer, TransferFilter,
    UnitFilter,
};
use shared::repository::{Repository, Store, StoreError, UnitRepository};
use shared::types::{
    BankId, BloodType, Coordinates, DriverId, EntityRef, HospitalId, RequestId, RequestStatus,
    TransferId, TransferStatus, UnitId, UnitStatus, Urgency,
};

fn unit(id: u128, bank: BankId, blood_type: BloodType, status: UnitStatus) -> BloodUnit {
    BloodUnit {
        id: UnitId::from_u128(id),
        bank_id: bank,
        blood_type,
        volume_ml: 450,
        collection_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
        expiry_date: NaiveDate::from_ymd_opt(2026, 11, 5).unwrap(),
        status,
        flagged_for_expiry: false,
        location: Coordinates {
            latitude: 13.08,
            longitude: 80.27,
        },
        created_at: Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).unwrap(),
    }
}

fn request(id: u128, hospital: HospitalId, bank: BankId, status: RequestStatus) -> EmergencyRequest {
    let at = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
    EmergencyRequest {
        id: RequestId::from_u128(id),
        hospital_id: hospital,
        blood_type: BloodType::OPos,
        quantity_ml: 450,
        urgency: Urgency::High,
        status,
        suggested_bank_id: bank,
        match_confidence: 80.0,
        predicted_eta_minutes: 30,
        notes: String::new(),
        created_at: at,
        updated_at: at,
    }
}

fn driver(id: u128, available: bool) -> Driver {
    Driver {
        id: DriverId::from_u128(id),
        name: format!("driver-{id}"),
        phone: "555-0100".to_string(),
        vehicle_id: format!("TN-{id}"),
        location: None,
        available,
        created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
    }
}

// ============================================================================
// CRUD
// ============================================================================

#[tokio::test]
async fn test_insert_then_fetch() {
    let table = MemoryTable::<BloodUnit>::new();
    let bank = BankId::from_u128(1);
    let u = unit(10, bank, BloodType::OPos, UnitStatus::Available);

    table.insert(&u).await.unwrap();

    assert_eq!(table.fetch(u.id).await.unwrap(), Some(u));
    assert_eq!(table.len(), 1);
}

#[tokio::test]
async fn test_fetch_missing_returns_none() {
    let table = MemoryTable::<BloodUnit>::new();
    assert!(table.fetch(UnitId::from_u128(99)).await.unwrap().is_none());
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_insert_duplicate_rejected() {
    let table = MemoryTable::<BloodUnit>::new();
    let u = unit(10, BankId::from_u128(1), BloodType::OPos, UnitStatus::Available);
    table.insert(&u).await.unwrap();

    let err = table.insert(&u).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate { table: "blood_units", .. }));
}

#[tokio::test]
async fn test_update_replaces_row() {
    let table = MemoryTable::<BloodUnit>::new();
    let mut u = unit(10, BankId::from_u128(1), BloodType::OPos, UnitStatus::Available);
    table.insert(&u).await.unwrap();

    u.flagged_for_expiry = true;
    table.update(&u).await.unwrap();

    let stored = table.fetch(u.id).await.unwrap().unwrap();
    assert!(stored.flagged_for_expiry);
}

#[tokio::test]
async fn test_update_missing_row_fails() {
    let table = MemoryTable::<BloodUnit>::new();
    let u = unit(10, BankId::from_u128(1), BloodType::OPos, UnitStatus::Available);

    let err = table.update(&u).await.unwrap_err();
    assert!(matches!(err, StoreError::Missing { .. }));
}

#[tokio::test]
async fn test_delete_reports_presence() {
    let table = MemoryTable::<BloodUnit>::new();
    let u = unit(10, BankId::from_u128(1), BloodType::OPos, UnitStatus::Available);
    table.insert(&u).await.unwrap();

    assert!(table.delete(u.id).await.unwrap());
    assert!(!table.delete(u.id).await.unwrap());
}

// ============================================================================
// Filters
// ============================================================================

#[tokio::test]
async fn test_unit_filter_combines_conditions() {
    let store = MemoryStore::new();
    let bank_a = BankId::from_u128(1);
    let bank_b = BankId::from_u128(2);

    for u in [
        unit(1, bank_a, BloodType::OPos, UnitStatus::Available),
        unit(2, bank_a, BloodType::OPos, UnitStatus::Reserved),
        unit(3, bank_a, BloodType::ANeg, UnitStatus::Available),
        unit(4, bank_b, BloodType::OPos, UnitStatus::Available),
    ] {
        store.units().insert(&u).await.unwrap();
    }

    let filter = UnitFilter {
        bank_id: Some(bank_a),
        blood_type: Some(BloodType::OPos),
        status: Some(UnitStatus::Available),
        ..Default::default()
    };
    let found = store.units().fetch_where(&filter).await.unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, UnitId::from_u128(1));
}

#[tokio::test]
async fn test_fetch_where_is_ascending_by_id() {
    let store = MemoryStore::new();
    let bank = BankId::from_u128(1);
    for id in [7, 3, 5, 1] {
        store
            .units()
            .insert(&unit(id, bank, BloodType::BPos, UnitStatus::Available))
            .await
            .unwrap();
    }

    let ids: Vec<UnitId> = store
        .units()
        .fetch_all()
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.id)
        .collect();

    assert_eq!(
        ids,
        vec![
            UnitId::from_u128(1),
            UnitId::from_u128(3),
            UnitId::from_u128(5),
            UnitId::from_u128(7)
        ]
    );
}

#[tokio::test]
async fn test_request_filter_by_hospital_and_status() {
    let store = MemoryStore::new();
    let hospital = HospitalId::from_u128(1);
    let other = HospitalId::from_u128(2);
    let bank = BankId::from_u128(9);

    store
        .requests()
        .insert(&request(1, hospital, bank, RequestStatus::Created))
        .await
        .unwrap();
    store
        .requests()
        .insert(&request(2, hospital, bank, RequestStatus::Cancelled))
        .await
        .unwrap();
    store
        .requests()
        .insert(&request(3, other, bank, RequestStatus::Created))
        .await
        .unwrap();

    let filter = RequestFilter {
        hospital_id: Some(hospital),
        status: Some(RequestStatus::Created),
        ..Default::default()
    };
    let found = store.requests().fetch_where(&filter).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, RequestId::from_u128(1));

    let by_bank = RequestFilter {
        suggested_bank_id: Some(bank),
        ..Default::default()
    };
    assert_eq!(store.requests().fetch_where(&by_bank).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_driver_filter_available() {
    let store = MemoryStore::new();
    store.drivers().insert(&driver(1, false)).await.unwrap();
    store.drivers().insert(&driver(2, true)).await.unwrap();

    let filter = DriverFilter {
        available: Some(true),
    };
    let found = store.drivers().fetch_where(&filter).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, DriverId::from_u128(2));
}

#[tokio::test]
async fn test_transfer_filter_by_endpoint_and_status() {
    let store = MemoryStore::new();
    let bank = BankId::from_u128(1);
    let hospital = HospitalId::from_u128(2);
    let at = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
    let transfer = |id: u128, to: EntityRef, status: TransferStatus| Transfer {
        id: TransferId::from_u128(id),
        unit_id: UnitId::from_u128(id),
        from: EntityRef::BloodBank(bank),
        to,
        distance_km: 12.5,
        status,
        notes: String::new(),
        created_at: at,
        settled_at: None,
    };
    store
        .transfers()
        .insert(&transfer(1, EntityRef::Hospital(hospital), TransferStatus::Pending))
        .await
        .unwrap();
    store
        .transfers()
        .insert(&transfer(2, EntityRef::Hospital(hospital), TransferStatus::Completed))
        .await
        .unwrap();
    store
        .transfers()
        .insert(&transfer(3, EntityRef::BloodBank(BankId::from_u128(9)), TransferStatus::Pending))
        .await
        .unwrap();

    let inbound = store
        .transfers()
        .fetch_where(&TransferFilter {
            to_id: Some(hospital.0),
            status: Some(TransferStatus::Pending),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(inbound.len(), 1);
    assert_eq!(inbound[0].id, TransferId::from_u128(1));

    let outbound = store
        .transfers()
        .fetch_where(&TransferFilter {
            from_id: Some(bank.0),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(outbound.len(), 3);
}

// ============================================================================
// Unit status CAS
// ============================================================================

#[tokio::test]
async fn test_transition_status_applies_when_current_matches() {
    let store = MemoryStore::new();
    let u = unit(1, BankId::from_u128(1), BloodType::OPos, UnitStatus::Available);
    store.units().insert(&u).await.unwrap();

    let changed = store
        .units()
        .transition_status(u.id, UnitStatus::Available, UnitStatus::Reserved)
        .await
        .unwrap();

    assert!(changed);
    let stored = store.units().fetch(u.id).await.unwrap().unwrap();
    assert_eq!(stored.status, UnitStatus::Reserved);
}

#[tokio::test]
async fn test_transition_status_rejects_stale_expectation() {
    let store = MemoryStore::new();
    let u = unit(1, BankId::from_u128(1), BloodType::OPos, UnitStatus::Reserved);
    store.units().insert(&u).await.unwrap();

    let changed = store
        .units()
        .transition_status(u.id, UnitStatus::Available, UnitStatus::Reserved)
        .await
        .unwrap();

    assert!(!changed);
}

#[tokio::test]
async fn test_transition_status_missing_unit() {
    let store = MemoryStore::new();
    let err = store
        .units()
        .transition_status(UnitId::from_u128(5), UnitStatus::Available, UnitStatus::Reserved)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Missing { .. }));
}

#[tokio::test]
async fn test_concurrent_cas_has_single_winner() {
    let store = std::sync::Arc::new(MemoryStore::new());
    let u = unit(1, BankId::from_u128(1), BloodType::OPos, UnitStatus::Available);
    store.units().insert(&u).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .units()
                .transition_status(u.id, UnitStatus::Available, UnitStatus::Reserved)
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[test]
fn test_blocking_fetch_via_tokio_test() {
    let store = MemoryStore::new();
    let u = unit(1, BankId::from_u128(1), BloodType::AbNeg, UnitStatus::Available);
    tokio_test::block_on(store.units().insert(&u)).unwrap();
    let fetched = tokio_test::block_on(store.units().fetch(u.id)).unwrap();
    assert_eq!(fetched.map(|f| f.blood_type), Some(BloodType::AbNeg));
}
