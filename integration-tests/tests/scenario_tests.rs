//! End-to-end dispatch scenarios over the in-memory store.

mod common;

use common::{hospital_site, north, Network};
use dispatch_service::{ApproveOptions, NewRequest};
use shared::geo;
use shared::models::{RequestFilter, UnitFilter};
use shared::repository::{Repository, Store};
use shared::types::{Actor, BloodType, RequestStatus, RouteStatus, UnitStatus};
use shared::{CoreError, DispatchEvent};

fn request(blood_type: &str, quantity_ml: i64, urgency: &str) -> NewRequest {
    NewRequest {
        blood_type: blood_type.to_string(),
        quantity_ml,
        urgency: Some(urgency.to_string()),
        ..Default::default()
    }
}

// =============================================================================
// Nearest bank with enough stock wins
// =============================================================================

#[tokio::test]
async fn test_critical_request_delivered_from_nearest_stocked_bank() {
    let net = Network::new();
    let h = net.hospital(1, hospital_site()).await;
    let a = net.bank(1, "Gummidipoondi", north(40.0)).await;
    let b = net.bank(2, "Chennai", north(10.0)).await;
    net.unit(11, a, BloodType::OPos, 200, 30).await;
    let b1 = net.unit(21, b, BloodType::OPos, 300, 30).await;
    let b2 = net.unit(22, b, BloodType::OPos, 300, 30).await;
    let d = net.driver(1).await;
    let mut events = net.events.subscribe();

    let created = net
        .requests
        .create(&Actor::hospital(h), request("O+", 500, "critical"))
        .await
        .unwrap();
    assert_eq!(created.suggested_bank_id, b);

    let approval = net
        .requests
        .approve(&Actor::bank(b), created.id, ApproveOptions::default())
        .await
        .unwrap();
    let reserved: u32 = approval.items.iter().map(|i| i.quantity_ml).sum();
    assert_eq!(reserved, 500);
    assert!(approval.items.iter().all(|i| i.source_bank_id == b));
    assert_eq!(net.unit_status(b1).await, UnitStatus::Reserved);
    assert_eq!(net.unit_status(b2).await, UnitStatus::Reserved);

    let route = approval.route;
    assert_eq!(route.start, north(10.0));
    assert_eq!(route.end, hospital_site());
    assert_eq!(route.driver_id, d);

    let driver = Actor::driver(d);
    net.routes.start(&driver, route.id).await.unwrap();
    let midpoint = geo::interpolate(route.start, route.end, 0.5);
    net.routes
        .record_progress(&driver, route.id, Some(midpoint.latitude), Some(midpoint.longitude))
        .await
        .unwrap();
    let done = net.routes.complete(&driver, route.id).await.unwrap();

    assert!((done.progress.progress_percent - 50.0).abs() < 0.5);
    assert_eq!(done.route.status, RouteStatus::Completed);
    assert_eq!(done.request.status, RequestStatus::Delivered);
    assert_eq!(net.unit_status(b1).await, UnitStatus::Used);
    assert_eq!(net.unit_status(b2).await, UnitStatus::Used);

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    assert_eq!(
        names,
        vec![
            "request_created",
            "request_approved",
            "route_started",
            "progress_recorded",
            "request_delivered",
            "route_completed",
        ]
    );
}

#[tokio::test]
async fn test_no_bank_with_stock_leaves_no_trace() {
    let net = Network::new();
    let h = net.hospital(1, hospital_site()).await;
    let a = net.bank(1, "Chennai", north(5.0)).await;
    net.unit(11, a, BloodType::AbNeg, 50, 30).await;
    net.unit(12, a, BloodType::OPos, 450, 30).await;
    net.driver(1).await;

    let err = net
        .requests
        .create(&Actor::hospital(h), request("AB-", 100, "high"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::NoSuitableBank {
            blood_type: BloodType::AbNeg,
            quantity_ml: 100
        }
    ));
    let requests = net
        .store
        .requests()
        .fetch_where(&RequestFilter::default())
        .await
        .unwrap();
    assert!(requests.is_empty());
    assert_eq!(net.units_with(UnitStatus::Available).await, 2);
}

// =============================================================================
// Stock bookkeeping across requests
// =============================================================================

#[tokio::test]
async fn test_cancelled_approval_returns_stock_to_matching() {
    let net = Network::new();
    let h = net.hospital(1, hospital_site()).await;
    let near = net.bank(1, "Chennai", north(5.0)).await;
    let far = net.bank(2, "Tiruvallur", north(35.0)).await;
    net.unit(11, near, BloodType::ONeg, 450, 20).await;
    net.unit(21, far, BloodType::ONeg, 450, 20).await;
    net.driver(1).await;
    let hospital = Actor::hospital(h);

    let first = net
        .requests
        .create(&hospital, request("O-", 400, "high"))
        .await
        .unwrap();
    assert_eq!(first.suggested_bank_id, near);
    net.requests
        .approve(&Actor::bank(near), first.id, ApproveOptions::default())
        .await
        .unwrap();

    // Near stock is reserved, so the next request goes further out.
    let second = net
        .requests
        .create(&hospital, request("O-", 400, "high"))
        .await
        .unwrap();
    assert_eq!(second.suggested_bank_id, far);

    net.requests.cancel(&hospital, first.id).await.unwrap();
    net.requests.cancel(&hospital, second.id).await.unwrap();

    let third = net
        .requests
        .create(&hospital, request("O-", 400, "high"))
        .await
        .unwrap();
    assert_eq!(third.suggested_bank_id, near);
    assert!(net.store.routes().fetch_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_expired_units_never_dispatched() {
    let net = Network::new();
    let h = net.hospital(1, hospital_site()).await;
    let near = net.bank(1, "Chennai", north(2.0)).await;
    let far = net.bank(2, "Kanchipuram", north(45.0)).await;
    let stale = net.unit(11, near, BloodType::BPos, 450, -1).await;
    net.unit(21, far, BloodType::BPos, 450, 10).await;
    net.driver(1).await;

    let created = net
        .requests
        .create(&Actor::hospital(h), request("B+", 300, "medium"))
        .await
        .unwrap();
    assert_eq!(created.suggested_bank_id, far);

    let swept = net.ledger.sweep_expired().await.unwrap();
    assert_eq!(swept, vec![stale]);
    assert_eq!(net.unit_status(stale).await, UnitStatus::Expired);

    let dash = net.dashboard.snapshot().await.unwrap();
    assert_eq!(dash.inventory.by_status["expired"], 1);
    assert_eq!(dash.wastage_prevention_rate, 50.0);
}

#[tokio::test]
async fn test_flagged_units_listed_soonest_first() {
    let net = Network::new();
    let bank = net.bank(1, "Chennai", north(2.0)).await;
    net.unit(11, bank, BloodType::APos, 450, 6).await;
    net.unit(12, bank, BloodType::APos, 450, 2).await;
    net.unit(13, bank, BloodType::APos, 450, 8).await;
    net.unit(14, bank, BloodType::APos, 450, 0).await;

    let flagged = net.ledger.flagged_units(Some(bank)).await.unwrap();

    let days: Vec<i64> = flagged.iter().map(|f| f.days_until_expiry).collect();
    assert_eq!(days, vec![2, 6]);
    let available = net
        .store
        .units()
        .fetch_where(&UnitFilter {
            bank_id: Some(bank),
            status: Some(UnitStatus::Available),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(available.len(), 4);
}

#[tokio::test]
async fn test_driver_busy_until_route_completes() {
    let net = Network::new();
    let h = net.hospital(1, hospital_site()).await;
    let bank = net.bank(1, "Chennai", north(8.0)).await;
    for id in 11..15 {
        net.unit(id, bank, BloodType::OPos, 450, 25).await;
    }
    let only = net.driver(1).await;
    let hospital = Actor::hospital(h);
    let bank_actor = Actor::bank(bank);

    let first = net
        .requests
        .create(&hospital, request("O+", 450, "critical"))
        .await
        .unwrap();
    let route = net
        .requests
        .approve(&bank_actor, first.id, ApproveOptions::default())
        .await
        .unwrap()
        .route;
    net.routes.start(&Actor::driver(only), route.id).await.unwrap();

    let second = net
        .requests
        .create(&hospital, request("O+", 450, "low"))
        .await
        .unwrap();
    let err = net
        .requests
        .approve(&bank_actor, second.id, ApproveOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NoDriverAvailable));
    assert_eq!(net.units_with(UnitStatus::Reserved).await, 1);

    net.routes.complete(&Actor::driver(only), route.id).await.unwrap();
    let approval = net
        .requests
        .approve(&bank_actor, second.id, ApproveOptions::default())
        .await
        .unwrap();
    assert_eq!(approval.route.driver_id, only);
}

#[tokio::test]
async fn test_pending_route_holds_driver() {
    let net = Network::new();
    let h = net.hospital(1, hospital_site()).await;
    let bank = net.bank(1, "Chennai", north(8.0)).await;
    for id in 11..13 {
        net.unit(id, bank, BloodType::OPos, 450, 25).await;
    }
    let only = net.driver(1).await;
    let hospital = Actor::hospital(h);
    let bank_actor = Actor::bank(bank);
    let driver = Actor::driver(only);

    let first = net.requests.create(&hospital, request("O+", 450, "high")).await.unwrap();
    let second = net.requests.create(&hospital, request("O+", 450, "high")).await.unwrap();
    let r1 = net
        .requests
        .approve(&bank_actor, first.id, ApproveOptions::default())
        .await
        .unwrap()
        .route;

    // Approved but not started: the driver is still taken.
    let err = net
        .requests
        .approve(&bank_actor, second.id, ApproveOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NoDriverAvailable));

    net.routes.start(&driver, r1.id).await.unwrap();
    net.routes.complete(&driver, r1.id).await.unwrap();
    let r2 = net
        .requests
        .approve(&bank_actor, second.id, ApproveOptions::default())
        .await
        .unwrap()
        .route;
    net.routes.start(&driver, r2.id).await.unwrap();
    net.routes.complete(&driver, r2.id).await.unwrap();

    assert_eq!(net.units_with(UnitStatus::Used).await, 2);
    let d = net.store.drivers().fetch(only).await.unwrap().unwrap();
    assert!(d.available);
}

#[tokio::test]
async fn test_event_payloads_carry_ids() {
    let net = Network::new();
    let h = net.hospital(1, hospital_site()).await;
    let bank = net.bank(1, "Chennai", north(3.0)).await;
    net.unit(11, bank, BloodType::ANeg, 450, 25).await;
    net.driver(1).await;
    let mut events = net.events.subscribe();

    let created = net
        .requests
        .create(&Actor::hospital(h), request("A-", 200, "medium"))
        .await
        .unwrap();

    match events.try_recv().unwrap() {
        DispatchEvent::RequestCreated {
            request_id,
            hospital_id,
            suggested_bank_id,
            ..
        } => {
            assert_eq!(request_id, created.id);
            assert_eq!(hospital_id, h);
            assert_eq!(suggested_bank_id, bank);
        }
        other => panic!("unexpected event {other:?}"),
    }
}
