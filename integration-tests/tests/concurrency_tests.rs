//! Concurrency contract: parallel work against one bank never double-books a unit.

mod common;

use common::{hospital_site, north, Network};
use dispatch_service::{ApproveOptions, NewRequest};
use futures::future::join_all;
use shared::models::ItemFilter;
use shared::repository::{Repository, Store};
use shared::types::{Actor, BloodType, RequestStatus, UnitStatus};
use std::collections::HashSet;
use std::sync::Arc;

fn request(quantity_ml: i64) -> NewRequest {
    NewRequest {
        blood_type: "O+".to_string(),
        quantity_ml,
        urgency: Some("critical".to_string()),
        ..Default::default()
    }
}

// =============================================================================
// Approvals
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_approvals_never_over_reserve() {
    let net = Arc::new(Network::new());
    let h = net.hospital(1, hospital_site()).await;
    let bank = net.bank(1, "Chennai", north(6.0)).await;
    // 2.7 L in six units; twelve requests of 450 mL want twice that.
    for id in 0..6 {
        net.unit(100 + id, bank, BloodType::OPos, 450, 20).await;
    }
    for id in 1..=12 {
        net.driver(id).await;
    }

    let mut requests = Vec::new();
    for _ in 0..12 {
        let r = net
            .requests
            .create(&Actor::hospital(h), request(450))
            .await
            .unwrap();
        requests.push(r.id);
    }

    let tasks = requests.iter().map(|&id| {
        let net = net.clone();
        tokio::spawn(async move {
            net.requests
                .approve(&Actor::bank(bank), id, ApproveOptions::default())
                .await
        })
    });
    let outcomes: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let approved = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(approved, 6);
    for failure in outcomes.iter().filter_map(|o| o.as_ref().err()) {
        assert_eq!(failure.kind(), "insufficient_inventory");
    }

    let items = net
        .store
        .request_items()
        .fetch_where(&ItemFilter::default())
        .await
        .unwrap();
    let units: HashSet<_> = items.iter().map(|i| i.unit_id).collect();
    assert_eq!(items.len(), 6);
    assert_eq!(units.len(), 6);
    assert_eq!(net.units_with(UnitStatus::Reserved).await, 6);
    assert_eq!(net.units_with(UnitStatus::Available).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_approve_and_cancel_settle_consistently() {
    let net = Arc::new(Network::new());
    let h = net.hospital(1, hospital_site()).await;
    let bank = net.bank(1, "Chennai", north(6.0)).await;
    for id in 0..4 {
        net.unit(200 + id, bank, BloodType::OPos, 450, 20).await;
        net.driver(id + 1).await;
    }

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(
            net.requests
                .create(&Actor::hospital(h), request(450))
                .await
                .unwrap()
                .id,
        );
    }

    let mut tasks = Vec::new();
    for (i, &id) in ids.iter().enumerate() {
        let approver = net.clone();
        tasks.push(tokio::spawn(async move {
            let _ = approver
                .requests
                .approve(&Actor::bank(bank), id, ApproveOptions::default())
                .await;
        }));
        if i % 2 == 0 {
            let canceller = net.clone();
            tasks.push(tokio::spawn(async move {
                let _ = canceller.requests.cancel(&Actor::hospital(h), id).await;
            }));
        }
    }
    for task in join_all(tasks).await {
        task.unwrap();
    }

    // Cancel wins from either state, so the raced half ends cancelled holding
    // nothing and the rest end approved holding exactly one unit each.
    let mut held = 0;
    for id in ids {
        let request = net.requests.fetch(id).await.unwrap();
        let items = net
            .store
            .request_items()
            .fetch_where(&ItemFilter {
                request_id: Some(id),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut reserved = 0;
        for item in &items {
            if net.unit_status(item.unit_id).await == UnitStatus::Reserved {
                reserved += 1;
            }
        }
        match request.status {
            RequestStatus::Approved => {
                assert_eq!(reserved, 1);
                held += 1;
            }
            RequestStatus::Cancelled => assert_eq!(reserved, 0),
            other => panic!("request left in {other}"),
        }
    }
    assert_eq!(held, 2);
    assert_eq!(net.units_with(UnitStatus::Reserved).await, held);
}

// =============================================================================
// Routes
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_record_one_origin_point() {
    let net = Arc::new(Network::new());
    let h = net.hospital(1, hospital_site()).await;
    let bank = net.bank(1, "Chennai", north(6.0)).await;
    net.unit(300, bank, BloodType::OPos, 450, 20).await;
    let driver = net.driver(1).await;

    let created = net
        .requests
        .create(&Actor::hospital(h), request(300))
        .await
        .unwrap();
    let route = net
        .requests
        .approve(&Actor::bank(bank), created.id, ApproveOptions::default())
        .await
        .unwrap()
        .route;

    let route_id = route.id;
    let starts = (0..8).map(|_| {
        let net = net.clone();
        tokio::spawn(async move { net.routes.start(&Actor::driver(driver), route_id).await })
    });
    for joined in join_all(starts).await {
        joined.unwrap().unwrap();
    }

    let points = net.routes.track_points(route.id).await.unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(
        net.requests.fetch(created.id).await.unwrap().status,
        RequestStatus::EnRoute
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_progress_keeps_sequence_unique() {
    let net = Arc::new(Network::new());
    let h = net.hospital(1, hospital_site()).await;
    let bank = net.bank(1, "Chennai", north(6.0)).await;
    net.unit(400, bank, BloodType::OPos, 450, 20).await;
    let driver = net.driver(1).await;

    let created = net
        .requests
        .create(&Actor::hospital(h), request(300))
        .await
        .unwrap();
    let route = net
        .requests
        .approve(&Actor::bank(bank), created.id, ApproveOptions::default())
        .await
        .unwrap()
        .route;
    net.routes.start(&Actor::driver(driver), route.id).await.unwrap();

    let (route_id, start, end) = (route.id, route.start, route.end);
    let updates = (1..=10).map(|step: u32| {
        let net = net.clone();
        tokio::spawn(async move {
            let at = shared::geo::interpolate(start, end, f64::from(step) / 20.0);
            net.routes
                .record_progress(
                    &Actor::driver(driver),
                    route_id,
                    Some(at.latitude),
                    Some(at.longitude),
                )
                .await
        })
    });
    for joined in join_all(updates).await {
        joined.unwrap().unwrap();
    }

    let points = net.routes.track_points(route.id).await.unwrap();
    let seqs: HashSet<u32> = points.iter().map(|p| p.seq).collect();
    assert_eq!(points.len(), 11);
    assert_eq!(seqs.len(), 11);
    assert_eq!(seqs.iter().max(), Some(&10));
}
