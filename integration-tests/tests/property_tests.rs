//! Property checks over the pure math: distance, ETA, scoring, progress, planning.

use chrono::{NaiveDate, TimeZone, Utc};
use dispatch_service::tracking;
use inventory_service::ledger::plan_reservation;
use matching_engine::engine::score;
use matching_engine::eta::{eta_minutes, eta_minutes_with_jitter, MIN_ETA_MINUTES};
use proptest::prelude::*;
use shared::geo;
use shared::models::{BloodUnit, Route, TrackPoint};
use shared::types::{
    BankId, BloodType, Coordinates, DriverId, RequestId, RouteId, RouteStatus, TrackPointId,
    UnitId, UnitStatus, Urgency,
};

const URGENCIES: [Urgency; 4] = [
    Urgency::Low,
    Urgency::Medium,
    Urgency::High,
    Urgency::Critical,
];

fn coords() -> impl Strategy<Value = Coordinates> {
    (-89.0..89.0f64, -179.0..179.0f64).prop_map(|(latitude, longitude)| Coordinates {
        latitude,
        longitude,
    })
}

fn unit(id: u128, volume_ml: u32) -> BloodUnit {
    let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
    BloodUnit {
        id: UnitId::from_u128(id),
        bank_id: BankId::from_u128(1),
        blood_type: BloodType::OPos,
        volume_ml,
        collection_date: day,
        expiry_date: day,
        status: UnitStatus::Available,
        flagged_for_expiry: false,
        location: Coordinates {
            latitude: 0.0,
            longitude: 0.0,
        },
        created_at: Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap(),
    }
}

fn route(start: Coordinates, end: Coordinates, eta_minutes: u32) -> Route {
    Route {
        id: RouteId::from_u128(1),
        request_id: RequestId::from_u128(1),
        driver_id: DriverId::from_u128(1),
        start,
        end,
        distance_km: geo::distance_between(start, end),
        eta_minutes,
        status: RouteStatus::Active,
        started_at: None,
        completed_at: None,
        created_at: Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap(),
    }
}

proptest! {
    #[test]
    fn distance_is_symmetric_and_non_negative(a in coords(), b in coords()) {
        let ab = geo::distance_between(a, b);
        let ba = geo::distance_between(b, a);
        prop_assert!(ab >= 0.0);
        prop_assert!((ab - ba).abs() < 1e-6, "{} vs {}", ab, ba);
        prop_assert!(geo::distance_between(a, a).abs() < 1e-9);
    }

    #[test]
    fn eta_monotone_in_distance(d1 in 0.0..2_000.0f64, d2 in 0.0..2_000.0f64, u in 0usize..4) {
        let (near, far) = if d1 <= d2 { (d1, d2) } else { (d2, d1) };
        let urgency = URGENCIES[u];
        prop_assert!(eta_minutes(near, urgency) <= eta_minutes(far, urgency));
        prop_assert!(eta_minutes(near, urgency) >= MIN_ETA_MINUTES);
    }

    #[test]
    fn eta_shrinks_with_urgency(d in 0.0..2_000.0f64) {
        let etas: Vec<u32> = URGENCIES.iter().map(|&u| eta_minutes(d, u)).collect();
        prop_assert!(etas.windows(2).all(|w| w[0] >= w[1]), "{:?}", etas);
    }

    #[test]
    fn jitter_never_breaks_the_floor(d in 0.0..500.0f64, jitter in -120i64..120, u in 0usize..4) {
        prop_assert!(eta_minutes_with_jitter(d, URGENCIES[u], jitter) >= MIN_ETA_MINUTES);
    }

    #[test]
    fn score_prefers_closer_banks(d1 in 0.0..80.0f64, d2 in 0.0..80.0f64, days in 0.0..40.0f64) {
        let (near, far) = if d1 <= d2 { (d1, d2) } else { (d2, d1) };
        for urgency in URGENCIES {
            prop_assert!(
                score(near, days, urgency).final_score >= score(far, days, urgency).final_score
            );
        }
    }

    #[test]
    fn progress_stays_within_bounds(
        start in coords(),
        end in coords(),
        trail in proptest::collection::vec(coords(), 0..12),
        eta in 0u32..600,
    ) {
        let route = route(start, end, eta);
        let base = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let points: Vec<TrackPoint> = trail
            .into_iter()
            .enumerate()
            .map(|(i, location)| TrackPoint {
                id: TrackPointId::from_u128(i as u128 + 1),
                route_id: route.id,
                location,
                recorded_at: base + chrono::Duration::minutes(i as i64),
                seq: i as u32,
            })
            .collect();

        let progress = tracking::compute(&route, &points);
        prop_assert!((0.0..=100.0).contains(&progress.progress_percent));
        prop_assert!(progress.remaining_eta_minutes <= eta);
        prop_assert!(progress.remaining_distance_km >= 0.0);
    }

    #[test]
    fn reservation_plan_covers_exactly(
        volumes in proptest::collection::vec(1u32..600, 0..10),
        quantity in 1u32..3_000,
    ) {
        let units: Vec<BloodUnit> = volumes
            .iter()
            .enumerate()
            .map(|(i, &v)| unit(i as u128 + 1, v))
            .collect();
        let total: u32 = volumes.iter().sum();

        let plan = plan_reservation(&units, quantity);
        let drawn: u32 = plan.iter().map(|r| r.quantity_ml).sum();

        prop_assert_eq!(drawn, quantity.min(total));
        prop_assert!(plan.iter().all(|r| r.quantity_ml > 0));
        // Draws follow the given order and only the last may be partial.
        for (reservation, unit) in plan.iter().zip(&units) {
            prop_assert_eq!(reservation.unit_id, unit.id);
        }
        if plan.len() > 1 {
            for (reservation, unit) in plan[..plan.len() - 1].iter().zip(&units) {
                prop_assert_eq!(reservation.quantity_ml, unit.volume_ml);
            }
        }
    }
}
