//! Progress math over recorded breadcrumbs. Total over all inputs: a zero
//! length route or an empty trail reports zero progress.

use serde::Serialize;
use shared::geo;
use shared::models::{Route, TrackPoint};
use shared::types::Coordinates;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RouteProgress {
    pub total_distance_km: f64,
    pub covered_distance_km: f64,
    pub remaining_distance_km: f64,
    pub progress_percent: f64,
    pub remaining_eta_minutes: u32,
    pub current_location: Option<Coordinates>,
}

/// Travel order: timestamp first, then the per-route sequence number.
pub fn order_points(points: &mut [TrackPoint]) {
    points.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at).then(a.seq.cmp(&b.seq)));
}

/// Sum of great-circle legs between consecutive points, which must already be ordered.
pub fn covered_distance(points: &[TrackPoint]) -> f64 {
    let path: Vec<Coordinates> = points.iter().map(|p| p.location).collect();
    geo::path_length(&path)
}

pub fn progress_percent(covered_km: f64, total_km: f64) -> f64 {
    if !total_km.is_finite() || total_km <= 0.0 || !covered_km.is_finite() {
        return 0.0;
    }
    (covered_km / total_km * 100.0).clamp(0.0, 100.0)
}

/// Predicted ETA scaled by what is left; untouched until some progress exists.
pub fn remaining_eta(eta_minutes: u32, progress_percent: f64) -> u32 {
    if progress_percent > 0.0 {
        (f64::from(eta_minutes) * (1.0 - progress_percent / 100.0)).floor() as u32
    } else {
        eta_minutes
    }
}

pub fn compute(route: &Route, ordered_points: &[TrackPoint]) -> RouteProgress {
    let covered = covered_distance(ordered_points);
    let percent = progress_percent(covered, route.distance_km);
    RouteProgress {
        total_distance_km: route.distance_km,
        covered_distance_km: covered,
        remaining_distance_km: (route.distance_km - covered).max(0.0),
        progress_percent: percent,
        remaining_eta_minutes: remaining_eta(route.eta_minutes, percent),
        current_location: ordered_points.last().map(|p| p.location),
    }
}
