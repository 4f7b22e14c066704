//! Great-circle math.

use crate::types::Coordinates;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometres.
pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

pub fn distance_between(a: Coordinates, b: Coordinates) -> f64 {
    distance(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Sum of consecutive leg lengths.
pub fn path_length(points: &[Coordinates]) -> f64 {
    points
        .windows(2)
        .map(|pair| distance_between(pair[0], pair[1]))
        .sum()
}

/// Linear interpolation in degree space; `fraction` is clamped to [0, 1].
pub fn interpolate(start: Coordinates, end: Coordinates, fraction: f64) -> Coordinates {
    let t = fraction.clamp(0.0, 1.0);
    Coordinates {
        latitude: start.latitude + (end.latitude - start.latitude) * t,
        longitude: start.longitude + (end.longitude - start.longitude) * t,
    }
}
