//! Transit time estimate from straight-line distance and urgency.

use rand::Rng;
use shared::types::Urgency;

pub const BASE_SPEED_KMH: f64 = 60.0;
pub const MIN_ETA_MINUTES: u32 = 15;

/// Faster dispatch for more urgent requests.
pub fn urgency_speed_factor(urgency: Urgency) -> f64 {
    match urgency {
        Urgency::Low => 0.8,
        Urgency::Medium => 1.0,
        Urgency::High => 1.2,
        Urgency::Critical => 1.5,
    }
}

/// Deterministic estimate: floored minutes, never below the 15 minute floor.
pub fn eta_minutes(distance_km: f64, urgency: Urgency) -> u32 {
    eta_minutes_with_jitter(distance_km, urgency, 0)
}

pub fn eta_minutes_with_jitter(distance_km: f64, urgency: Urgency, jitter_minutes: i64) -> u32 {
    let distance = if distance_km.is_finite() { distance_km.max(0.0) } else { 0.0 };
    let speed = BASE_SPEED_KMH * urgency_speed_factor(urgency);
    let base = (distance / speed * 60.0).floor() as i64;
    let minutes = base.saturating_add(jitter_minutes).max(i64::from(MIN_ETA_MINUTES));
    u32::try_from(minutes).unwrap_or(u32::MAX)
}

/// Source of additive noise on top of the estimate.
pub trait Jitter: Send + Sync {
    fn minutes(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoJitter;

impl Jitter for NoJitter {
    fn minutes(&self) -> i64 {
        0
    }
}

/// Uniform in `[-max_minutes, max_minutes]`.
#[derive(Debug, Clone, Copy)]
pub struct UniformJitter {
    pub max_minutes: u32,
}

impl UniformJitter {
    pub fn new(max_minutes: u32) -> Self {
        Self { max_minutes }
    }
}

impl Jitter for UniformJitter {
    fn minutes(&self) -> i64 {
        if self.max_minutes == 0 {
            return 0;
        }
        let bound = i64::from(self.max_minutes);
        rand::thread_rng().gen_range(-bound..=bound)
    }
}

pub struct EtaEstimator {
    jitter: Box<dyn Jitter>,
}

impl EtaEstimator {
    pub fn new() -> Self {
        Self {
            jitter: Box::new(NoJitter),
        }
    }

    pub fn with_jitter(jitter: impl Jitter + 'static) -> Self {
        Self {
            jitter: Box::new(jitter),
        }
    }

    /// `eta_jitter_minutes` from configuration; zero keeps estimates deterministic.
    pub fn from_config(jitter_minutes: u32) -> Self {
        if jitter_minutes == 0 {
            Self::new()
        } else {
            Self::with_jitter(UniformJitter::new(jitter_minutes))
        }
    }

    pub fn estimate(&self, distance_km: f64, urgency: Urgency) -> u32 {
        eta_minutes_with_jitter(distance_km, urgency, self.jitter.minutes())
    }
}

impl Default for EtaEstimator {
    fn default() -> Self {
        Self::new()
    }
}
