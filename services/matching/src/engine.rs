//! Bank selection for an emergency request.
//!
//! Every bank able to cover the full quantity is scored on proximity and on
//! how long its matching stock has left; urgency scales the result. The score
//! is reported as the request's match confidence and is not clamped.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use inventory_service::InventoryLedger;
use shared::geo;
use shared::models::BloodBank;
use shared::repository::{Repository, Store};
use shared::types::{BankId, BloodType, Coordinates, Urgency};
use shared::{CoreError, CoreResult};

const DISTANCE_WEIGHT: f64 = 0.4;
const EXPIRY_WEIGHT: f64 = 0.6;

pub fn urgency_multiplier(urgency: Urgency) -> f64 {
    match urgency {
        Urgency::Low => 1.0,
        Urgency::Medium => 1.2,
        Urgency::High => 1.5,
        Urgency::Critical => 2.0,
    }
}

/// `max(0, 100 - 2d)`
pub fn distance_score(distance_km: f64) -> f64 {
    (100.0 - 2.0 * distance_km).max(0.0)
}

/// `min(100, 10 * avg_days)`
pub fn expiry_score(average_days_until_expiry: f64) -> f64 {
    (10.0 * average_days_until_expiry).min(100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub distance_score: f64,
    pub expiry_score: f64,
    pub urgency_multiplier: f64,
    pub final_score: f64,
}

pub fn score(distance_km: f64, average_days_until_expiry: f64, urgency: Urgency) -> ScoreBreakdown {
    let distance_score = distance_score(distance_km);
    let expiry_score = expiry_score(average_days_until_expiry);
    let urgency_multiplier = urgency_multiplier(urgency);
    ScoreBreakdown {
        distance_score,
        expiry_score,
        urgency_multiplier,
        final_score: (DISTANCE_WEIGHT * distance_score + EXPIRY_WEIGHT * expiry_score)
            * urgency_multiplier,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MatchQuery {
    pub location: Coordinates,
    pub blood_type: BloodType,
    pub quantity_ml: u32,
    pub urgency: Urgency,
}

#[derive(Debug, Clone, Serialize)]
pub struct BankMatch {
    pub bank_id: BankId,
    pub bank_location: Coordinates,
    pub distance_km: f64,
    pub available_ml: u32,
    pub average_days_until_expiry: f64,
    pub score: ScoreBreakdown,
}

impl BankMatch {
    pub fn confidence(&self) -> f64 {
        self.score.final_score
    }
}

pub struct BankMatchingEngine {
    store: Arc<dyn Store>,
    ledger: Arc<InventoryLedger>,
}

impl BankMatchingEngine {
    pub fn new(store: Arc<dyn Store>, ledger: Arc<InventoryLedger>) -> Self {
        Self { store, ledger }
    }

    /// Every bank able to cover the request, best first. Equal scores keep
    /// ascending bank id order.
    pub async fn rank(&self, query: &MatchQuery) -> CoreResult<Vec<BankMatch>> {
        if query.quantity_ml == 0 {
            return Err(CoreError::validation("quantity_ml must be positive"));
        }

        let banks = self.store.banks().fetch_all().await?;
        let mut candidates = Vec::new();
        for bank in &banks {
            if let Some(candidate) = self.evaluate(bank, query).await? {
                candidates.push(candidate);
            }
        }

        candidates.sort_by(|a, b| {
            b.score
                .final_score
                .total_cmp(&a.score.final_score)
                .then(a.bank_id.cmp(&b.bank_id))
        });
        Ok(candidates)
    }

    /// Highest scoring bank; ties go to the lowest bank id.
    pub async fn find_best_bank(&self, query: &MatchQuery) -> CoreResult<BankMatch> {
        let best = self
            .rank(query)
            .await?
            .into_iter()
            .next()
            .ok_or(CoreError::NoSuitableBank {
                blood_type: query.blood_type,
                quantity_ml: query.quantity_ml,
            })?;

        info!(
            bank_id = %best.bank_id,
            blood_type = %query.blood_type,
            quantity_ml = query.quantity_ml,
            score = best.score.final_score,
            distance_km = best.distance_km,
            "bank matched"
        );
        Ok(best)
    }

    async fn evaluate(&self, bank: &BloodBank, query: &MatchQuery) -> CoreResult<Option<BankMatch>> {
        let units = self.ledger.available_units(bank.id, query.blood_type).await?;
        let available_ml = units
            .iter()
            .fold(0u32, |sum, unit| sum.saturating_add(unit.volume_ml));
        if units.is_empty() || available_ml < query.quantity_ml {
            return Ok(None);
        }

        let today = self.ledger.today();
        let total_days: i64 = units.iter().map(|u| u.days_until_expiry(today)).sum();
        let average_days = total_days as f64 / units.len() as f64;
        let distance_km = geo::distance_between(query.location, bank.location);
        let score = score(distance_km, average_days, query.urgency);

        debug!(
            bank_id = %bank.id,
            distance_km,
            average_days,
            distance_score = score.distance_score,
            expiry_score = score.expiry_score,
            final_score = score.final_score,
            "bank scored"
        );

        Ok(Some(BankMatch {
            bank_id: bank.id,
            bank_location: bank.location,
            distance_km,
            available_ml,
            average_days_until_expiry: average_days,
            score,
        }))
    }
}
