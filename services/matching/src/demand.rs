//! Where near-expiry stock could still be used.
//!
//! Each flagged unit is offered to the other sites within reach. Hospitals
//! with unapproved requests for the unit's blood type rank first, by the
//! volume they are still waiting on; distance breaks ties, then registry order.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use inventory_service::{FlaggedUnit, InventoryLedger};
use shared::geo;
use shared::models::{BloodUnit, RequestFilter};
use shared::repository::{self, Repository, Site, Store};
use shared::types::{BankId, BloodType, EntityRef, HospitalId, RequestStatus, UnitId, Urgency};
use shared::{CoreError, CoreResult};

use crate::eta::EtaEstimator;

pub const MAX_DEMAND_RADIUS_KM: f64 = 500.0;
pub const MATCHES_PER_UNIT: usize = 10;
pub const MATCHES_PER_UNIT_IN_SUMMARY: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct DemandMatch {
    #[serde(flatten)]
    pub site: Site,
    pub distance_km: f64,
    pub open_requests: usize,
    pub open_demand_ml: u32,
    pub urgency: Urgency,
    pub eta_minutes: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitDemand {
    pub unit_id: UnitId,
    pub flagged: bool,
    pub days_until_expiry: i64,
    pub matches: Vec<DemandMatch>,
}

/// Unapproved demand at one hospital for one blood type.
#[derive(Debug, Clone, Copy, Default)]
struct OpenDemand {
    requests: usize,
    quantity_ml: u32,
}

/// Closer to expiry means less time to move the unit.
pub fn transfer_urgency(days_until_expiry: i64) -> Urgency {
    match days_until_expiry {
        i64::MIN..=1 => Urgency::Critical,
        2..=3 => Urgency::High,
        _ => Urgency::Medium,
    }
}

pub struct DemandMatcher {
    store: Arc<dyn Store>,
    ledger: Arc<InventoryLedger>,
    eta: Arc<EtaEstimator>,
}

impl DemandMatcher {
    pub fn new(store: Arc<dyn Store>, ledger: Arc<InventoryLedger>, eta: Arc<EtaEstimator>) -> Self {
        Self { store, ledger, eta }
    }

    /// Ranked destinations for one unit. A unit that is not flagged gets none.
    /// With `scope` set, the unit must belong to that bank.
    pub async fn for_unit(&self, unit_id: UnitId, scope: Option<BankId>) -> CoreResult<UnitDemand> {
        let unit = self
            .store
            .units()
            .fetch(unit_id)
            .await?
            .ok_or_else(|| CoreError::not_found("blood unit", unit_id))?;
        if scope.map_or(false, |bank| bank != unit.bank_id) {
            return Err(CoreError::forbidden(format!(
                "blood unit {unit_id} belongs to another bank"
            )));
        }

        let today = self.ledger.today();
        let flagged = self
            .ledger
            .flagged_units(Some(unit.bank_id))
            .await?
            .into_iter()
            .find(|f| f.unit.id == unit_id);
        let Some(flagged) = flagged else {
            return Ok(UnitDemand {
                unit_id,
                flagged: false,
                days_until_expiry: unit.days_until_expiry(today),
                matches: Vec::new(),
            });
        };

        let sites = repository::all_sites(self.store.as_ref()).await?;
        let demand = self.open_demand().await?;
        Ok(self.rank(&flagged, &sites, &demand, MATCHES_PER_UNIT))
    }

    /// Every flagged unit in scope with its best few destinations, soonest expiry first.
    pub async fn flagged(&self, scope: Option<BankId>) -> CoreResult<Vec<UnitDemand>> {
        let flagged = self.ledger.flagged_units(scope).await?;
        if flagged.is_empty() {
            return Ok(Vec::new());
        }
        let sites = repository::all_sites(self.store.as_ref()).await?;
        let demand = self.open_demand().await?;
        let reports: Vec<UnitDemand> = flagged
            .iter()
            .map(|unit| self.rank(unit, &sites, &demand, MATCHES_PER_UNIT_IN_SUMMARY))
            .collect();
        debug!(units = reports.len(), "demand matched");
        Ok(reports)
    }

    async fn open_demand(&self) -> CoreResult<HashMap<(HospitalId, BloodType), OpenDemand>> {
        let open = self
            .store
            .requests()
            .fetch_where(&RequestFilter {
                status: Some(RequestStatus::Created),
                ..Default::default()
            })
            .await?;
        let mut demand: HashMap<(HospitalId, BloodType), OpenDemand> = HashMap::new();
        for request in open {
            let entry = demand
                .entry((request.hospital_id, request.blood_type))
                .or_default();
            entry.requests += 1;
            entry.quantity_ml = entry.quantity_ml.saturating_add(request.quantity_ml);
        }
        Ok(demand)
    }

    fn rank(
        &self,
        flagged: &FlaggedUnit,
        sites: &[Site],
        demand: &HashMap<(HospitalId, BloodType), OpenDemand>,
        limit: usize,
    ) -> UnitDemand {
        let unit: &BloodUnit = &flagged.unit;
        let urgency = transfer_urgency(flagged.days_until_expiry);

        let mut matches: Vec<DemandMatch> = sites
            .iter()
            .filter(|site| site.entity != EntityRef::BloodBank(unit.bank_id))
            .filter_map(|site| {
                let distance_km = geo::distance_between(unit.location, site.location);
                if distance_km >= MAX_DEMAND_RADIUS_KM {
                    return None;
                }
                let open = match site.entity {
                    EntityRef::Hospital(id) => demand
                        .get(&(id, unit.blood_type))
                        .copied()
                        .unwrap_or_default(),
                    EntityRef::BloodBank(_) => OpenDemand::default(),
                };
                Some(DemandMatch {
                    site: site.clone(),
                    distance_km,
                    open_requests: open.requests,
                    open_demand_ml: open.quantity_ml,
                    urgency,
                    eta_minutes: self.eta.estimate(distance_km, urgency),
                })
            })
            .collect();

        // Stable: equal candidates keep registry order.
        matches.sort_by(|a, b| {
            b.open_demand_ml
                .cmp(&a.open_demand_ml)
                .then(a.distance_km.total_cmp(&b.distance_km))
        });
        matches.truncate(limit);

        UnitDemand {
            unit_id: unit.id,
            flagged: true,
            days_until_expiry: flagged.days_until_expiry,
            matches,
        }
    }
}
