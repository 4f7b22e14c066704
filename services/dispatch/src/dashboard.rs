//! Network-wide counters. Each table is read once; the snapshot is not
//! consistent with writes that land while it is being built.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use inventory_service::ExpiryPolicy;
use shared::repository::{Repository, Store};
use shared::types::{BloodType, RequestStatus, RouteStatus, UnitStatus};
use shared::{Clock, CoreResult};

#[derive(Debug, Clone, Serialize)]
pub struct InventorySummary {
    pub total_units: usize,
    pub by_status: BTreeMap<String, usize>,
    pub flagged_for_expiry: usize,
    pub available_ml: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkSummary {
    pub hospitals: usize,
    pub blood_banks: usize,
    pub drivers: usize,
    pub available_drivers: usize,
    pub coverage_cities: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub inventory: InventorySummary,
    pub network: NetworkSummary,
    /// Unit counts per blood type, every type present.
    pub blood_type_distribution: BTreeMap<String, usize>,
    pub requests_by_status: BTreeMap<String, usize>,
    pub routes_by_status: BTreeMap<String, usize>,
    /// Share of all units that did not expire, in percent, one decimal.
    pub wastage_prevention_rate: f64,
}

pub struct DashboardService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    policy: ExpiryPolicy,
}

impl DashboardService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, policy: ExpiryPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub async fn snapshot(&self) -> CoreResult<Dashboard> {
        let today = self.clock.today();
        let units = self.store.units().fetch_all().await?;
        let requests = self.store.requests().fetch_all().await?;
        let routes = self.store.routes().fetch_all().await?;
        let hospitals = self.store.hospitals().fetch_all().await?;
        let banks = self.store.banks().fetch_all().await?;
        let drivers = self.store.drivers().fetch_all().await?;

        let mut by_status = zeroed(
            [
                UnitStatus::Available,
                UnitStatus::Reserved,
                UnitStatus::Dispatched,
                UnitStatus::Used,
                UnitStatus::Expired,
            ]
            .iter()
            .map(|s| s.as_str()),
        );
        let mut distribution = zeroed(BloodType::ALL.iter().map(|t| t.as_str()));
        let mut flagged = 0;
        let mut available_ml = 0u64;
        let mut expired = 0;

        for unit in &units {
            let fresh = self.policy.refresh(unit, today);
            *by_status.entry(fresh.status.as_str().to_string()).or_default() += 1;
            *distribution.entry(fresh.blood_type.as_str().to_string()).or_default() += 1;
            match fresh.status {
                UnitStatus::Available => {
                    available_ml += u64::from(fresh.volume_ml);
                    if fresh.flagged_for_expiry {
                        flagged += 1;
                    }
                }
                UnitStatus::Expired => expired += 1,
                _ => {}
            }
        }

        let mut requests_by_status = zeroed(
            [
                RequestStatus::Created,
                RequestStatus::Approved,
                RequestStatus::EnRoute,
                RequestStatus::Delivered,
                RequestStatus::Cancelled,
            ]
            .iter()
            .map(|s| s.as_str()),
        );
        for request in &requests {
            *requests_by_status
                .entry(request.status.as_str().to_string())
                .or_default() += 1;
        }

        let mut routes_by_status = zeroed(
            [RouteStatus::Pending, RouteStatus::Active, RouteStatus::Completed]
                .iter()
                .map(|s| s.as_str()),
        );
        for route in &routes {
            *routes_by_status
                .entry(route.status.as_str().to_string())
                .or_default() += 1;
        }

        let cities: BTreeSet<&str> = hospitals
            .iter()
            .map(|h| h.city.as_str())
            .chain(banks.iter().map(|b| b.city.as_str()))
            .collect();

        Ok(Dashboard {
            inventory: InventorySummary {
                total_units: units.len(),
                by_status,
                flagged_for_expiry: flagged,
                available_ml,
            },
            network: NetworkSummary {
                hospitals: hospitals.len(),
                blood_banks: banks.len(),
                drivers: drivers.len(),
                available_drivers: drivers.iter().filter(|d| d.available).count(),
                coverage_cities: cities.len(),
            },
            blood_type_distribution: distribution,
            requests_by_status,
            routes_by_status,
            wastage_prevention_rate: wastage_prevention_rate(units.len(), expired),
        })
    }
}

fn zeroed<'a>(keys: impl Iterator<Item = &'a str>) -> BTreeMap<String, usize> {
    keys.map(|k| (k.to_string(), 0)).collect()
}

/// `(total - expired) / max(total, 1) * 100`, rounded to one decimal.
pub fn wastage_prevention_rate(total: usize, expired: usize) -> f64 {
    let kept = total.saturating_sub(expired) as f64;
    let rate = kept / total.max(1) as f64 * 100.0;
    (rate * 10.0).round() / 10.0
}
