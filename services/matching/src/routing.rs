//! Distance and transit estimates between any two sites of the network.

use serde::Serialize;
use std::sync::Arc;

use shared::geo;
use shared::repository::{self, Store};
use shared::types::{Coordinates, EntityRef, Urgency};
use shared::CoreResult;

use crate::eta::EtaEstimator;

#[derive(Debug, Clone, Serialize)]
pub struct RoutingEstimate {
    pub from: EntityRef,
    pub to: EntityRef,
    pub from_location: Coordinates,
    pub to_location: Coordinates,
    pub distance_km: f64,
    pub urgency: Urgency,
    pub eta_minutes: u32,
}

pub struct RoutePlanner {
    store: Arc<dyn Store>,
    eta: Arc<EtaEstimator>,
}

impl RoutePlanner {
    pub fn new(store: Arc<dyn Store>, eta: Arc<EtaEstimator>) -> Self {
        Self { store, eta }
    }

    pub async fn locate(&self, entity: EntityRef) -> CoreResult<Coordinates> {
        Ok(repository::site(self.store.as_ref(), entity).await?.location)
    }

    pub async fn estimate(
        &self,
        from: EntityRef,
        to: EntityRef,
        urgency: Urgency,
    ) -> CoreResult<RoutingEstimate> {
        let from_location = self.locate(from).await?;
        let to_location = self.locate(to).await?;
        let distance_km = geo::distance_between(from_location, to_location);
        Ok(RoutingEstimate {
            from,
            to,
            from_location,
            to_location,
            distance_km,
            urgency,
            eta_minutes: self.eta.estimate(distance_km, urgency),
        })
    }
}
