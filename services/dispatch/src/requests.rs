//! Emergency request state machine.
//!
//! `created -> approved -> en_route -> delivered`, with `cancelled` reachable
//! from `created` and `approved`. Every transition holds the request's keyed
//! lock; approval reserves stock, writes request items and the pending route as
//! one unit of work and undoes all of it on failure.
//!
//! Lock order is request, then driver, then inventory.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use inventory_service::InventoryLedger;
use matching_engine::{BankMatchingEngine, EtaEstimator, MatchQuery};
use shared::events::{DispatchEvent, EventBus};
use shared::models::{
    BloodBank, Driver, DriverFilter, EmergencyRequest, Hospital, ItemFilter, RequestFilter,
    RequestItem, Route, RouteFilter,
};
use shared::repository::{Repository, Store};
use shared::types::{
    Actor, BankId, BloodType, DriverId, HospitalId, ItemId, RequestId, RequestStatus, Role, RouteId,
    RouteStatus, UnitId, Urgency,
};
use shared::locks::KeyGuard;
use shared::{Clock, CoreError, CoreResult, KeyedLocks};

use crate::access;
use crate::routes::{driver_routes, plan_route};

/// Caller input for a new request. Values arrive as primitives and are
/// validated here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRequest {
    /// Required when an admin files on a hospital's behalf.
    #[serde(default)]
    pub hospital_id: Option<HospitalId>,
    pub blood_type: String,
    pub quantity_ml: i64,
    #[serde(default)]
    pub urgency: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ApproveOptions {
    #[serde(default)]
    pub driver_id: Option<DriverId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Approval {
    pub request: EmergencyRequest,
    pub route: Route,
    pub items: Vec<RequestItem>,
}

/// What a failed approval has to take back.
#[derive(Default)]
struct Compensation {
    units: Vec<UnitId>,
    items: Vec<ItemId>,
    route: Option<RouteId>,
}

pub struct RequestLifecycle {
    store: Arc<dyn Store>,
    locks: Arc<KeyedLocks>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    ledger: Arc<InventoryLedger>,
    matcher: Arc<BankMatchingEngine>,
    eta: Arc<EtaEstimator>,
}

impl RequestLifecycle {
    pub fn new(
        store: Arc<dyn Store>,
        locks: Arc<KeyedLocks>,
        clock: Arc<dyn Clock>,
        events: Arc<EventBus>,
        ledger: Arc<InventoryLedger>,
        matcher: Arc<BankMatchingEngine>,
        eta: Arc<EtaEstimator>,
    ) -> Self {
        Self {
            store,
            locks,
            clock,
            events,
            ledger,
            matcher,
            eta,
        }
    }

    pub async fn create(&self, actor: &Actor, input: NewRequest) -> CoreResult<EmergencyRequest> {
        let hospital_id = requesting_hospital(actor, input.hospital_id)?;
        let blood_type: BloodType = input.blood_type.parse()?;
        let quantity_ml = validate_quantity(input.quantity_ml)?;
        let urgency: Urgency = input
            .urgency
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| CoreError::validation("urgency is required"))?
            .parse()?;

        let hospital = self.hospital(hospital_id).await?;
        let matched = self
            .matcher
            .find_best_bank(&MatchQuery {
                location: hospital.location,
                blood_type,
                quantity_ml,
                urgency,
            })
            .await?;

        let now = self.clock.now();
        let request = EmergencyRequest {
            id: RequestId::new(),
            hospital_id,
            blood_type,
            quantity_ml,
            urgency,
            status: RequestStatus::Created,
            suggested_bank_id: matched.bank_id,
            match_confidence: matched.confidence(),
            predicted_eta_minutes: self.eta.estimate(matched.distance_km, urgency),
            notes: input.notes.unwrap_or_default().trim().to_string(),
            created_at: now,
            updated_at: now,
        };
        self.store.requests().insert(&request).await?;

        info!(
            request_id = %request.id,
            hospital_id = %hospital_id,
            bank_id = %request.suggested_bank_id,
            blood_type = %blood_type,
            quantity_ml,
            urgency = %urgency,
            "emergency request created"
        );
        self.events.publish(DispatchEvent::RequestCreated {
            request_id: request.id,
            hospital_id,
            suggested_bank_id: request.suggested_bank_id,
            at: now,
        });
        Ok(request)
    }

    /// Suggested bank accepts: stock is reserved and a pending route is
    /// created for the chosen driver.
    pub async fn approve(
        &self,
        actor: &Actor,
        request_id: RequestId,
        options: ApproveOptions,
    ) -> CoreResult<Approval> {
        let _guard = self.locks.lock(&KeyedLocks::request_key(request_id)).await;
        let mut request = self.fetch(request_id).await?;

        if actor.bank_id() != Some(request.suggested_bank_id) {
            warn!(request_id = %request_id, role = actor.role.name(), "approval refused");
            return Err(CoreError::forbidden(format!(
                "only the suggested bank may approve request {request_id}"
            )));
        }
        if request.status != RequestStatus::Created {
            return Err(CoreError::AlreadyProcessed(request_id.to_string()));
        }

        let available_ml = self
            .ledger
            .available_quantity(request.suggested_bank_id, request.blood_type)
            .await?;
        if available_ml < request.quantity_ml {
            return Err(CoreError::InsufficientInventory {
                requested_ml: request.quantity_ml,
                available_ml,
            });
        }

        let bank = self.bank(request.suggested_bank_id).await?;
        let hospital = self.hospital(request.hospital_id).await?;
        // Held until the route is written so no second approval books the driver.
        let (driver, _driver_guard) = self.select_driver(options.driver_id).await?;

        let reservations = self
            .ledger
            .reserve(bank.id, request.blood_type, request.quantity_ml)
            .await?;
        let mut undo = Compensation {
            units: reservations.iter().map(|r| r.unit_id).collect(),
            ..Default::default()
        };

        let now = self.clock.now();
        let mut items = Vec::with_capacity(reservations.len());
        let committed = async {
            for reservation in &reservations {
                let item = RequestItem {
                    id: ItemId::new(),
                    request_id,
                    unit_id: reservation.unit_id,
                    source_bank_id: bank.id,
                    quantity_ml: reservation.quantity_ml,
                    created_at: now,
                };
                self.store.request_items().insert(&item).await?;
                undo.items.push(item.id);
                items.push(item);
            }

            let route = plan_route(&request, driver.id, bank.location, hospital.location, now);
            self.store.routes().insert(&route).await?;
            undo.route = Some(route.id);

            request.status = RequestStatus::Approved;
            request.updated_at = now;
            self.store.requests().update(&request).await?;
            Ok::<Route, CoreError>(route)
        }
        .await;

        let route = match committed {
            Ok(route) => route,
            Err(err) => {
                warn!(request_id = %request_id, error = %err, "approval failed, rolling back");
                self.compensate(undo).await;
                return Err(err);
            }
        };

        info!(
            request_id = %request_id,
            bank_id = %bank.id,
            route_id = %route.id,
            driver_id = %driver.id,
            units = items.len(),
            "emergency request approved"
        );
        self.events.publish(DispatchEvent::RequestApproved {
            request_id,
            route_id: route.id,
            driver_id: driver.id,
            at: now,
        });
        Ok(Approval {
            request,
            route,
            items,
        })
    }

    async fn compensate(&self, undo: Compensation) {
        if let Some(route_id) = undo.route {
            if let Err(err) = self.store.routes().delete(route_id).await {
                warn!(route_id = %route_id, error = %err, "failed to remove route");
            }
        }
        for item_id in undo.items {
            if let Err(err) = self.store.request_items().delete(item_id).await {
                warn!(item_id = %item_id, error = %err, "failed to remove request item");
            }
        }
        if let Err(err) = self.ledger.release(&undo.units).await {
            warn!(error = %err, "failed to release reserved units");
        }
    }

    /// Named driver if given and free, else the free driver with the lowest id.
    /// A driver with a pending or active route is not free.
    async fn select_driver(&self, requested: Option<DriverId>) -> CoreResult<(Driver, KeyGuard)> {
        if let Some(id) = requested {
            if self.store.drivers().fetch(id).await?.is_none() {
                return Err(CoreError::not_found("driver", id));
            }
            return self.claim_driver(id).await?.ok_or(CoreError::NoDriverAvailable);
        }

        let candidates = self
            .store
            .drivers()
            .fetch_where(&DriverFilter {
                available: Some(true),
            })
            .await?;
        for candidate in candidates {
            if let Some(claimed) = self.claim_driver(candidate.id).await? {
                return Ok(claimed);
            }
            debug!(driver_id = %candidate.id, "driver busy, skipping");
        }
        Err(CoreError::NoDriverAvailable)
    }

    async fn claim_driver(&self, id: DriverId) -> CoreResult<Option<(Driver, KeyGuard)>> {
        let guard = self.locks.lock(&KeyedLocks::driver_key(id)).await;
        let Some(driver) = self.store.drivers().fetch(id).await? else {
            return Ok(None);
        };
        if !driver.available {
            return Ok(None);
        }
        let busy = driver_routes(self.store.as_ref(), id)
            .await?
            .iter()
            .any(|route| route.status != RouteStatus::Completed);
        Ok((!busy).then_some((driver, guard)))
    }

    pub async fn cancel(&self, actor: &Actor, request_id: RequestId) -> CoreResult<EmergencyRequest> {
        let _guard = self.locks.lock(&KeyedLocks::request_key(request_id)).await;
        let mut request = self.fetch(request_id).await?;

        let owner = actor.hospital_id() == Some(request.hospital_id)
            || actor.bank_id() == Some(request.suggested_bank_id);
        if !owner {
            return Err(CoreError::forbidden(format!(
                "only the requesting hospital or suggested bank may cancel request {request_id}"
            )));
        }

        let previous = request.clone();
        let now = self.clock.now();
        request.status = RequestStatus::Cancelled;
        request.updated_at = now;

        let released_units = match previous.status {
            RequestStatus::Created => {
                self.store.requests().update(&request).await?;
                0
            }
            RequestStatus::Approved => self.cancel_approved(&previous, &request).await?,
            other => {
                warn!(request_id = %request_id, status = %other, "cancel rejected");
                return Err(CoreError::invalid_transition(format!(
                    "request {request_id} is {other} and cannot be cancelled"
                )));
            }
        };

        info!(request_id = %request_id, released_units, "emergency request cancelled");
        self.events.publish(DispatchEvent::RequestCancelled {
            request_id,
            released_units,
            at: now,
        });
        Ok(request)
    }

    /// Drops the pending route, records the cancellation and puts the units
    /// back, in that order. A failure restores the route and the request.
    async fn cancel_approved(
        &self,
        previous: &EmergencyRequest,
        cancelled: &EmergencyRequest,
    ) -> CoreResult<usize> {
        let request_id = previous.id;
        let units = self.reserved_units(request_id).await?;
        let mut removed = Vec::new();

        let outcome = async {
            for route in self.routes_of(request_id).await? {
                if route.status == RouteStatus::Pending {
                    self.store.routes().delete(route.id).await?;
                    removed.push(route);
                }
            }
            self.store.requests().update(cancelled).await?;
            match self.ledger.release(&units).await {
                Ok(released) => Ok(released),
                Err(err) => {
                    if let Err(restore) = self.store.requests().update(previous).await {
                        warn!(request_id = %request_id, error = %restore, "failed to restore request");
                    }
                    Err(err)
                }
            }
        }
        .await;

        if let Err(err) = &outcome {
            warn!(request_id = %request_id, error = %err, "cancel failed, restoring routes");
            for route in &removed {
                if let Err(restore) = self.store.routes().insert(route).await {
                    warn!(route_id = %route.id, error = %restore, "failed to restore route");
                }
            }
        }
        outcome
    }

    /// `approved -> en_route`, fired when the driver starts the route.
    pub async fn mark_en_route(&self, request_id: RequestId) -> CoreResult<EmergencyRequest> {
        let _guard = self.locks.lock(&KeyedLocks::request_key(request_id)).await;
        let mut request = self.fetch(request_id).await?;
        match request.status {
            RequestStatus::EnRoute => Ok(request),
            RequestStatus::Approved => {
                request.status = RequestStatus::EnRoute;
                request.updated_at = self.clock.now();
                self.store.requests().update(&request).await?;
                info!(request_id = %request_id, "emergency request en route");
                Ok(request)
            }
            other => Err(CoreError::invalid_transition(format!(
                "request {request_id} is {other}, not approved"
            ))),
        }
    }

    /// `en_route -> delivered`, consuming the reserved units. Driven by route completion.
    pub async fn deliver(&self, request_id: RequestId) -> CoreResult<EmergencyRequest> {
        let _guard = self.locks.lock(&KeyedLocks::request_key(request_id)).await;
        let mut request = self.fetch(request_id).await?;
        if request.status != RequestStatus::EnRoute {
            return Err(CoreError::invalid_transition(format!(
                "request {request_id} is {}, not en_route",
                request.status
            )));
        }

        let units = self.reserved_units(request_id).await?;
        let consumed_units = self.ledger.consume(&units).await?;

        let now = self.clock.now();
        request.status = RequestStatus::Delivered;
        request.updated_at = now;
        self.store.requests().update(&request).await?;

        info!(request_id = %request_id, consumed_units, "emergency request delivered");
        self.events.publish(DispatchEvent::RequestDelivered {
            request_id,
            consumed_units,
            at: now,
        });
        Ok(request)
    }

    pub async fn get(&self, actor: &Actor, request_id: RequestId) -> CoreResult<EmergencyRequest> {
        let request = self.fetch(request_id).await?;
        let route = self.route_for(request_id).await?;
        access::ensure_can_view_request(actor, &request, route.as_ref())?;
        Ok(request)
    }

    /// Requests visible to `actor`, ascending by id.
    pub async fn list(
        &self,
        actor: &Actor,
        status: Option<RequestStatus>,
    ) -> CoreResult<Vec<EmergencyRequest>> {
        let mut filter = RequestFilter {
            status,
            ..Default::default()
        };
        match actor.role {
            Role::Admin => {}
            Role::Hospital(id) => filter.hospital_id = Some(id),
            Role::BloodBank(id) => filter.suggested_bank_id = Some(id),
            Role::Driver(id) => {
                let routes = self
                    .store
                    .routes()
                    .fetch_where(&RouteFilter {
                        driver_id: Some(id),
                        ..Default::default()
                    })
                    .await?;
                let mut requests = Vec::with_capacity(routes.len());
                for route in routes {
                    if let Some(request) = self.store.requests().fetch(route.request_id).await? {
                        if status.map_or(true, |s| request.status == s) {
                            requests.push(request);
                        }
                    }
                }
                requests.sort_by_key(|r| r.id);
                return Ok(requests);
            }
        }
        Ok(self.store.requests().fetch_where(&filter).await?)
    }

    pub async fn items(&self, actor: &Actor, request_id: RequestId) -> CoreResult<Vec<RequestItem>> {
        self.get(actor, request_id).await?;
        self.items_of(request_id).await
    }

    pub async fn fetch(&self, request_id: RequestId) -> CoreResult<EmergencyRequest> {
        self.store
            .requests()
            .fetch(request_id)
            .await?
            .ok_or_else(|| CoreError::not_found("emergency request", request_id))
    }

    pub async fn route_for(&self, request_id: RequestId) -> CoreResult<Option<Route>> {
        Ok(self.routes_of(request_id).await?.into_iter().next())
    }

    async fn routes_of(&self, request_id: RequestId) -> CoreResult<Vec<Route>> {
        Ok(self
            .store
            .routes()
            .fetch_where(&RouteFilter {
                request_id: Some(request_id),
                ..Default::default()
            })
            .await?)
    }

    async fn items_of(&self, request_id: RequestId) -> CoreResult<Vec<RequestItem>> {
        Ok(self
            .store
            .request_items()
            .fetch_where(&ItemFilter {
                request_id: Some(request_id),
                ..Default::default()
            })
            .await?)
    }

    async fn reserved_units(&self, request_id: RequestId) -> CoreResult<Vec<UnitId>> {
        Ok(self
            .items_of(request_id)
            .await?
            .into_iter()
            .map(|item| item.unit_id)
            .collect())
    }

    async fn hospital(&self, id: HospitalId) -> CoreResult<Hospital> {
        self.store
            .hospitals()
            .fetch(id)
            .await?
            .ok_or_else(|| CoreError::not_found("hospital", id))
    }

    async fn bank(&self, id: BankId) -> CoreResult<BloodBank> {
        self.store
            .banks()
            .fetch(id)
            .await?
            .ok_or_else(|| CoreError::not_found("blood bank", id))
    }
}

fn requesting_hospital(actor: &Actor, named: Option<HospitalId>) -> CoreResult<HospitalId> {
    match (actor.role, named) {
        (Role::Hospital(own), None) => Ok(own),
        (Role::Hospital(own), Some(other)) if own == other => Ok(own),
        (Role::Hospital(_), Some(_)) => Err(CoreError::forbidden(
            "hospitals may only file requests for themselves",
        )),
        (Role::Admin, Some(id)) => Ok(id),
        (Role::Admin, None) => Err(CoreError::validation("hospital_id is required")),
        (role, _) => Err(CoreError::forbidden(format!(
            "{} may not file emergency requests",
            role.name()
        ))),
    }
}

fn validate_quantity(quantity_ml: i64) -> CoreResult<u32> {
    match u32::try_from(quantity_ml) {
        Ok(q) if q > 0 => Ok(q),
        _ => Err(CoreError::validation(format!(
            "quantity_ml must be a positive integer, got {quantity_ml}"
        ))),
    }
}
