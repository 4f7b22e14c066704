//! Delivery route state machine and tracking.
//!
//! `pending -> active -> completed`. Transitions hold the route's keyed lock;
//! steps that also move the parent request take the request lock after it,
//! never before. A driver drives one active route at a time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use shared::events::{DispatchEvent, EventBus};
use shared::geo;
use shared::models::{Driver, EmergencyRequest, Route, RouteFilter, TrackPoint, TrackPointFilter};
use shared::repository::{Repository, Store};
use shared::types::{
    Actor, Coordinates, DriverId, RequestId, Role, RouteId, RouteStatus, TrackPointId,
};
use shared::{Clock, CoreError, CoreResult, KeyedLocks};

use crate::access;
use crate::requests::RequestLifecycle;
use crate::tracking::{self, RouteProgress};

/// Pending route from the supplying bank to the requesting hospital.
pub fn plan_route(
    request: &EmergencyRequest,
    driver_id: DriverId,
    start: Coordinates,
    end: Coordinates,
    now: DateTime<Utc>,
) -> Route {
    Route {
        id: RouteId::new(),
        request_id: request.id,
        driver_id,
        start,
        end,
        distance_km: geo::distance_between(start, end),
        eta_minutes: request.predicted_eta_minutes,
        status: RouteStatus::Pending,
        started_at: None,
        completed_at: None,
        created_at: now,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteCompletion {
    pub route: Route,
    pub request: EmergencyRequest,
    pub progress: RouteProgress,
}

/// Everything a caller needs to follow one request on a map.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingView {
    pub request: EmergencyRequest,
    pub route: Option<Route>,
    pub driver: Option<Driver>,
    pub progress: Option<RouteProgress>,
    pub track_points: Vec<TrackPoint>,
}

pub struct RouteLifecycle {
    store: Arc<dyn Store>,
    locks: Arc<KeyedLocks>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    requests: Arc<RequestLifecycle>,
}

impl RouteLifecycle {
    pub fn new(
        store: Arc<dyn Store>,
        locks: Arc<KeyedLocks>,
        clock: Arc<dyn Clock>,
        events: Arc<EventBus>,
        requests: Arc<RequestLifecycle>,
    ) -> Self {
        Self {
            store,
            locks,
            clock,
            events,
            requests,
        }
    }

    /// Starting an already started route succeeds without a second start point.
    pub async fn start(&self, actor: &Actor, route_id: RouteId) -> CoreResult<Route> {
        let _guard = self.locks.lock(&KeyedLocks::route_key(route_id)).await;
        let mut route = self.fetch(route_id).await?;
        access::ensure_assigned_driver(actor, &route)?;

        if route.status != RouteStatus::Pending {
            debug!(route_id = %route_id, status = %route.status, "route already started");
            return Ok(route);
        }

        // Approval only waits on a driver while its request is still created,
        // so taking the driver before this route's request cannot cycle.
        let _driver_guard = self
            .locks
            .lock(&KeyedLocks::driver_key(route.driver_id))
            .await;
        let mut driver = self.driver(route.driver_id).await?;
        if let Some(other) = self.other_active_route(&route).await? {
            warn!(route_id = %route_id, driver_id = %driver.id, active = %other.id, "driver already on a run");
            return Err(CoreError::invalid_transition(format!(
                "driver {} is already driving route {}",
                driver.id, other.id
            )));
        }
        self.requests.mark_en_route(route.request_id).await?;

        let now = self.clock.now();
        route.status = RouteStatus::Active;
        route.started_at = Some(now);
        self.store.routes().update(&route).await?;
        self.append_point(&route, route.start, now).await?;

        driver.available = false;
        driver.location = Some(route.start);
        self.store.drivers().update(&driver).await?;

        info!(
            route_id = %route_id,
            request_id = %route.request_id,
            driver_id = %driver.id,
            "route started"
        );
        self.events.publish(DispatchEvent::RouteStarted {
            route_id,
            request_id: route.request_id,
            at: now,
        });
        Ok(route)
    }

    /// Appends a breadcrumb reported by the assigned driver.
    pub async fn record_progress(
        &self,
        actor: &Actor,
        route_id: RouteId,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> CoreResult<TrackPoint> {
        let location = Coordinates::from_parts(latitude, longitude)?;

        let _guard = self.locks.lock(&KeyedLocks::route_key(route_id)).await;
        let route = self.fetch(route_id).await?;
        access::ensure_assigned_driver(actor, &route)?;
        ensure_active(&route)?;

        self.advance(&route, location).await
    }

    /// Admin-only: a breadcrumb `fraction` of the way along the straight line.
    pub async fn simulate_progress(
        &self,
        actor: &Actor,
        route_id: RouteId,
        fraction: f64,
    ) -> CoreResult<TrackPoint> {
        access::ensure_admin(actor)?;
        if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
            return Err(CoreError::validation(format!(
                "fraction must be within [0, 1], got {fraction}"
            )));
        }

        let _guard = self.locks.lock(&KeyedLocks::route_key(route_id)).await;
        let route = self.fetch(route_id).await?;
        ensure_active(&route)?;

        let location = geo::interpolate(route.start, route.end, fraction);
        self.advance(&route, location).await
    }

    async fn advance(&self, route: &Route, location: Coordinates) -> CoreResult<TrackPoint> {
        let now = self.clock.now();
        let point = self.append_point(route, location, now).await?;

        if let Some(mut driver) = self.store.drivers().fetch(route.driver_id).await? {
            driver.location = Some(location);
            self.store.drivers().update(&driver).await?;
        }

        debug!(route_id = %route.id, seq = point.seq, "progress recorded");
        self.events.publish(DispatchEvent::ProgressRecorded {
            route_id: route.id,
            location,
            at: now,
        });
        Ok(point)
    }

    /// Completes the run and delivers the parent request. The route is put
    /// back to active if delivery fails.
    pub async fn complete(&self, actor: &Actor, route_id: RouteId) -> CoreResult<RouteCompletion> {
        let _guard = self.locks.lock(&KeyedLocks::route_key(route_id)).await;
        let mut route = self.fetch(route_id).await?;
        access::ensure_assigned_driver(actor, &route)?;
        ensure_active(&route)?;

        let previous = route.clone();
        let now = self.clock.now();
        route.status = RouteStatus::Completed;
        route.completed_at = Some(now);
        self.store.routes().update(&route).await?;

        let request = match self.requests.deliver(route.request_id).await {
            Ok(request) => request,
            Err(err) => {
                warn!(route_id = %route_id, error = %err, "delivery failed, reopening route");
                if let Err(restore) = self.store.routes().update(&previous).await {
                    warn!(route_id = %route_id, error = %restore, "failed to reopen route");
                }
                return Err(err);
            }
        };

        // Delivery is committed; a stale driver flag must not fail the call.
        if let Err(err) = self.free_driver(&route).await {
            warn!(route_id = %route_id, driver_id = %route.driver_id, error = %err, "failed to free driver");
        }

        let points = self.track_points(route_id).await?;
        let progress = tracking::compute(&route, &points);

        info!(
            route_id = %route_id,
            request_id = %route.request_id,
            driver_id = %route.driver_id,
            progress_percent = progress.progress_percent,
            "route completed"
        );
        self.events.publish(DispatchEvent::RouteCompleted {
            route_id,
            request_id: route.request_id,
            at: now,
        });
        Ok(RouteCompletion {
            route,
            request,
            progress,
        })
    }

    /// Marks the driver available unless another of their routes is still active.
    async fn free_driver(&self, route: &Route) -> CoreResult<()> {
        let _guard = self
            .locks
            .lock(&KeyedLocks::driver_key(route.driver_id))
            .await;
        if self.other_active_route(route).await?.is_some() {
            debug!(driver_id = %route.driver_id, "driver still active elsewhere");
            return Ok(());
        }
        if let Some(mut driver) = self.store.drivers().fetch(route.driver_id).await? {
            driver.available = true;
            self.store.drivers().update(&driver).await?;
        }
        Ok(())
    }

    async fn other_active_route(&self, route: &Route) -> CoreResult<Option<Route>> {
        Ok(driver_routes(self.store.as_ref(), route.driver_id)
            .await?
            .into_iter()
            .find(|other| other.id != route.id && other.status == RouteStatus::Active))
    }

    pub async fn get(&self, actor: &Actor, route_id: RouteId) -> CoreResult<Route> {
        let route = self.fetch(route_id).await?;
        let request = self.store.requests().fetch(route.request_id).await?;
        if !access::can_view_route(actor, &route, request.as_ref()) {
            return Err(CoreError::forbidden(format!(
                "{} may not view route {route_id}",
                actor.role.name()
            )));
        }
        Ok(route)
    }

    /// Routes visible to `actor`, ascending by id.
    pub async fn list(&self, actor: &Actor, status: Option<RouteStatus>) -> CoreResult<Vec<Route>> {
        match actor.role {
            Role::Admin | Role::Driver(_) => {
                let filter = RouteFilter {
                    driver_id: actor.driver_id(),
                    status,
                    ..Default::default()
                };
                Ok(self.store.routes().fetch_where(&filter).await?)
            }
            Role::Hospital(_) | Role::BloodBank(_) => {
                let mut routes = Vec::new();
                for request in self.requests.list(actor, None).await? {
                    if let Some(route) = self.requests.route_for(request.id).await? {
                        if status.map_or(true, |s| route.status == s) {
                            routes.push(route);
                        }
                    }
                }
                routes.sort_by_key(|r| r.id);
                Ok(routes)
            }
        }
    }

    pub async fn progress(&self, actor: &Actor, route_id: RouteId) -> CoreResult<RouteProgress> {
        let route = self.get(actor, route_id).await?;
        let points = self.track_points(route_id).await?;
        Ok(tracking::compute(&route, &points))
    }

    pub async fn tracking(&self, actor: &Actor, request_id: RequestId) -> CoreResult<TrackingView> {
        let request = self.requests.get(actor, request_id).await?;
        let Some(route) = self.requests.route_for(request_id).await? else {
            return Ok(TrackingView {
                request,
                route: None,
                driver: None,
                progress: None,
                track_points: Vec::new(),
            });
        };

        let track_points = self.track_points(route.id).await?;
        let driver = self.store.drivers().fetch(route.driver_id).await?;
        let progress = tracking::compute(&route, &track_points);
        Ok(TrackingView {
            request,
            progress: Some(progress),
            route: Some(route),
            driver,
            track_points,
        })
    }

    /// Breadcrumbs in travel order.
    pub async fn track_points(&self, route_id: RouteId) -> CoreResult<Vec<TrackPoint>> {
        let mut points = self
            .store
            .track_points()
            .fetch_where(&TrackPointFilter {
                route_id: Some(route_id),
            })
            .await?;
        tracking::order_points(&mut points);
        Ok(points)
    }

    async fn append_point(
        &self,
        route: &Route,
        location: Coordinates,
        at: DateTime<Utc>,
    ) -> CoreResult<TrackPoint> {
        let existing = self
            .store
            .track_points()
            .fetch_where(&TrackPointFilter {
                route_id: Some(route.id),
            })
            .await?;
        let seq = existing.iter().map(|p| p.seq + 1).max().unwrap_or(0);
        let point = TrackPoint {
            id: TrackPointId::new(),
            route_id: route.id,
            location,
            recorded_at: at,
            seq,
        };
        self.store.track_points().insert(&point).await?;
        Ok(point)
    }

    async fn fetch(&self, route_id: RouteId) -> CoreResult<Route> {
        self.store
            .routes()
            .fetch(route_id)
            .await?
            .ok_or_else(|| CoreError::not_found("route", route_id))
    }

    async fn driver(&self, driver_id: DriverId) -> CoreResult<Driver> {
        self.store
            .drivers()
            .fetch(driver_id)
            .await?
            .ok_or_else(|| CoreError::not_found("driver", driver_id))
    }
}

/// All routes assigned to `driver_id`, ascending by id.
pub(crate) async fn driver_routes(store: &dyn Store, driver_id: DriverId) -> CoreResult<Vec<Route>> {
    Ok(store
        .routes()
        .fetch_where(&RouteFilter {
            driver_id: Some(driver_id),
            ..Default::default()
        })
        .await?)
}

fn ensure_active(route: &Route) -> CoreResult<()> {
    if route.status == RouteStatus::Active {
        Ok(())
    } else {
        Err(CoreError::invalid_transition(format!(
            "route {} is {}, not active",
            route.id, route.status
        )))
    }
}
