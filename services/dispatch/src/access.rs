//! Who may see which request or route.

use shared::models::{EmergencyRequest, Route};
use shared::types::{Actor, Role};
use shared::{CoreError, CoreResult};

pub fn can_view_request(actor: &Actor, request: &EmergencyRequest, route: Option<&Route>) -> bool {
    match actor.role {
        Role::Admin => true,
        Role::Hospital(id) => request.hospital_id == id,
        Role::BloodBank(id) => request.suggested_bank_id == id,
        Role::Driver(id) => route.is_some_and(|r| r.driver_id == id),
    }
}

pub fn ensure_can_view_request(
    actor: &Actor,
    request: &EmergencyRequest,
    route: Option<&Route>,
) -> CoreResult<()> {
    if can_view_request(actor, request, route) {
        Ok(())
    } else {
        Err(CoreError::forbidden(format!(
            "{} may not view request {}",
            actor.role.name(),
            request.id
        )))
    }
}

/// Drivers see their own runs; the request's hospital and bank see its route.
pub fn can_view_route(actor: &Actor, route: &Route, request: Option<&EmergencyRequest>) -> bool {
    match actor.role {
        Role::Admin => true,
        Role::Driver(id) => route.driver_id == id,
        Role::Hospital(id) => request.is_some_and(|r| r.hospital_id == id),
        Role::BloodBank(id) => request.is_some_and(|r| r.suggested_bank_id == id),
    }
}

pub fn ensure_assigned_driver(actor: &Actor, route: &Route) -> CoreResult<()> {
    match actor.driver_id() {
        Some(id) if id == route.driver_id => Ok(()),
        _ => Err(CoreError::forbidden(format!(
            "only the assigned driver may advance route {}",
            route.id
        ))),
    }
}

pub fn ensure_admin(actor: &Actor) -> CoreResult<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(CoreError::forbidden("admin role required"))
    }
}
