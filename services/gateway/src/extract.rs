//! Caller identity from request headers.
//!
//! There is no authentication here: the headers are trusted as sent.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use shared::types::{Actor, Role};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ROLE_HEADER: &str = "x-role";
pub const ENTITY_ID_HEADER: &str = "x-entity-id";

pub struct CurrentActor(pub Actor);

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, ApiError> {
    match parts.headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|v| Some(v.trim()))
            .map_err(|_| ApiError::Unauthorized(format!("{name} is not valid text"))),
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role = header(parts, ROLE_HEADER)?
            .filter(|r| !r.is_empty())
            .ok_or_else(|| ApiError::Unauthorized(format!("{ROLE_HEADER} header is required")))?;
        let entity_id = header(parts, ENTITY_ID_HEADER)?.filter(|e| !e.is_empty());

        let role = Role::parse(role, entity_id)
            .map_err(|err| ApiError::Unauthorized(err.to_string()))?;

        let user_id = match header(parts, USER_ID_HEADER)?.filter(|u| !u.is_empty()) {
            Some(user) => user.to_string(),
            None => match entity_id {
                Some(entity) => format!("{}:{entity}", role.name()),
                None => role.name().to_string(),
            },
        };

        Ok(CurrentActor(Actor::new(user_id, role)))
    }
}
