use std::fmt::Display;
use thiserror::Error;

use crate::repository::StoreError;
use crate::types::{BloodType, ParseError};

/// Failure kinds of the dispatch core. All are recoverable at the HTTP boundary.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("insufficient inventory: requested {requested_ml} mL, available {available_ml} mL")]
    InsufficientInventory { requested_ml: u32, available_ml: u32 },

    #[error("no blood bank holds {quantity_ml} mL of {blood_type}")]
    NoSuitableBank { blood_type: BloodType, quantity_ml: u32 },

    #[error("request {0} already processed")]
    AlreadyProcessed(String),

    #[error("no driver available")]
    NoDriverAvailable,

    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Display) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        CoreError::Forbidden(message.into())
    }

    pub fn invalid_transition(message: impl Into<String>) -> Self {
        CoreError::InvalidTransition(message.into())
    }

    /// Stable code for callers that branch on the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation_error",
            CoreError::NotFound { .. } => "not_found",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::InvalidTransition(_) => "invalid_transition",
            CoreError::InsufficientInventory { .. } => "insufficient_inventory",
            CoreError::NoSuitableBank { .. } => "no_suitable_bank",
            CoreError::AlreadyProcessed(_) => "already_processed",
            CoreError::NoDriverAvailable => "no_driver_available",
            CoreError::Storage(_) => "storage_error",
        }
    }
}

impl From<ParseError> for CoreError {
    fn from(err: ParseError) -> Self {
        CoreError::Validation(err.to_string())
    }
}
