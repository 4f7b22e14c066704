use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{
    BankId, Coordinates, DriverId, EntityRef, HospitalId, RequestId, RouteId, TransferId, UnitId,
};

/// Fired by the request, route and transfer state machines after a transition commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    RequestCreated {
        request_id: RequestId,
        hospital_id: HospitalId,
        suggested_bank_id: BankId,
        at: DateTime<Utc>,
    },
    RequestApproved {
        request_id: RequestId,
        route_id: RouteId,
        driver_id: DriverId,
        at: DateTime<Utc>,
    },
    RequestCancelled {
        request_id: RequestId,
        released_units: usize,
        at: DateTime<Utc>,
    },
    RouteStarted {
        route_id: RouteId,
        request_id: RequestId,
        at: DateTime<Utc>,
    },
    ProgressRecorded {
        route_id: RouteId,
        location: Coordinates,
        at: DateTime<Utc>,
    },
    RouteCompleted {
        route_id: RouteId,
        request_id: RequestId,
        at: DateTime<Utc>,
    },
    RequestDelivered {
        request_id: RequestId,
        consumed_units: usize,
        at: DateTime<Utc>,
    },
    UnitsExpired {
        unit_ids: Vec<UnitId>,
        at: DateTime<Utc>,
    },
    TransferCreated {
        transfer_id: TransferId,
        unit_id: UnitId,
        from: EntityRef,
        to: EntityRef,
        at: DateTime<Utc>,
    },
    TransferCompleted {
        transfer_id: TransferId,
        unit_id: UnitId,
        at: DateTime<Utc>,
    },
    TransferCancelled {
        transfer_id: TransferId,
        unit_id: UnitId,
        at: DateTime<Utc>,
    },
}

impl DispatchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DispatchEvent::RequestCreated { .. } => "request_created",
            DispatchEvent::RequestApproved { .. } => "request_approved",
            DispatchEvent::RequestCancelled { .. } => "request_cancelled",
            DispatchEvent::RouteStarted { .. } => "route_started",
            DispatchEvent::ProgressRecorded { .. } => "progress_recorded",
            DispatchEvent::RouteCompleted { .. } => "route_completed",
            DispatchEvent::RequestDelivered { .. } => "request_delivered",
            DispatchEvent::UnitsExpired { .. } => "units_expired",
            DispatchEvent::TransferCreated { .. } => "transfer_created",
            DispatchEvent::TransferCompleted { .. } => "transfer_completed",
            DispatchEvent::TransferCancelled { .. } => "transfer_cancelled",
        }
    }
}

/// Push channel for transition events. A receiver is held internally so that
/// publishing never fails just because nobody is listening yet.
pub struct EventBus {
    sender: broadcast::Sender<DispatchEvent>,
    _keepalive: broadcast::Receiver<DispatchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, keepalive) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            _keepalive: keepalive,
        }
    }

    pub fn publish(&self, event: DispatchEvent) {
        tracing::debug!(event = event.name(), "publishing dispatch event");
        // Lagging subscribers drop old events; the send itself only fails without receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count().saturating_sub(1)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
