use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::repository::{Entity, Filter, Value};
use crate::types::{
    BankId, BloodType, Coordinates, DriverId, EntityId, EntityRef, HospitalId, ItemId, RequestId,
    RequestStatus, RouteId, RouteStatus, TrackPointId, TransferId, TransferStatus, UnitId,
    UnitStatus, Urgency,
};

fn uuid_of<I: EntityId>(id: I) -> Value {
    Value::Uuid(id.as_uuid())
}

fn push_eq<T, F>(out: &mut Vec<(&'static str, Value)>, column: &'static str, value: Option<T>, f: F)
where
    F: FnOnce(T) -> Value,
{
    if let Some(v) = value {
        out.push((column, f(v)));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hospital {
    pub id: HospitalId,
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub location: Coordinates,
    pub contact_person: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct HospitalFilter {
    pub city: Option<String>,
}

impl Filter for HospitalFilter {
    fn conditions(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        push_eq(&mut out, "city", self.city.clone(), Value::Text);
        out
    }
}

impl Entity for Hospital {
    type Id = HospitalId;
    type Filter = HospitalFilter;

    const TABLE: &'static str = "hospitals";

    fn id(&self) -> HospitalId {
        self.id
    }

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", uuid_of(self.id)),
            ("name", self.name.clone().into()),
            ("address", self.address.clone().into()),
            ("city", self.city.clone().into()),
            ("state", self.state.clone().into()),
            ("latitude", self.location.latitude.into()),
            ("longitude", self.location.longitude.into()),
            ("contact_person", self.contact_person.clone().into()),
            ("contact_email", self.contact_email.clone().into()),
            ("contact_phone", self.contact_phone.clone().into()),
            ("created_at", self.created_at.into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloodBank {
    pub id: BankId,
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub location: Coordinates,
    pub contact_person: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct BankFilter {
    pub city: Option<String>,
}

impl Filter for BankFilter {
    fn conditions(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        push_eq(&mut out, "city", self.city.clone(), Value::Text);
        out
    }
}

impl Entity for BloodBank {
    type Id = BankId;
    type Filter = BankFilter;

    const TABLE: &'static str = "blood_banks";

    fn id(&self) -> BankId {
        self.id
    }

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", uuid_of(self.id)),
            ("name", self.name.clone().into()),
            ("address", self.address.clone().into()),
            ("city", self.city.clone().into()),
            ("state", self.state.clone().into()),
            ("latitude", self.location.latitude.into()),
            ("longitude", self.location.longitude.into()),
            ("contact_person", self.contact_person.clone().into()),
            ("contact_email", self.contact_email.clone().into()),
            ("contact_phone", self.contact_phone.clone().into()),
            ("created_at", self.created_at.into()),
        ]
    }
}

/// One physical unit of blood. `status` is what was last persisted; expiry is
/// applied lazily on top of it by the inventory ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloodUnit {
    pub id: UnitId,
    pub bank_id: BankId,
    pub blood_type: BloodType,
    pub volume_ml: u32,
    pub collection_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub status: UnitStatus,
    pub flagged_for_expiry: bool,
    pub location: Coordinates,
    pub created_at: DateTime<Utc>,
}

impl BloodUnit {
    /// Negative once the unit is past its expiry date.
    pub fn days_until_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiry_date - today).num_days()
    }
}

#[derive(Debug, Clone, Default)]
pub struct UnitFilter {
    pub bank_id: Option<BankId>,
    pub blood_type: Option<BloodType>,
    pub status: Option<UnitStatus>,
    pub flagged_for_expiry: Option<bool>,
}

impl Filter for UnitFilter {
    fn conditions(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        push_eq(&mut out, "bank_id", self.bank_id, uuid_of);
        push_eq(&mut out, "blood_type", self.blood_type, |t| t.as_str().into());
        push_eq(&mut out, "status", self.status, |s| s.as_str().into());
        push_eq(&mut out, "flagged_for_expiry", self.flagged_for_expiry, Value::Bool);
        out
    }
}

impl Entity for BloodUnit {
    type Id = UnitId;
    type Filter = UnitFilter;

    const TABLE: &'static str = "blood_units";

    fn id(&self) -> UnitId {
        self.id
    }

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", uuid_of(self.id)),
            ("bank_id", uuid_of(self.bank_id)),
            ("blood_type", self.blood_type.as_str().into()),
            ("volume_ml", self.volume_ml.into()),
            ("collection_date", self.collection_date.into()),
            ("expiry_date", self.expiry_date.into()),
            ("status", self.status.as_str().into()),
            ("flagged_for_expiry", self.flagged_for_expiry.into()),
            ("latitude", self.location.latitude.into()),
            ("longitude", self.location.longitude.into()),
            ("created_at", self.created_at.into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyRequest {
    pub id: RequestId,
    pub hospital_id: HospitalId,
    pub blood_type: BloodType,
    pub quantity_ml: u32,
    pub urgency: Urgency,
    pub status: RequestStatus,
    pub suggested_bank_id: BankId,
    /// Matching score; not clamped to 100.
    pub match_confidence: f64,
    pub predicted_eta_minutes: u32,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub hospital_id: Option<HospitalId>,
    pub suggested_bank_id: Option<BankId>,
    pub status: Option<RequestStatus>,
}

impl Filter for RequestFilter {
    fn conditions(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        push_eq(&mut out, "hospital_id", self.hospital_id, uuid_of);
        push_eq(&mut out, "suggested_bank_id", self.suggested_bank_id, uuid_of);
        push_eq(&mut out, "status", self.status, |s| s.as_str().into());
        out
    }
}

impl Entity for EmergencyRequest {
    type Id = RequestId;
    type Filter = RequestFilter;

    const TABLE: &'static str = "emergency_requests";

    fn id(&self) -> RequestId {
        self.id
    }

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", uuid_of(self.id)),
            ("hospital_id", uuid_of(self.hospital_id)),
            ("blood_type", self.blood_type.as_str().into()),
            ("quantity_ml", self.quantity_ml.into()),
            ("urgency", self.urgency.as_str().into()),
            ("status", self.status.as_str().into()),
            ("suggested_bank_id", uuid_of(self.suggested_bank_id)),
            ("match_confidence", self.match_confidence.into()),
            ("predicted_eta_minutes", self.predicted_eta_minutes.into()),
            ("notes", self.notes.clone().into()),
            ("created_at", self.created_at.into()),
            ("updated_at", self.updated_at.into()),
        ]
    }
}

/// Binds a reserved unit to the request it was drawn for. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestItem {
    pub id: ItemId,
    pub request_id: RequestId,
    pub unit_id: UnitId,
    pub source_bank_id: BankId,
    pub quantity_ml: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub request_id: Option<RequestId>,
    pub unit_id: Option<UnitId>,
}

impl Filter for ItemFilter {
    fn conditions(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        push_eq(&mut out, "request_id", self.request_id, uuid_of);
        push_eq(&mut out, "unit_id", self.unit_id, uuid_of);
        out
    }
}

impl Entity for RequestItem {
    type Id = ItemId;
    type Filter = ItemFilter;

    const TABLE: &'static str = "request_items";

    fn id(&self) -> ItemId {
        self.id
    }

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", uuid_of(self.id)),
            ("request_id", uuid_of(self.request_id)),
            ("unit_id", uuid_of(self.unit_id)),
            ("source_bank_id", uuid_of(self.source_bank_id)),
            ("quantity_ml", self.quantity_ml.into()),
            ("created_at", self.created_at.into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub request_id: RequestId,
    pub driver_id: DriverId,
    pub start: Coordinates,
    pub end: Coordinates,
    pub distance_km: f64,
    pub eta_minutes: u32,
    pub status: RouteStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct RouteFilter {
    pub request_id: Option<RequestId>,
    pub driver_id: Option<DriverId>,
    pub status: Option<RouteStatus>,
}

impl Filter for RouteFilter {
    fn conditions(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        push_eq(&mut out, "request_id", self.request_id, uuid_of);
        push_eq(&mut out, "driver_id", self.driver_id, uuid_of);
        push_eq(&mut out, "status", self.status, |s| s.as_str().into());
        out
    }
}

impl Entity for Route {
    type Id = RouteId;
    type Filter = RouteFilter;

    const TABLE: &'static str = "routes";

    fn id(&self) -> RouteId {
        self.id
    }

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", uuid_of(self.id)),
            ("request_id", uuid_of(self.request_id)),
            ("driver_id", uuid_of(self.driver_id)),
            ("start_latitude", self.start.latitude.into()),
            ("start_longitude", self.start.longitude.into()),
            ("end_latitude", self.end.latitude.into()),
            ("end_longitude", self.end.longitude.into()),
            ("distance_km", self.distance_km.into()),
            ("eta_minutes", self.eta_minutes.into()),
            ("status", self.status.as_str().into()),
            ("started_at", self.started_at.into()),
            ("completed_at", self.completed_at.into()),
            ("created_at", self.created_at.into()),
        ]
    }
}

/// GPS breadcrumb. `seq` breaks ties between samples sharing a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub id: TrackPointId,
    pub route_id: RouteId,
    pub location: Coordinates,
    pub recorded_at: DateTime<Utc>,
    pub seq: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TrackPointFilter {
    pub route_id: Option<RouteId>,
}

impl Filter for TrackPointFilter {
    fn conditions(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        push_eq(&mut out, "route_id", self.route_id, uuid_of);
        out
    }
}

impl Entity for TrackPoint {
    type Id = TrackPointId;
    type Filter = TrackPointFilter;

    const TABLE: &'static str = "track_points";

    fn id(&self) -> TrackPointId {
        self.id
    }

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", uuid_of(self.id)),
            ("route_id", uuid_of(self.route_id)),
            ("latitude", self.location.latitude.into()),
            ("longitude", self.location.longitude.into()),
            ("recorded_at", self.recorded_at.into()),
            ("seq", self.seq.into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: DriverId,
    pub name: String,
    pub phone: String,
    pub vehicle_id: String,
    pub location: Option<Coordinates>,
    pub available: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct DriverFilter {
    pub available: Option<bool>,
}

impl Filter for DriverFilter {
    fn conditions(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        push_eq(&mut out, "available", self.available, Value::Bool);
        out
    }
}

impl Entity for Driver {
    type Id = DriverId;
    type Filter = DriverFilter;

    const TABLE: &'static str = "drivers";

    fn id(&self) -> DriverId {
        self.id
    }

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", uuid_of(self.id)),
            ("name", self.name.clone().into()),
            ("phone", self.phone.clone().into()),
            ("vehicle_id", self.vehicle_id.clone().into()),
            ("latitude", self.location.map(|c| c.latitude).into()),
            ("longitude", self.location.map(|c| c.longitude).into()),
            ("available", self.available.into()),
            ("created_at", self.created_at.into()),
        ]
    }
}

/// One unit moving between two sites outside the emergency flow, e.g. a
/// near-expiry unit sent to where it will be used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub unit_id: UnitId,
    pub from: EntityRef,
    pub to: EntityRef,
    pub distance_km: f64,
    pub status: TransferStatus,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct TransferFilter {
    pub unit_id: Option<UnitId>,
    pub from_id: Option<Uuid>,
    pub to_id: Option<Uuid>,
    pub status: Option<TransferStatus>,
}

impl Filter for TransferFilter {
    fn conditions(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        push_eq(&mut out, "unit_id", self.unit_id, uuid_of);
        push_eq(&mut out, "from_id", self.from_id, Value::Uuid);
        push_eq(&mut out, "to_id", self.to_id, Value::Uuid);
        push_eq(&mut out, "status", self.status, |s| s.as_str().into());
        out
    }
}

impl Entity for Transfer {
    type Id = TransferId;
    type Filter = TransferFilter;

    const TABLE: &'static str = "transfers";

    fn id(&self) -> TransferId {
        self.id
    }

    fn columns(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", uuid_of(self.id)),
            ("unit_id", uuid_of(self.unit_id)),
            ("from_kind", self.from.kind().into()),
            ("from_id", Value::Uuid(self.from.uuid())),
            ("to_kind", self.to.kind().into()),
            ("to_id", Value::Uuid(self.to.uuid())),
            ("distance_km", self.distance_km.into()),
            ("status", self.status.as_str().into()),
            ("notes", self.notes.clone().into()),
            ("created_at", self.created_at.into()),
            ("settled_at", self.settled_at.into()),
        ]
    }
}
