use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Rejected primitive input. Converted into `CoreError::Validation` at the service boundary.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid {field}: {value:?}")]
pub struct ParseError {
    pub field: &'static str,
    pub value: String,
}

impl ParseError {
    pub fn new(field: &'static str, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }
}

/// Implemented by every entity id; lets the storage layer bind ids without knowing the concrete type.
pub trait EntityId:
    Copy + Ord + std::hash::Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    fn as_uuid(&self) -> Uuid;
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Deterministic id, mostly useful for fixtures that depend on id ordering.
            pub fn from_u128(value: u128) -> Self {
                Self(Uuid::from_u128(value))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl EntityId for $name {
            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_| ParseError::new(stringify!($name), s))
            }
        }
    };
}

entity_id!(HospitalId);
entity_id!(BankId);
entity_id!(UnitId);
entity_id!(RequestId);
entity_id!(
    /// Id of a `RequestItem` join row.
    ItemId
);
entity_id!(RouteId);
entity_id!(TrackPointId);
entity_id!(DriverId);
entity_id!(TransferId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BloodType {
    #[serde(rename = "A+")]
    APos,
    #[serde(rename = "A-")]
    ANeg,
    #[serde(rename = "B+")]
    BPos,
    #[serde(rename = "B-")]
    BNeg,
    #[serde(rename = "AB+")]
    AbPos,
    #[serde(rename = "AB-")]
    AbNeg,
    #[serde(rename = "O+")]
    OPos,
    #[serde(rename = "O-")]
    ONeg,
}

impl BloodType {
    pub const ALL: [BloodType; 8] = [
        BloodType::APos,
        BloodType::ANeg,
        BloodType::BPos,
        BloodType::BNeg,
        BloodType::AbPos,
        BloodType::AbNeg,
        BloodType::OPos,
        BloodType::ONeg,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BloodType::APos => "A+",
            BloodType::ANeg => "A-",
            BloodType::BPos => "B+",
            BloodType::BNeg => "B-",
            BloodType::AbPos => "AB+",
            BloodType::AbNeg => "AB-",
            BloodType::OPos => "O+",
            BloodType::ONeg => "O-",
        }
    }
}

impl fmt::Display for BloodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BloodType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        BloodType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ParseError::new("blood_type", s))
    }
}

/// Ordered by severity: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub const ALL: [Urgency; 4] = [Urgency::Low, Urgency::Medium, Urgency::High, Urgency::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Urgency {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Urgency::Low),
            "medium" => Ok(Urgency::Medium),
            "high" => Ok(Urgency::High),
            "critical" => Ok(Urgency::Critical),
            _ => Err(ParseError::new("urgency", s)),
        }
    }
}

macro_rules! status_enum {
    ($name:ident, $field:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(ParseError::new($field, s)),
                }
            }
        }
    };
}

status_enum!(UnitStatus, "unit_status", {
    Available => "available",
    Reserved => "reserved",
    Dispatched => "dispatched",
    Used => "used",
    Expired => "expired",
});

status_enum!(RequestStatus, "request_status", {
    Created => "created",
    Approved => "approved",
    EnRoute => "en_route",
    Delivered => "delivered",
    Cancelled => "cancelled",
});

status_enum!(RouteStatus, "route_status", {
    Pending => "pending",
    Active => "active",
    Completed => "completed",
});

status_enum!(TransferStatus, "transfer_status", {
    Pending => "pending",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Delivered | RequestStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Rejects non-finite values and anything outside [-90, 90] x [-180, 180].
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ParseError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(ParseError::new("latitude", latitude.to_string()));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(ParseError::new("longitude", longitude.to_string()));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Both halves of a coordinate pair supplied by a caller that may omit either one.
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Result<Self, ParseError> {
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => Self::new(lat, lon),
            (None, _) => Err(ParseError::new("latitude", "missing")),
            (_, None) => Err(ParseError::new("longitude", "missing")),
        }
    }
}

/// A site that blood can move between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Hospital(HospitalId),
    BloodBank(BankId),
}

impl EntityRef {
    pub fn parse(kind: &str, id: &str) -> Result<Self, ParseError> {
        match kind {
            "hospital" => Ok(EntityRef::Hospital(id.parse()?)),
            "blood_bank" => Ok(EntityRef::BloodBank(id.parse()?)),
            _ => Err(ParseError::new("entity_kind", kind)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EntityRef::Hospital(_) => "hospital",
            EntityRef::BloodBank(_) => "blood_bank",
        }
    }

    pub fn from_uuid(kind: &str, id: Uuid) -> Result<Self, ParseError> {
        match kind {
            "hospital" => Ok(EntityRef::Hospital(HospitalId(id))),
            "blood_bank" => Ok(EntityRef::BloodBank(BankId(id))),
            _ => Err(ParseError::new("entity_kind", kind)),
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            EntityRef::Hospital(id) => id.0,
            EntityRef::BloodBank(id) => id.0,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.uuid())
    }
}

/// What the caller acts as. Entity-bound roles carry the entity they speak for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "entity_id", rename_all = "snake_case")]
pub enum Role {
    Hospital(HospitalId),
    BloodBank(BankId),
    Driver(DriverId),
    Admin,
}

impl Role {
    pub fn parse(role: &str, entity_id: Option<&str>) -> Result<Self, ParseError> {
        let entity = || entity_id.ok_or_else(|| ParseError::new("entity_id", "missing"));
        match role.trim().to_ascii_lowercase().as_str() {
            "hospital" => Ok(Role::Hospital(entity()?.parse()?)),
            "blood_bank" => Ok(Role::BloodBank(entity()?.parse()?)),
            "driver" => Ok(Role::Driver(entity()?.parse()?)),
            "admin" => Ok(Role::Admin),
            _ => Err(ParseError::new("role", role)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Role::Hospital(_) => "hospital",
            Role::BloodBank(_) => "blood_bank",
            Role::Driver(_) => "driver",
            Role::Admin => "admin",
        }
    }
}

/// Identity passed explicitly into every state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn hospital(id: HospitalId) -> Self {
        Self::new(format!("hospital:{id}"), Role::Hospital(id))
    }

    pub fn bank(id: BankId) -> Self {
        Self::new(format!("bank:{id}"), Role::BloodBank(id))
    }

    pub fn driver(id: DriverId) -> Self {
        Self::new(format!("driver:{id}"), Role::Driver(id))
    }

    pub fn admin() -> Self {
        Self::new("admin", Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    pub fn hospital_id(&self) -> Option<HospitalId> {
        match self.role {
            Role::Hospital(id) => Some(id),
            _ => None,
        }
    }

    pub fn bank_id(&self) -> Option<BankId> {
        match self.role {
            Role::BloodBank(id) => Some(id),
            _ => None,
        }
    }

    pub fn driver_id(&self) -> Option<DriverId> {
        match self.role {
            Role::Driver(id) => Some(id),
            _ => None,
        }
    }
}
