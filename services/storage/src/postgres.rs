//! PostgreSQL store.
//!
//! Statements are assembled at runtime from `Entity::columns` so every table
//! shares one insert/update/filter path; only row decoding is per entity.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use std::marker::PhantomData;
use std::str::FromStr;
use std::time::Duration;

use shared::models::{
    BloodBank, BloodUnit, Driver, EmergencyRequest, Hospital, RequestItem, Route, TrackPoint,
    Transfer,
};
use shared::repository::{Entity, Filter, Repository, Store, StoreError, UnitRepository, Value};
use shared::types::{Coordinates, EntityId, EntityRef, UnitId, UnitStatus};

pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("database connection validation failed: {e}"))?;

    Ok(pool)
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn push_value(builder: &mut QueryBuilder<'_, Postgres>, value: Value) {
    match value {
        Value::Uuid(v) => builder.push_bind(v),
        Value::OptUuid(v) => builder.push_bind(v),
        Value::Text(v) => builder.push_bind(v),
        Value::Int(v) => builder.push_bind(v),
        Value::Float(v) => builder.push_bind(v),
        Value::OptFloat(v) => builder.push_bind(v),
        Value::Bool(v) => builder.push_bind(v),
        Value::Date(v) => builder.push_bind(v),
        Value::Timestamp(v) => builder.push_bind(v),
        Value::OptTimestamp(v) => builder.push_bind(v),
    };
}

/// Per-entity row decoding.
pub trait FromPgRow: Entity + Sized {
    fn from_row(row: &PgRow) -> Result<Self, StoreError>;
}

struct Columns<'r> {
    row: &'r PgRow,
    table: &'static str,
}

impl<'r> Columns<'r> {
    fn new<T: Entity>(row: &'r PgRow) -> Self {
        Self {
            row,
            table: T::TABLE,
        }
    }

    fn decode_err(&self, column: &str, reason: impl std::fmt::Display) -> StoreError {
        StoreError::Decode {
            table: self.table,
            reason: format!("{column}: {reason}"),
        }
    }

    fn get<T>(&self, column: &str) -> Result<T, StoreError>
    where
        T: for<'a> sqlx::Decode<'a, Postgres> + sqlx::Type<Postgres>,
    {
        self.row
            .try_get(column)
            .map_err(|e| self.decode_err(column, e))
    }

    fn parsed<T>(&self, column: &str) -> Result<T, StoreError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let text: String = self.get(column)?;
        text.parse().map_err(|e| self.decode_err(column, e))
    }

    fn id<T: From<uuid::Uuid>>(&self, column: &str) -> Result<T, StoreError> {
        self.get::<uuid::Uuid>(column).map(T::from)
    }

    fn count(&self, column: &str) -> Result<u32, StoreError> {
        let raw: i64 = self.get(column)?;
        u32::try_from(raw).map_err(|e| self.decode_err(column, e))
    }

    fn entity(&self, kind: &str, id: &str) -> Result<EntityRef, StoreError> {
        let kind: String = self.get(kind)?;
        let uuid: uuid::Uuid = self.get(id)?;
        EntityRef::from_uuid(&kind, uuid).map_err(|e| self.decode_err(id, e))
    }

    fn coordinates(&self, lat: &str, lon: &str) -> Result<Coordinates, StoreError> {
        Ok(Coordinates {
            latitude: self.get(lat)?,
            longitude: self.get(lon)?,
        })
    }
}

impl FromPgRow for Hospital {
    fn from_row(row: &PgRow) -> Result<Self, StoreError> {
        let c = Columns::new::<Self>(row);
        Ok(Hospital {
            id: c.id("id")?,
            name: c.get("name")?,
            address: c.get("address")?,
            city: c.get("city")?,
            state: c.get("state")?,
            location: c.coordinates("latitude", "longitude")?,
            contact_person: c.get("contact_person")?,
            contact_email: c.get("contact_email")?,
            contact_phone: c.get("contact_phone")?,
            created_at: c.get("created_at")?,
        })
    }
}

impl FromPgRow for BloodBank {
    fn from_row(row: &PgRow) -> Result<Self, StoreError> {
        let c = Columns::new::<Self>(row);
        Ok(BloodBank {
            id: c.id("id")?,
            name: c.get("name")?,
            address: c.get("address")?,
            city: c.get("city")?,
            state: c.get("state")?,
            location: c.coordinates("latitude", "longitude")?,
            contact_person: c.get("contact_person")?,
            contact_email: c.get("contact_email")?,
            contact_phone: c.get("contact_phone")?,
            created_at: c.get("created_at")?,
        })
    }
}

impl FromPgRow for BloodUnit {
    fn from_row(row: &PgRow) -> Result<Self, StoreError> {
        let c = Columns::new::<Self>(row);
        Ok(BloodUnit {
            id: c.id("id")?,
            bank_id: c.id("bank_id")?,
            blood_type: c.parsed("blood_type")?,
            volume_ml: c.count("volume_ml")?,
            collection_date: c.get("collection_date")?,
            expiry_date: c.get("expiry_date")?,
            status: c.parsed("status")?,
            flagged_for_expiry: c.get("flagged_for_expiry")?,
            location: c.coordinates("latitude", "longitude")?,
            created_at: c.get("created_at")?,
        })
    }
}

impl FromPgRow for EmergencyRequest {
    fn from_row(row: &PgRow) -> Result<Self, StoreError> {
        let c = Columns::new::<Self>(row);
        Ok(EmergencyRequest {
            id: c.id("id")?,
            hospital_id: c.id("hospital_id")?,
            blood_type: c.parsed("blood_type")?,
            quantity_ml: c.count("quantity_ml")?,
            urgency: c.parsed("urgency")?,
            status: c.parsed("status")?,
            suggested_bank_id: c.id("suggested_bank_id")?,
            match_confidence: c.get("match_confidence")?,
            predicted_eta_minutes: c.count("predicted_eta_minutes")?,
            notes: c.get("notes")?,
            created_at: c.get("created_at")?,
            updated_at: c.get("updated_at")?,
        })
    }
}

impl FromPgRow for RequestItem {
    fn from_row(row: &PgRow) -> Result<Self, StoreError> {
        let c = Columns::new::<Self>(row);
        Ok(RequestItem {
            id: c.id("id")?,
            request_id: c.id("request_id")?,
            unit_id: c.id("unit_id")?,
            source_bank_id: c.id("source_bank_id")?,
            quantity_ml: c.count("quantity_ml")?,
            created_at: c.get("created_at")?,
        })
    }
}

impl FromPgRow for Route {
    fn from_row(row: &PgRow) -> Result<Self, StoreError> {
        let c = Columns::new::<Self>(row);
        Ok(Route {
            id: c.id("id")?,
            request_id: c.id("request_id")?,
            driver_id: c.id("driver_id")?,
            start: c.coordinates("start_latitude", "start_longitude")?,
            end: c.coordinates("end_latitude", "end_longitude")?,
            distance_km: c.get("distance_km")?,
            eta_minutes: c.count("eta_minutes")?,
            status: c.parsed("status")?,
            started_at: c.get("started_at")?,
            completed_at: c.get("completed_at")?,
            created_at: c.get("created_at")?,
        })
    }
}

impl FromPgRow for TrackPoint {
    fn from_row(row: &PgRow) -> Result<Self, StoreError> {
        let c = Columns::new::<Self>(row);
        Ok(TrackPoint {
            id: c.id("id")?,
            route_id: c.id("route_id")?,
            location: c.coordinates("latitude", "longitude")?,
            recorded_at: c.get("recorded_at")?,
            seq: c.count("seq")?,
        })
    }
}

impl FromPgRow for Driver {
    fn from_row(row: &PgRow) -> Result<Self, StoreError> {
        let c = Columns::new::<Self>(row);
        let latitude: Option<f64> = c.get("latitude")?;
        let longitude: Option<f64> = c.get("longitude")?;
        Ok(Driver {
            id: c.id("id")?,
            name: c.get("name")?,
            phone: c.get("phone")?,
            vehicle_id: c.get("vehicle_id")?,
            location: latitude
                .zip(longitude)
                .map(|(latitude, longitude)| Coordinates {
                    latitude,
                    longitude,
                }),
            available: c.get("available")?,
            created_at: c.get("created_at")?,
        })
    }
}

impl FromPgRow for Transfer {
    fn from_row(row: &PgRow) -> Result<Self, StoreError> {
        let c = Columns::new::<Self>(row);
        Ok(Transfer {
            id: c.id("id")?,
            unit_id: c.id("unit_id")?,
            from: c.entity("from_kind", "from_id")?,
            to: c.entity("to_kind", "to_id")?,
            distance_km: c.get("distance_km")?,
            status: c.parsed("status")?,
            notes: c.get("notes")?,
            created_at: c.get("created_at")?,
            settled_at: c.get("settled_at")?,
        })
    }
}

pub struct PgTable<T> {
    pool: PgPool,
    _entity: PhantomData<fn() -> T>,
}

impl<T> PgTable<T> {
    fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _entity: PhantomData,
        }
    }
}

#[async_trait]
impl<T: FromPgRow> Repository<T> for PgTable<T> {
    async fn fetch(&self, id: T::Id) -> Result<Option<T>, StoreError> {
        let sql = format!("SELECT * FROM {} WHERE id = $1", T::TABLE);
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(T::from_row).transpose()
    }

    async fn fetch_where(&self, filter: &T::Filter) -> Result<Vec<T>, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT * FROM {}", T::TABLE));
        for (index, (column, value)) in filter.conditions().into_iter().enumerate() {
            builder.push(if index == 0 { " WHERE " } else { " AND " });
            builder.push(column).push(" = ");
            push_value(&mut builder, value);
        }
        builder.push(" ORDER BY id");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(T::from_row).collect()
    }

    async fn insert(&self, entity: &T) -> Result<(), StoreError> {
        let columns = entity.columns();
        let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();

        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {} ({}) VALUES (",
            T::TABLE,
            names.join(", ")
        ));
        for (index, (_, value)) in columns.into_iter().enumerate() {
            if index > 0 {
                builder.push(", ");
            }
            push_value(&mut builder, value);
        }
        builder.push(")");

        match builder.build().execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Duplicate {
                    table: T::TABLE,
                    id: entity.id().to_string(),
                })
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn update(&self, entity: &T) -> Result<(), StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new(format!("UPDATE {} SET ", T::TABLE));
        let assignments = entity
            .columns()
            .into_iter()
            .filter(|(name, _)| *name != "id");
        for (index, (column, value)) in assignments.enumerate() {
            if index > 0 {
                builder.push(", ");
            }
            builder.push(column).push(" = ");
            push_value(&mut builder, value);
        }
        builder.push(" WHERE id = ").push_bind(entity.id().as_uuid());

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing {
                table: T::TABLE,
                id: entity.id().to_string(),
            });
        }
        Ok(())
    }

    async fn delete(&self, id: T::Id) -> Result<bool, StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", T::TABLE);
        let result = sqlx::query(&sql)
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl UnitRepository for PgTable<BloodUnit> {
    async fn transition_status(
        &self,
        id: UnitId,
        from: UnitStatus,
        to: UnitStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE blood_units SET status = $1 WHERE id = $2 AND status = $3")
            .bind(to.as_str())
            .bind(id.as_uuid())
            .bind(from.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists = sqlx::query("SELECT 1 FROM blood_units WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::Missing {
                table: BloodUnit::TABLE,
                id: id.to_string(),
            }),
        }
    }
}

pub struct PgStore {
    pool: PgPool,
    hospitals: PgTable<Hospital>,
    banks: PgTable<BloodBank>,
    units: PgTable<BloodUnit>,
    requests: PgTable<EmergencyRequest>,
    request_items: PgTable<RequestItem>,
    routes: PgTable<Route>,
    track_points: PgTable<TrackPoint>,
    drivers: PgTable<Driver>,
    transfers: PgTable<Transfer>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            hospitals: PgTable::new(pool.clone()),
            banks: PgTable::new(pool.clone()),
            units: PgTable::new(pool.clone()),
            requests: PgTable::new(pool.clone()),
            request_items: PgTable::new(pool.clone()),
            routes: PgTable::new(pool.clone()),
            track_points: PgTable::new(pool.clone()),
            drivers: PgTable::new(pool.clone()),
            transfers: PgTable::new(pool.clone()),
            pool,
        }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = create_pool(database_url, max_connections).await?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Store for PgStore {
    fn hospitals(&self) -> &dyn Repository<Hospital> {
        &self.hospitals
    }

    fn banks(&self) -> &dyn Repository<BloodBank> {
        &self.banks
    }

    fn units(&self) -> &dyn UnitRepository {
        &self.units
    }

    fn requests(&self) -> &dyn Repository<EmergencyRequest> {
        &self.requests
    }

    fn request_items(&self) -> &dyn Repository<RequestItem> {
        &self.request_items
    }

    fn routes(&self) -> &dyn Repository<Route> {
        &self.routes
    }

    fn track_points(&self) -> &dyn Repository<TrackPoint> {
        &self.track_points
    }

    fn drivers(&self) -> &dyn Repository<Driver> {
        &self.drivers
    }

    fn transfers(&self) -> &dyn Repository<Transfer> {
        &self.transfers
    }
}
