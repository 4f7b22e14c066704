//! Blood unit ledger: availability, all-or-nothing reservation and the
//! reserved -> available / used transitions.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use shared::events::{DispatchEvent, EventBus};
use shared::models::{BloodUnit, UnitFilter};
use shared::repository::{Repository, Store, StoreError, UnitRepository};
use shared::types::{BankId, BloodType, Coordinates, UnitId, UnitStatus};
use shared::{Clock, CoreError, CoreResult, KeyedLocks};

use crate::expiry::ExpiryPolicy;

const DEFAULT_RESERVE_RETRIES: u32 = 3;

/// One unit drawn for a request. `quantity_ml` may be less than the unit's
/// volume when only part of the last unit was needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub unit_id: UnitId,
    pub quantity_ml: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUnit {
    pub bank_id: BankId,
    pub blood_type: BloodType,
    pub volume_ml: u32,
    pub collection_date: NaiveDate,
    pub expiry_date: NaiveDate,
    /// Defaults to the owning bank's location.
    #[serde(default)]
    pub location: Option<Coordinates>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlaggedUnit {
    #[serde(flatten)]
    pub unit: BloodUnit,
    pub days_until_expiry: i64,
}

pub struct InventoryLedger {
    store: Arc<dyn Store>,
    locks: Arc<KeyedLocks>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    policy: ExpiryPolicy,
    reserve_retries: u32,
}

impl InventoryLedger {
    pub fn new(
        store: Arc<dyn Store>,
        locks: Arc<KeyedLocks>,
        clock: Arc<dyn Clock>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            locks,
            clock,
            events,
            policy: ExpiryPolicy::default(),
            reserve_retries: DEFAULT_RESERVE_RETRIES,
        }
    }

    pub fn with_expiry_flag_days(mut self, days: i64) -> Self {
        self.policy = ExpiryPolicy::new(days);
        self
    }

    pub fn with_reserve_retries(mut self, retries: u32) -> Self {
        self.reserve_retries = retries.max(1);
        self
    }

    pub fn policy(&self) -> ExpiryPolicy {
        self.policy
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Units of `blood_type` at `bank_id` that can still be drawn, ascending by id.
    /// Expired stock is excluded even while its stored status says available.
    pub async fn available_units(
        &self,
        bank_id: BankId,
        blood_type: BloodType,
    ) -> CoreResult<Vec<BloodUnit>> {
        let filter = UnitFilter {
            bank_id: Some(bank_id),
            blood_type: Some(blood_type),
            status: Some(UnitStatus::Available),
            ..Default::default()
        };
        let today = self.today();
        let units = self.store.units().fetch_where(&filter).await?;
        Ok(units
            .iter()
            .map(|unit| self.policy.refresh(unit, today))
            .filter(|unit| unit.status == UnitStatus::Available)
            .collect())
    }

    pub async fn available_quantity(&self, bank_id: BankId, blood_type: BloodType) -> CoreResult<u32> {
        let units = self.available_units(bank_id, blood_type).await?;
        Ok(total_volume(&units))
    }

    /// Draws `quantity_ml` from the bank's available units in ascending id order.
    ///
    /// Every drawn unit flips to reserved, including one that is only partly
    /// needed. Nothing changes when the request cannot be covered.
    pub async fn reserve(
        &self,
        bank_id: BankId,
        blood_type: BloodType,
        quantity_ml: u32,
    ) -> CoreResult<Vec<Reservation>> {
        if quantity_ml == 0 {
            return Err(CoreError::validation("quantity_ml must be positive"));
        }

        let _guard = self
            .locks
            .lock(&KeyedLocks::inventory_key(bank_id, blood_type))
            .await;

        let mut available_ml = 0;
        for attempt in 1..=self.reserve_retries {
            let units = self.available_units(bank_id, blood_type).await?;
            available_ml = total_volume(&units);
            if available_ml < quantity_ml {
                break;
            }

            let plan = plan_reservation(&units, quantity_ml);
            if self.flip_all(&plan).await? {
                info!(
                    bank_id = %bank_id,
                    blood_type = %blood_type,
                    quantity_ml,
                    units = plan.len(),
                    "inventory reserved"
                );
                return Ok(plan);
            }
            warn!(
                bank_id = %bank_id,
                blood_type = %blood_type,
                attempt,
                "unit changed during reservation, replanning"
            );
        }

        warn!(
            bank_id = %bank_id,
            blood_type = %blood_type,
            requested_ml = quantity_ml,
            available_ml,
            "reservation rejected"
        );
        Err(CoreError::InsufficientInventory {
            requested_ml: quantity_ml,
            available_ml,
        })
    }

    /// Flips every planned unit to reserved, or none of them.
    async fn flip_all(&self, plan: &[Reservation]) -> CoreResult<bool> {
        let units = self.store.units();
        let mut flipped = Vec::with_capacity(plan.len());

        for reservation in plan {
            let outcome = units
                .transition_status(reservation.unit_id, UnitStatus::Available, UnitStatus::Reserved)
                .await;
            match outcome {
                Ok(true) => flipped.push(reservation.unit_id),
                Ok(false) => {
                    self.rollback(&flipped).await;
                    return Ok(false);
                }
                Err(err) => {
                    self.rollback(&flipped).await;
                    return Err(err.into());
                }
            }
        }
        Ok(true)
    }

    async fn rollback(&self, unit_ids: &[UnitId]) {
        for unit_id in unit_ids {
            let restored = self
                .store
                .units()
                .transition_status(*unit_id, UnitStatus::Reserved, UnitStatus::Available)
                .await;
            if let Err(err) = restored {
                warn!(unit_id = %unit_id, error = %err, "failed to roll back reservation");
            }
        }
    }

    /// Reserved units go back on the shelf. Units in any other state are
    /// skipped; on a store error nothing is released.
    pub async fn release(&self, unit_ids: &[UnitId]) -> CoreResult<usize> {
        let released = self
            .transition_each(unit_ids, UnitStatus::Reserved, UnitStatus::Available)
            .await?;
        info!(released, "inventory released");
        Ok(released)
    }

    /// Reserved units are marked used. Units in any other state are skipped.
    pub async fn consume(&self, unit_ids: &[UnitId]) -> CoreResult<usize> {
        let consumed = self
            .transition_each(unit_ids, UnitStatus::Reserved, UnitStatus::Used)
            .await?;
        info!(consumed, "inventory consumed");
        Ok(consumed)
    }

    /// Moves every listed unit from `from` to `to`. A store error puts the
    /// units already moved back before it is returned.
    async fn transition_each(
        &self,
        unit_ids: &[UnitId],
        from: UnitStatus,
        to: UnitStatus,
    ) -> CoreResult<usize> {
        let units = self.store.units();
        let mut changed = Vec::with_capacity(unit_ids.len());
        for unit_id in unit_ids {
            let failure = match units.transition_status(*unit_id, from, to).await {
                Ok(true) => {
                    changed.push(*unit_id);
                    continue;
                }
                Ok(false) => {
                    warn!(unit_id = %unit_id, from = %from, to = %to, "unit not in expected state");
                    continue;
                }
                Err(StoreError::Missing { .. }) => CoreError::not_found("blood unit", unit_id),
                Err(err) => err.into(),
            };

            for done in &changed {
                if let Err(err) = units.transition_status(*done, to, from).await {
                    warn!(unit_id = %done, error = %err, "failed to undo unit transition");
                }
            }
            return Err(failure);
        }
        Ok(changed.len())
    }

    /// Registers a freshly collected unit at its bank.
    pub async fn intake(&self, new_unit: NewUnit) -> CoreResult<BloodUnit> {
        if new_unit.volume_ml == 0 {
            return Err(CoreError::validation("volume_ml must be positive"));
        }
        if new_unit.collection_date > new_unit.expiry_date {
            return Err(CoreError::validation(
                "collection_date must not be after expiry_date",
            ));
        }

        let bank = self
            .store
            .banks()
            .fetch(new_unit.bank_id)
            .await?
            .ok_or_else(|| CoreError::not_found("blood bank", new_unit.bank_id))?;

        let location = match new_unit.location {
            Some(c) => Coordinates::new(c.latitude, c.longitude)?,
            None => bank.location,
        };

        let today = self.today();
        let mut unit = BloodUnit {
            id: UnitId::new(),
            bank_id: bank.id,
            blood_type: new_unit.blood_type,
            volume_ml: new_unit.volume_ml,
            collection_date: new_unit.collection_date,
            expiry_date: new_unit.expiry_date,
            status: UnitStatus::Available,
            flagged_for_expiry: false,
            location,
            created_at: self.clock.now(),
        };
        unit.flagged_for_expiry = self.policy.is_flagged(&unit, today);
        if self.policy.is_expired(&unit, today) {
            unit.status = UnitStatus::Expired;
        }

        self.store.units().insert(&unit).await?;
        info!(
            unit_id = %unit.id,
            bank_id = %unit.bank_id,
            blood_type = %unit.blood_type,
            volume_ml = unit.volume_ml,
            "unit registered"
        );
        Ok(unit)
    }

    /// Available units close to expiry, soonest first.
    pub async fn flagged_units(&self, bank_id: Option<BankId>) -> CoreResult<Vec<FlaggedUnit>> {
        let filter = UnitFilter {
            bank_id,
            status: Some(UnitStatus::Available),
            ..Default::default()
        };
        let today = self.today();
        let mut flagged: Vec<FlaggedUnit> = self
            .store
            .units()
            .fetch_where(&filter)
            .await?
            .iter()
            .map(|unit| self.policy.refresh(unit, today))
            .filter(|unit| unit.flagged_for_expiry && unit.status == UnitStatus::Available)
            .map(|unit| FlaggedUnit {
                days_until_expiry: unit.days_until_expiry(today),
                unit,
            })
            .collect();
        flagged.sort_by(|a, b| {
            a.days_until_expiry
                .cmp(&b.days_until_expiry)
                .then(a.unit.id.cmp(&b.unit.id))
        });
        debug!(count = flagged.len(), "flagged units listed");
        Ok(flagged)
    }

    /// Persists the expired status for available units past their date.
    /// Reads never depend on this having run.
    pub async fn sweep_expired(&self) -> CoreResult<Vec<UnitId>> {
        let filter = UnitFilter {
            status: Some(UnitStatus::Available),
            ..Default::default()
        };
        let today = self.today();
        let candidates = self.store.units().fetch_where(&filter).await?;

        let mut expired = Vec::new();
        for unit in candidates.iter().filter(|u| self.policy.is_expired(u, today)) {
            let changed = self
                .store
                .units()
                .transition_status(unit.id, UnitStatus::Available, UnitStatus::Expired)
                .await?;
            if changed {
                expired.push(unit.id);
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "expired units swept");
            self.events.publish(DispatchEvent::UnitsExpired {
                unit_ids: expired.clone(),
                at: self.clock.now(),
            });
        }
        Ok(expired)
    }
}

fn total_volume(units: &[BloodUnit]) -> u32 {
    units
        .iter()
        .fold(0u32, |sum, unit| sum.saturating_add(unit.volume_ml))
}

/// Greedy draw in the given order until `quantity_ml` is covered.
pub fn plan_reservation(units: &[BloodUnit], quantity_ml: u32) -> Vec<Reservation> {
    let mut remaining = quantity_ml;
    let mut plan = Vec::new();
    for unit in units {
        if remaining == 0 {
            break;
        }
        let drawn = remaining.min(unit.volume_ml);
        plan.push(Reservation {
            unit_id: unit.id,
            quantity_ml: drawn,
        });
        remaining -= drawn;
    }
    plan
}
