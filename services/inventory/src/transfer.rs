//! Unit transfers between sites, outside the emergency request flow.
//!
//! `pending -> completed | cancelled`. A pending transfer holds its unit in
//! `dispatched`; completion lands it at the destination (back on the shelf at
//! a bank, `used` at a hospital) and cancellation returns it to `available`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use shared::events::{DispatchEvent, EventBus};
use shared::geo;
use shared::models::{BloodUnit, Transfer, TransferFilter};
use shared::repository::{self, Repository, Site, Store, UnitRepository};
use shared::types::{Actor, EntityRef, Role, TransferId, TransferStatus, UnitId, UnitStatus};
use shared::{Clock, CoreError, CoreResult, KeyedLocks};

use crate::expiry::ExpiryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct NewTransfer {
    pub unit_id: UnitId,
    pub to_kind: String,
    pub to_id: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A transfer with both ends and the unit resolved for display.
#[derive(Debug, Clone, Serialize)]
pub struct TransferDetail {
    #[serde(flatten)]
    pub transfer: Transfer,
    pub unit: Option<BloodUnit>,
    pub from_site: Option<Site>,
    pub to_site: Option<Site>,
}

pub struct TransferService {
    store: Arc<dyn Store>,
    locks: Arc<KeyedLocks>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    policy: ExpiryPolicy,
}

impl TransferService {
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
        }
    }

    pub fn with_policy(mut self, policy: ExpiryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sends an available unit from its bank to another site. Only the owning
    /// bank or an admin may send.
    pub async fn create(&self, actor: &Actor, input: NewTransfer) -> CoreResult<Transfer> {
        let to = EntityRef::parse(&input.to_kind, &input.to_id)?;
        let unit = self.unit(input.unit_id).await?;
        let from = EntityRef::BloodBank(unit.bank_id);

        if !actor.is_admin() && actor.bank_id() != Some(unit.bank_id) {
            return Err(CoreError::forbidden(format!(
                "only the holding bank may transfer unit {}",
                unit.id
            )));
        }
        if to == from {
            return Err(CoreError::validation(format!("unit {} is already at {to}", unit.id)));
        }
        let destination = repository::site(self.store.as_ref(), to).await?;

        // Same lock as reservation so a unit is never drawn and sent at once.
        let _guard = self
            .locks
            .lock(&KeyedLocks::inventory_key(unit.bank_id, unit.blood_type))
            .await;
        let unit = self.unit(unit.id).await?;
        let status = self.policy.effective_status(&unit, self.clock.today());
        if status != UnitStatus::Available {
            return Err(CoreError::invalid_transition(format!(
                "unit {} is {status} and cannot be transferred",
                unit.id
            )));
        }

        let units = self.store.units();
        if !units
            .transition_status(unit.id, UnitStatus::Available, UnitStatus::Dispatched)
            .await?
        {
            return Err(CoreError::invalid_transition(format!(
                "unit {} changed while being transferred",
                unit.id
            )));
        }

        let now = self.clock.now();
        let transfer = Transfer {
            id: TransferId::new(),
            unit_id: unit.id,
            from,
            to,
            distance_km: geo::distance_between(unit.location, destination.location),
            status: TransferStatus::Pending,
            notes: input.notes.unwrap_or_default().trim().to_string(),
            created_at: now,
            settled_at: None,
        };
        if let Err(err) = self.store.transfers().insert(&transfer).await {
            if let Err(undo) = units
                .transition_status(unit.id, UnitStatus::Dispatched, UnitStatus::Available)
                .await
            {
                warn!(unit_id = %unit.id, error = %undo, "failed to return unit to shelf");
            }
            return Err(err.into());
        }

        info!(
            transfer_id = %transfer.id,
            unit_id = %unit.id,
            from = %from,
            to = %to,
            distance_km = transfer.distance_km,
            "transfer created"
        );
        self.events.publish(DispatchEvent::TransferCreated {
            transfer_id: transfer.id,
            unit_id: unit.id,
            from,
            to,
            at: now,
        });
        Ok(transfer)
    }

    /// The receiving site (or an admin) confirms arrival.
    pub async fn complete(&self, actor: &Actor, transfer_id: TransferId) -> CoreResult<Transfer> {
        let _guard = self.locks.lock(&KeyedLocks::transfer_key(transfer_id)).await;
        let mut transfer = self.fetch(transfer_id).await?;
        if !actor.is_admin() && !speaks_for(actor, transfer.to) {
            return Err(CoreError::forbidden(format!(
                "only the receiving site may complete transfer {transfer_id}"
            )));
        }
        ensure_pending(&transfer)?;

        let unit = self.unit(transfer.unit_id).await?;
        if unit.status != UnitStatus::Dispatched {
            return Err(CoreError::invalid_transition(format!(
                "unit {} is {}, not dispatched",
                unit.id, unit.status
            )));
        }
        let destination = repository::site(self.store.as_ref(), transfer.to).await?;

        let previous = transfer.clone();
        let now = self.clock.now();
        transfer.status = TransferStatus::Completed;
        transfer.settled_at = Some(now);
        self.store.transfers().update(&transfer).await?;

        let landed = self.land(&unit, &destination);
        if let Err(err) = self.store.units().update(&landed).await {
            warn!(transfer_id = %transfer_id, error = %err, "unit update failed, reopening transfer");
            if let Err(restore) = self.store.transfers().update(&previous).await {
                warn!(transfer_id = %transfer_id, error = %restore, "failed to reopen transfer");
            }
            return Err(err.into());
        }

        info!(
            transfer_id = %transfer_id,
            unit_id = %unit.id,
            to = %transfer.to,
            unit_status = %landed.status,
            "transfer completed"
        );
        self.events.publish(DispatchEvent::TransferCompleted {
            transfer_id,
            unit_id: unit.id,
            at: now,
        });
        Ok(transfer)
    }

    /// The sending bank (or an admin) calls the transfer off; the unit goes
    /// back on its shelf.
    pub async fn cancel(&self, actor: &Actor, transfer_id: TransferId) -> CoreResult<Transfer> {
        let _guard = self.locks.lock(&KeyedLocks::transfer_key(transfer_id)).await;
        let mut transfer = self.fetch(transfer_id).await?;
        if !actor.is_admin() && !speaks_for(actor, transfer.from) {
            return Err(CoreError::forbidden(format!(
                "only the sending bank may cancel transfer {transfer_id}"
            )));
        }
        ensure_pending(&transfer)?;

        let previous = transfer.clone();
        let now = self.clock.now();
        transfer.status = TransferStatus::Cancelled;
        transfer.settled_at = Some(now);
        self.store.transfers().update(&transfer).await?;

        let returned = self
            .store
            .units()
            .transition_status(transfer.unit_id, UnitStatus::Dispatched, UnitStatus::Available)
            .await;
        match returned {
            Ok(true) => {}
            Ok(false) => {
                warn!(transfer_id = %transfer_id, unit_id = %transfer.unit_id, "unit was not dispatched");
            }
            Err(err) => {
                if let Err(restore) = self.store.transfers().update(&previous).await {
                    warn!(transfer_id = %transfer_id, error = %restore, "failed to reopen transfer");
                }
                return Err(err.into());
            }
        }

        info!(transfer_id = %transfer_id, unit_id = %transfer.unit_id, "transfer cancelled");
        self.events.publish(DispatchEvent::TransferCancelled {
            transfer_id,
            unit_id: transfer.unit_id,
            at: now,
        });
        Ok(transfer)
    }

    pub async fn get(&self, actor: &Actor, transfer_id: TransferId) -> CoreResult<TransferDetail> {
        let transfer = self.fetch(transfer_id).await?;
        if !can_view(actor, &transfer) {
            return Err(CoreError::forbidden(format!(
                "{} may not view transfer {transfer_id}",
                actor.role.name()
            )));
        }

        let store = self.store.as_ref();
        Ok(TransferDetail {
            unit: self.store.units().fetch(transfer.unit_id).await?,
            from_site: repository::site(store, transfer.from).await.ok(),
            to_site: repository::site(store, transfer.to).await.ok(),
            transfer,
        })
    }

    /// Transfers visible to `actor`, ascending by id.
    pub async fn list(
        &self,
        actor: &Actor,
        status: Option<TransferStatus>,
    ) -> CoreResult<Vec<Transfer>> {
        let own = match actor.role {
            Role::Admin => {
                let filter = TransferFilter {
                    status,
                    ..Default::default()
                };
                return Ok(self.store.transfers().fetch_where(&filter).await?);
            }
            Role::Hospital(id) => EntityRef::Hospital(id).uuid(),
            Role::BloodBank(id) => EntityRef::BloodBank(id).uuid(),
            Role::Driver(_) => {
                return Err(CoreError::forbidden("drivers may not list transfers"));
            }
        };

        let transfers = self.store.transfers();
        let mut visible = transfers
            .fetch_where(&TransferFilter {
                from_id: Some(own),
                status,
                ..Default::default()
            })
            .await?;
        visible.extend(
            transfers
                .fetch_where(&TransferFilter {
                    to_id: Some(own),
                    status,
                    ..Default::default()
                })
                .await?,
        );
        visible.sort_by_key(|t| t.id);
        visible.dedup_by_key(|t| t.id);
        Ok(visible)
    }

    /// Unit as it stands once delivered to `destination`.
    fn land(&self, unit: &BloodUnit, destination: &Site) -> BloodUnit {
        let mut landed = unit.clone();
        landed.location = destination.location;
        match destination.entity {
            EntityRef::BloodBank(bank_id) => {
                landed.bank_id = bank_id;
                landed.status = UnitStatus::Available;
                landed = self.policy.refresh(&landed, self.clock.today());
            }
            EntityRef::Hospital(_) => {
                landed.status = UnitStatus::Used;
                landed.flagged_for_expiry = false;
            }
        }
        landed
    }

    async fn fetch(&self, transfer_id: TransferId) -> CoreResult<Transfer> {
        self.store
            .transfers()
            .fetch(transfer_id)
            .await?
            .ok_or_else(|| CoreError::not_found("transfer", transfer_id))
    }

    async fn unit(&self, unit_id: UnitId) -> CoreResult<BloodUnit> {
        self.store
            .units()
            .fetch(unit_id)
            .await?
            .ok_or_else(|| CoreError::not_found("blood unit", unit_id))
    }
}

fn speaks_for(actor: &Actor, entity: EntityRef) -> bool {
    match entity {
        EntityRef::Hospital(id) => actor.hospital_id() == Some(id),
        EntityRef::BloodBank(id) => actor.bank_id() == Some(id),
    }
}

pub fn can_view(actor: &Actor, transfer: &Transfer) -> bool {
    actor.is_admin() || speaks_for(actor, transfer.from) || speaks_for(actor, transfer.to)
}

fn ensure_pending(transfer: &Transfer) -> CoreResult<()> {
    if transfer.status == TransferStatus::Pending {
        Ok(())
    } else {
        Err(CoreError::invalid_transition(format!(
            "transfer {} is {}, not pending",
            transfer.id, transfer.status
        )))
    }
}
