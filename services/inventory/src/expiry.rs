//! Expiry policy. Nothing here is persisted eagerly; callers apply it to
//! whatever they just read, against the clock's `today()`.

use chrono::NaiveDate;
use shared::models::BloodUnit;
use shared::types::UnitStatus;

pub const DEFAULT_FLAG_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    pub flag_days: i64,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            flag_days: DEFAULT_FLAG_DAYS,
        }
    }
}

impl ExpiryPolicy {
    pub fn new(flag_days: i64) -> Self {
        Self { flag_days }
    }

    /// `0 < days <= flag_days`. A unit expiring today is not flagged.
    pub fn is_flagged_days(&self, days_until_expiry: i64) -> bool {
        days_until_expiry > 0 && days_until_expiry <= self.flag_days
    }

    pub fn is_flagged(&self, unit: &BloodUnit, today: NaiveDate) -> bool {
        self.is_flagged_days(unit.days_until_expiry(today))
    }

    pub fn is_expired(&self, unit: &BloodUnit, today: NaiveDate) -> bool {
        unit.days_until_expiry(today) < 0
    }

    /// Stock still on the shelf or held for a request reads as expired once
    /// past its date. Units already on the road or consumed keep their status.
    pub fn effective_status(&self, unit: &BloodUnit, today: NaiveDate) -> UnitStatus {
        match unit.status {
            UnitStatus::Available | UnitStatus::Reserved if self.is_expired(unit, today) => {
                UnitStatus::Expired
            }
            status => status,
        }
    }

    /// Copy of `unit` with the flag and status recomputed for `today`.
    pub fn refresh(&self, unit: &BloodUnit, today: NaiveDate) -> BloodUnit {
        let mut fresh = unit.clone();
        fresh.flagged_for_expiry = self.is_flagged(unit, today);
        fresh.status = self.effective_status(unit, today);
        fresh
    }
}
