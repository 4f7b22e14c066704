use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Named async locks that serialize work on one bank+type, request, route,
/// driver or transfer.
///
/// A slot lives only while someone holds or waits on it; the last guard to
/// drop removes it from the map.
#[derive(Default)]
pub struct KeyedLocks {
    slots: Slots,
}

pub struct KeyGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Slots,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Release first so the guard's own reference to the slot is gone.
        drop(self.guard.take());

        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(&self.key) {
            // Only the map holds it: nobody is waiting.
            if Arc::strong_count(slot) == 1 {
                slots.remove(&self.key);
            }
        }
    }
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inventory_key(bank: impl Display, blood_type: impl Display) -> String {
        format!("inventory:{bank}:{blood_type}")
    }

    pub fn request_key(request: impl Display) -> String {
        format!("request:{request}")
    }

    pub fn route_key(route: impl Display) -> String {
        format!("route:{route}")
    }

    pub fn driver_key(driver: impl Display) -> String {
        format!("driver:{driver}")
    }

    pub fn transfer_key(transfer: impl Display) -> String {
        format!("transfer:{transfer}")
    }

    fn slot(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock();
        slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub async fn lock(&self, key: &str) -> KeyGuard {
        let slot = self.slot(key);
        let guard = slot.lock_owned().await;
        KeyGuard {
            key: key.to_string(),
            guard: Some(guard),
            slots: self.slots.clone(),
        }
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
