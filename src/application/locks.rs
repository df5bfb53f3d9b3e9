use crate::domain::permit::ApplicationId;
use crate::error::{PaymentError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Idle lock slots are dropped once the table grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

/// Logical mutex per application id.
///
/// Only one transition for a given application runs at a time; contenders
/// wait, then re-read the application once they hold the lock.
pub struct KeyedLocks {
    slots: Mutex<HashMap<ApplicationId, Arc<AsyncMutex<()>>>>,
    wait: Duration,
    retries: u32,
}

impl KeyedLocks {
    pub fn new(wait: Duration, retries: u32) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            wait,
            retries: retries.max(1),
        }
    }

    /// Waits for the application's lock, retrying up to the configured
    /// number of times before giving up with `LockContention`.
    pub async fn acquire(&self, id: ApplicationId) -> Result<OwnedMutexGuard<()>> {
        for attempt in 1..=self.retries {
            let slot = self.slot(id);
            match tokio::time::timeout(self.wait, slot.lock_owned()).await {
                Ok(guard) => return Ok(guard),
                Err(_) => debug!(application_id = %id, attempt, "Application lock busy, retrying"),
            }
        }
        Err(PaymentError::LockContention(id))
    }

    fn slot(&self, id: ApplicationId) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots.len() > PRUNE_THRESHOLD {
            // A count of one means no task holds or awaits the slot.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        }
        slots.entry(id).or_default().clone()
    }
}
