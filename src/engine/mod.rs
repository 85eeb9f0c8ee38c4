mod conflict;
mod error;
mod mutations;
mod queries;

pub use conflict::find_conflict;
pub use error::EngineError;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::ResourceId;
use crate::store::BookingRepository;

/// The only component that mutates bookings.
///
/// Create and update run conflict-check-then-write inside a per-resource
/// critical section, so two overlapping requests for the same machine can
/// never both be admitted. Different resources never contend.
pub struct ReservationService {
    store: Arc<dyn BookingRepository>,
    resource_locks: DashMap<ResourceId, Arc<Mutex<()>>>,
}

impl ReservationService {
    pub fn new(store: Arc<dyn BookingRepository>) -> Self {
        Self {
            store,
            resource_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn BookingRepository> {
        &self.store
    }

    /// Enter the critical section for `resource_id`. Held until the guard drops.
    pub(super) async fn lock_resource(&self, resource_id: ResourceId) -> OwnedMutexGuard<()> {
        let lock = self
            .resource_locks
            .entry(resource_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        lock.lock_owned().await
    }
}
