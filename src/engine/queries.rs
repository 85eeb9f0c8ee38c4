use crate::model::*;

use super::conflict::validate_id;
use super::{EngineError, ReservationService};

// Reads take no resource lock; the store never hands out a torn record.
impl ReservationService {
    pub async fn get(&self, id: BookingId) -> Result<Booking, EngineError> {
        validate_id("id", id)?;
        self.store.get_by_id(id).await?.ok_or(EngineError::NotFound(id))
    }

    /// Every active booking, ordered by id. Empty is a valid answer.
    pub async fn list(&self) -> Result<Vec<Booking>, EngineError> {
        Ok(self.store.get_all().await?)
    }

    /// Active bookings on one resource, ordered by period start.
    pub async fn list_by_resource(
        &self,
        resource_id: ResourceId,
    ) -> Result<Vec<Booking>, EngineError> {
        validate_id("resource_id", resource_id)?;
        Ok(self.store.get_by_resource(resource_id).await?)
    }
}
