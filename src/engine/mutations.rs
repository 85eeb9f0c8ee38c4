use tracing::{info, warn};

use crate::limits::*;
use crate::model::*;

use super::conflict::{find_conflict, validate_id, validate_new};
use super::{EngineError, ReservationService};

impl ReservationService {
    pub async fn create(
        &self,
        resource_id: ResourceId,
        renter_id: UserId,
        period: Period,
    ) -> Result<Booking, EngineError> {
        let new = NewBooking {
            resource_id,
            renter_id,
            period,
        };
        validate_new(&new)?;

        let _guard = self.lock_resource(resource_id).await;
        let existing = self.store.get_by_resource(resource_id).await?;
        if existing.len() >= MAX_BOOKINGS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many bookings on resource"));
        }
        reject_conflict(&new, &existing, None)?;

        let booking = self.store.insert(new).await?;
        info!(
            "booking {} created: resource {} renter {} [{}, {})",
            booking.id, resource_id, renter_id, period.start, period.end
        );
        Ok(booking)
    }

    /// Full replacement of every field but the id.
    pub async fn update(
        &self,
        id: BookingId,
        resource_id: ResourceId,
        renter_id: UserId,
        period: Period,
    ) -> Result<Booking, EngineError> {
        validate_id("id", id)?;
        let new = NewBooking {
            resource_id,
            renter_id,
            period,
        };
        validate_new(&new)?;

        if self.store.get_by_id(id).await?.is_none() {
            return Err(EngineError::NotFound(id));
        }

        // Only the target resource can gain an overlap, so only it is locked.
        let _guard = self.lock_resource(resource_id).await;
        let existing = self.store.get_by_resource(resource_id).await?;
        if existing.len() >= MAX_BOOKINGS_PER_RESOURCE && !existing.iter().any(|b| b.id == id) {
            return Err(EngineError::LimitExceeded("too many bookings on resource"));
        }
        reject_conflict(&new, &existing, Some(id))?;

        let booking = self.store.replace(id, new).await?;
        info!(
            "booking {id} updated: resource {resource_id} renter {renter_id} [{}, {})",
            period.start, period.end
        );
        Ok(booking)
    }

    /// Remove a booking and return it. Its period becomes free immediately.
    pub async fn delete(&self, id: BookingId) -> Result<Booking, EngineError> {
        validate_id("id", id)?;
        let current = self.store.get_by_id(id).await?.ok_or(EngineError::NotFound(id))?;

        let _guard = self.lock_resource(current.resource_id).await;
        let removed = self
            .store
            .remove(id)
            .await?
            .ok_or(EngineError::NotFound(id))?;
        info!("booking {id} deleted from resource {}", removed.resource_id);
        Ok(removed)
    }
}

fn reject_conflict(
    new: &NewBooking,
    existing: &[Booking],
    exclude_id: Option<BookingId>,
) -> Result<(), EngineError> {
    match find_conflict(new, existing, exclude_id) {
        Some(hit) => {
            warn!(
                "rejected [{}, {}) on resource {}: overlaps booking {}",
                new.period.start, new.period.end, new.resource_id, hit.id
            );
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Conflict(hit.id))
        }
        None => Ok(()),
    }
}
