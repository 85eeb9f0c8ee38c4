use serde::{Deserialize, Serialize};

use crate::engine::EngineError;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Repository-assigned booking id, always > 0.
pub type BookingId = i64;

/// The reserved machine.
pub type ResourceId = i64;

/// The renting user, as handed to us by the identity layer.
pub type UserId = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: Ms,
    pub end: Ms,
}

impl Period {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Period start must be before end");
        Self { start, end }
    }

    /// Validating constructor for untrusted input.
    pub fn try_new(start: Ms, end: Ms) -> Result<Self, EngineError> {
        if start >= end {
            return Err(EngineError::Validation(format!(
                "period start ({start}) must be before end ({end})"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Period) -> bool {
        overlaps(self, other)
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Two periods overlap iff each starts before the other ends.
/// Touching endpoints (`a.end == b.start`) do not overlap.
pub fn overlaps(a: &Period, b: &Period) -> bool {
    a.start < b.end && b.start < a.end
}

/// Booking fields as supplied by a caller, before an id is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub resource_id: ResourceId,
    pub renter_id: UserId,
    pub period: Period,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub resource_id: ResourceId,
    pub renter_id: UserId,
    pub period: Period,
}

impl Booking {
    pub fn from_new(id: BookingId, new: NewBooking) -> Self {
        Self {
            id,
            resource_id: new.resource_id,
            renter_id: new.renter_id,
            period: new.period,
        }
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated { booking: Booking },
    BookingReplaced { booking: Booking },
    BookingRemoved { id: BookingId },
    /// Written first in a compacted log so ids stay unique across restarts.
    IdWatermark { next_id: BookingId },
}
