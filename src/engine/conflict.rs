use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_id(what: &str, id: i64) -> Result<(), EngineError> {
    if id <= 0 {
        return Err(EngineError::Validation(format!("{what} must be positive, got {id}")));
    }
    Ok(())
}

/// Field checks shared by create and update.
pub(crate) fn validate_new(new: &NewBooking) -> Result<(), EngineError> {
    validate_id("resource_id", new.resource_id)?;
    validate_id("renter_id", new.renter_id)?;
    let period = Period::try_new(new.period.start, new.period.end)?;
    if period.start < MIN_VALID_TIMESTAMP_MS || period.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if period.duration_ms() > MAX_PERIOD_DURATION_MS {
        return Err(EngineError::LimitExceeded("period too wide"));
    }
    Ok(())
}

/// The existing booking that blocks `candidate`, if any.
///
/// Only bookings on the candidate's resource count, and `exclude_id` (the
/// booking being updated) is ignored. When several overlap, the lowest id is
/// reported. Pure: the caller supplies `existing`.
pub fn find_conflict<'a>(
    candidate: &NewBooking,
    existing: &'a [Booking],
    exclude_id: Option<BookingId>,
) -> Option<&'a Booking> {
    existing
        .iter()
        .filter(|b| b.resource_id == candidate.resource_id)
        .filter(|b| Some(b.id) != exclude_id)
        .filter(|b| b.period.overlaps(&candidate.period))
        .min_by_key(|b| b.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;

    fn booking(id: BookingId, resource_id: ResourceId, start: Ms, end: Ms) -> Booking {
        Booking {
            id,
            resource_id,
            renter_id: 1,
            period: Period::new(start, end),
        }
    }

    fn candidate(resource_id: ResourceId, start: Ms, end: Ms) -> NewBooking {
        NewBooking {
            resource_id,
            renter_id: 2,
            period: Period::new(start, end),
        }
    }

    #[test]
    fn no_existing_no_conflict() {
        assert!(find_conflict(&candidate(5, 0, H), &[], None).is_none());
    }

    #[test]
    fn overlap_on_same_resource() {
        let existing = [booking(1, 5, 10 * H, 12 * H)];
        let hit = find_conflict(&candidate(5, 11 * H, 13 * H), &existing, None);
        assert_eq!(hit.map(|b| b.id), Some(1));
    }

    #[test]
    fn touching_is_not_conflict() {
        let existing = [booking(1, 5, 10 * H, 12 * H)];
        assert!(find_conflict(&candidate(5, 12 * H, 14 * H), &existing, None).is_none());
        assert!(find_conflict(&candidate(5, 8 * H, 10 * H), &existing, None).is_none());
    }

    #[test]
    fn other_resources_ignored() {
        let existing = [booking(1, 6, 10 * H, 12 * H)];
        assert!(find_conflict(&candidate(5, 10 * H, 12 * H), &existing, None).is_none());
    }

    #[test]
    fn excluded_id_ignored() {
        let existing = [booking(1, 5, 10 * H, 12 * H)];
        assert!(find_conflict(&candidate(5, 10 * H, 12 * H), &existing, Some(1)).is_none());
    }

    #[test]
    fn exclusion_does_not_hide_others() {
        let existing = [booking(1, 5, 10 * H, 12 * H), booking(2, 5, 11 * H, 13 * H)];
        let hit = find_conflict(&candidate(5, 10 * H, 12 * H), &existing, Some(1));
        assert_eq!(hit.map(|b| b.id), Some(2));
    }

    #[test]
    fn lowest_id_wins() {
        // Ordered by start, not id, as the store hands them out.
        let existing = [
            booking(7, 5, 8 * H, 11 * H),
            booking(3, 5, 10 * H, 12 * H),
            booking(4, 5, 11 * H, 15 * H),
        ];
        let hit = find_conflict(&candidate(5, 9 * H, 14 * H), &existing, None);
        assert_eq!(hit.map(|b| b.id), Some(3));
    }

    #[test]
    fn candidate_containing_existing() {
        let existing = [booking(1, 5, 10 * H, 11 * H)];
        let hit = find_conflict(&candidate(5, 0, 24 * H), &existing, None);
        assert_eq!(hit.map(|b| b.id), Some(1));
    }

    #[test]
    fn validate_rejects_bad_fields() {
        let ok = candidate(5, 0, H);
        assert!(validate_new(&ok).is_ok());

        let bad_resource = NewBooking {
            resource_id: 0,
            ..ok
        };
        assert!(matches!(validate_new(&bad_resource), Err(EngineError::Validation(_))));

        let bad_renter = NewBooking {
            renter_id: -3,
            ..ok
        };
        assert!(matches!(validate_new(&bad_renter), Err(EngineError::Validation(_))));

        let empty = NewBooking {
            period: Period { start: H, end: H },
            ..ok
        };
        assert!(matches!(validate_new(&empty), Err(EngineError::Validation(_))));

        let inverted = NewBooking {
            period: Period {
                start: 2 * H,
                end: H,
            },
            ..ok
        };
        assert!(matches!(validate_new(&inverted), Err(EngineError::Validation(_))));
    }

    #[test]
    fn validate_enforces_limits() {
        let too_wide = candidate(5, 0, MAX_PERIOD_DURATION_MS + 1);
        assert!(matches!(
            validate_new(&too_wide),
            Err(EngineError::LimitExceeded("period too wide"))
        ));

        let at_limit = candidate(5, 0, MAX_PERIOD_DURATION_MS);
        assert!(validate_new(&at_limit).is_ok());

        let negative = NewBooking {
            period: Period {
                start: -10,
                end: 10,
            },
            ..candidate(5, 0, 1)
        };
        assert!(matches!(
            validate_new(&negative),
            Err(EngineError::LimitExceeded("timestamp out of range"))
        ));
    }
}
