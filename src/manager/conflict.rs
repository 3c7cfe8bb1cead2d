use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::ReservationError;

/// Reject inverted, too-short and out-of-range intervals.
pub(crate) fn validate_interval(start: Ms, end: Ms, min_duration_ms: Ms) -> Result<Span, ReservationError> {
    if start >= end {
        return Err(ReservationError::InvalidInterval(format!(
            "start {start} is not before end {end}"
        )));
    }
    let duration = end.saturating_sub(start);
    if duration < min_duration_ms {
        return Err(ReservationError::InvalidInterval(format!(
            "duration {duration}ms is below the minimum of {min_duration_ms}ms"
        )));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(ReservationError::LimitExceeded("timestamp out of range"));
    }
    if duration > MAX_SPAN_DURATION_MS {
        return Err(ReservationError::LimitExceeded("reservation too long"));
    }
    Ok(Span::new(start, end))
}

/// Fail with the first active reservation overlapping `span`.
/// `ignore` lets a reschedule skip the reservation being moved.
pub(crate) fn check_no_conflict(tl: &Timeline, span: &Span, ignore: Option<Ulid>) -> Result<(), ReservationError> {
    match tl
        .overlapping(span)
        .find(|r| r.blocks(span) && Some(r.id) != ignore)
    {
        Some(existing) => Err(ReservationError::Conflict(existing.id)),
        None => Ok(()),
    }
}
