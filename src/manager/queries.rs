use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::subtract_intervals;
use super::{ReservationError, ReservationManager};

impl ReservationManager {
    pub async fn get_reservation(&self, reservation_id: Ulid) -> Result<Reservation, ReservationError> {
        let resource_id = self
            .store
            .resource_of(&reservation_id)
            .ok_or(ReservationError::NotFound(reservation_id))?;
        let tl = self
            .store
            .timeline(&resource_id)
            .ok_or(ReservationError::NotFound(reservation_id))?;
        let guard = tl.read().await;
        guard
            .get(reservation_id)
            .cloned()
            .ok_or(ReservationError::NotFound(reservation_id))
    }

    /// Reservations in any state, ordered by start time.
    ///
    /// Listing by owner is open to that owner; listing by resource or
    /// everything exposes other owners and needs the admin role.
    pub async fn list_reservations(
        &self,
        principal: &Principal,
        filter: &ReservationFilter,
    ) -> Result<Vec<Reservation>, ReservationError> {
        let resource_ids = match filter {
            ReservationFilter::Owner(owner) => {
                if !principal.may_act_for(owner) {
                    return Err(ReservationError::Forbidden("cannot list another owner's reservations"));
                }
                self.store.resource_ids()
            }
            ReservationFilter::Resource(rid) => {
                if !principal.is_admin() {
                    return Err(ReservationError::Forbidden("listing by resource needs admin"));
                }
                vec![*rid]
            }
            ReservationFilter::All => {
                if !principal.is_admin() {
                    return Err(ReservationError::Forbidden("listing everything needs admin"));
                }
                self.store.resource_ids()
            }
        };

        let mut out = Vec::new();
        for rid in resource_ids {
            let Some(tl) = self.store.timeline(&rid) else {
                continue;
            };
            let guard = tl.read().await;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| match filter {
                        ReservationFilter::Owner(owner) => &r.owner_id == owner,
                        _ => true,
                    })
                    .cloned(),
            );
        }
        out.sort_by_key(|r| (r.span.start, r.id));
        Ok(out)
    }

    /// Spans of active reservations on the resource that end after `from`.
    /// Carries no owner information.
    pub async fn busy_intervals(&self, resource_id: Ulid, from: Ms) -> Result<Vec<Span>, ReservationError> {
        self.ensure_resource(resource_id).await?;
        let Some(tl) = self.store.timeline(&resource_id) else {
            return Ok(Vec::new());
        };
        let guard = tl.read().await;
        Ok(guard
            .active()
            .filter(|r| r.span.end > from)
            .map(|r| r.span)
            .collect())
    }

    /// Gaps in `[window_start, window_end)` not held by an active
    /// reservation, optionally only those at least `min_duration_ms` long.
    pub async fn free_intervals(
        &self,
        resource_id: Ulid,
        window_start: Ms,
        window_end: Ms,
        min_duration_ms: Option<Ms>,
    ) -> Result<Vec<Span>, ReservationError> {
        if window_start >= window_end {
            return Err(ReservationError::InvalidInterval("empty query window".into()));
        }
        if window_start < MIN_VALID_TIMESTAMP_MS || window_end > MAX_VALID_TIMESTAMP_MS {
            return Err(ReservationError::LimitExceeded("timestamp out of range"));
        }
        if window_end - window_start > MAX_QUERY_WINDOW_MS {
            return Err(ReservationError::LimitExceeded("query window too wide"));
        }
        self.ensure_resource(resource_id).await?;

        let window = Span::new(window_start, window_end);
        let busy: Vec<Span> = match self.store.timeline(&resource_id) {
            Some(tl) => {
                let guard = tl.read().await;
                guard
                    .overlapping(&window)
                    .filter(|r| r.is_active())
                    .map(|r| r.span)
                    .collect()
            }
            None => Vec::new(),
        };

        let mut free = subtract_intervals(&[window], &busy);
        if let Some(min) = min_duration_ms {
            free.retain(|s| s.duration_ms() >= min);
        }
        Ok(free)
    }

    /// Time left on an active reservation. Canceled reservations have no
    /// countdown.
    pub async fn countdown(&self, reservation_id: Ulid) -> Result<Countdown, ReservationError> {
        let r = self.get_reservation(reservation_id).await?;
        let now = self.clock.now();
        match r.state {
            ReservationState::Canceled => Err(ReservationError::AlreadyTerminal(reservation_id)),
            ReservationState::Completed => Ok(Countdown::Ended),
            ReservationState::Active if r.has_ended(now) => Ok(Countdown::Ended),
            ReservationState::Active => Ok(Countdown::Running {
                remaining_ms: r.span.end - now,
            }),
        }
    }
}
