use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::Notification;
use crate::observability::*;

use super::conflict::{check_no_conflict, validate_interval};
use super::{ReservationError, ReservationManager};

impl ReservationManager {
    /// Admit a reservation of `[start, end)` on `resource_id` for `owner_id`.
    ///
    /// Members may only book for themselves; admins may book for anyone.
    pub async fn create_reservation(
        &self,
        principal: &Principal,
        resource_id: Ulid,
        owner_id: &str,
        start: Ms,
        end: Ms,
    ) -> Result<Reservation, ReservationError> {
        let result = self
            .admit(principal, resource_id, owner_id, start, end)
            .await;
        match &result {
            Ok(r) => {
                metrics::counter!(RESERVATIONS_CREATED_TOTAL).increment(1);
                info!(
                    "reservation {} created on {resource_id} for {owner_id} [{start}, {end})",
                    r.id
                );
                self.sink.notify(
                    resource_id,
                    Notification::Created {
                        reservation_id: r.id,
                        span: r.span,
                    },
                );
            }
            Err(e) => {
                metrics::counter!(RESERVATIONS_REJECTED_TOTAL, "reason" => e.kind()).increment(1);
                debug!("reservation on {resource_id} for {owner_id} rejected: {e}");
            }
        }
        result
    }

    async fn admit(
        &self,
        principal: &Principal,
        resource_id: Ulid,
        owner_id: &str,
        start: Ms,
        end: Ms,
    ) -> Result<Reservation, ReservationError> {
        if !principal.may_act_for(owner_id) {
            return Err(ReservationError::Forbidden("only admins may book for another owner"));
        }
        if owner_id.is_empty() || owner_id.len() > MAX_OWNER_ID_LEN {
            return Err(ReservationError::LimitExceeded("owner id empty or too long"));
        }
        let span = validate_interval(start, end, self.config.min_duration_ms)?;
        let now = self.clock.now();
        if span.end <= now {
            return Err(ReservationError::InvalidInterval("interval has already ended".into()));
        }
        self.ensure_resource(resource_id).await?;

        let mut txn = self.store.begin(resource_id).await;
        if txn.active().count() >= self.config.max_active_per_resource {
            return Err(ReservationError::LimitExceeded("too many active reservations on resource"));
        }
        check_no_conflict(&txn, &span, None)?;

        let id = Ulid::new();
        let event = Event::ReservationCreated {
            id,
            resource_id,
            owner_id: owner_id.to_string(),
            span,
            created_at: now,
        };
        self.store.commit(&mut txn, &event).await?;
        txn.get(id)
            .cloned()
            .ok_or(ReservationError::NotFound(id))
    }

    /// Move an active reservation to Canceled.
    ///
    /// Canceling an already canceled reservation succeeds without change.
    /// A completed reservation, or one whose end has passed but has not been
    /// swept yet, is `AlreadyTerminal`.
    pub async fn cancel_reservation(
        &self,
        reservation_id: Ulid,
        principal: &Principal,
    ) -> Result<Reservation, ReservationError> {
        let mut txn = self.store.begin_for(reservation_id).await?;
        let current = txn
            .get(reservation_id)
            .cloned()
            .ok_or(ReservationError::NotFound(reservation_id))?;

        if !principal.may_act_for(&current.owner_id) {
            return Err(ReservationError::Forbidden("only the owner or an admin may cancel"));
        }
        match current.state {
            ReservationState::Canceled => return Ok(current),
            ReservationState::Completed => {
                return Err(ReservationError::AlreadyTerminal(reservation_id));
            }
            ReservationState::Active => {}
        }
        let now = self.clock.now();
        if current.has_ended(now) {
            return Err(ReservationError::AlreadyTerminal(reservation_id));
        }

        let event = Event::ReservationCanceled {
            id: reservation_id,
            resource_id: current.resource_id,
            at: now,
        };
        self.store.commit(&mut txn, &event).await?;
        let canceled = txn
            .get(reservation_id)
            .cloned()
            .ok_or(ReservationError::NotFound(reservation_id))?;
        drop(txn);

        metrics::counter!(RESERVATIONS_CANCELED_TOTAL).increment(1);
        info!("reservation {reservation_id} canceled by {}", principal.id);
        self.sink.notify(
            canceled.resource_id,
            Notification::Canceled { reservation_id },
        );
        Ok(canceled)
    }

    /// Admin-only: move an active reservation to a new interval on the same
    /// resource. The reservation does not conflict with its own old slot.
    pub async fn reschedule_reservation(
        &self,
        reservation_id: Ulid,
        principal: &Principal,
        start: Ms,
        end: Ms,
    ) -> Result<Reservation, ReservationError> {
        if !principal.is_admin() {
            return Err(ReservationError::Forbidden("only admins may reschedule"));
        }
        let span = validate_interval(start, end, self.config.min_duration_ms)?;
        let now = self.clock.now();
        if span.end <= now {
            return Err(ReservationError::InvalidInterval("interval has already ended".into()));
        }

        let mut txn = self.store.begin_for(reservation_id).await?;
        let current = txn
            .get(reservation_id)
            .cloned()
            .ok_or(ReservationError::NotFound(reservation_id))?;
        if !current.is_active() || current.has_ended(now) {
            return Err(ReservationError::AlreadyTerminal(reservation_id));
        }
        check_no_conflict(&txn, &span, Some(reservation_id))?;

        let event = Event::ReservationRescheduled {
            id: reservation_id,
            resource_id: current.resource_id,
            span,
        };
        self.store.commit(&mut txn, &event).await?;
        let moved = txn
            .get(reservation_id)
            .cloned()
            .ok_or(ReservationError::NotFound(reservation_id))?;
        drop(txn);

        info!(
            "reservation {reservation_id} moved from [{}, {}) to [{start}, {end})",
            current.span.start, current.span.end
        );
        self.sink.notify(
            moved.resource_id,
            Notification::Rescheduled {
                reservation_id,
                span,
            },
        );
        Ok(moved)
    }
}
