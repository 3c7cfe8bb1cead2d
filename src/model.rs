use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC.
pub type Ms = i64;

pub const HOUR_MS: Ms = 3_600_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationState {
    Active,
    Canceled,
    Completed,
}

impl ReservationState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationState::Active)
    }
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReservationState::Active => "active",
            ReservationState::Canceled => "canceled",
            ReservationState::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// One grant of a room to an owner for `span`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub owner_id: String,
    pub span: Span,
    pub state: ReservationState,
    pub created_at: Ms,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.state == ReservationState::Active
    }

    /// Active and overlapping `span`. Terminal reservations never block.
    pub fn blocks(&self, span: &Span) -> bool {
        self.is_active() && self.span.overlaps(span)
    }

    pub fn has_ended(&self, now: Ms) -> bool {
        self.span.end <= now
    }
}

/// Every reservation on one resource, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct Timeline {
    pub resource_id: Ulid,
    pub reservations: Vec<Reservation>,
}

impl Timeline {
    pub fn new(resource_id: Ulid) -> Self {
        Self {
            resource_id,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Reservations (any state) whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    pub fn active(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter().filter(|r| r.is_active())
    }

    /// Active reservations whose end has been reached at `now`.
    pub fn expired(&self, now: Ms) -> impl Iterator<Item = &Reservation> {
        self.active().filter(move |r| r.has_ended(now))
    }

    pub fn set_state(&mut self, id: Ulid, state: ReservationState) -> bool {
        match self.get_mut(id) {
            Some(r) => {
                r.state = state;
                true
            }
            None => false,
        }
    }
}

/// Log records. Each one is a single bincode payload in the WAL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        id: Ulid,
        resource_id: Ulid,
        owner_id: String,
        span: Span,
        created_at: Ms,
    },
    ReservationCanceled {
        id: Ulid,
        resource_id: Ulid,
        at: Ms,
    },
    ReservationRescheduled {
        id: Ulid,
        resource_id: Ulid,
        span: Span,
    },
    /// One sweep cycle's completions, committed as a single record.
    /// Pairs are `(resource_id, reservation_id)`.
    SweepCompleted {
        at: Ms,
        completed: Vec<(Ulid, Ulid)>,
    },
    /// Written only by compaction: a reservation with its current state.
    ReservationRestored {
        id: Ulid,
        resource_id: Ulid,
        owner_id: String,
        span: Span,
        state: ReservationState,
        created_at: Ms,
    },
}

impl Event {
    /// Resources touched by this event.
    pub fn resource_ids(&self) -> Vec<Ulid> {
        match self {
            Event::ReservationCreated { resource_id, .. }
            | Event::ReservationCanceled { resource_id, .. }
            | Event::ReservationRescheduled { resource_id, .. }
            | Event::ReservationRestored { resource_id, .. } => vec![*resource_id],
            Event::SweepCompleted { completed, .. } => {
                let mut ids: Vec<Ulid> = completed.iter().map(|(rid, _)| *rid).collect();
                ids.sort();
                ids.dedup();
                ids
            }
        }
    }
}

// ── Callers ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Member,
    Admin,
}

/// The already-authenticated caller, with its capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn member(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Member,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owners act for themselves; admins act for anyone.
    pub fn may_act_for(&self, owner_id: &str) -> bool {
        self.is_admin() || self.id == owner_id
    }
}

// ── Query types ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationFilter {
    Owner(String),
    Resource(Ulid),
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    Running { remaining_ms: Ms },
    Ended,
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Countdown::Running { remaining_ms } => f.write_str(&format_hms(*remaining_ms)),
            Countdown::Ended => f.write_str("ended"),
        }
    }
}

/// `hh:mm:ss`, hours not wrapped at 24.
pub fn format_hms(ms: Ms) -> String {
    let secs = ms.max(0) / 1000;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
