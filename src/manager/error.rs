use ulid::Ulid;

#[derive(Debug)]
pub enum ReservationError {
    /// Inverted, empty, too short or out-of-range interval.
    InvalidInterval(String),
    ResourceNotFound(Ulid),
    /// Overlaps the active reservation with this id.
    Conflict(Ulid),
    NotFound(Ulid),
    Forbidden(&'static str),
    /// The reservation is canceled, completed, or already past its end.
    AlreadyTerminal(Ulid),
    LimitExceeded(&'static str),
    StorageUnavailable(String),
}

impl ReservationError {
    /// Short machine-readable tag, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            ReservationError::InvalidInterval(_) => "invalid_interval",
            ReservationError::ResourceNotFound(_) => "resource_not_found",
            ReservationError::Conflict(_) => "conflict",
            ReservationError::NotFound(_) => "not_found",
            ReservationError::Forbidden(_) => "forbidden",
            ReservationError::AlreadyTerminal(_) => "already_terminal",
            ReservationError::LimitExceeded(_) => "limit_exceeded",
            ReservationError::StorageUnavailable(_) => "storage_unavailable",
        }
    }
}

impl std::fmt::Display for ReservationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReservationError::InvalidInterval(why) => write!(f, "invalid interval: {why}"),
            ReservationError::ResourceNotFound(id) => write!(f, "resource not found: {id}"),
            ReservationError::Conflict(id) => {
                write!(f, "conflict with active reservation: {id}")
            }
            ReservationError::NotFound(id) => write!(f, "reservation not found: {id}"),
            ReservationError::Forbidden(why) => write!(f, "forbidden: {why}"),
            ReservationError::AlreadyTerminal(id) => {
                write!(f, "reservation {id} is no longer active")
            }
            ReservationError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            ReservationError::StorageUnavailable(e) => write!(f, "storage unavailable: {e}"),
        }
    }
}

impl std::error::Error for ReservationError {}
