use crate::model::Ms;

const DAY_MS: Ms = 86_400_000;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 10000-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_800_000;

/// A single reservation may not hold a room for longer than this.
pub const MAX_SPAN_DURATION_MS: Ms = 31 * DAY_MS;
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;

/// Active reservations one room may hold at once. Terminal history is not
/// counted.
pub const MAX_ACTIVE_PER_RESOURCE: usize = 100_000;
pub const MAX_OWNER_ID_LEN: usize = 256;

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 4096;
