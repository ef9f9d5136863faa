/// Rooms a single store will hold.
pub const MAX_ROOMS: usize = 10_000;

/// Active reservations per room.
pub const MAX_RESERVATIONS_PER_ROOM: usize = 10_000;

/// Cancelled reservations remembered per room (oldest evicted first).
pub const MAX_CANCELLED_LEDGER: usize = 256;

/// Max bytes in any guest-supplied text field (name, address, city, ...).
pub const MAX_FIELD_LEN: usize = 512;

/// Max bytes in a room image reference.
pub const MAX_IMAGE_LEN: usize = 2048;

/// Longest bookable stay.
pub const MAX_STAY_DAYS: i64 = 365;

/// Widest availability query.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3 * 365;

/// Reservation code regenerations before giving up.
pub const MAX_CODE_ATTEMPTS: usize = 8;

/// Conditional-save attempts for a single create or cancel.
pub const MAX_SAVE_ATTEMPTS: usize = 16;

/// Largest WAL frame payload. Longer length prefixes are treated as damage.
pub const MAX_WAL_ENTRY_LEN: usize = 64 * 1024 * 1024;
