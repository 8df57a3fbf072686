use jiff::civil::{Date, date};

pub const MAX_SPOTS: usize = 100_000;
pub const MAX_BOOKINGS_PER_SPOT: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;

/// Longest stay accepted, in nights.
pub const MAX_STAY_NIGHTS: i32 = 365;

/// Bookings must fall inside `[MIN_VALID_DATE, MAX_VALID_DATE]`.
pub const MIN_VALID_DATE: Date = date(2000, 1, 1);
pub const MAX_VALID_DATE: Date = date(2199, 12, 31);
