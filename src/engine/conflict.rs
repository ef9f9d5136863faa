use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

use crate::limits::*;
use crate::model::*;

use super::HotelError;

const NAIVE_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Parse a guest-supplied instant straight into UTC.
///
/// RFC 3339 offsets are honoured; naive date-times and plain dates are taken
/// to be UTC already (a plain date means midnight).
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Both ends must parse and `checkin < checkout`.
pub fn parse_stay(checkin: &str, checkout: &str) -> Result<Stay, HotelError> {
    let checkin = parse_instant(checkin).ok_or(HotelError::InvalidDateRange)?;
    let checkout = parse_instant(checkout).ok_or(HotelError::InvalidDateRange)?;
    if checkin >= checkout {
        return Err(HotelError::InvalidDateRange);
    }
    Ok(Stay::new(checkin, checkout))
}

pub(crate) fn validate_stay(stay: &Stay) -> Result<(), HotelError> {
    if stay.duration() > Duration::days(MAX_STAY_DAYS) {
        return Err(HotelError::LimitExceeded("stay too long"));
    }
    Ok(())
}

pub(crate) fn validate_query_window(stay: &Stay) -> Result<(), HotelError> {
    if stay.duration() > Duration::days(MAX_QUERY_WINDOW_DAYS) {
        return Err(HotelError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

pub(crate) fn check_no_conflict(room: &Room, stay: &Stay) -> Result<(), HotelError> {
    if room.is_free(stay) {
        Ok(())
    } else {
        Err(HotelError::RoomUnavailable(room.id))
    }
}

pub(crate) fn check_field_len(value: &str, msg: &'static str) -> Result<(), HotelError> {
    if value.len() > MAX_FIELD_LEN {
        return Err(HotelError::LimitExceeded(msg));
    }
    Ok(())
}
