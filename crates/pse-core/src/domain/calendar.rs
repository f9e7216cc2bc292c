//! Calendar helpers shared by windowing, sinks, and the PSE Edge adapter.

use time::format_description::BorrowedFormatItem;
use time::macros::{date, format_description, offset};
use time::{Date, Duration, OffsetDateTime, UtcOffset};

use crate::ValidationError;

/// Offset the source exchange reports trading days in (Asia/Manila, no DST).
pub const SOURCE_UTC_OFFSET: UtcOffset = offset!(+8);

/// Latest date assumed for a symbol that has never been synced.
pub const EPOCH_FLOOR: Date = date!(1970 - 01 - 01);

const ISO_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

time::serde::format_description!(pub iso_date, Date, "[year]-[month]-[day]");

pub fn parse_iso_date(input: &str) -> Result<Date, ValidationError> {
    Date::parse(input.trim(), ISO_DATE).map_err(|_| ValidationError::InvalidDate {
        value: input.to_owned(),
    })
}

pub fn format_iso_date(date: Date) -> String {
    date.format(ISO_DATE).unwrap_or_else(|_| date.to_string())
}

/// Moves `date` by `days`, saturating at the calendar bounds.
pub fn shift_days(date: Date, days: i64) -> Date {
    date.saturating_add(Duration::days(days))
}

/// The calendar date of `now` as observed at `offset`.
pub fn today_at(now: OffsetDateTime, offset: UtcOffset) -> Date {
    now.to_offset(offset).date()
}
