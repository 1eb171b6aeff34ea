//! Date-based SOA serial generation.

use lazy_static::lazy_static;
use time::macros::format_description;
use time::OffsetDateTime;

lazy_static! {
    static ref SERIAL_FORMATTER: &'static [time::format_description::FormatItem<'static>] =
        format_description!(version = 2, "[year][month][day]");
}

/// The lowest serial acceptable for today: `YYYYMMDD * 100` in UTC.
#[must_use]
pub fn minimum_serial() -> i64 {
    // NB: unwraps are safe: known date format producing values that will always parse as i64.
    let date: i64 = OffsetDateTime::now_utc()
        .format(&SERIAL_FORMATTER)
        .unwrap()
        .parse()
        .unwrap();
    date * 100
}

/// Compute the next serial for a zone. Non-digit decorations around the
/// old serial are trimmed; an unparseable remainder counts as zero. The
/// result is `old + 1` when the old serial already reached today's
/// date-based floor, otherwise the floor itself, so serials never
/// decrease.
#[must_use]
pub fn generate_new_serial(old_serial: &str) -> String {
    let old: i64 = old_serial
        .trim_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .unwrap_or(0);
    let today = minimum_serial();
    let new = if old >= today { old + 1 } else { today };
    new.to_string()
}
