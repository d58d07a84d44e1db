//! Business-day arithmetic for settlement due dates.
//!
//! Weekends (Saturday and Sunday) are skipped; public holidays are not
//! modelled, merchants accept a weekend-only calendar contractually.

use chrono::{Datelike, Days, NaiveDate, Weekday};

fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Date `days` business days after `from`. The start date itself never
/// counts, so `add_business_days(friday, 1)` is the following Monday.
pub fn add_business_days(from: NaiveDate, days: i32) -> NaiveDate {
    let mut date = from;
    let mut remaining = days.max(0);
    while remaining > 0 {
        date = date.checked_add_days(Days::new(1)).unwrap_or(date);
        if is_business_day(date) {
            remaining -= 1;
        }
    }
    date
}
