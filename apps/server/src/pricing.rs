//! Time-segmented field pricing.
//!
//! Hours before the cutoff bill at `price_pre`, hours after it at
//! `price_post`. Each segment is rounded up to a whole `ROUND_UNIT` on its
//! own before the two are summed.

use chrono::NaiveTime;

use crate::error::AppError;
use crate::models::{minute_of_day, Field, Selection};

pub const CUTOFF_MINUTE: i64 = 18 * 60;
pub const ROUND_UNIT: i64 = 100;

/// Price of `duration_minutes` on `field` starting at `start`.
pub fn price(field: &Field, start: NaiveTime, duration_minutes: i64) -> Result<i64, AppError> {
    if duration_minutes <= 0 {
        return Err(AppError::Validation("Duration must be positive".into()));
    }

    let start = minute_of_day(start);
    let end = start + duration_minutes;

    let pre_minutes = (end.min(CUTOFF_MINUTE) - start).max(0);
    let post_minutes = duration_minutes - pre_minutes;

    Ok(segment_cost(pre_minutes, field.price_pre) + segment_cost(post_minutes, field.price_post))
}

pub fn price_selection(field: &Field, selection: &Selection) -> Result<i64, AppError> {
    price(field, selection.start_time, selection.duration_minutes())
}

/// `minutes × hourly_rate / 60`, rounded up to the next `ROUND_UNIT`.
fn segment_cost(minutes: i64, hourly_rate: i64) -> i64 {
    if minutes == 0 {
        return 0;
    }
    let divisor = 60 * ROUND_UNIT;
    (minutes * hourly_rate + divisor - 1) / divisor * ROUND_UNIT
}
