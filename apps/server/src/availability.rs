use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::catalog::FieldCatalog;
use crate::error::AppError;
use crate::models::MinuteRange;
use crate::upstream::{BusyInterval, SchedulingApi};

/// Candidate start times are tried every `GRID_MINUTES`.
pub const GRID_MINUTES: i64 = 30;

/// Point-in-time view of which slots are free on every field.
///
/// Nothing here locks the external calendar; the scheduling system still
/// arbitrates when the booking is actually created.
pub struct AvailabilityEngine {
    catalog: Arc<FieldCatalog>,
    scheduler: Arc<dyn SchedulingApi>,
    offset: FixedOffset,
    opening_minute: i64,
    closing_minute: i64,
}

impl AvailabilityEngine {
    pub fn new(
        catalog: Arc<FieldCatalog>,
        scheduler: Arc<dyn SchedulingApi>,
        offset: FixedOffset,
        opening_minute: i64,
        closing_minute: i64,
    ) -> Self {
        Self {
            catalog,
            scheduler,
            offset,
            opening_minute,
            closing_minute,
        }
    }

    /// Free `{start, end}` slots of `duration_minutes` per field.
    pub async fn search(
        &self,
        date: NaiveDate,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<i64, Vec<MinuteRange>>, AppError> {
        if duration_minutes <= 0 {
            return Err(AppError::Validation("Duration must be positive".into()));
        }

        let now_local = now.with_timezone(&self.offset).naive_local();
        let Some(start) = search_start_minute(date, now_local, self.opening_minute) else {
            return Ok(self.catalog.all().map(|f| (f.id, Vec::new())).collect());
        };

        let busy = self.busy(date).await?;
        Ok(busy
            .into_iter()
            .map(|(field_id, ranges)| {
                let slots = free_slots(&ranges, start, self.closing_minute, duration_minutes);
                (field_id, slots)
            })
            .collect())
    }

    /// Busy intervals per field in minutes from the date's local midnight.
    ///
    /// Each field's calendar is fetched exactly once, all fields in parallel.
    pub async fn busy(&self, date: NaiveDate) -> Result<BTreeMap<i64, Vec<MinuteRange>>, AppError> {
        let mut tasks = JoinSet::new();
        for field in self.catalog.all() {
            let scheduler = self.scheduler.clone();
            let field_id = field.id;
            let court = field.external_id.clone();
            tasks.spawn(async move { (field_id, scheduler.busy_intervals(&court, date).await) });
        }

        let mut out = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (field_id, result) =
                joined.map_err(|e| AppError::Upstream(format!("busy lookup task failed: {}", e)))?;
            let intervals = result.inspect_err(|e| {
                tracing::warn!(field_id, "Busy lookup failed: {}", e);
            })?;
            out.insert(field_id, to_minute_ranges(&intervals, date, self.offset));
        }
        Ok(out)
    }
}

/// First candidate minute for `date`, or `None` when the date is past.
///
/// Today starts at the next full hour so nothing already underway is offered.
pub fn search_start_minute(date: NaiveDate, now_local: NaiveDateTime, opening_minute: i64) -> Option<i64> {
    let today = now_local.date();
    if date < today {
        return None;
    }
    if date > today {
        return Some(opening_minute);
    }
    let next_full_hour = (now_local.hour() as i64 + 1) * 60;
    Some(opening_minute.max(next_full_hour))
}

/// Walks the grid from `start` and keeps every candidate that ends by
/// `closing` and overlaps no busy range.
pub fn free_slots(busy: &[MinuteRange], start: i64, closing: i64, duration: i64) -> Vec<MinuteRange> {
    let mut slots = Vec::new();
    let mut candidate = start;
    while candidate + duration <= closing {
        let end = candidate + duration;
        let taken = busy.iter().any(|b| candidate < b.end && end > b.start);
        if !taken {
            slots.push(MinuteRange { start: candidate, end });
        }
        candidate += GRID_MINUTES;
    }
    slots
}

/// Start is floored and end ceiled to the minute so a partial minute still blocks.
pub fn to_minute_ranges(intervals: &[BusyInterval], date: NaiveDate, offset: FixedOffset) -> Vec<MinuteRange> {
    let midnight = date.and_time(NaiveTime::MIN);
    let mut ranges: Vec<MinuteRange> = intervals
        .iter()
        .map(|b| {
            let start = (b.start.with_timezone(&offset).naive_local() - midnight).num_seconds();
            let end = (b.end.with_timezone(&offset).naive_local() - midnight).num_seconds();
            MinuteRange {
                start: start.div_euclid(60),
                end: (end + 59).div_euclid(60),
            }
        })
        .filter(|r| r.end > r.start)
        .collect();
    ranges.sort_by_key(|r| r.start);
    ranges
}
