//! Incremental sync policy: how much history to ask for, and how to turn the
//! vendor's nested reading groups into cumulative statistic points.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{
    api::{AddressMeterReadings, MeterReading},
    statistics::{StatisticPoint, StatisticRow},
};

/// No fetch is attempted while the newest stored statistic is younger than this.
pub const RECENT_STATISTIC_GUARD: Duration = Duration::from_secs(60 * 60);

/// Minimum interval between two updates of the same sensor.
pub const UPDATE_THROTTLE: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPlan {
    /// The store is fresh enough, do nothing this cycle.
    Skip,
    /// Nothing stored yet, ask for the whole history.
    Full,
    /// Ask for readings from `since` (unix seconds) onwards.
    Partial { since: i64 },
}

pub fn plan_fetch(
    last: Option<&StatisticRow>,
    now: DateTime<Utc>,
    recent_guard: Duration,
) -> FetchPlan {
    let Some(last) = last else {
        return FetchPlan::Full;
    };
    let age = now.signed_duration_since(last.start);
    // A negative age (statistic in the future) also counts as recent.
    let recent = match age.to_std() {
        Ok(age) => age < recent_guard,
        Err(_) => true,
    };
    if recent {
        return FetchPlan::Skip;
    }
    FetchPlan::Partial {
        since: last.start.timestamp() + 1,
    }
}

/// Flattens reading groups into ascending `(start, sum)` points.
///
/// Each group is sorted by timestamp first, with a missing timestamp ordering
/// as the epoch. Readings lacking a timestamp or a value are dropped.
pub fn readings_to_points(groups: Vec<AddressMeterReadings>) -> Vec<StatisticPoint> {
    let mut points = Vec::new();
    for mut group in groups {
        sort_readings(&mut group.readings);
        points.extend(group.readings.into_iter().filter_map(|r| {
            Some(StatisticPoint {
                start: r.timestamp?,
                sum: r.value?,
            })
        }));
    }
    points.sort_by_key(|p| p.start);
    points
}

/// Stable ascending sort by timestamp; a missing timestamp sorts as the epoch.
pub fn sort_readings(readings: &mut [MeterReading]) {
    readings.sort_by_key(|r| r.timestamp.unwrap_or(DateTime::<Utc>::UNIX_EPOCH));
}
