use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A shift contract. All duration columns are stored as whole seconds and
/// are optional; accessors below apply the documented defaults.
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct Shift {
    pub id: i64,
    pub name: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub tolerance_before_start: Option<i64>,
    pub tolerance_after_start: Option<i64>,
    pub grace_period_at_start: Option<i64>,
    pub grace_period_at_end: Option<i64>,
    pub overtime_threshold_before_start: Option<i64>,
    pub overtime_threshold_after_end: Option<i64>,
    pub absent_threshold: Option<i64>,
    pub half_day_threshold: Option<i64>,
    pub full_day_threshold: Option<i64>,
    pub lunch_duration: Option<i64>,
    pub include_lunch_break_in_half_day: bool,
    pub include_lunch_break_in_full_day: bool,
}

impl Shift {
    /// A shift that ends at or before its own start crosses midnight.
    pub fn is_night_shift(&self) -> bool {
        self.end_time <= self.start_time
    }

    pub fn tolerance_before(&self) -> Duration {
        secs_or_zero(self.tolerance_before_start)
    }

    pub fn tolerance_after(&self) -> Duration {
        secs_or_zero(self.tolerance_after_start)
    }

    pub fn grace_at_start(&self) -> Duration {
        secs_or_zero(self.grace_period_at_start)
    }

    pub fn grace_at_end(&self) -> Duration {
        secs_or_zero(self.grace_period_at_end)
    }

    pub fn overtime_before(&self) -> Duration {
        secs_or_zero(self.overtime_threshold_before_start)
    }

    pub fn overtime_after(&self) -> Duration {
        secs_or_zero(self.overtime_threshold_after_end)
    }

    /// Defaults to zero: with no threshold nothing is short enough to be absent.
    pub fn absent_limit(&self) -> Duration {
        secs_or_zero(self.absent_threshold)
    }

    /// `None` means unbounded: any worked span still counts as below half-day.
    pub fn half_day_limit(&self) -> Option<Duration> {
        self.half_day_threshold.map(Duration::seconds)
    }

    pub fn full_day_limit(&self) -> Duration {
        secs_or_zero(self.full_day_threshold)
    }

    pub fn lunch(&self) -> Duration {
        secs_or_zero(self.lunch_duration)
    }

    pub fn deducts_lunch(&self) -> bool {
        self.include_lunch_break_in_half_day || self.include_lunch_break_in_full_day
    }
}

fn secs_or_zero(value: Option<i64>) -> Duration {
    Duration::seconds(value.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::Shift;
    use chrono::{Duration, NaiveTime};

    pub(crate) fn shift(name: &str, start: (u32, u32), end: (u32, u32)) -> Shift {
        Shift {
            id: 0,
            name: name.to_string(),
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            tolerance_before_start: None,
            tolerance_after_start: None,
            grace_period_at_start: None,
            grace_period_at_end: None,
            overtime_threshold_before_start: None,
            overtime_threshold_after_end: None,
            absent_threshold: None,
            half_day_threshold: None,
            full_day_threshold: None,
            lunch_duration: None,
            include_lunch_break_in_half_day: false,
            include_lunch_break_in_full_day: false,
        }
    }

    #[test]
    fn night_shift_detection() {
        assert!(!shift("GS", (9, 0), (18, 0)).is_night_shift());
        assert!(shift("NS", (22, 0), (6, 0)).is_night_shift());
        // end == start counts as crossing midnight
        assert!(shift("RR", (8, 0), (8, 0)).is_night_shift());
    }

    #[test]
    fn duration_defaults() {
        let s = shift("GS", (9, 0), (18, 0));
        assert_eq!(s.tolerance_before(), Duration::zero());
        assert_eq!(s.absent_limit(), Duration::zero());
        assert_eq!(s.half_day_limit(), None);
        assert_eq!(s.full_day_limit(), Duration::zero());
        assert!(!s.deducts_lunch());
    }
}
