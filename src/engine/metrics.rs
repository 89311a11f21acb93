use chrono::{DateTime, Datelike, Duration, NaiveDate};
use chrono_tz::Tz;

use crate::engine::window::ShiftWindow;
use crate::models::attendance::ShiftStatus;
use crate::models::holiday::HolidayKind;

/// Day-level facts the status chain depends on besides the punches.
#[derive(Debug, Clone)]
pub struct DayContext {
    pub week_off_days: Vec<u32>,
    pub holiday: Option<HolidayKind>,
}

/// Derived metrics for a completed (in, out) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    pub total_time: Duration,
    pub late_entry: Option<Duration>,
    pub early_exit: Option<Duration>,
    pub overtime: Option<Duration>,
    pub status: ShiftStatus,
}

/// Late entry is gated at the grace bound but measured from the shift start.
pub fn late_entry(window: &ShiftWindow, in_t: DateTime<Tz>) -> Option<Duration> {
    if in_t > window.start_with_grace {
        Some(in_t - window.start_time)
    } else {
        None
    }
}

/// Early exit mirrors late entry: gated at the grace bound, measured from
/// the shift end.
pub fn early_exit(window: &ShiftWindow, out_t: DateTime<Tz>) -> Option<Duration> {
    if out_t < window.end_with_grace {
        Some(window.end_time - out_t)
    } else {
        None
    }
}

/// Compute total time, lateness, overtime and the status classification for
/// an aggregate whose both punches are known. `logdate` is the aggregate's
/// date (the shift-start date for night shifts), which drives the holiday
/// and week-off checks.
pub fn compute(
    window: &ShiftWindow,
    logdate: NaiveDate,
    in_t: DateTime<Tz>,
    out_t: DateTime<Tz>,
    ctx: &DayContext,
) -> Metrics {
    let raw = (out_t - in_t).max(Duration::zero());

    let deduction = if window.deducts_lunch() {
        window.lunch_duration
    } else {
        Duration::zero()
    };
    let total_time = (raw - deduction).max(Duration::zero());

    let overtime_before = {
        let threshold = window.start_time - window.overtime_before_start;
        if in_t < threshold {
            (threshold - in_t).max(Duration::zero())
        } else {
            Duration::zero()
        }
    };
    let overtime_after = {
        let threshold = window.end_time + window.overtime_after_end;
        if out_t > threshold {
            (out_t - threshold).max(Duration::zero())
        } else {
            Duration::zero()
        }
    };
    let calc_overtime = overtime_before + overtime_after;

    let weekday = logdate.weekday().num_days_from_monday();
    let is_week_off = ctx.week_off_days.contains(&weekday);

    // Order matters: holiday beats week-off beats the threshold chain. On
    // holidays and week-offs the whole raw span counts as overtime.
    let (status, overtime) = if let Some(kind) = ctx.holiday {
        let status = match kind {
            HolidayKind::Paid => ShiftStatus::PW,
            HolidayKind::Flexi => ShiftStatus::FW,
        };
        (status, Some(raw))
    } else if is_week_off {
        (ShiftStatus::WW, Some(raw))
    } else {
        let status = if total_time < window.absent_threshold {
            ShiftStatus::A
        } else if window
            .half_day_threshold
            .map_or(true, |half| total_time < half)
        {
            ShiftStatus::HD
        } else if total_time < window.full_day_threshold {
            ShiftStatus::IH
        } else {
            ShiftStatus::P
        };
        let overtime = if calc_overtime > Duration::zero() {
            Some(calc_overtime)
        } else {
            None
        };
        (status, overtime)
    };

    Metrics {
        total_time,
        late_entry: late_entry(window, in_t),
        early_exit: early_exit(window, out_t),
        overtime,
        status,
    }
}
