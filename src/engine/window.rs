use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Timelike};
use chrono_tz::Tz;

use crate::models::shift::Shift;

/// A shift contract concretized onto a calendar date: absolute bounds,
/// tolerance and grace instants, and the thresholds the metrics engine
/// needs. Pure data; building one never touches storage.
#[derive(Debug, Clone, PartialEq)]
pub struct ShiftWindow {
    pub name: String,
    pub start_time: DateTime<Tz>,
    pub end_time: DateTime<Tz>,
    pub start_window: DateTime<Tz>,
    pub end_window: DateTime<Tz>,
    pub start_with_grace: DateTime<Tz>,
    pub end_with_grace: DateTime<Tz>,
    pub overtime_before_start: Duration,
    pub overtime_after_end: Duration,
    pub absent_threshold: Duration,
    /// `None` = unbounded; a missing half-day threshold never stops the
    /// half-day predicate from matching.
    pub half_day_threshold: Option<Duration>,
    pub full_day_threshold: Duration,
    pub lunch_duration: Duration,
    pub include_lunch_break_in_half_day: bool,
    pub include_lunch_break_in_full_day: bool,
}

impl ShiftWindow {
    pub fn contains(&self, t: DateTime<Tz>) -> bool {
        self.start_window <= t && t <= self.end_window
    }

    pub fn deducts_lunch(&self) -> bool {
        self.include_lunch_break_in_half_day || self.include_lunch_break_in_full_day
    }
}

const NIGHT_START_CUTOFF: u32 = 18;
const EARLY_MORNING_CUTOFF: u32 = 8;

/// Concretize `shift` for the punch at `t` against `base_date`.
///
/// For a night shift starting in the evening, an early-morning punch may
/// belong to the previous day's instance: if the window computed off
/// `base_date - 1` still ends after `t`, the whole window shifts back a day.
/// Callers take the attendance date from `start_time`, never from the punch.
pub fn shift_window(shift: &Shift, t: DateTime<Tz>, base_date: NaiveDate) -> ShiftWindow {
    let tz = t.timezone();
    let mut effective_date = base_date;

    let evening_start = shift.start_time.hour() >= NIGHT_START_CUTOFF;
    let early_punch = t.time().hour() < EARLY_MORNING_CUTOFF;
    if shift.is_night_shift() && evening_start && early_punch {
        let prev_date = base_date - Duration::days(1);
        let prev_end = at_local(tz, prev_date + Duration::days(1), shift.end_time);
        if prev_end > t {
            effective_date = prev_date;
        }
    }

    let start_time = at_local(tz, effective_date, shift.start_time);
    let end_date = if shift.is_night_shift() {
        effective_date + Duration::days(1)
    } else {
        effective_date
    };
    let end_time = at_local(tz, end_date, shift.end_time);

    ShiftWindow {
        name: shift.name.clone(),
        start_time,
        end_time,
        start_window: start_time - shift.tolerance_before(),
        end_window: start_time + shift.tolerance_after(),
        start_with_grace: start_time + shift.grace_at_start(),
        end_with_grace: end_time - shift.grace_at_end(),
        overtime_before_start: shift.overtime_before(),
        overtime_after_end: shift.overtime_after(),
        absent_threshold: shift.absent_limit(),
        half_day_threshold: shift.half_day_limit(),
        full_day_threshold: shift.full_day_limit(),
        lunch_duration: shift.lunch(),
        include_lunch_break_in_half_day: shift.include_lunch_break_in_half_day,
        include_lunch_break_in_full_day: shift.include_lunch_break_in_full_day,
    }
}

/// Resolve a wall-clock time on a date to an instant in `tz`. DST gaps take
/// the instant one hour later; ambiguous times take the earlier offset.
pub(crate) fn at_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Tz> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earlier, _) => earlier,
        LocalResult::None => match tz.from_local_datetime(&(naive + Duration::hours(1))) {
            LocalResult::Single(dt) => dt,
            LocalResult::Ambiguous(earlier, _) => earlier,
            LocalResult::None => tz.from_utc_datetime(&naive),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::shift::Shift;
    use chrono::NaiveTime;
    use chrono_tz::Tz;

    const TZ: Tz = chrono_tz::Asia::Kolkata;

    fn shift(name: &str, start: (u32, u32), end: (u32, u32)) -> Shift {
        Shift {
            id: 0,
            name: name.to_string(),
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            tolerance_before_start: Some(3600),
            tolerance_after_start: Some(3600),
            grace_period_at_start: Some(900),
            grace_period_at_end: Some(900),
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

    fn at(date: (i32, u32, u32), time: (u32, u32)) -> DateTime<Tz> {
        TZ.with_ymd_and_hms(date.0, date.1, date.2, time.0, time.1, 0)
            .unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn day_shift_window_stays_on_base_date() {
        let gs = shift("GS", (9, 0), (18, 0));
        let w = shift_window(&gs, at((2024, 3, 11), (8, 58)), date(2024, 3, 11));

        assert_eq!(w.start_time, at((2024, 3, 11), (9, 0)));
        assert_eq!(w.end_time, at((2024, 3, 11), (18, 0)));
        assert_eq!(w.start_window, at((2024, 3, 11), (8, 0)));
        assert_eq!(w.end_window, at((2024, 3, 11), (10, 0)));
        assert_eq!(w.start_with_grace, at((2024, 3, 11), (9, 15)));
        assert_eq!(w.end_with_grace, at((2024, 3, 11), (17, 45)));
    }

    #[test]
    fn night_shift_end_crosses_midnight() {
        let ns = shift("NS", (22, 0), (6, 0));
        let w = shift_window(&ns, at((2024, 3, 11), (21, 30)), date(2024, 3, 11));

        assert_eq!(w.start_time, at((2024, 3, 11), (22, 0)));
        assert_eq!(w.end_time, at((2024, 3, 12), (6, 0)));
    }

    #[test]
    fn early_morning_punch_rolls_back_to_previous_day() {
        let ns = shift("NS", (22, 0), (6, 0));
        let w = shift_window(&ns, at((2024, 3, 12), (1, 15)), date(2024, 3, 12));

        // 01:15 is before the previous instance's 06:00 end, so the window
        // anchors on the 11th.
        assert_eq!(w.start_time, at((2024, 3, 11), (22, 0)));
        assert_eq!(w.end_time, at((2024, 3, 12), (6, 0)));
        assert_eq!(w.start_time.date_naive(), date(2024, 3, 11));
    }

    #[test]
    fn early_punch_after_previous_end_stays_on_base_date() {
        let ns = shift("NS", (22, 0), (6, 0));
        let w = shift_window(&ns, at((2024, 3, 12), (7, 30)), date(2024, 3, 12));

        // 07:30 is past the previous instance's end; no rollback even though
        // the punch is before 08:00.
        assert_eq!(w.start_time, at((2024, 3, 12), (22, 0)));
    }

    #[test]
    fn afternoon_start_night_shift_never_rolls_back() {
        let ns = shift("LN", (14, 0), (2, 0));
        let w = shift_window(&ns, at((2024, 3, 12), (1, 0)), date(2024, 3, 12));

        // Starts before 18:00, so the previous-day heuristic does not apply.
        assert_eq!(w.start_time, at((2024, 3, 12), (14, 0)));
    }

    #[test]
    fn same_inputs_same_window() {
        let ns = shift("NS", (22, 0), (6, 0));
        let a = shift_window(&ns, at((2024, 3, 12), (1, 15)), date(2024, 3, 12));
        let b = shift_window(&ns, at((2024, 3, 12), (1, 15)), date(2024, 3, 12));
        assert_eq!(a, b);
    }
}
