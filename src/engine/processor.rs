use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use sqlx::{Pool, Sqlite};

use crate::config::Config;
use crate::engine::cursor::ProcessedCursor;
use crate::engine::direction;
use crate::engine::metrics::{self, DayContext, Metrics};
use crate::engine::window::{shift_window, ShiftWindow};
use crate::error::EngineError;
use crate::models::attendance::{Attendance, ShiftStatus};
use crate::models::device::DeviceConfig;
use crate::models::employee::Employee;
use crate::models::holiday::{Holiday, HolidayKind};
use crate::models::punch::{AllLog, PunchDirection, PunchSource};
use crate::models::shift::Shift;

/// Per-run counters, logged per batch and per run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunTally {
    /// Unprocessed punches seen this run.
    pub new: u64,
    /// Punches reduced and recorded in the processed-cursor.
    pub processed: u64,
    /// Punches left unprocessed (unknown employee, unconfigured device,
    /// outside the employment window, lock conflicts).
    pub skipped: u64,
    /// Set when a cursor bulk write failed; reduced punches stay in the
    /// "new" set and are re-observed next run.
    pub partial: bool,
}

enum Disposition {
    Reduced,
    OutsideEmployment,
}

/// Read-mostly reference data, loaded once per run.
struct Caches {
    shifts_by_name: HashMap<String, Shift>,
    /// All shifts in ascending name order; auto-shift matching takes the
    /// first window that contains the punch.
    shifts_ordered: Vec<Shift>,
    employees: HashMap<String, Employee>,
    holidays: HashMap<NaiveDate, HolidayKind>,
    device_configs: HashMap<(String, String), String>,
}

impl Caches {
    async fn load(pool: &Pool<Sqlite>) -> Result<Self, EngineError> {
        let shifts_ordered: Vec<Shift> = sqlx::query_as("SELECT * FROM shifts ORDER BY name ASC")
            .fetch_all(pool)
            .await?;
        let shifts_by_name = shifts_ordered
            .iter()
            .map(|s| (s.name.clone(), s.clone()))
            .collect();

        let employees: Vec<Employee> = sqlx::query_as("SELECT * FROM employees")
            .fetch_all(pool)
            .await?;
        let employees = employees
            .into_iter()
            .map(|e| (e.employee_id.clone(), e))
            .collect();

        let holidays: Vec<Holiday> = sqlx::query_as("SELECT * FROM holidays")
            .fetch_all(pool)
            .await?;
        let holidays = holidays
            .into_iter()
            .map(|h| (h.holiday_date, h.holiday_type))
            .collect();

        let devices: Vec<DeviceConfig> = sqlx::query_as("SELECT * FROM device_configs")
            .fetch_all(pool)
            .await?;
        let device_configs = devices
            .into_iter()
            .map(|d| ((d.shortname, d.serial_number), d.direction_of_use))
            .collect();

        Ok(Self {
            shifts_by_name,
            shifts_ordered,
            employees,
            holidays,
            device_configs,
        })
    }
}

/// The stream consumer: drains "unified view minus processed-cursor" in
/// log-time order and reduces each punch into the day-keyed aggregate.
pub struct AttendanceProcessor<'a> {
    pool: &'a Pool<Sqlite>,
    tz: Tz,
    batch_size: i64,
    default_week_off: Vec<u32>,
    caches: Caches,
}

impl<'a> AttendanceProcessor<'a> {
    /// Load reference data and build a processor for one run. Caches are
    /// refreshed here, never mid-run.
    pub async fn load(pool: &'a Pool<Sqlite>, config: &Config) -> Result<Self, EngineError> {
        let caches = Caches::load(pool).await?;
        log::info!(
            "attendance processor loaded: {} shifts, {} employees, {} holidays, {} device configs",
            caches.shifts_ordered.len(),
            caches.employees.len(),
            caches.holidays.len(),
            caches.device_configs.len()
        );
        Ok(Self {
            pool,
            tz: config.timezone,
            batch_size: config.batch_size,
            default_week_off: config.default_week_off.clone(),
            caches,
        })
    }

    /// Consume every unprocessed punch in ascending `log_datetime` order.
    /// Individual punch failures skip the punch; only invariant violations
    /// abort the run. `cancel` is honoured at batch boundaries.
    pub async fn run(&self, cancel: &AtomicBool) -> Result<RunTally, EngineError> {
        let cursor = ProcessedCursor::new(self.pool);
        let mut tally = RunTally::default();
        let mut watermark: Option<(DateTime<Utc>, i64)> = None;

        loop {
            if cancel.load(Ordering::Relaxed) {
                log::info!("attendance run cancelled at batch boundary");
                break;
            }

            let batch = self.fetch_unprocessed(watermark, self.batch_size).await?;
            if batch.is_empty() {
                break;
            }
            watermark = batch.last().map(|p| (p.log_datetime, p.id));

            let mut reduced = Vec::with_capacity(batch.len());
            let mut batch_skipped = 0u64;
            for punch in &batch {
                match self.process_single(punch).await {
                    Ok(Disposition::Reduced) => reduced.push(punch.id),
                    Ok(Disposition::OutsideEmployment) => {
                        log::debug!(
                            "punch {} for {} is outside the employment window",
                            punch.id,
                            punch.employeeid
                        );
                        batch_skipped += 1;
                    }
                    Err(err) if err.is_recoverable() => {
                        log::warn!("skipping punch {}: {}", punch.id, err);
                        batch_skipped += 1;
                    }
                    Err(err) => {
                        log::error!("aborting run on punch {}: {}", punch.id, err);
                        return Err(err);
                    }
                }
            }

            tally.new += batch.len() as u64;
            tally.processed += reduced.len() as u64;
            tally.skipped += batch_skipped;

            if let Err(err) = cursor.add_many(&reduced).await {
                log::error!("processed-cursor write failed, run is partial: {}", err);
                tally.partial = true;
                break;
            }

            log::info!(
                "batch done: processed={} skipped={} new={}",
                reduced.len(),
                batch_skipped,
                batch.len()
            );
        }

        log::info!(
            "attendance run done: processed={} skipped={} new={} partial={}",
            tally.processed,
            tally.skipped,
            tally.new,
            tally.partial
        );
        Ok(tally)
    }

    async fn fetch_unprocessed(
        &self,
        after: Option<(DateTime<Utc>, i64)>,
        limit: i64,
    ) -> Result<Vec<AllLog>, EngineError> {
        let rows = match after {
            Some((ts, id)) => {
                sqlx::query_as::<_, AllLog>(
                    "SELECT * FROM all_logs \
                     WHERE id NOT IN (SELECT id FROM processed_logs) \
                       AND (log_datetime > ? OR (log_datetime = ? AND id > ?)) \
                     ORDER BY log_datetime ASC, id ASC LIMIT ?",
                )
                .bind(ts)
                .bind(ts)
                .bind(id)
                .bind(limit)
                .fetch_all(self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, AllLog>(
                    "SELECT * FROM all_logs \
                     WHERE id NOT IN (SELECT id FROM processed_logs) \
                     ORDER BY log_datetime ASC, id ASC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn process_single(&self, punch: &AllLog) -> Result<Disposition, EngineError> {
        let employee = self
            .caches
            .employees
            .get(&punch.employeeid)
            .ok_or_else(|| EngineError::employee_unknown(&punch.employeeid))?;

        let punch_date = self.local(punch.log_datetime).date_naive();
        if !employee.is_active_on(punch_date) {
            return Ok(Disposition::OutsideEmployment);
        }

        let resolved = direction::resolve(&self.caches.device_configs, punch)?;
        match resolved {
            PunchDirection::Both => self.handle_inout(employee, punch).await?,
            PunchDirection::In => {
                let existing = self.fetch_attendance(&punch.employeeid, punch_date).await?;
                if existing.as_ref().and_then(|a| a.last_logtime).is_some() {
                    self.handle_in_after_out(employee, punch).await?
                } else if let Some(shift) = self.fixed_shift(employee)? {
                    self.handle_fixed_in(employee, shift, punch).await?
                } else {
                    self.handle_auto_in(employee, punch).await?
                }
            }
            PunchDirection::Out => {
                if let Some(shift) = self.fixed_shift(employee)? {
                    self.handle_fixed_out(employee, shift, punch).await?
                } else {
                    self.handle_auto_out(employee, punch).await?
                }
            }
        }
        Ok(Disposition::Reduced)
    }

    fn local(&self, t: DateTime<Utc>) -> DateTime<Tz> {
        t.with_timezone(&self.tz)
    }

    fn fixed_shift(&self, employee: &Employee) -> Result<Option<&Shift>, EngineError> {
        match &employee.shift {
            None => Ok(None),
            Some(name) => self
                .caches
                .shifts_by_name
                .get(name)
                .map(Some)
                .ok_or_else(|| {
                    EngineError::not_found(format!(
                        "assigned shift '{}' of employee {} does not exist",
                        name, employee.employee_id
                    ))
                }),
        }
    }

    async fn fetch_attendance(
        &self,
        employeeid: &str,
        logdate: NaiveDate,
    ) -> Result<Option<Attendance>, EngineError> {
        let row = sqlx::query_as::<_, Attendance>(
            "SELECT * FROM attendance WHERE employeeid = ? AND logdate = ?",
        )
        .bind(employeeid)
        .bind(logdate)
        .fetch_optional(self.pool)
        .await?;
        Ok(row)
    }

    fn day_context(&self, employee: &Employee, logdate: NaiveDate) -> DayContext {
        DayContext {
            week_off_days: employee.week_off_days(&self.default_week_off),
            holiday: self.caches.holidays.get(&logdate).copied(),
        }
    }

    /// Window and attendance date for a fixed-shift punch. The window
    /// calculator may already anchor a night-shift window on the previous
    /// day; punches ahead of the start window get one explicit re-check
    /// against the previous day's instance.
    fn fixed_window_for(&self, shift: &Shift, t: DateTime<Tz>) -> (ShiftWindow, NaiveDate) {
        let punch_date = t.date_naive();
        let mut window = shift_window(shift, t, punch_date);
        if t < window.start_window && shift.is_night_shift() {
            let prev = shift_window(shift, t, punch_date - Duration::days(1));
            if prev.contains(t) {
                window = prev;
            }
        }
        let attendance_date = window.start_time.date_naive();
        (window, attendance_date)
    }

    // --- IN handlers ---

    async fn handle_fixed_in(
        &self,
        employee: &Employee,
        shift: &Shift,
        punch: &AllLog,
    ) -> Result<(), EngineError> {
        let t = self.local(punch.log_datetime);
        let (window, attendance_date) = self.fixed_window_for(shift, t);
        self.apply_in(employee, &shift.name, &window, attendance_date, punch)
            .await
    }

    async fn handle_auto_in(&self, employee: &Employee, punch: &AllLog) -> Result<(), EngineError> {
        let t = self.local(punch.log_datetime);
        let punch_date = t.date_naive();

        for shift in &self.caches.shifts_ordered {
            let window = shift_window(shift, t, punch_date);
            if window.contains(t) {
                let attendance_date = window.start_time.date_naive();
                return self
                    .apply_in(employee, &shift.name, &window, attendance_date, punch)
                    .await;
            }
        }

        // No window matched: the punch reduces to nothing but still counts
        // as consumed.
        log::debug!(
            "no auto-shift window for punch {} of {} at {}",
            punch.id,
            employee.employee_id,
            t
        );
        Ok(())
    }

    /// Create the aggregate or pull `first_logtime` earlier. A later IN is
    /// ignored, which keeps reprocessing idempotent.
    async fn apply_in(
        &self,
        employee: &Employee,
        shift_name: &str,
        window: &ShiftWindow,
        attendance_date: NaiveDate,
        punch: &AllLog,
    ) -> Result<(), EngineError> {
        let t = self.local(punch.log_datetime);
        let late_entry = metrics::late_entry(window, t).map(|d| d.num_seconds());
        let (in_direction, in_shortname) = source_fields(punch);

        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_as::<_, Attendance>(
            "SELECT * FROM attendance WHERE employeeid = ? AND logdate = ?",
        )
        .bind(&employee.employee_id)
        .bind(attendance_date)
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            None => {
                sqlx::query(
                    "INSERT INTO attendance \
                     (employeeid, logdate, shift, first_logtime, in_direction, in_shortname, late_entry, shift_status) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&employee.employee_id)
                .bind(attendance_date)
                .bind(shift_name)
                .bind(punch.log_datetime)
                .bind(in_direction)
                .bind(&in_shortname)
                .bind(late_entry)
                .bind(ShiftStatus::MP)
                .execute(&mut *tx)
                .await?;
            }
            Some(agg) => {
                let earlier = agg
                    .first_logtime
                    .map_or(true, |first| punch.log_datetime < first);
                if earlier {
                    // Keep a status derived from a completed pair; only a
                    // day without an OUT stays at missing-punch.
                    let status = if agg.last_logtime.is_some() {
                        agg.shift_status
                    } else {
                        ShiftStatus::MP
                    };
                    sqlx::query(
                        "UPDATE attendance SET first_logtime = ?, shift = ?, in_direction = ?, \
                         in_shortname = ?, late_entry = ?, shift_status = ? WHERE id = ?",
                    )
                    .bind(punch.log_datetime)
                    .bind(shift_name)
                    .bind(in_direction)
                    .bind(&in_shortname)
                    .bind(late_entry)
                    .bind(status)
                    .bind(agg.id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    // --- OUT handlers ---

    async fn handle_fixed_out(
        &self,
        employee: &Employee,
        shift: &Shift,
        punch: &AllLog,
    ) -> Result<(), EngineError> {
        let t = self.local(punch.log_datetime);
        let punch_date = t.date_naive();
        let prev_date = punch_date - Duration::days(1);

        let candidates = sqlx::query_as::<_, Attendance>(
            "SELECT * FROM attendance WHERE employeeid = ? AND logdate IN (?, ?) \
             AND shift = ? AND first_logtime IS NOT NULL ORDER BY logdate DESC",
        )
        .bind(&employee.employee_id)
        .bind(punch_date)
        .bind(prev_date)
        .bind(&shift.name)
        .fetch_all(self.pool)
        .await?;

        let chosen = pick_out_candidate(&candidates, punch.log_datetime);
        match chosen {
            Some(agg) => self.apply_out(employee, shift, agg, punch).await,
            None => {
                self.apply_orphan_out(employee, Some(&shift.name), punch_date, punch)
                    .await
            }
        }
    }

    async fn handle_auto_out(&self, employee: &Employee, punch: &AllLog) -> Result<(), EngineError> {
        let t = self.local(punch.log_datetime);
        let punch_date = t.date_naive();
        let prev_date = punch_date - Duration::days(1);

        let candidates = sqlx::query_as::<_, Attendance>(
            "SELECT * FROM attendance WHERE employeeid = ? AND logdate IN (?, ?) \
             AND first_logtime IS NOT NULL ORDER BY logdate DESC",
        )
        .bind(&employee.employee_id)
        .bind(punch_date)
        .bind(prev_date)
        .fetch_all(self.pool)
        .await?;

        for agg in &candidates {
            let Some(shift) = self.caches.shifts_by_name.get(&agg.shift) else {
                continue;
            };
            let Some(first) = agg.first_logtime else {
                continue;
            };
            if first < punch.log_datetime
                && agg.last_logtime.map_or(true, |last| last < punch.log_datetime)
            {
                return self.apply_out(employee, shift, agg, punch).await;
            }
        }

        self.apply_orphan_out(employee, None, punch_date, punch).await
    }

    /// Lock the chosen aggregate and, only if this OUT is later than the
    /// stored one, replace it and recompute the derived metrics.
    async fn apply_out(
        &self,
        employee: &Employee,
        shift: &Shift,
        agg: &Attendance,
        punch: &AllLog,
    ) -> Result<(), EngineError> {
        let t = self.local(punch.log_datetime);
        let (out_direction, out_shortname) = source_fields(punch);

        let mut tx = self.pool.begin().await?;
        let Some(current) = sqlx::query_as::<_, Attendance>("SELECT * FROM attendance WHERE id = ?")
            .bind(agg.id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Err(EngineError::not_found(format!(
                "attendance row {} disappeared",
                agg.id
            )));
        };

        if current
            .last_logtime
            .map_or(false, |last| punch.log_datetime <= last)
        {
            // A later OUT already won.
            return Ok(());
        }

        let Some(first_utc) = current.first_logtime else {
            return Err(EngineError::not_found(format!(
                "attendance row {} lost its first_logtime",
                agg.id
            )));
        };
        if first_utc > punch.log_datetime {
            return Err(EngineError::invariant_violation(format!(
                "OUT at {} precedes IN at {} for {} on {}",
                punch.log_datetime, first_utc, current.employeeid, current.logdate
            )));
        }

        let window = shift_window(shift, t, current.logdate);
        let ctx = self.day_context(employee, current.logdate);
        let m = metrics::compute(&window, current.logdate, self.local(first_utc), t, &ctx);

        self.write_metrics(
            &mut tx,
            current.id,
            Some(punch.log_datetime),
            out_direction,
            out_shortname,
            &m,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// No aggregate could take this OUT: park it on the punch date as a
    /// missing-punch day so the time is not lost.
    async fn apply_orphan_out(
        &self,
        employee: &Employee,
        shift_name: Option<&str>,
        punch_date: NaiveDate,
        punch: &AllLog,
    ) -> Result<(), EngineError> {
        let (out_direction, out_shortname) = source_fields(punch);

        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_as::<_, Attendance>(
            "SELECT * FROM attendance WHERE employeeid = ? AND logdate = ?",
        )
        .bind(&employee.employee_id)
        .bind(punch_date)
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            None => {
                sqlx::query(
                    "INSERT INTO attendance \
                     (employeeid, logdate, shift, last_logtime, out_direction, out_shortname, shift_status) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&employee.employee_id)
                .bind(punch_date)
                .bind(shift_name.unwrap_or(""))
                .bind(punch.log_datetime)
                .bind(out_direction)
                .bind(&out_shortname)
                .bind(ShiftStatus::MP)
                .execute(&mut *tx)
                .await?;
            }
            Some(agg) => {
                if agg
                    .last_logtime
                    .map_or(true, |last| punch.log_datetime > last)
                {
                    sqlx::query(
                        "UPDATE attendance SET last_logtime = ?, out_direction = ?, \
                         out_shortname = ?, shift_status = ? WHERE id = ?",
                    )
                    .bind(punch.log_datetime)
                    .bind(out_direction)
                    .bind(&out_shortname)
                    .bind(ShiftStatus::MP)
                    .bind(agg.id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    // --- reconciliation handlers ---

    /// An IN arrived for a day that already closed with an OUT. Two-phase:
    /// apply the IN, reset the OUT-derived fields, then replay the stored
    /// OUT as a synthetic punch so the latest OUT still wins.
    async fn handle_in_after_out(
        &self,
        employee: &Employee,
        punch: &AllLog,
    ) -> Result<(), EngineError> {
        let t = self.local(punch.log_datetime);
        let punch_date = t.date_naive();
        let fixed = self.fixed_shift(employee)?;

        let existing = self.fetch_attendance(&employee.employee_id, punch_date).await?;
        let snapshot = existing.and_then(|agg| {
            agg.last_logtime
                .map(|last| (last, agg.out_direction, agg.out_shortname))
        });

        let Some((snap_time, snap_direction, snap_shortname)) = snapshot else {
            // The OUT vanished since dispatch; treat as a plain IN.
            return match fixed {
                Some(shift) => self.handle_fixed_in(employee, shift, punch).await,
                None => self.handle_auto_in(employee, punch).await,
            };
        };

        match fixed {
            Some(shift) => self.handle_fixed_in(employee, shift, punch).await?,
            None => self.handle_auto_in(employee, punch).await?,
        }

        sqlx::query(
            "UPDATE attendance SET last_logtime = NULL, total_time = NULL, early_exit = NULL, \
             overtime = NULL, out_direction = NULL, out_shortname = NULL, shift_status = ? \
             WHERE employeeid = ? AND logdate = ?",
        )
        .bind(ShiftStatus::MP)
        .bind(&employee.employee_id)
        .bind(punch_date)
        .execute(self.pool)
        .await?;

        let synthetic = AllLog {
            id: punch.id,
            employeeid: punch.employeeid.clone(),
            log_datetime: snap_time,
            direction: "out".to_string(),
            shortname: snap_shortname,
            serialno: None,
            source: snap_direction.unwrap_or(PunchSource::Device),
        };

        match fixed {
            Some(shift) => self.handle_fixed_out(employee, shift, &synthetic).await,
            None => self.handle_auto_out(employee, &synthetic).await,
        }
    }

    /// A punch from a both-direction device: decide IN or OUT from the
    /// current aggregate state, under one transaction.
    async fn handle_inout(&self, employee: &Employee, punch: &AllLog) -> Result<(), EngineError> {
        let t = self.local(punch.log_datetime);
        let punch_date = t.date_naive();

        let (matched_shift, window, attendance_date) = match self.fixed_shift(employee)? {
            Some(shift) => {
                let (window, attendance_date) = self.fixed_window_for(shift, t);
                (Some(shift), Some(window), attendance_date)
            }
            None => {
                let mut found = None;
                for shift in &self.caches.shifts_ordered {
                    let w = shift_window(shift, t, punch_date);
                    if w.contains(t) {
                        found = Some((shift, w));
                        break;
                    }
                }
                match found {
                    Some((shift, w)) => {
                        let attendance_date = w.start_time.date_naive();
                        (Some(shift), Some(w), attendance_date)
                    }
                    None => (None, None, punch_date),
                }
            }
        };

        let (source, shortname) = source_fields(punch);

        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_as::<_, Attendance>(
            "SELECT * FROM attendance WHERE employeeid = ? AND logdate = ?",
        )
        .bind(&employee.employee_id)
        .bind(attendance_date)
        .fetch_optional(&mut *tx)
        .await?;

        let mut agg = match existing {
            Some(agg) => agg,
            None => {
                sqlx::query_as::<_, Attendance>(
                    "INSERT INTO attendance (employeeid, logdate, shift, shift_status) \
                     VALUES (?, ?, ?, ?) RETURNING *",
                )
                .bind(&employee.employee_id)
                .bind(attendance_date)
                .bind(matched_shift.map(|s| s.name.as_str()).unwrap_or(""))
                .bind(ShiftStatus::MP)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        let t_utc = punch.log_datetime;
        let mut touched = false;

        if agg.first_logtime.map_or(true, |first| t_utc < first) {
            agg.first_logtime = Some(t_utc);
            agg.in_direction = Some(source);
            agg.in_shortname = shortname.clone();
            if let Some(shift) = matched_shift {
                agg.shift = shift.name.clone();
            }
            touched = true;
        } else if agg.first_logtime.map_or(false, |first| t_utc > first)
            && agg.last_logtime.map_or(true, |last| t_utc > last)
        {
            agg.last_logtime = Some(t_utc);
            agg.out_direction = Some(source);
            agg.out_shortname = shortname.clone();
            touched = true;
        }

        // A punch that lands exactly on the first punch cannot be an OUT;
        // force the pair open again.
        if agg.first_logtime == Some(t_utc) && agg.last_logtime.is_some() {
            agg.last_logtime = None;
            agg.out_direction = None;
            agg.out_shortname = None;
            touched = true;
        }

        if !touched {
            return Ok(());
        }

        let resolved_shift = match matched_shift {
            Some(shift) => Some(shift),
            None => self.caches.shifts_by_name.get(&agg.shift),
        };

        match (agg.first_logtime, agg.last_logtime, resolved_shift) {
            (Some(first), Some(last), Some(shift)) => {
                if first > last {
                    return Err(EngineError::invariant_violation(format!(
                        "first_logtime {} exceeds last_logtime {} for {} on {}",
                        first, last, agg.employeeid, agg.logdate
                    )));
                }
                let w = shift_window(shift, t, agg.logdate);
                let ctx = self.day_context(employee, agg.logdate);
                let m = metrics::compute(&w, agg.logdate, self.local(first), self.local(last), &ctx);
                sqlx::query(
                    "UPDATE attendance SET first_logtime = ?, last_logtime = ?, shift = ?, \
                     in_direction = ?, out_direction = ?, in_shortname = ?, out_shortname = ?, \
                     total_time = ?, late_entry = ?, early_exit = ?, overtime = ?, shift_status = ? \
                     WHERE id = ?",
                )
                .bind(agg.first_logtime)
                .bind(agg.last_logtime)
                .bind(&agg.shift)
                .bind(agg.in_direction)
                .bind(agg.out_direction)
                .bind(&agg.in_shortname)
                .bind(&agg.out_shortname)
                .bind(m.total_time.num_seconds())
                .bind(m.late_entry.map(|d| d.num_seconds()))
                .bind(m.early_exit.map(|d| d.num_seconds()))
                .bind(m.overtime.map(|d| d.num_seconds()))
                .bind(m.status)
                .bind(agg.id)
                .execute(&mut *tx)
                .await?;
            }
            (first, _, _) => {
                // One punch missing: the day is a missing-punch day. Late
                // entry is still derivable from the IN when a window exists.
                let late_entry = match (first, &window) {
                    (Some(first), Some(w)) => {
                        metrics::late_entry(w, self.local(first)).map(|d| d.num_seconds())
                    }
                    _ => agg.late_entry,
                };
                sqlx::query(
                    "UPDATE attendance SET first_logtime = ?, last_logtime = ?, shift = ?, \
                     in_direction = ?, out_direction = ?, in_shortname = ?, out_shortname = ?, \
                     total_time = NULL, late_entry = ?, early_exit = NULL, overtime = NULL, \
                     shift_status = ? WHERE id = ?",
                )
                .bind(agg.first_logtime)
                .bind(agg.last_logtime)
                .bind(&agg.shift)
                .bind(agg.in_direction)
                .bind(agg.out_direction)
                .bind(&agg.in_shortname)
                .bind(&agg.out_shortname)
                .bind(late_entry)
                .bind(ShiftStatus::MP)
                .bind(agg.id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn write_metrics(
        &self,
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        id: i64,
        last_logtime: Option<DateTime<Utc>>,
        out_direction: PunchSource,
        out_shortname: Option<String>,
        m: &Metrics,
    ) -> Result<(), EngineError> {
        sqlx::query(
            "UPDATE attendance SET last_logtime = ?, out_direction = ?, out_shortname = ?, \
             total_time = ?, late_entry = ?, early_exit = ?, overtime = ?, shift_status = ? \
             WHERE id = ?",
        )
        .bind(last_logtime)
        .bind(out_direction)
        .bind(&out_shortname)
        .bind(m.total_time.num_seconds())
        .bind(m.late_entry.map(|d| d.num_seconds()))
        .bind(m.early_exit.map(|d| d.num_seconds()))
        .bind(m.overtime.map(|d| d.num_seconds()))
        .bind(m.status)
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

/// In/out provenance columns: the source tag, and the device shortname for
/// device punches (manual punches store none).
fn source_fields(punch: &AllLog) -> (PunchSource, Option<String>) {
    let shortname = match punch.source {
        PunchSource::Manual => None,
        PunchSource::Device => punch.shortname.clone(),
    };
    (punch.source, shortname)
}

/// Best OUT target among today/yesterday: an open pair (or one whose OUT is
/// older than this punch) wins over a closed one, later date wins within a
/// tier. Rows are already sorted newest-first.
fn pick_out_candidate(candidates: &[Attendance], t: DateTime<Utc>) -> Option<&Attendance> {
    let eligible: Vec<&Attendance> = candidates
        .iter()
        .filter(|a| a.first_logtime.map_or(false, |first| first <= t))
        .collect();

    eligible
        .iter()
        .find(|a| a.last_logtime.map_or(true, |last| last < t))
        .copied()
        .or_else(|| eligible.first().copied())
}
