use std::collections::{HashMap, HashSet};

use chrono::{Datelike, Duration, NaiveDate, Utc};
use sqlx::{Pool, Sqlite};

use crate::config::Config;
use crate::error::EngineError;
use crate::models::attendance::ShiftStatus;
use crate::models::employee::Employee;
use crate::models::holiday::{Holiday, HolidayKind};

const INSERT_BATCH: usize = 1000;

/// Materialize aggregates for punch-less days over the trailing `days`
/// window: week-off, holiday, or absent. Conflict-ignore inserts keep the
/// sweep idempotent and make it never overwrite a processed day.
pub async fn sweep(pool: &Pool<Sqlite>, config: &Config, days: i64) -> Result<u64, EngineError> {
    let today = Utc::now().with_timezone(&config.timezone).date_naive();
    sweep_from(pool, config, today, days).await
}

pub async fn sweep_from(
    pool: &Pool<Sqlite>,
    config: &Config,
    today: NaiveDate,
    days: i64,
) -> Result<u64, EngineError> {
    if days <= 0 {
        return Ok(0);
    }

    let dates: Vec<NaiveDate> = (0..days).map(|i| today - Duration::days(i)).collect();
    let latest = today;
    let earliest = today - Duration::days(days - 1);

    // Only employees whose employment window intersects the range at all.
    let employees: Vec<Employee> = sqlx::query_as(
        "SELECT * FROM employees \
         WHERE (date_of_leaving IS NULL OR date_of_leaving >= ?) \
           AND (date_of_joining IS NULL OR date_of_joining <= ?)",
    )
    .bind(earliest)
    .bind(latest)
    .fetch_all(pool)
    .await?;

    if employees.is_empty() {
        log::info!("absentee sweep: no employees cover {earliest}..{latest}");
        return Ok(0);
    }

    let holidays: Vec<Holiday> =
        sqlx::query_as("SELECT * FROM holidays WHERE holiday_date BETWEEN ? AND ?")
            .bind(earliest)
            .bind(latest)
            .fetch_all(pool)
            .await?;
    let holidays: HashMap<NaiveDate, HolidayKind> = holidays
        .into_iter()
        .map(|h| (h.holiday_date, h.holiday_type))
        .collect();

    let existing: Vec<(String, NaiveDate)> = sqlx::query_as(
        "SELECT employeeid, logdate FROM attendance WHERE logdate BETWEEN ? AND ?",
    )
    .bind(earliest)
    .bind(latest)
    .fetch_all(pool)
    .await?;
    let existing: HashSet<(String, NaiveDate)> = existing.into_iter().collect();

    log::info!(
        "absentee sweep: {} employees, {} dates ({earliest}..{latest}), {} existing rows",
        employees.len(),
        dates.len(),
        existing.len()
    );

    let mut inserted = 0u64;
    let mut pending: Vec<(String, NaiveDate, ShiftStatus)> = Vec::with_capacity(INSERT_BATCH);

    for employee in &employees {
        let week_off = employee.week_off_days(&config.default_week_off);
        for date in &dates {
            if !employee.is_active_on(*date) {
                continue;
            }
            if existing.contains(&(employee.employee_id.clone(), *date)) {
                continue;
            }

            let status = match holidays.get(date) {
                Some(HolidayKind::Paid) => ShiftStatus::PH,
                Some(HolidayKind::Flexi) => ShiftStatus::FH,
                None => {
                    let weekday = date.weekday().num_days_from_monday();
                    if week_off.contains(&weekday) {
                        ShiftStatus::WO
                    } else {
                        ShiftStatus::A
                    }
                }
            };

            pending.push((employee.employee_id.clone(), *date, status));
            if pending.len() >= INSERT_BATCH {
                inserted += flush(pool, &mut pending).await?;
            }
        }
    }
    inserted += flush(pool, &mut pending).await?;

    log::info!("absentee sweep inserted {inserted} rows");
    Ok(inserted)
}

async fn flush(
    pool: &Pool<Sqlite>,
    pending: &mut Vec<(String, NaiveDate, ShiftStatus)>,
) -> Result<u64, EngineError> {
    if pending.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;
    for (employeeid, logdate, status) in pending.drain(..) {
        let res = sqlx::query(
            "INSERT OR IGNORE INTO attendance (employeeid, logdate, shift, shift_status) \
             VALUES (?, ?, '', ?)",
        )
        .bind(&employeeid)
        .bind(logdate)
        .bind(status)
        .execute(&mut *tx)
        .await?;
        inserted += res.rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}
