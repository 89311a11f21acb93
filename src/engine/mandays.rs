use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use sqlx::{Pool, Sqlite};

use crate::config::Config;
use crate::engine::window::at_local;
use crate::error::EngineError;
use crate::models::punch::Log;
use crate::utils::format_hms;

/// A day splits into at most ten duty pairs.
pub const MAX_PAIRS: usize = 10;

/// Incremental mandays derivation: consume device punches past the
/// `LastLogIdMandays` cursor, rebuild the duty-pair view of every touched
/// (employee, day) inside the trailing window, then advance the cursor.
/// Returns the number of days rebuilt.
pub async fn run(pool: &Pool<Sqlite>, config: &Config) -> Result<u64, EngineError> {
    let today = Utc::now().with_timezone(&config.timezone).date_naive();
    run_from(pool, config, today).await
}

pub async fn run_from(
    pool: &Pool<Sqlite>,
    config: &Config,
    today: NaiveDate,
) -> Result<u64, EngineError> {
    let last_id = cursor_position(pool).await?;
    let new_logs: Vec<Log> = sqlx::query_as("SELECT * FROM logs WHERE id > ? ORDER BY id ASC")
        .bind(last_id)
        .fetch_all(pool)
        .await?;
    if new_logs.is_empty() {
        return Ok(0);
    }

    let cutoff = today - Duration::days(config.mandays_window_days);
    let mut affected: BTreeSet<(String, NaiveDate)> = BTreeSet::new();
    let mut max_id = last_id;
    for log in &new_logs {
        max_id = max_id.max(log.id);
        let day = log.log_datetime.with_timezone(&config.timezone).date_naive();
        if day >= cutoff {
            affected.insert((log.employeeid.clone(), day));
        }
    }

    log::info!(
        "mandays: {} new punches touch {} day(s) since {cutoff}",
        new_logs.len(),
        affected.len()
    );

    let mut rebuilt = 0u64;
    for (employeeid, day) in &affected {
        rebuild_day(pool, config.timezone, employeeid, *day).await?;
        rebuilt += 1;
    }

    sqlx::query("INSERT OR REPLACE INTO mandays_cursor (id, last_log_id) VALUES (1, ?)")
        .bind(max_id)
        .execute(pool)
        .await?;

    Ok(rebuilt)
}

/// Re-derive one day from scratch: delete its rows, pair the day's punches
/// in time order, record an unpaired trailing punch as a missed punch.
async fn rebuild_day(
    pool: &Pool<Sqlite>,
    tz: Tz,
    employeeid: &str,
    day: NaiveDate,
) -> Result<(), EngineError> {
    let (start, end) = local_day_bounds(tz, day);
    let punches: Vec<Log> = sqlx::query_as(
        "SELECT * FROM logs WHERE employeeid = ? AND log_datetime >= ? AND log_datetime < ? \
         ORDER BY log_datetime ASC, id ASC",
    )
    .bind(employeeid)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    let mut tx = pool.begin().await?;
    for table in ["mandays", "mandays_summary", "missed_punches"] {
        sqlx::query(&format!(
            "DELETE FROM {table} WHERE employeeid = ? AND logdate = ?"
        ))
        .bind(employeeid)
        .bind(day)
        .execute(&mut *tx)
        .await?;
    }

    if punches.len() >= 2 {
        let mut pair_count = 0i64;
        let mut total_hours_worked = 0i64;

        for (index, pair) in punches.chunks(2).take(MAX_PAIRS).enumerate() {
            let duty_in = &pair[0];
            match pair.get(1) {
                Some(duty_out) => {
                    let span = (duty_out.log_datetime - duty_in.log_datetime).num_seconds();
                    sqlx::query(
                        "INSERT INTO mandays (employeeid, logdate, slot, duty_in, duty_out, total_time) \
                         VALUES (?, ?, ?, ?, ?, ?)",
                    )
                    .bind(employeeid)
                    .bind(day)
                    .bind((index + 1) as i64)
                    .bind(duty_in.log_datetime)
                    .bind(duty_out.log_datetime)
                    .bind(span)
                    .execute(&mut *tx)
                    .await?;
                    pair_count += 1;
                    total_hours_worked += span;
                }
                None => {
                    // Odd punch out: an IN that never closed.
                    sqlx::query(
                        "INSERT OR IGNORE INTO missed_punches (employeeid, logdate, punch_time) \
                         VALUES (?, ?, ?)",
                    )
                    .bind(employeeid)
                    .bind(day)
                    .bind(duty_in.log_datetime)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        sqlx::query(
            "INSERT INTO mandays_summary (employeeid, logdate, pair_count, total_hours_worked) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(employeeid)
        .bind(day)
        .bind(pair_count)
        .bind(total_hours_worked)
        .execute(&mut *tx)
        .await?;

        log::debug!(
            "mandays {employeeid} {day}: {pair_count} pair(s), {}",
            format_hms(Duration::seconds(total_hours_worked))
        );
    }

    tx.commit().await?;
    Ok(())
}

/// Bounded rewind: with at least a full window of history, rewind the
/// cursor to the last punch before the window and clear only the window's
/// rows; with less history, wipe everything and start over.
pub async fn reset(pool: &Pool<Sqlite>, config: &Config) -> Result<(), EngineError> {
    let today = Utc::now().with_timezone(&config.timezone).date_naive();
    reset_from(pool, config, today).await
}

pub async fn reset_from(
    pool: &Pool<Sqlite>,
    config: &Config,
    today: NaiveDate,
) -> Result<(), EngineError> {
    let earliest: Option<DateTime<Utc>> = sqlx::query_scalar("SELECT MIN(log_datetime) FROM logs")
        .fetch_one(pool)
        .await?;
    let history_days = earliest
        .map(|e| (today - e.with_timezone(&config.timezone).date_naive()).num_days())
        .unwrap_or(0);

    let mut tx = pool.begin().await?;
    if history_days >= config.mandays_window_days {
        let cutoff = today - Duration::days(config.mandays_window_days);
        let (cutoff_start, _) = local_day_bounds(config.timezone, cutoff);
        let rewound: Option<i64> =
            sqlx::query_scalar("SELECT MAX(id) FROM logs WHERE log_datetime < ?")
                .bind(cutoff_start)
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query("INSERT OR REPLACE INTO mandays_cursor (id, last_log_id) VALUES (1, ?)")
            .bind(rewound.unwrap_or(0))
            .execute(&mut *tx)
            .await?;
        for table in ["mandays", "mandays_summary", "missed_punches"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE logdate >= ?"))
                .bind(cutoff)
                .execute(&mut *tx)
                .await?;
        }
        log::info!(
            "mandays soft reset: cursor rewound to {} behind {cutoff}",
            rewound.unwrap_or(0)
        );
    } else {
        sqlx::query("INSERT OR REPLACE INTO mandays_cursor (id, last_log_id) VALUES (1, 0)")
            .execute(&mut *tx)
            .await?;
        for table in ["mandays", "mandays_summary", "missed_punches"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }
        log::info!("mandays full reset: under {} days of history", config.mandays_window_days);
    }
    tx.commit().await?;
    Ok(())
}

async fn cursor_position(pool: &Pool<Sqlite>) -> Result<i64, EngineError> {
    let pos: Option<i64> = sqlx::query_scalar("SELECT last_log_id FROM mandays_cursor WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    Ok(pos.unwrap_or(0))
}

fn local_day_bounds(tz: Tz, day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = at_local(tz, day, NaiveTime::MIN).with_timezone(&Utc);
    let end = at_local(tz, day + Duration::days(1), NaiveTime::MIN).with_timezone(&Utc);
    (start, end)
}
