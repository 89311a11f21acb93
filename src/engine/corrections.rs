use chrono::{Duration, NaiveDate};
use sqlx::{FromRow, Pool, Sqlite};

use crate::error::EngineError;
use crate::models::attendance::ShiftStatus;
use crate::models::correction::AwoCorrection;

#[derive(Debug, FromRow)]
struct StatusRow {
    employeeid: String,
    logdate: NaiveDate,
    shift_status: ShiftStatus,
}

/// Flip the middle of every consecutive A,WO,A triple to A, keeping an
/// audit row so the reverter can undo the flip later. Returns the number of
/// days flipped.
pub async fn correct_a_wo_a(pool: &Pool<Sqlite>) -> Result<u64, EngineError> {
    let rows: Vec<StatusRow> = sqlx::query_as(
        "SELECT employeeid, logdate, shift_status FROM attendance \
         WHERE shift_status IN ('A', 'WO') ORDER BY employeeid ASC, logdate ASC",
    )
    .fetch_all(pool)
    .await?;

    let mut flips: Vec<(String, NaiveDate, NaiveDate, NaiveDate)> = Vec::new();
    for triple in rows.windows(3) {
        let [d1, d2, d3] = triple else { continue };
        if d1.employeeid != d2.employeeid || d2.employeeid != d3.employeeid {
            continue;
        }
        if d2.logdate != d1.logdate + Duration::days(1)
            || d3.logdate != d2.logdate + Duration::days(1)
        {
            continue;
        }
        if d1.shift_status == ShiftStatus::A
            && d2.shift_status == ShiftStatus::WO
            && d3.shift_status == ShiftStatus::A
        {
            flips.push((d1.employeeid.clone(), d1.logdate, d2.logdate, d3.logdate));
        }
    }

    if flips.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut flipped = 0u64;
    for (employeeid, day1, day2, day3) in &flips {
        let res = sqlx::query(
            "UPDATE attendance SET shift_status = 'A' \
             WHERE employeeid = ? AND logdate = ? AND shift_status = 'WO'",
        )
        .bind(employeeid)
        .bind(day2)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            continue;
        }

        sqlx::query(
            "INSERT OR IGNORE INTO awo_corrections (employeeid, day1_date, corrected_date, day3_date) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(employeeid)
        .bind(day1)
        .bind(day2)
        .bind(day3)
        .execute(&mut *tx)
        .await?;
        flipped += 1;
    }
    tx.commit().await?;

    log::info!("A-WO-A corrector flipped {flipped} day(s) to A");
    Ok(flipped)
}

/// Re-evaluate recorded corrections: when a neighbour is no longer absent
/// the flip has lost its justification, so the middle day goes back to WO
/// and the audit row is dropped. Returns the number of days reverted.
pub async fn revert_corrections(pool: &Pool<Sqlite>) -> Result<u64, EngineError> {
    let corrections: Vec<AwoCorrection> = sqlx::query_as("SELECT * FROM awo_corrections")
        .fetch_all(pool)
        .await?;

    let mut to_revert: Vec<&AwoCorrection> = Vec::new();
    for correction in &corrections {
        let days: Vec<StatusRow> = sqlx::query_as(
            "SELECT employeeid, logdate, shift_status FROM attendance \
             WHERE employeeid = ? AND logdate IN (?, ?, ?) ORDER BY logdate ASC",
        )
        .bind(&correction.employeeid)
        .bind(correction.day1_date)
        .bind(correction.corrected_date)
        .bind(correction.day3_date)
        .fetch_all(pool)
        .await?;
        if days.len() != 3 {
            continue;
        }

        let status_of = |date: NaiveDate| days.iter().find(|d| d.logdate == date).map(|d| d.shift_status);
        let (Some(s1), Some(s2), Some(s3)) = (
            status_of(correction.day1_date),
            status_of(correction.corrected_date),
            status_of(correction.day3_date),
        ) else {
            continue;
        };

        // Still A means the flip is still in force; revert only when a
        // neighbour moved away from A.
        if s2 == ShiftStatus::A && (s1 != ShiftStatus::A || s3 != ShiftStatus::A) {
            to_revert.push(correction);
        }
    }

    if to_revert.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    for correction in &to_revert {
        sqlx::query("UPDATE attendance SET shift_status = 'WO' WHERE employeeid = ? AND logdate = ?")
            .bind(&correction.employeeid)
            .bind(correction.corrected_date)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM awo_corrections WHERE id = ?")
            .bind(correction.id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    let reverted = to_revert.len() as u64;
    log::info!("A-WO-A reverter restored {reverted} day(s) to WO");
    Ok(reverted)
}
