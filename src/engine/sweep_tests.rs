use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use sqlx::{Pool, Sqlite};

use crate::commands::reset;
use crate::engine::{absentees, corrections, mandays};
use crate::models::attendance::{Attendance, ShiftStatus};
use crate::models::correction::AwoCorrection;
use crate::models::mandays::{MandaysEntry, MandaysSummary, MissedPunch};
use crate::testutil::{test_config, test_pool};

const TZ: Tz = chrono_tz::Asia::Kolkata;

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
}

fn ts(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    TZ.with_ymd_and_hms(2024, 3, day, hour, minute, 0)
        .unwrap()
        .with_timezone(&Utc)
}

async fn insert_employee(pool: &Pool<Sqlite>, employee_id: &str, first_weekly_off: Option<i64>) {
    sqlx::query(
        "INSERT INTO employees (employee_id, first_weekly_off, date_of_joining) \
         VALUES (?, ?, '2024-01-01')",
    )
    .bind(employee_id)
    .bind(first_weekly_off)
    .execute(pool)
    .await
    .unwrap();
}

async fn insert_status(pool: &Pool<Sqlite>, employee_id: &str, logdate: NaiveDate, status: ShiftStatus) {
    sqlx::query("INSERT INTO attendance (employeeid, logdate, shift, shift_status) VALUES (?, ?, '', ?)")
        .bind(employee_id)
        .bind(logdate)
        .bind(status)
        .execute(pool)
        .await
        .unwrap();
}

async fn status_of(pool: &Pool<Sqlite>, employee_id: &str, logdate: NaiveDate) -> Option<ShiftStatus> {
    sqlx::query_as::<_, Attendance>("SELECT * FROM attendance WHERE employeeid = ? AND logdate = ?")
        .bind(employee_id)
        .bind(logdate)
        .fetch_optional(pool)
        .await
        .unwrap()
        .map(|a| a.shift_status)
}

async fn device_log(pool: &Pool<Sqlite>, id: i64, employee: &str, at: DateTime<Utc>) {
    sqlx::query(
        "INSERT INTO logs (id, employeeid, log_datetime, direction, shortname, serialno) \
         VALUES (?, ?, ?, '', 'GATE', 'SN1')",
    )
    .bind(id)
    .bind(employee)
    .bind(at)
    .execute(pool)
    .await
    .unwrap();
}

// --- absentee sweeper ---

#[tokio::test]
async fn sweep_marks_absent_week_off_and_holiday() {
    let pool = test_pool().await;
    let config = test_config();
    // Sunday 2024-03-10 is E1's weekly off; 2024-03-08 is a paid holiday.
    insert_employee(&pool, "E1", Some(6)).await;
    sqlx::query("INSERT INTO holidays (holiday_date, holiday_type) VALUES ('2024-03-08', 'PH')")
        .execute(&pool)
        .await
        .unwrap();

    let inserted = absentees::sweep_from(&pool, &config, date(11), 4).await.unwrap();
    assert_eq!(inserted, 4);

    assert_eq!(status_of(&pool, "E1", date(11)).await, Some(ShiftStatus::A));
    assert_eq!(status_of(&pool, "E1", date(10)).await, Some(ShiftStatus::WO));
    assert_eq!(status_of(&pool, "E1", date(9)).await, Some(ShiftStatus::A));
    assert_eq!(status_of(&pool, "E1", date(8)).await, Some(ShiftStatus::PH));
}

#[tokio::test]
async fn sweep_is_idempotent_and_never_overwrites() {
    let pool = test_pool().await;
    let config = test_config();
    insert_employee(&pool, "E1", None).await;
    insert_status(&pool, "E1", date(10), ShiftStatus::P).await;

    let first = absentees::sweep_from(&pool, &config, date(11), 3).await.unwrap();
    assert_eq!(first, 2); // the 10th already has a row

    let second = absentees::sweep_from(&pool, &config, date(11), 3).await.unwrap();
    assert_eq!(second, 0);

    // The processed day kept its status.
    assert_eq!(status_of(&pool, "E1", date(10)).await, Some(ShiftStatus::P));
}

#[tokio::test]
async fn sweep_respects_the_employment_window() {
    let pool = test_pool().await;
    let config = test_config();
    sqlx::query(
        "INSERT INTO employees (employee_id, date_of_joining, date_of_leaving) \
         VALUES ('E2', '2024-03-10', '2024-03-10')",
    )
    .execute(&pool)
    .await
    .unwrap();

    absentees::sweep_from(&pool, &config, date(11), 3).await.unwrap();

    assert_eq!(status_of(&pool, "E2", date(9)).await, None);
    assert_eq!(status_of(&pool, "E2", date(10)).await, Some(ShiftStatus::A));
    assert_eq!(status_of(&pool, "E2", date(11)).await, None);
}

#[tokio::test]
async fn sweep_uses_default_week_off_when_unassigned() {
    let pool = test_pool().await;
    let config = test_config(); // default week off: Sunday
    insert_employee(&pool, "E3", None).await;

    absentees::sweep_from(&pool, &config, date(10), 1).await.unwrap();
    assert_eq!(status_of(&pool, "E3", date(10)).await, Some(ShiftStatus::WO));
}

// --- A-WO-A corrector and reverter ---

#[tokio::test]
async fn corrector_flips_the_middle_of_a_wo_a() {
    let pool = test_pool().await;
    insert_employee(&pool, "E1", None).await;
    insert_status(&pool, "E1", date(11), ShiftStatus::A).await;
    insert_status(&pool, "E1", date(12), ShiftStatus::WO).await;
    insert_status(&pool, "E1", date(13), ShiftStatus::A).await;

    let flipped = corrections::correct_a_wo_a(&pool).await.unwrap();
    assert_eq!(flipped, 1);
    assert_eq!(status_of(&pool, "E1", date(12)).await, Some(ShiftStatus::A));

    let audit: Vec<AwoCorrection> = sqlx::query_as("SELECT * FROM awo_corrections")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].corrected_date, date(12));

    // Re-running finds nothing new.
    assert_eq!(corrections::correct_a_wo_a(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn corrector_ignores_gaps_and_other_employees() {
    let pool = test_pool().await;
    // Non-consecutive dates for E1; the triple spans two employees below.
    insert_status(&pool, "E1", date(11), ShiftStatus::A).await;
    insert_status(&pool, "E1", date(13), ShiftStatus::WO).await;
    insert_status(&pool, "E1", date(14), ShiftStatus::A).await;
    insert_status(&pool, "E2", date(12), ShiftStatus::WO).await;

    assert_eq!(corrections::correct_a_wo_a(&pool).await.unwrap(), 0);
    assert_eq!(status_of(&pool, "E1", date(13)).await, Some(ShiftStatus::WO));
}

#[tokio::test]
async fn reverter_restores_wo_only_when_a_neighbour_changed() {
    let pool = test_pool().await;
    insert_status(&pool, "E1", date(11), ShiftStatus::A).await;
    insert_status(&pool, "E1", date(12), ShiftStatus::WO).await;
    insert_status(&pool, "E1", date(13), ShiftStatus::A).await;
    corrections::correct_a_wo_a(&pool).await.unwrap();

    // Neighbours unchanged: nothing reverts.
    assert_eq!(corrections::revert_corrections(&pool).await.unwrap(), 0);
    assert_eq!(status_of(&pool, "E1", date(12)).await, Some(ShiftStatus::A));

    // A late punch turned day 3 into a present day.
    sqlx::query("UPDATE attendance SET shift_status = 'P' WHERE employeeid = 'E1' AND logdate = ?")
        .bind(date(13))
        .execute(&pool)
        .await
        .unwrap();

    assert_eq!(corrections::revert_corrections(&pool).await.unwrap(), 1);
    assert_eq!(status_of(&pool, "E1", date(12)).await, Some(ShiftStatus::WO));

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM awo_corrections")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

// --- mandays engine ---

#[tokio::test]
async fn mandays_pairs_punches_and_sums_the_day() {
    let pool = test_pool().await;
    let config = test_config();
    device_log(&pool, 1, "E1", ts(11, 9, 0)).await;
    device_log(&pool, 2, "E1", ts(11, 12, 0)).await;
    device_log(&pool, 3, "E1", ts(11, 13, 0)).await;
    device_log(&pool, 4, "E1", ts(11, 18, 0)).await;

    let rebuilt = mandays::run_from(&pool, &config, date(11)).await.unwrap();
    assert_eq!(rebuilt, 1);

    let entries: Vec<MandaysEntry> =
        sqlx::query_as("SELECT * FROM mandays ORDER BY slot ASC")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].slot, 1);
    assert_eq!(entries[0].duty_in, ts(11, 9, 0));
    assert_eq!(entries[0].duty_out, Some(ts(11, 12, 0)));
    assert_eq!(entries[0].total_time, Some(3 * 3600));
    assert_eq!(entries[1].total_time, Some(5 * 3600));

    let summary: MandaysSummary = sqlx::query_as("SELECT * FROM mandays_summary")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(summary.pair_count, 2);
    assert_eq!(summary.total_hours_worked, 8 * 3600);
}

#[tokio::test]
async fn mandays_records_an_unpaired_trailing_punch() {
    let pool = test_pool().await;
    let config = test_config();
    device_log(&pool, 1, "E1", ts(11, 9, 0)).await;
    device_log(&pool, 2, "E1", ts(11, 12, 0)).await;
    device_log(&pool, 3, "E1", ts(11, 13, 0)).await;

    mandays::run_from(&pool, &config, date(11)).await.unwrap();

    let missed: Vec<MissedPunch> = sqlx::query_as("SELECT * FROM missed_punches")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(missed.len(), 1);
    assert_eq!(missed[0].punch_time, ts(11, 13, 0));
}

#[tokio::test]
async fn mandays_cursor_makes_reruns_incremental() {
    let pool = test_pool().await;
    let config = test_config();
    device_log(&pool, 1, "E1", ts(11, 9, 0)).await;
    device_log(&pool, 2, "E1", ts(11, 18, 0)).await;

    assert_eq!(mandays::run_from(&pool, &config, date(11)).await.unwrap(), 1);
    // Nothing new: nothing rebuilt.
    assert_eq!(mandays::run_from(&pool, &config, date(11)).await.unwrap(), 0);

    // A late punch for the same day triggers exactly one rebuild.
    device_log(&pool, 3, "E1", ts(11, 19, 0)).await;
    assert_eq!(mandays::run_from(&pool, &config, date(11)).await.unwrap(), 1);

    let summary: MandaysSummary = sqlx::query_as("SELECT * FROM mandays_summary")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(summary.pair_count, 1);
    let missed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM missed_punches")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(missed, 1);
}

#[tokio::test]
async fn mandays_reset_rewinds_or_wipes_by_history_depth() {
    let pool = test_pool().await;
    let config = test_config();
    device_log(&pool, 1, "E1", ts(11, 9, 0)).await;
    device_log(&pool, 2, "E1", ts(11, 18, 0)).await;
    mandays::run_from(&pool, &config, date(11)).await.unwrap();

    // Barely any history: full reset.
    mandays::reset_from(&pool, &config, date(12)).await.unwrap();
    let cursor: i64 = sqlx::query_scalar("SELECT last_log_id FROM mandays_cursor WHERE id = 1")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(cursor, 0);
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mandays").fetch_one(&pool).await.unwrap();
    assert_eq!(rows, 0);

    // With a window's worth of history, the cursor rewinds to just before
    // the window and only the window's rows are cleared.
    mandays::run_from(&pool, &config, date(11)).await.unwrap();
    let today = date(11) + chrono::Duration::days(config.mandays_window_days + 5);
    mandays::reset_from(&pool, &config, today).await.unwrap();
    let cursor: i64 = sqlx::query_scalar("SELECT last_log_id FROM mandays_cursor WHERE id = 1")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(cursor, 2);
}

// --- resets ---

#[tokio::test]
async fn reset_attendance_clears_derived_state_and_resweeps() {
    let pool = test_pool().await;
    let mut config = test_config();
    config.absentee_days = 2;
    insert_employee(&pool, "E1", None).await;
    insert_status(&pool, "E1", date(1), ShiftStatus::P).await;
    sqlx::query("INSERT INTO processed_logs (id) VALUES (7)")
        .execute(&pool)
        .await
        .unwrap();
    device_log(&pool, 1, "E1", ts(1, 9, 0)).await;
    device_log(&pool, 2, "E1", ts(1, 18, 0)).await;
    mandays::run_from(&pool, &config, date(1)).await.unwrap();

    reset::reset_attendance(&pool, &config).await.unwrap();

    let processed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_logs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(processed, 0);
    let pairs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mandays").fetch_one(&pool).await.unwrap();
    assert_eq!(pairs, 0);
    assert_eq!(status_of(&pool, "E1", date(1)).await, None);

    // The resweep repopulated the trailing window.
    let swept: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attendance")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(swept, config.absentee_days);
}

#[tokio::test]
async fn reset_sequences_aligns_with_max_ids() {
    let pool = test_pool().await;
    insert_employee(&pool, "E1", None).await;
    insert_employee(&pool, "E2", None).await;

    // Should not fail whether or not sqlite_sequence has rows yet.
    reset::reset_sequences(&pool).await.unwrap();

    let seq: Option<i64> =
        sqlx::query_scalar("SELECT seq FROM sqlite_sequence WHERE name = 'employees'")
            .fetch_optional(&pool)
            .await
            .unwrap();
    if let Some(seq) = seq {
        assert_eq!(seq, 2);
    }
}
