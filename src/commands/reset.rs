use sqlx::{Pool, Sqlite};

use crate::config::Config;
use crate::engine::absentees;
use crate::error::EngineError;

/// Tables with AUTOINCREMENT ids whose sequences are worth realigning.
const SEQUENCED_TABLES: &[&str] = &[
    "employees",
    "shifts",
    "manual_logs",
    "all_logs",
    "attendance",
    "mandays",
    "mandays_summary",
    "missed_punches",
    "awo_corrections",
    "holidays",
    "device_configs",
    "external_db_credentials",
];

/// Align every table's id sequence with its current MAX(id), the SQLite
/// rendition of resetting serial sequences after bulk loads.
pub async fn reset_sequences(pool: &Pool<Sqlite>) -> Result<u64, EngineError> {
    let has_sequences: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence'",
    )
    .fetch_one(pool)
    .await?;
    if has_sequences == 0 {
        log::info!("no sqlite_sequence table yet; nothing to reset");
        return Ok(0);
    }

    let mut reset = 0u64;
    for table in SEQUENCED_TABLES {
        let res = sqlx::query(&format!(
            "UPDATE sqlite_sequence SET seq = (SELECT COALESCE(MAX(id), 0) FROM {table}) \
             WHERE name = '{table}'"
        ))
        .execute(pool)
        .await?;
        reset += res.rows_affected();
    }

    log::info!("reset {reset} id sequence(s)");
    Ok(reset)
}

/// Destructive recalculation entry point: wipe every derived table plus the
/// processed-cursor, then re-materialize absentee rows over the full sweep
/// depth. Raw punch stores are untouched; the next scheduler ticks re-derive
/// attendance from them.
pub async fn reset_attendance(pool: &Pool<Sqlite>, config: &Config) -> Result<(), EngineError> {
    log::warn!("reset_attendance: clearing aggregates, cursor, mandays and corrections");

    let mut tx = pool.begin().await?;
    for table in [
        "attendance",
        "processed_logs",
        "mandays",
        "mandays_summary",
        "missed_punches",
        "awo_corrections",
    ] {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query("INSERT OR REPLACE INTO mandays_cursor (id, last_log_id) VALUES (1, 0)")
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    absentees::sweep(pool, config, config.absentee_days).await?;
    Ok(())
}
