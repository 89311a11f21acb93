use sqlx::{Pool, Sqlite};

use crate::error::EngineError;

/// Merge the device and manual punch stores into the unified view. The
/// uniqueness key is (employeeid, log_datetime, direction, source); on
/// conflict only the non-key provenance columns are refreshed.
pub async fn sync_all_logs(pool: &Pool<Sqlite>) -> Result<(u64, u64), EngineError> {
    let device = sqlx::query(
        "INSERT INTO all_logs (employeeid, log_datetime, direction, shortname, serialno, source) \
         SELECT employeeid, log_datetime, direction, shortname, serialno, 'device' FROM logs \
         WHERE true \
         ON CONFLICT (employeeid, log_datetime, direction, source) \
         DO UPDATE SET shortname = excluded.shortname, serialno = excluded.serialno",
    )
    .execute(pool)
    .await?
    .rows_affected();

    let manual = sqlx::query(
        "INSERT INTO all_logs (employeeid, log_datetime, direction, shortname, serialno, source) \
         SELECT employeeid, log_datetime, direction, shortname, serialno, 'manual' FROM manual_logs \
         WHERE true \
         ON CONFLICT (employeeid, log_datetime, direction, source) \
         DO UPDATE SET shortname = excluded.shortname, serialno = excluded.serialno",
    )
    .execute(pool)
    .await?
    .rows_affected();

    log::info!("unified view refreshed: {device} device rows, {manual} manual rows");
    Ok((device, manual))
}
