use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;

/// Open the engine database, creating the file on first run. A handful of
/// connections is plenty: the scheduler chain is effectively single-writer.
pub async fn establish_pool(db_path: &Path) -> Result<Pool<Sqlite>, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

pub async fn ensure_mandays_cursor(pool: &Pool<Sqlite>) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO mandays_cursor (id, last_log_id) VALUES (1, 0)")
        .execute(pool)
        .await?;
    Ok(())
}
