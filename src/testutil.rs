use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};

use crate::config::Config;

/// Fixed settings for tests: IST timezone, Sunday default week-off.
pub fn test_config() -> Config {
    Config {
        database_path: std::path::PathBuf::from(":memory:"),
        timezone: chrono_tz::Asia::Kolkata,
        tick_secs: 60,
        monitor_secs: 300,
        batch_size: 5000,
        default_week_off: vec![6],
        absentee_days: 400,
        mandays_window_days: 100,
    }
}

/// In-memory database with the full schema applied, for engine tests.
pub async fn test_pool() -> Pool<Sqlite> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect in-memory sqlite");

    let schema = include_str!("db/migrations/001_initial.sql");
    // Split by ; and execute to ensure all statements run
    for statement in schema.split(';') {
        if !statement.trim().is_empty() {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .expect("apply schema statement");
        }
    }

    pool
}
