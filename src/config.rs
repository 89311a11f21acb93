use std::path::PathBuf;
use std::str::FromStr;

use chrono_tz::Tz;

use crate::error::EngineError;

const DEFAULT_TZ: &str = "Asia/Kolkata";
const DEFAULT_TICK_SECS: u64 = 60;
const DEFAULT_MONITOR_SECS: u64 = 300;
const DEFAULT_BATCH_SIZE: i64 = 5000;
const DEFAULT_ABSENTEE_DAYS: i64 = 400;
const DEFAULT_MANDAYS_WINDOW_DAYS: i64 = 100;

/// Runtime settings, resolved once at startup and passed explicitly into
/// every component that needs them.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub timezone: Tz,
    pub tick_secs: u64,
    pub monitor_secs: u64,
    pub batch_size: i64,
    /// Weekday indices (0=Monday .. 6=Sunday) used when an employee has no
    /// weekly-off of their own.
    pub default_week_off: Vec<u32>,
    pub absentee_days: i64,
    pub mandays_window_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, EngineError> {
        let database_path = match std::env::var("PUNCHCARD_DB") {
            Ok(p) => PathBuf::from(p),
            Err(_) => default_database_path(),
        };

        let tz_name = std::env::var("PUNCHCARD_TZ").unwrap_or_else(|_| DEFAULT_TZ.to_string());
        let timezone = Tz::from_str(&tz_name)
            .map_err(|_| EngineError::internal(format!("invalid PUNCHCARD_TZ: {tz_name}")))?;

        let default_week_off = match std::env::var("PUNCHCARD_DEFAULT_WEEK_OFF") {
            Ok(raw) => parse_week_off(&raw)?,
            Err(_) => vec![6],
        };

        Ok(Self {
            database_path,
            timezone,
            tick_secs: env_u64("PUNCHCARD_TICK_SECS", DEFAULT_TICK_SECS),
            monitor_secs: env_u64("PUNCHCARD_MONITOR_SECS", DEFAULT_MONITOR_SECS),
            batch_size: env_u64("PUNCHCARD_BATCH_SIZE", DEFAULT_BATCH_SIZE as u64) as i64,
            default_week_off,
            absentee_days: DEFAULT_ABSENTEE_DAYS,
            mandays_window_days: DEFAULT_MANDAYS_WINDOW_DAYS,
        })
    }

    /// Lock file guarding the scheduler chain, kept beside the database so
    /// every process of the same deployment agrees on it.
    pub fn lock_file_path(&self) -> PathBuf {
        self.database_path.with_extension("lock")
    }
}

fn default_database_path() -> PathBuf {
    let mut dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("punchcard");
    dir.push("punchcard.sqlite");
    dir
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_week_off(raw: &str) -> Result<Vec<u32>, EngineError> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .ok()
                .filter(|d| *d <= 6)
                .ok_or_else(|| {
                    EngineError::internal(format!("invalid weekday index in PUNCHCARD_DEFAULT_WEEK_OFF: {s}"))
                })
        })
        .collect()
}
