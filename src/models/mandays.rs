use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One duty pair of a day. `slot` runs 1..=10 in punch order; an open pair
/// has `duty_out` and `total_time` unset.
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct MandaysEntry {
    pub id: i64,
    pub employeeid: String,
    pub logdate: NaiveDate,
    pub slot: i64,
    pub duty_in: DateTime<Utc>,
    pub duty_out: Option<DateTime<Utc>>,
    pub total_time: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct MandaysSummary {
    pub id: i64,
    pub employeeid: String,
    pub logdate: NaiveDate,
    pub pair_count: i64,
    pub total_hours_worked: i64,
}

/// An unpaired trailing IN punch, recorded beside the duty pairs.
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct MissedPunch {
    pub id: i64,
    pub employeeid: String,
    pub logdate: NaiveDate,
    pub punch_time: DateTime<Utc>,
}
