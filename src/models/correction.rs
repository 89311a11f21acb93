use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Audit row for a WO→A flip inside an A,WO,A triple. The reverter pass
/// re-evaluates these and undoes the flip when a neighbour changes.
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct AwoCorrection {
    pub id: i64,
    pub employeeid: String,
    pub day1_date: NaiveDate,
    pub corrected_date: NaiveDate,
    pub day3_date: NaiveDate,
}
