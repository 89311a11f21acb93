use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::punch::PunchSource;

/// Status classification of a derived day.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ShiftStatus {
    /// Present
    P,
    /// Half day
    HD,
    /// Insufficient hours
    IH,
    /// Absent
    A,
    /// Missing punch
    MP,
    /// Weekly off, no work
    WO,
    /// Worked on a weekly off
    WW,
    /// Paid holiday, no work
    PH,
    /// Flexi holiday, no work
    FH,
    /// Worked on a paid holiday
    PW,
    /// Worked on a flexi holiday
    FW,
}

impl ShiftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftStatus::P => "P",
            ShiftStatus::HD => "HD",
            ShiftStatus::IH => "IH",
            ShiftStatus::A => "A",
            ShiftStatus::MP => "MP",
            ShiftStatus::WO => "WO",
            ShiftStatus::WW => "WW",
            ShiftStatus::PH => "PH",
            ShiftStatus::FH => "FH",
            ShiftStatus::PW => "PW",
            ShiftStatus::FW => "FW",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "P" => Some(ShiftStatus::P),
            "HD" => Some(ShiftStatus::HD),
            "IH" => Some(ShiftStatus::IH),
            "A" => Some(ShiftStatus::A),
            "MP" => Some(ShiftStatus::MP),
            "WO" => Some(ShiftStatus::WO),
            "WW" => Some(ShiftStatus::WW),
            "PH" => Some(ShiftStatus::PH),
            "FH" => Some(ShiftStatus::FH),
            "PW" => Some(ShiftStatus::PW),
            "FW" => Some(ShiftStatus::FW),
            _ => None,
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for ShiftStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ShiftStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ShiftStatus {
    fn decode(
        value: sqlx::sqlite::SqliteValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let raw = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        ShiftStatus::parse(&raw).ok_or_else(|| format!("invalid shift status: {}", raw).into())
    }
}

/// The day-keyed attendance aggregate. One row per (employeeid, logdate);
/// a night-shift day is keyed by its shift-start date.
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct Attendance {
    pub id: i64,
    pub employeeid: String,
    pub logdate: NaiveDate,
    pub shift: String,
    pub first_logtime: Option<DateTime<Utc>>,
    pub last_logtime: Option<DateTime<Utc>>,
    pub in_direction: Option<PunchSource>,
    pub out_direction: Option<PunchSource>,
    pub in_shortname: Option<String>,
    pub out_shortname: Option<String>,
    /// Worked span in seconds, after at most one lunch deduction.
    pub total_time: Option<i64>,
    pub late_entry: Option<i64>,
    pub early_exit: Option<i64>,
    pub overtime: Option<i64>,
    pub shift_status: ShiftStatus,
}
