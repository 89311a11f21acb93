use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Where a punch came from. Device punches resolve their logical direction
/// through the device configuration; manual punches carry it literally.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PunchSource {
    Device,
    Manual,
}

impl PunchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PunchSource::Device => "device",
            PunchSource::Manual => "manual",
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for PunchSource {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for PunchSource {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for PunchSource {
    fn decode(
        value: sqlx::sqlite::SqliteValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let raw = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match raw.as_str() {
            "device" => Ok(PunchSource::Device),
            "manual" => Ok(PunchSource::Manual),
            other => Err(format!("invalid punch source: {}", other).into()),
        }
    }
}

/// Logical direction of a punch once resolved.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PunchDirection {
    In,
    Out,
    Both,
}

impl PunchDirection {
    /// Case-insensitive parse of device/manual direction strings.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "in" => Some(PunchDirection::In),
            "out" => Some(PunchDirection::Out),
            "both" => Some(PunchDirection::Both),
            _ => None,
        }
    }
}

/// A raw device punch as pulled from the external source. `id` is the
/// upstream monotonic id, which ingestion pages and upserts by.
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct Log {
    pub id: i64,
    pub employeeid: String,
    pub log_datetime: DateTime<Utc>,
    pub direction: String,
    pub shortname: Option<String>,
    pub serialno: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct ManualLog {
    pub id: i64,
    pub employeeid: String,
    pub log_datetime: DateTime<Utc>,
    pub direction: String,
    pub shortname: Option<String>,
    pub serialno: Option<String>,
}

/// A row of the unified punch view, merged from `logs` and `manual_logs`.
/// Uniqueness key: (employeeid, log_datetime, direction, source).
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct AllLog {
    pub id: i64,
    pub employeeid: String,
    pub log_datetime: DateTime<Utc>,
    pub direction: String,
    pub shortname: Option<String>,
    pub serialno: Option<String>,
    pub source: PunchSource,
}

#[cfg(test)]
mod tests {
    use super::{PunchDirection, PunchSource};
    use sqlx::sqlite::SqlitePoolOptions;

    #[test]
    fn direction_parse_is_case_insensitive() {
        assert_eq!(PunchDirection::parse("IN"), Some(PunchDirection::In));
        assert_eq!(PunchDirection::parse(" out "), Some(PunchDirection::Out));
        assert_eq!(PunchDirection::parse("Both"), Some(PunchDirection::Both));
        assert_eq!(PunchDirection::parse("sideways"), None);
    }

    #[test]
    fn punch_source_serde_roundtrip() {
        let json = serde_json::to_string(&PunchSource::Device).unwrap();
        assert_eq!(json, "\"device\"");

        let parsed: PunchSource = serde_json::from_str("\"manual\"").unwrap();
        assert_eq!(parsed, PunchSource::Manual);

        assert!(serde_json::from_str::<PunchSource>("\"machine\"").is_err());
    }

    #[tokio::test]
    async fn punch_source_sqlx_roundtrip() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        let value: PunchSource = sqlx::query_scalar("SELECT ?")
            .bind(PunchSource::Manual)
            .fetch_one(&pool)
            .await
            .unwrap();

        assert_eq!(value, PunchSource::Manual);
    }
}
