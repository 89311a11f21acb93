use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Kind of upstream the punch store is pulled from.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ExternalDbKind {
    #[serde(rename = "MS_SQL")]
    MsSql,
    #[serde(rename = "POSTGRESQL")]
    Postgresql,
}

impl ExternalDbKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalDbKind::MsSql => "MS_SQL",
            ExternalDbKind::Postgresql => "POSTGRESQL",
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for ExternalDbKind {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ExternalDbKind {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ExternalDbKind {
    fn decode(
        value: sqlx::sqlite::SqliteValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let raw = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match raw.as_str() {
            "MS_SQL" => Ok(ExternalDbKind::MsSql),
            "POSTGRESQL" => Ok(ExternalDbKind::Postgresql),
            other => Err(format!("invalid external database type: {}", other).into()),
        }
    }
}

/// The single credential record describing the upstream punch table: where
/// it lives and how its columns map onto ours.
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct ExternalDbCredential {
    pub id: i64,
    pub database_type: ExternalDbKind,
    pub host: String,
    pub port: i64,
    pub username: String,
    pub password: String,
    pub name: String,
    pub table_name: String,
    pub id_field: String,
    pub employeeid_field: String,
    pub direction_field: String,
    pub shortname_field: String,
    pub serialno_field: String,
    pub log_datetime_field: String,
}

impl ExternalDbCredential {
    /// The mapped upstream column names, in select order.
    pub fn mapped_fields(&self) -> [&str; 6] {
        [
            &self.id_field,
            &self.employeeid_field,
            &self.direction_field,
            &self.shortname_field,
            &self.serialno_field,
            &self.log_datetime_field,
        ]
    }
}
