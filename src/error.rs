use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    EmployeeUnknown,
    DeviceUnconfigured,
    DirectionUndetermined,
    RowLockConflict,
    SourceUnreachable,
    BulkWriteFailed,
    InvariantViolation,
    NotFound,
    Conflict,
    Transient,
    Internal,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl EngineError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn employee_unknown(employee_id: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::EmployeeUnknown,
            format!("employee {} not found", employee_id.into()),
        )
    }

    pub fn device_unconfigured(shortname: &str, serial: &str) -> Self {
        Self::new(
            ErrorCode::DeviceUnconfigured,
            format!("no device configuration for ({shortname}, {serial})"),
        )
    }

    pub fn direction_undetermined(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DirectionUndetermined, message)
    }

    pub fn row_lock_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RowLockConflict, message)
    }

    pub fn source_unreachable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SourceUnreachable, message)
    }

    pub fn bulk_write_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BulkWriteFailed, message)
    }

    pub fn invariant_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvariantViolation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Transient, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self.code, ErrorCode::InvariantViolation)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for EngineError {}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => EngineError::not_found("row not found"),
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() || db_err.is_foreign_key_violation() {
                    EngineError::conflict(db_err.message().to_string())
                } else if db_err.message().contains("database is locked") {
                    EngineError::row_lock_conflict(db_err.message().to_string())
                } else {
                    EngineError::internal(db_err.message().to_string())
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                EngineError::transient("database temporarily unavailable")
            }
            _ => EngineError::internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for EngineError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        EngineError::internal(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::internal(err.to_string())
    }
}

impl From<String> for EngineError {
    fn from(err: String) -> Self {
        EngineError::internal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_code_and_message() {
        let err = EngineError::employee_unknown("K10001");
        assert_eq!(err.code, ErrorCode::EmployeeUnknown);
        assert!(err.message.contains("K10001"));
        assert!(err.details.is_none());
    }

    #[test]
    fn error_serializes_with_snake_case_code() {
        let err = EngineError::device_unconfigured("GATE1", "SN-9");
        let json = serde_json::to_string(&err).expect("serialize EngineError");
        assert!(json.contains("\"code\":\"device_unconfigured\""));
        assert!(json.contains("GATE1"));
    }

    #[test]
    fn sqlx_row_not_found_maps_to_not_found() {
        let err: EngineError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[test]
    fn only_invariant_violation_is_fatal() {
        assert!(EngineError::row_lock_conflict("busy").is_recoverable());
        assert!(!EngineError::invariant_violation("first > last").is_recoverable());
    }
}
