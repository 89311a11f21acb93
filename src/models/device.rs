use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Direction-of-use of a biometric device, keyed by (shortname, serial).
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct DeviceConfig {
    pub id: i64,
    pub shortname: String,
    pub serial_number: String,
    pub direction_of_use: String,
}
