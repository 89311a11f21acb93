use std::collections::HashMap;

use crate::error::EngineError;
use crate::models::punch::{AllLog, PunchDirection, PunchSource};

/// Resolve the logical direction of a punch. Manual punches carry it
/// literally; device punches go through the device configuration keyed by
/// (shortname, serial number).
pub fn resolve(
    device_configs: &HashMap<(String, String), String>,
    punch: &AllLog,
) -> Result<PunchDirection, EngineError> {
    match punch.source {
        PunchSource::Manual => PunchDirection::parse(&punch.direction).ok_or_else(|| {
            EngineError::direction_undetermined(format!(
                "manual punch {} has direction '{}'",
                punch.id, punch.direction
            ))
        }),
        PunchSource::Device => {
            let shortname = punch.shortname.clone().unwrap_or_default();
            let serialno = punch.serialno.clone().unwrap_or_default();
            let configured = device_configs
                .get(&(shortname.clone(), serialno.clone()))
                .ok_or_else(|| EngineError::device_unconfigured(&shortname, &serialno))?;
            PunchDirection::parse(configured).ok_or_else(|| {
                EngineError::direction_undetermined(format!(
                    "device ({shortname}, {serialno}) is configured as '{configured}'"
                ))
            })
        }
    }
}
