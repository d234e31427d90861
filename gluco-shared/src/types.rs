use std::fmt;

use serde::{Deserialize, Serialize};

/// Summary schema version currently written by the engine. A stored summary
/// with any other version is rebuilt from scratch on its next update.
pub const SUMMARY_SCHEMA_VERSION: i32 = 4;

pub const OUTDATED_REASON_DATA_ADDED: &str = "DATA_ADDED";
pub const OUTDATED_REASON_UPLOAD_COMPLETED: &str = "UPLOAD_COMPLETED";
pub const OUTDATED_REASON_SCHEMA_MIGRATION: &str = "SCHEMA_MIGRATION";
pub const OUTDATED_REASON_BACKFILL: &str = "BACKFILL";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SummaryKind {
    Cgm,
    Bgm,
    Con,
}

impl SummaryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryKind::Cgm => "cgm",
            SummaryKind::Bgm => "bgm",
            SummaryKind::Con => "con",
        }
    }
}

impl fmt::Display for SummaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDataType {
    Cbg,
    Smbg,
}

impl DeviceDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceDataType::Cbg => "cbg",
            DeviceDataType::Smbg => "smbg",
        }
    }
}

impl fmt::Display for DeviceDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
