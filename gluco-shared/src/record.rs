use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::DeviceDataType;

/// A validated, unit-normalized device reading as handed over by the data
/// platform. Validation and unit conversion happen upstream; the engine only
/// ever sees mmol/L values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub data_type: DeviceDataType,
    pub upload_id: String,
    /// Device-reported reading time.
    pub time: DateTime<Utc>,
    /// Platform receipt time. Realtime/deferred classification keys on the
    /// gap between this and `time`.
    pub created_time: DateTime<Utc>,
    pub modified_time: DateTime<Utc>,
    /// Reading in mmol/L.
    pub value: f64,
    /// Sensor reporting interval in minutes; absent for fingerstick meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_interval_minutes: Option<i64>,
}

impl DeviceRecord {
    pub fn new(
        user_id: &str,
        data_type: DeviceDataType,
        upload_id: &str,
        time: DateTime<Utc>,
        value: f64,
    ) -> Self {
        DeviceRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            data_type,
            upload_id: upload_id.to_string(),
            time,
            created_time: time,
            modified_time: time,
            value,
            sample_interval_minutes: match data_type {
                DeviceDataType::Cbg => Some(5),
                DeviceDataType::Smbg => None,
            },
        }
    }

    /// Minutes of coverage this reading represents, when the device reports
    /// at a known interval.
    pub fn duration_minutes(&self) -> Option<i64> {
        self.sample_interval_minutes
    }
}

/// The upload (data set) a record originated from. Only the continuity flag
/// matters to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadDataSet {
    pub id: String,
    pub is_continuous: bool,
}
