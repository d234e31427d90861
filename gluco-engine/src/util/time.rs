use chrono::Utc;
use mongodb::bson::DateTime;

pub const MILLIS_PER_MINUTE: i64 = 60_000;
pub const MILLIS_PER_HOUR: i64 = 3_600_000;
pub const MILLIS_PER_DAY: i64 = 86_400_000;

pub fn to_bson(time: chrono::DateTime<Utc>) -> DateTime {
    DateTime::from_millis(time.timestamp_millis())
}

pub fn to_chrono(time: DateTime) -> chrono::DateTime<Utc> {
    chrono::DateTime::from_timestamp_millis(time.timestamp_millis()).unwrap_or_default()
}

/// Truncate to the start of the UTC hour containing `time`.
pub fn truncate_hour(time: DateTime) -> DateTime {
    let millis = time.timestamp_millis();
    DateTime::from_millis(millis - millis.rem_euclid(MILLIS_PER_HOUR))
}

/// Truncate to UTC midnight of the day containing `time`.
pub fn truncate_day_millis(millis: i64) -> i64 {
    millis - millis.rem_euclid(MILLIS_PER_DAY)
}
