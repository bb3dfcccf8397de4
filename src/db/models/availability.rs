use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A recurring weekly interval during which a staff member may be booked.
/// Times are wall-clock in the owning location's timezone; weekday 0 is
/// Sunday. Multiple non-overlapping windows per staff per day are allowed
/// (split shifts).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: String,
    pub staff_id: String,
    pub weekday: i64,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub recurring: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAvailabilityWindow {
    pub staff_id: String,
    pub weekday: i64,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default = "default_recurring")]
    pub recurring: bool,
}

fn default_recurring() -> bool {
    true
}

/// A specific calendar date on which a staff member is unavailable for the
/// whole day, overriding their recurring windows.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TimeOff {
    pub id: String,
    pub staff_id: String,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
}
