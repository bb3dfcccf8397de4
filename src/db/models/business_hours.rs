use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Open/close times for one weekday at one location. A missing row for a
/// weekday means the location is closed that day, unless the location has
/// no rows at all (see `CalendarService`).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BusinessHours {
    pub id: String,
    pub location_id: String,
    pub weekday: i64,
    pub open_time: NaiveTime,
    pub close_time: NaiveTime,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetBusinessHours {
    pub weekday: i64,
    pub open_time: NaiveTime,
    pub close_time: NaiveTime,
}
