use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    /// IANA timezone identifier, e.g. "Europe/Istanbul". All wall-clock
    /// comparisons for this location happen in this zone.
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
