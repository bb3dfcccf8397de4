use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row per accepted lifecycle transition: who did what, and the
/// before/after status. Written in the same DB transaction as the status
/// change itself.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub appointment_id: String,
    pub actor_id: String,
    pub actor_role: String,
    pub action: String,
    pub previous_status: Option<String>,
    pub new_status: Option<String>,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Actor identity extracted from request headers. Authentication itself is
/// handled upstream; this service only records who acted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Client,
    Staff,
    Admin,
    System,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Client => "client",
            ActorRole::Staff => "staff",
            ActorRole::Admin => "admin",
            ActorRole::System => "system",
        }
    }

    pub fn is_clinic(&self) -> bool {
        matches!(self, ActorRole::Staff | ActorRole::Admin | ActorRole::System)
    }
}
