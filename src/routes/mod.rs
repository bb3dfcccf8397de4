pub mod appointments;
pub mod availability;
pub mod business_hours;
pub mod health;
pub mod slots;
pub mod staff;

use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::db::models::{Actor, ActorRole};
use crate::error::AppError;
use crate::AppState;

// ============================================================================
// Actor Extractor
// ============================================================================

/// Extracts the acting identity from `X-Actor-Id` / `X-Actor-Role` headers.
/// Authentication happens upstream at the gateway; these headers carry the
/// already-verified identity so transitions can be attributed in the audit
/// trail.
pub struct ActorIdentity(pub Actor);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ActorIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-actor-id")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                tracing::debug!("Missing X-Actor-Id header");
                AppError::BadRequest("missing X-Actor-Id header".to_string())
            })?;

        let role = parts
            .headers
            .get("x-actor-role")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::BadRequest("missing X-Actor-Role header".to_string()))?;

        let role = match role.trim().to_ascii_lowercase().as_str() {
            "client" => ActorRole::Client,
            "staff" => ActorRole::Staff,
            "admin" => ActorRole::Admin,
            "system" => ActorRole::System,
            other => {
                return Err(AppError::BadRequest(format!(
                    "unknown actor role: {other}"
                )));
            }
        };

        Ok(ActorIdentity(Actor {
            id: id.to_string(),
            role,
        }))
    }
}
