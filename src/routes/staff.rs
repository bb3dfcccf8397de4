use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::db::models::Staff;
use crate::db::StaffRepository;
use crate::error::AppResult;
use crate::services::matching::StaffMatcher;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_staff))
        .route("/available", get(find_available))
}

#[derive(Debug, Deserialize)]
pub struct CreateStaffRequest {
    pub organization_id: String,
    pub display_name: String,
}

async fn create_staff(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateStaffRequest>,
) -> AppResult<(StatusCode, Json<Staff>)> {
    let staff =
        StaffRepository::create(&state.db, &request.organization_id, &request.display_name)
            .await?;

    Ok((StatusCode::CREATED, Json(staff)))
}

#[derive(Debug, Deserialize)]
pub struct AvailableStaffQuery {
    pub organization_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location_id: Option<String>,
}

/// Staff who can take the given window: availability covers it, no
/// time off, no conflicting appointment. Ordered by display name.
async fn find_available(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailableStaffQuery>,
) -> AppResult<Json<Vec<Staff>>> {
    let staff = StaffMatcher::find_available_staff(
        &state.db,
        &state.config.scheduling,
        &query.organization_id,
        query.start,
        query.end,
        query.location_id.as_deref(),
    )
    .await?;

    Ok(Json(staff))
}
