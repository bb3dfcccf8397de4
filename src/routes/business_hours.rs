use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::db::models::{BusinessHours, Location, SetBusinessHours};
use crate::db::{BusinessHoursRepository, LocationRepository};
use crate::error::{AppError, AppResult};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_location))
        .route("/:id", get(get_location))
        .route(
            "/:id/business-hours",
            get(get_business_hours).put(set_business_hours),
        )
}

#[derive(Debug, Deserialize)]
pub struct CreateLocationRequest {
    pub organization_id: String,
    pub name: String,
    /// IANA zone name, e.g. "Europe/Istanbul".
    pub timezone: String,
}

async fn create_location(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateLocationRequest>,
) -> AppResult<(StatusCode, Json<Location>)> {
    if request.timezone.parse::<chrono_tz::Tz>().is_err() {
        return Err(AppError::Validation(format!(
            "unknown timezone: {}",
            request.timezone
        )));
    }

    let location = LocationRepository::create(
        &state.db,
        &request.organization_id,
        &request.name,
        &request.timezone,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(location)))
}

async fn get_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Location>> {
    let location = LocationRepository::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("location {id}")))?;

    Ok(Json(location))
}

async fn get_business_hours(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<BusinessHours>>> {
    let hours = BusinessHoursRepository::find_for_location(&state.db, &id).await?;
    Ok(Json(hours))
}

/// Replace the full weekly schedule. Weekdays absent from the body become
/// closed days.
async fn set_business_hours(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(entries): Json<Vec<SetBusinessHours>>,
) -> AppResult<Json<Vec<BusinessHours>>> {
    LocationRepository::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("location {id}")))?;

    let hours = BusinessHoursRepository::replace_for_location(&state.db, &id, entries).await?;
    Ok(Json(hours))
}
