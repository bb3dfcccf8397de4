use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde_json::json;

use crate::db::models::{AvailabilityWindow, CreateAvailabilityWindow, TimeOff};
use crate::db::AvailabilityRepository;
use crate::error::{AppError, AppResult};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/windows", post(create_window))
        .route("/windows/:id", delete(delete_window))
        .route("/staff/:staff_id/windows", get(list_windows))
        .route(
            "/staff/:staff_id/time-off",
            get(list_time_off).post(add_time_off),
        )
        .route("/staff/:staff_id/time-off/:date", delete(remove_time_off))
}

async fn create_window(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateAvailabilityWindow>,
) -> AppResult<(StatusCode, Json<AvailabilityWindow>)> {
    let window = AvailabilityRepository::create_window(&state.db, request).await?;
    Ok((StatusCode::CREATED, Json(window)))
}

async fn delete_window(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    if !AvailabilityRepository::delete_window(&state.db, &id).await? {
        return Err(AppError::NotFound(format!("availability window {id}")));
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn list_windows(
    State(state): State<Arc<AppState>>,
    Path(staff_id): Path<String>,
) -> AppResult<Json<Vec<AvailabilityWindow>>> {
    let windows = AvailabilityRepository::find_windows_for_staff(&state.db, &staff_id).await?;
    Ok(Json(windows))
}

async fn list_time_off(
    State(state): State<Arc<AppState>>,
    Path(staff_id): Path<String>,
) -> AppResult<Json<Vec<TimeOff>>> {
    let entries = AvailabilityRepository::list_time_off(&state.db, &staff_id).await?;
    Ok(Json(entries))
}

#[derive(Debug, serde::Deserialize)]
pub struct AddTimeOffRequest {
    pub date: NaiveDate,
}

/// Adding the same date twice is a no-op rather than an error.
async fn add_time_off(
    State(state): State<Arc<AppState>>,
    Path(staff_id): Path<String>,
    Json(request): Json<AddTimeOffRequest>,
) -> AppResult<(StatusCode, Json<TimeOff>)> {
    let entry = AvailabilityRepository::add_time_off(&state.db, &staff_id, request.date).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn remove_time_off(
    State(state): State<Arc<AppState>>,
    Path((staff_id, date)): Path<(String, NaiveDate)>,
) -> AppResult<Json<serde_json::Value>> {
    let removed = AvailabilityRepository::remove_time_off(&state.db, &staff_id, date).await?;
    Ok(Json(json!({ "removed": removed })))
}
