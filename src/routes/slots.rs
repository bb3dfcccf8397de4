use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::AppResult;
use crate::services::slots::{Slot, SlotGenerator};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_slots))
}

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub staff_id: String,
    pub location_id: String,
    pub date: NaiveDate,
    /// Overrides the configured slot interval for this query.
    pub interval_minutes: Option<i64>,
}

/// Bookable slot grid for one staff member at one location on one date.
/// Times are wall-clock in the location's timezone alongside the absolute
/// UTC instant.
async fn list_slots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlotQuery>,
) -> AppResult<Json<Vec<Slot>>> {
    let slots = SlotGenerator::generate(
        &state.db,
        &state.config.scheduling,
        &query.staff_id,
        &query.location_id,
        query.date,
        query.interval_minutes,
    )
    .await?;

    Ok(Json(slots))
}
