use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::db::models::*;
use crate::db::{AppointmentRepository, AuditLogRepository, TransactionRepository};
use crate::error::{AppError, AppResult};
use crate::routes::ActorIdentity;
use crate::services::lifecycle::{BookingOutcome, LifecycleService, TransitionOutcome};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(book).get(search))
        .route("/:id", get(get_appointment).patch(update))
        .route("/:id/confirm-payment", post(confirm_payment))
        .route("/:id/request-cancellation", post(request_cancellation))
        .route("/:id/cancel", post(cancel))
        .route("/:id/process-cancellation", post(process_cancellation))
        .route("/:id/complete", post(complete))
        .route("/:id/audit", get(audit_trail))
        .route("/:id/transactions", get(transactions))
}

async fn book(
    State(state): State<Arc<AppState>>,
    ActorIdentity(actor): ActorIdentity,
    Json(request): Json<BookAppointmentRequest>,
) -> AppResult<(StatusCode, Json<BookingOutcome>)> {
    let outcome = LifecycleService::book(&state, &actor, request).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn get_appointment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Appointment>> {
    let appointment = AppointmentRepository::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("appointment {id}")))?;

    Ok(Json(appointment))
}

async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AppointmentSearchQuery>,
) -> AppResult<Json<Vec<Appointment>>> {
    let appointments = AppointmentRepository::search(&state.db, &query).await?;
    Ok(Json(appointments))
}

/// Notes/archive edits and reschedules share one endpoint. A reschedule
/// requires both bounds and runs through the conflict check.
async fn update(
    State(state): State<Arc<AppState>>,
    ActorIdentity(actor): ActorIdentity,
    Path(id): Path<String>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> AppResult<Json<Appointment>> {
    match (request.reschedule_start, request.reschedule_end) {
        (Some(start), Some(end)) => {
            LifecycleService::reschedule(&state, &actor, &id, start, end).await?;
        }
        (None, None) => {}
        _ => {
            return Err(AppError::BadRequest(
                "reschedule requires both start and end".to_string(),
            ));
        }
    }

    let appointment = AppointmentRepository::update_details(
        &state.db,
        &id,
        request.notes.as_deref(),
        request.private_notes.as_deref(),
        request.archived,
    )
    .await?
    .ok_or_else(|| AppError::NotFound(format!("appointment {id}")))?;

    Ok(Json(appointment))
}

async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    ActorIdentity(actor): ActorIdentity,
    Path(id): Path<String>,
) -> AppResult<Json<TransitionOutcome>> {
    let outcome = LifecycleService::confirm_payment(&state, &actor, &id).await?;
    Ok(Json(outcome))
}

async fn request_cancellation(
    State(state): State<Arc<AppState>>,
    ActorIdentity(actor): ActorIdentity,
    Path(id): Path<String>,
) -> AppResult<Json<TransitionOutcome>> {
    let outcome = LifecycleService::request_cancellation(&state, &actor, &id).await?;
    Ok(Json(outcome))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    ActorIdentity(actor): ActorIdentity,
    Path(id): Path<String>,
    Json(request): Json<CancelAppointmentRequest>,
) -> AppResult<Json<TransitionOutcome>> {
    let outcome = LifecycleService::cancel(&state, &actor, &id, request).await?;
    Ok(Json(outcome))
}

async fn process_cancellation(
    State(state): State<Arc<AppState>>,
    ActorIdentity(actor): ActorIdentity,
    Path(id): Path<String>,
    Json(request): Json<ProcessCancellationRequest>,
) -> AppResult<Json<TransitionOutcome>> {
    if !actor.role.is_clinic() {
        return Err(AppError::BadRequest(
            "processing a cancellation is a clinic action".to_string(),
        ));
    }

    let outcome = LifecycleService::process_cancellation(&state, &actor, &id, request).await?;
    Ok(Json(outcome))
}

async fn complete(
    State(state): State<Arc<AppState>>,
    ActorIdentity(actor): ActorIdentity,
    Path(id): Path<String>,
    Json(request): Json<CompleteAppointmentRequest>,
) -> AppResult<Json<TransitionOutcome>> {
    if !actor.role.is_clinic() {
        return Err(AppError::BadRequest(
            "completing an appointment is a clinic action".to_string(),
        ));
    }

    let outcome = LifecycleService::complete(&state, &actor, &id, request).await?;
    Ok(Json(outcome))
}

async fn audit_trail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<AuditLogEntry>>> {
    let entries = AuditLogRepository::find_for_appointment(&state.db, &id).await?;
    Ok(Json(entries))
}

async fn transactions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<Transaction>>> {
    let transactions = TransactionRepository::find_for_appointment(&state.db, &id).await?;
    Ok(Json(transactions))
}
