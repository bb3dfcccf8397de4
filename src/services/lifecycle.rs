use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqlitePool};
use tracing::{info, warn};

use crate::db::models::*;
use crate::db::repository::appointment::new_appointment;
use crate::db::{
    AppointmentRepository, AuditLogRepository, AvailabilityRepository, LocationRepository,
    StaffRepository, TransactionRepository,
};
use crate::error::{AppError, AppResult};
use crate::services::calendar::{location_tz, weekday_index, CalendarService, DayHours};
use crate::services::conflict::{conflicts_with_any, ConflictDetector};
use crate::services::matching::window_contains_range;
use crate::services::notifications::try_notify;
use crate::services::rewards::RewardService;
use crate::AppState;

/// Outcome of a booking request. `payment` carries the client secret the
/// caller needs to complete the deposit when one is required.
#[derive(Debug, Serialize)]
pub struct BookingOutcome {
    pub appointment: Appointment,
    pub payment: Option<PaymentInstruction>,
    pub notification_sent: bool,
}

#[derive(Debug, Serialize)]
pub struct PaymentInstruction {
    pub charge_id: String,
    pub client_secret: String,
}

#[derive(Debug, Serialize)]
pub struct TransitionOutcome {
    pub appointment: Appointment,
    pub notification_sent: bool,
}

/// Valid next statuses for each state.
///
/// pending    -> scheduled | canceled | cancellation_requested
/// scheduled  -> completed | canceled | cancellation_requested
/// cancellation_requested -> canceled (approve) | scheduled (deny)
/// completed, canceled    -> (terminal)
pub fn valid_transitions(current: AppointmentStatus) -> &'static [AppointmentStatus] {
    match current {
        AppointmentStatus::Pending => &[
            AppointmentStatus::Scheduled,
            AppointmentStatus::Canceled,
            AppointmentStatus::CancellationRequested,
        ],
        AppointmentStatus::Scheduled => &[
            AppointmentStatus::Completed,
            AppointmentStatus::Canceled,
            AppointmentStatus::CancellationRequested,
        ],
        AppointmentStatus::CancellationRequested => {
            &[AppointmentStatus::Canceled, AppointmentStatus::Scheduled]
        }
        AppointmentStatus::Completed | AppointmentStatus::Canceled => &[],
    }
}

pub fn validate_transition(
    current: AppointmentStatus,
    next: AppointmentStatus,
) -> AppResult<()> {
    if valid_transitions(current).contains(&next) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition(format!("{current} -> {next}")))
    }
}

/// Appointment lifecycle manager: booking, payment confirmation, the
/// cancellation-approval workflow, completion, and the audit trail. Every
/// status write happens inside an immediate (write-locking) transaction
/// together with its audit entry, and the booking conflict check runs in
/// that same transaction so concurrent requests cannot both pass it.
pub struct LifecycleService;

impl LifecycleService {
    // ------------------------------------------------------------------
    // Booking
    // ------------------------------------------------------------------

    pub async fn book(
        state: &AppState,
        actor: &Actor,
        request: BookAppointmentRequest,
    ) -> AppResult<BookingOutcome> {
        if request.start_time >= request.end_time {
            return Err(AppError::InvalidTimeRange(
                "start must be before end".to_string(),
            ));
        }
        if request.deposit_amount < 0 || request.total_amount < 0 {
            return Err(AppError::Validation("amounts must not be negative".to_string()));
        }

        let staff = StaffRepository::find_by_id(&state.db, &request.staff_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("staff {}", request.staff_id)))?;
        if !staff.active {
            return Err(AppError::StaffNotAvailable);
        }

        let location = LocationRepository::find_by_id(&state.db, &request.location_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("location {}", request.location_id)))?;

        Self::validate_against_calendar(state, &staff.id, &location, &request).await?;

        // Payment intent is created before the slot is held; provider
        // failure stops the booking with nothing persisted (fail closed).
        let provider = state
            .payments
            .as_ref()
            .filter(|_| request.deposit_amount > 0);
        let initial_status = if provider.is_some() {
            AppointmentStatus::Pending
        } else {
            AppointmentStatus::Scheduled
        };

        let appointment = new_appointment(&request, initial_status);

        let intent = match provider {
            Some(provider) => Some(
                provider
                    .create_charge(
                        request.deposit_amount,
                        serde_json::json!({
                            "appointment_id": appointment.id,
                            "client_id": request.client_id,
                            "kind": "deposit",
                        }),
                    )
                    .await?,
            ),
            None => None,
        };

        let mut conn = begin_immediate(&state.db).await?;
        let result = async {
            let blocking = ConflictDetector::check(
                &mut conn,
                &appointment.staff_id,
                appointment.start_time,
                appointment.end_time,
                None,
            )
            .await?;
            if conflicts_with_any(&blocking, appointment.start_time, appointment.end_time) {
                return Err(AppError::SlotUnavailable);
            }

            AppointmentRepository::insert(&mut conn, &appointment).await?;

            if let Some(ref intent) = intent {
                TransactionRepository::insert(
                    &mut conn,
                    &appointment.id,
                    request.deposit_amount,
                    TransactionKind::Deposit,
                    TransactionStatus::Pending,
                    Some(&intent.id),
                )
                .await?;
            }

            AuditLogRepository::append(
                &mut conn,
                &appointment.id,
                actor,
                "book",
                None,
                Some(appointment.status),
                Some(serde_json::json!({
                    "start_time": appointment.start_time,
                    "end_time": appointment.end_time,
                    "deposit_amount": request.deposit_amount,
                })),
            )
            .await?;

            Ok(())
        }
        .await;
        finish(conn, result).await?;

        info!(
            appointment_id = %appointment.id,
            staff_id = %appointment.staff_id,
            status = %appointment.status,
            "Appointment booked"
        );

        let template = if intent.is_some() {
            "booking_pending_payment"
        } else {
            "booking_confirmed"
        };
        let notification_sent = try_notify(
            state.notifier.as_deref(),
            &appointment.client_id,
            template,
            serde_json::json!({
                "appointment_id": appointment.id,
                "start_time": appointment.start_time,
            }),
        )
        .await;

        Ok(BookingOutcome {
            appointment,
            payment: intent.map(|i| PaymentInstruction {
                charge_id: i.id,
                client_secret: i.client_secret,
            }),
            notification_sent,
        })
    }

    /// Reject out-of-hours and out-of-window requests before the conflict
    /// detector ever sees them.
    async fn validate_against_calendar(
        state: &AppState,
        staff_id: &str,
        location: &Location,
        request: &BookAppointmentRequest,
    ) -> AppResult<()> {
        let tz = location_tz(location, &state.config.scheduling.default_timezone);
        let local_start = request.start_time.with_timezone(&tz);
        let local_end = request.end_time.with_timezone(&tz);
        if local_start.date_naive() != local_end.date_naive() {
            return Err(AppError::InvalidTimeRange(
                "appointment must fall within a single day".to_string(),
            ));
        }

        let date = local_start.date_naive();
        if AvailabilityRepository::has_time_off(&state.db, staff_id, date).await? {
            return Err(AppError::StaffNotAvailable);
        }

        let weekday = weekday_index(date);
        let hours = CalendarService::hours_for(
            &state.db,
            &state.config.scheduling,
            &location.id,
            weekday,
        )
        .await?;
        match hours {
            DayHours::Closed => {
                return Err(AppError::InvalidTimeRange(
                    "location is closed on the requested day".to_string(),
                ));
            }
            DayHours::Open { open, close } => {
                if local_start.time() < open || local_end.time() > close {
                    return Err(AppError::InvalidTimeRange(
                        "requested range is outside business hours".to_string(),
                    ));
                }
            }
        }

        let windows =
            AvailabilityRepository::find_windows_for_weekday(&state.db, staff_id, weekday).await?;
        if !window_contains_range(&windows, local_start.time(), local_end.time()) {
            return Err(AppError::StaffNotAvailable);
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Payment confirmation: pending -> scheduled
    // ------------------------------------------------------------------

    pub async fn confirm_payment(
        state: &AppState,
        actor: &Actor,
        appointment_id: &str,
    ) -> AppResult<TransitionOutcome> {
        let appointment = Self::load(state, appointment_id).await?;
        validate_transition(appointment.status, AppointmentStatus::Scheduled)?;

        let provider = state.payments.as_ref().ok_or(AppError::PaymentRequired)?;

        let transactions =
            TransactionRepository::find_for_appointment(&state.db, appointment_id).await?;
        let deposit = transactions
            .iter()
            .find(|t| {
                t.kind == TransactionKind::Deposit && t.status == TransactionStatus::Pending
            })
            .ok_or_else(|| {
                AppError::BadRequest("appointment has no pending deposit".to_string())
            })?;

        let charge_id = deposit
            .provider_charge_id
            .clone()
            .ok_or_else(|| AppError::BadRequest("deposit has no provider charge".to_string()))?;

        // Only a confirmed payment promotes the appointment. An
        // unconfirmed intent keeps it pending so the client can retry
        // payment without re-booking.
        if !provider.confirmed(&charge_id).await? {
            return Err(AppError::PaymentRequired);
        }

        let deposit_id = deposit.id.clone();
        let deposit_amount = deposit.amount;

        let mut conn = begin_immediate(&state.db).await?;
        let result = async {
            let current = AppointmentRepository::find_by_id_tx(&mut conn, appointment_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("appointment {appointment_id}")))?;
            validate_transition(current.status, AppointmentStatus::Scheduled)?;

            TransactionRepository::mark_completed(&mut conn, &deposit_id).await?;
            AppointmentRepository::update_deposit_paid(
                &mut conn,
                appointment_id,
                current.deposit_paid + deposit_amount,
            )
            .await?;
            AppointmentRepository::update_status(
                &mut conn,
                appointment_id,
                AppointmentStatus::Scheduled,
            )
            .await?;
            AuditLogRepository::append(
                &mut conn,
                appointment_id,
                actor,
                "confirm_payment",
                Some(current.status),
                Some(AppointmentStatus::Scheduled),
                Some(serde_json::json!({ "deposit_amount": deposit_amount })),
            )
            .await?;

            Ok(())
        }
        .await;
        finish(conn, result).await?;

        let appointment = Self::load(state, appointment_id).await?;
        let notification_sent = try_notify(
            state.notifier.as_deref(),
            &appointment.client_id,
            "booking_confirmed",
            serde_json::json!({ "appointment_id": appointment.id }),
        )
        .await;

        Ok(TransitionOutcome {
            appointment,
            notification_sent,
        })
    }

    // ------------------------------------------------------------------
    // Cancellation workflow
    // ------------------------------------------------------------------

    /// Patient-initiated cancellation request. The slot stays blocked
    /// until a clinic actor processes the request.
    pub async fn request_cancellation(
        state: &AppState,
        actor: &Actor,
        appointment_id: &str,
    ) -> AppResult<TransitionOutcome> {
        let appointment = Self::load(state, appointment_id).await?;
        validate_transition(appointment.status, AppointmentStatus::CancellationRequested)?;

        let mut conn = begin_immediate(&state.db).await?;
        let result = async {
            let current = AppointmentRepository::find_by_id_tx(&mut conn, appointment_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("appointment {appointment_id}")))?;
            validate_transition(current.status, AppointmentStatus::CancellationRequested)?;

            AppointmentRepository::update_status(
                &mut conn,
                appointment_id,
                AppointmentStatus::CancellationRequested,
            )
            .await?;
            AuditLogRepository::append(
                &mut conn,
                appointment_id,
                actor,
                "request_cancellation",
                Some(current.status),
                Some(AppointmentStatus::CancellationRequested),
                None,
            )
            .await?;

            Ok(())
        }
        .await;
        finish(conn, result).await?;

        let appointment = Self::load(state, appointment_id).await?;
        let notification_sent = try_notify(
            state.notifier.as_deref(),
            &appointment.client_id,
            "cancellation_requested",
            serde_json::json!({ "appointment_id": appointment.id }),
        )
        .await;

        Ok(TransitionOutcome {
            appointment,
            notification_sent,
        })
    }

    /// Clinic-initiated cancellation, no approval step. The deposit
    /// decision defaults to the configured retention policy when the
    /// caller does not state one.
    pub async fn cancel(
        state: &AppState,
        actor: &Actor,
        appointment_id: &str,
        request: CancelAppointmentRequest,
    ) -> AppResult<TransitionOutcome> {
        if !actor.role.is_clinic() {
            return Err(AppError::BadRequest(
                "direct cancellation is a clinic action".to_string(),
            ));
        }

        let retain_deposit = request
            .retain_deposit
            .unwrap_or(state.config.cancellation.retain_deposit_by_default);

        Self::cancel_with_refund_decision(
            state,
            actor,
            appointment_id,
            "cancel",
            retain_deposit,
            request.reason.as_deref(),
        )
        .await
    }

    /// Approve or deny a pending cancellation request.
    pub async fn process_cancellation(
        state: &AppState,
        actor: &Actor,
        appointment_id: &str,
        request: ProcessCancellationRequest,
    ) -> AppResult<TransitionOutcome> {
        let appointment = Self::load(state, appointment_id).await?;
        if appointment.status != AppointmentStatus::CancellationRequested {
            return Err(AppError::InvalidTransition(format!(
                "{} is not awaiting cancellation approval",
                appointment.status
            )));
        }

        if !request.approved {
            let mut conn = begin_immediate(&state.db).await?;
            let result = async {
                let current = AppointmentRepository::find_by_id_tx(&mut conn, appointment_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("appointment {appointment_id}")))?;
                validate_transition(current.status, AppointmentStatus::Scheduled)?;

                AppointmentRepository::update_status(
                    &mut conn,
                    appointment_id,
                    AppointmentStatus::Scheduled,
                )
                .await?;
                AuditLogRepository::append(
                    &mut conn,
                    appointment_id,
                    actor,
                    "deny_cancellation",
                    Some(current.status),
                    Some(AppointmentStatus::Scheduled),
                    None,
                )
                .await?;

                Ok(())
            }
            .await;
            finish(conn, result).await?;

            let appointment = Self::load(state, appointment_id).await?;
            let notification_sent = try_notify(
                state.notifier.as_deref(),
                &appointment.client_id,
                "cancellation_denied",
                serde_json::json!({ "appointment_id": appointment.id }),
            )
            .await;

            return Ok(TransitionOutcome {
                appointment,
                notification_sent,
            });
        }

        let retain_deposit = !request
            .issue_refund
            .unwrap_or(!state.config.cancellation.retain_deposit_by_default);

        Self::cancel_with_refund_decision(
            state,
            actor,
            appointment_id,
            "approve_cancellation",
            retain_deposit,
            None,
        )
        .await
    }

    async fn cancel_with_refund_decision(
        state: &AppState,
        actor: &Actor,
        appointment_id: &str,
        action: &str,
        retain_deposit: bool,
        reason: Option<&str>,
    ) -> AppResult<TransitionOutcome> {
        let appointment = Self::load(state, appointment_id).await?;
        validate_transition(appointment.status, AppointmentStatus::Canceled)?;

        // Claim phase: reserve a pending refund row per charge inside a
        // write transaction. A concurrent cancellation of the same
        // appointment finds the pending row and fails here, before the
        // provider is ever called, so a charge cannot be refunded twice.
        let mut claims: Vec<RefundClaim> = Vec::new();
        let mut conn = begin_immediate(&state.db).await?;
        let result = async {
            let current = AppointmentRepository::find_by_id_tx(&mut conn, appointment_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("appointment {appointment_id}")))?;
            validate_transition(current.status, AppointmentStatus::Canceled)?;

            let transactions =
                TransactionRepository::find_for_appointment_tx(&mut conn, appointment_id).await?;
            if transactions.iter().any(|t| {
                t.kind == TransactionKind::Refund && t.status == TransactionStatus::Pending
            }) {
                return Err(AppError::InvalidTransition(
                    "a refund for this appointment is already in progress".to_string(),
                ));
            }

            if retain_deposit {
                return Ok(());
            }

            // A refund row references the charge it reverses. A charge
            // that already carries a completed refund is not claimed
            // again, so a retry after a partial provider failure only
            // refunds what is still outstanding.
            let refunded: Vec<&str> = transactions
                .iter()
                .filter(|t| {
                    t.kind == TransactionKind::Refund && t.status == TransactionStatus::Completed
                })
                .filter_map(|t| t.provider_charge_id.as_deref())
                .collect();
            let charges: Vec<&Transaction> = transactions
                .iter()
                .filter(|t| t.kind.is_charge() && t.status == TransactionStatus::Completed)
                .collect();

            if !charges.is_empty() && state.payments.is_none() {
                return Err(AppError::PaymentFailed(
                    "no payment provider configured for refund".to_string(),
                ));
            }

            for charge in charges {
                let charge_ref = charge
                    .provider_charge_id
                    .clone()
                    .unwrap_or_else(|| charge.id.clone());
                if refunded.contains(&charge_ref.as_str()) {
                    continue;
                }
                let row = TransactionRepository::insert(
                    &mut conn,
                    appointment_id,
                    charge.amount,
                    TransactionKind::Refund,
                    TransactionStatus::Pending,
                    Some(&charge_ref),
                )
                .await?;
                claims.push(RefundClaim {
                    row_id: row.id,
                    amount: charge.amount,
                    charge_ref,
                });
            }

            Ok(())
        }
        .await;
        finish(conn, result).await?;

        // Refunds go through the provider before the status flips; a
        // provider failure releases the unprocessed claims and leaves the
        // appointment in its prior status (fail closed). Claims that did
        // refund stay completed so the ledger matches the provider.
        let mut receipt_ids: Vec<String> = Vec::new();
        if !claims.is_empty() {
            let provider = state.payments.as_ref().ok_or_else(|| {
                AppError::PaymentFailed("no payment provider configured for refund".to_string())
            })?;

            for (index, claim) in claims.iter().enumerate() {
                match provider.refund(&claim.charge_ref, claim.amount).await {
                    Ok(receipt) => {
                        let mut conn = state.db.acquire().await?;
                        TransactionRepository::mark_completed(&mut conn, &claim.row_id).await?;
                        receipt_ids.push(receipt.id);
                    }
                    Err(e) => {
                        let mut conn = state.db.acquire().await?;
                        for unprocessed in &claims[index..] {
                            TransactionRepository::mark_failed(&mut conn, &unprocessed.row_id)
                                .await?;
                        }
                        return Err(e);
                    }
                }
            }
        }

        let refund_count = receipt_ids.len();
        let mut conn = begin_immediate(&state.db).await?;
        let result = async {
            let current = AppointmentRepository::find_by_id_tx(&mut conn, appointment_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("appointment {appointment_id}")))?;
            validate_transition(current.status, AppointmentStatus::Canceled)?;

            AppointmentRepository::update_status(
                &mut conn,
                appointment_id,
                AppointmentStatus::Canceled,
            )
            .await?;
            AuditLogRepository::append(
                &mut conn,
                appointment_id,
                actor,
                action,
                Some(current.status),
                Some(AppointmentStatus::Canceled),
                Some(serde_json::json!({
                    "retain_deposit": retain_deposit,
                    "refunds": refund_count,
                    "refund_receipts": &receipt_ids,
                    "reason": reason,
                })),
            )
            .await?;

            Ok(())
        }
        .await;
        finish(conn, result).await?;

        info!(
            appointment_id,
            retain_deposit,
            refunds = refund_count,
            "Appointment canceled"
        );

        let appointment = Self::load(state, appointment_id).await?;
        let notification_sent = try_notify(
            state.notifier.as_deref(),
            &appointment.client_id,
            "appointment_canceled",
            serde_json::json!({
                "appointment_id": appointment.id,
                "deposit_retained": retain_deposit,
            }),
        )
        .await;

        Ok(TransitionOutcome {
            appointment,
            notification_sent,
        })
    }

    // ------------------------------------------------------------------
    // Completion: scheduled -> completed
    // ------------------------------------------------------------------

    pub async fn complete(
        state: &AppState,
        actor: &Actor,
        appointment_id: &str,
        request: CompleteAppointmentRequest,
    ) -> AppResult<TransitionOutcome> {
        let appointment = Self::load(state, appointment_id).await?;
        validate_transition(appointment.status, AppointmentStatus::Completed)?;

        let final_total = request.final_total.unwrap_or(appointment.total_amount);
        if final_total < 0 {
            return Err(AppError::Validation("final total must not be negative".to_string()));
        }

        // Claim phase: reserve a pending balance row inside a write
        // transaction so concurrent completions cannot both charge the
        // outstanding balance at the provider.
        let mut balance_claim: Option<(String, i64)> = None;
        let mut conn = begin_immediate(&state.db).await?;
        let result = async {
            let current = AppointmentRepository::find_by_id_tx(&mut conn, appointment_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("appointment {appointment_id}")))?;
            validate_transition(current.status, AppointmentStatus::Completed)?;

            let transactions =
                TransactionRepository::find_for_appointment_tx(&mut conn, appointment_id).await?;
            if transactions.iter().any(|t| {
                t.status == TransactionStatus::Pending
                    && matches!(t.kind, TransactionKind::Balance | TransactionKind::Refund)
            }) {
                return Err(AppError::InvalidTransition(
                    "a payment for this appointment is already in progress".to_string(),
                ));
            }

            let paid = TransactionRepository::net_paid(&transactions);
            let balance_due = final_total - paid;
            if balance_due > 0 && state.payments.is_some() {
                let row = TransactionRepository::insert(
                    &mut conn,
                    appointment_id,
                    balance_due,
                    TransactionKind::Balance,
                    TransactionStatus::Pending,
                    None,
                )
                .await?;
                balance_claim = Some((row.id, balance_due));
            }

            Ok(())
        }
        .await;
        finish(conn, result).await?;

        // Charge the outstanding balance when a provider is wired up;
        // otherwise just record the final total (paid out of band). A
        // provider failure releases the claim and leaves the appointment
        // scheduled (fail closed).
        let mut balance_charge: Option<(String, i64, String)> = None;
        if let Some((row_id, amount)) = balance_claim {
            let provider = state.payments.as_ref().ok_or_else(|| {
                AppError::PaymentFailed("no payment provider configured for balance".to_string())
            })?;

            match provider
                .create_charge(
                    amount,
                    serde_json::json!({
                        "appointment_id": appointment_id,
                        "kind": "balance",
                    }),
                )
                .await
            {
                Ok(intent) => balance_charge = Some((row_id, amount, intent.id)),
                Err(e) => {
                    let mut conn = state.db.acquire().await?;
                    TransactionRepository::mark_failed(&mut conn, &row_id).await?;
                    return Err(e);
                }
            }
        }

        let mut conn = begin_immediate(&state.db).await?;
        let result = async {
            let current = AppointmentRepository::find_by_id_tx(&mut conn, appointment_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("appointment {appointment_id}")))?;
            validate_transition(current.status, AppointmentStatus::Completed)?;

            if let Some((ref row_id, _, ref charge_id)) = balance_charge {
                TransactionRepository::mark_completed_with_reference(&mut conn, row_id, charge_id)
                    .await?;
            }

            AppointmentRepository::update_total_amount(&mut conn, appointment_id, final_total)
                .await?;
            AppointmentRepository::update_status(
                &mut conn,
                appointment_id,
                AppointmentStatus::Completed,
            )
            .await?;
            AuditLogRepository::append(
                &mut conn,
                appointment_id,
                actor,
                "complete",
                Some(current.status),
                Some(AppointmentStatus::Completed),
                Some(serde_json::json!({
                    "final_total": final_total,
                    "balance_charged": balance_charge.as_ref().map(|(_, amount, _)| amount),
                })),
            )
            .await?;

            Ok(())
        }
        .await;
        finish(conn, result).await?;

        let appointment = Self::load(state, appointment_id).await?;

        // Reward accrual is idempotent per appointment; a failure here
        // never unwinds the completion.
        let transactions =
            TransactionRepository::find_for_appointment(&state.db, appointment_id).await?;
        let paid = TransactionRepository::net_paid(&transactions);
        if let Err(e) = RewardService::award_for_appointment(
            &state.db,
            &state.config.rewards,
            appointment_id,
            &appointment.client_id,
            paid,
        )
        .await
        {
            warn!(appointment_id, error = ?e, "Reward accrual failed");
        }

        let notification_sent = try_notify(
            state.notifier.as_deref(),
            &appointment.client_id,
            "appointment_completed",
            serde_json::json!({ "appointment_id": appointment.id }),
        )
        .await;

        Ok(TransitionOutcome {
            appointment,
            notification_sent,
        })
    }

    // ------------------------------------------------------------------
    // Reschedule (status preserved)
    // ------------------------------------------------------------------

    pub async fn reschedule(
        state: &AppState,
        actor: &Actor,
        appointment_id: &str,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
    ) -> AppResult<TransitionOutcome> {
        if new_start >= new_end {
            return Err(AppError::InvalidTimeRange(
                "start must be before end".to_string(),
            ));
        }

        let appointment = Self::load(state, appointment_id).await?;
        if appointment.status.is_terminal() {
            return Err(AppError::InvalidTransition(format!(
                "cannot reschedule a {} appointment",
                appointment.status
            )));
        }

        let mut conn = begin_immediate(&state.db).await?;
        let result = async {
            let current = AppointmentRepository::find_by_id_tx(&mut conn, appointment_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("appointment {appointment_id}")))?;
            if current.status.is_terminal() {
                return Err(AppError::InvalidTransition(format!(
                    "cannot reschedule a {} appointment",
                    current.status
                )));
            }

            let blocking = ConflictDetector::check(
                &mut conn,
                &current.staff_id,
                new_start,
                new_end,
                Some(appointment_id),
            )
            .await?;
            if conflicts_with_any(&blocking, new_start, new_end) {
                return Err(AppError::SlotUnavailable);
            }

            AppointmentRepository::update_times(&mut conn, appointment_id, new_start, new_end)
                .await?;
            AuditLogRepository::append(
                &mut conn,
                appointment_id,
                actor,
                "reschedule",
                Some(current.status),
                Some(current.status),
                Some(serde_json::json!({
                    "from": { "start": current.start_time, "end": current.end_time },
                    "to": { "start": new_start, "end": new_end },
                })),
            )
            .await?;

            Ok(())
        }
        .await;
        finish(conn, result).await?;

        let appointment = Self::load(state, appointment_id).await?;
        let notification_sent = try_notify(
            state.notifier.as_deref(),
            &appointment.client_id,
            "appointment_rescheduled",
            serde_json::json!({
                "appointment_id": appointment.id,
                "start_time": appointment.start_time,
            }),
        )
        .await;

        Ok(TransitionOutcome {
            appointment,
            notification_sent,
        })
    }

    async fn load(state: &AppState, appointment_id: &str) -> AppResult<Appointment> {
        AppointmentRepository::find_by_id(&state.db, appointment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("appointment {appointment_id}")))
    }
}

/// A pending refund row reserved for a specific charge. The row exists
/// before the provider is called; concurrent cancellations see it and
/// stop.
struct RefundClaim {
    row_id: String,
    amount: i64,
    charge_ref: String,
}

/// Open a write transaction that takes the database write lock up front,
/// serializing the conflict check against concurrent bookings.
async fn begin_immediate(pool: &SqlitePool) -> AppResult<PoolConnection<Sqlite>> {
    let mut conn = pool.acquire().await?;
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *conn)
        .await?;
    Ok(conn)
}

async fn finish(mut conn: PoolConnection<Sqlite>, result: AppResult<()>) -> AppResult<()> {
    match result {
        Ok(()) => {
            sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await?;
            Ok(())
        }
        Err(e) => {
            if let Err(rollback_err) = sqlx::query("ROLLBACK")
                .execute(&mut *conn)
                .await
            {
                warn!("Rollback failed: {:?}", rollback_err);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::services::conflict::overlaps;
    use crate::services::payments::{ChargeIntent, PaymentProvider, RefundReceipt};
    use async_trait::async_trait;
    use chrono::{NaiveTime, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct FakePaymentProvider {
        confirm: bool,
        refunds: AtomicUsize,
        fail_refunds: bool,
        refund_delay: Duration,
    }

    impl FakePaymentProvider {
        fn new(confirm: bool) -> Self {
            Self {
                confirm,
                refunds: AtomicUsize::new(0),
                fail_refunds: false,
                refund_delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl PaymentProvider for FakePaymentProvider {
        async fn create_charge(
            &self,
            _amount: i64,
            _metadata: serde_json::Value,
        ) -> AppResult<ChargeIntent> {
            Ok(ChargeIntent {
                id: format!("ch_{}", uuid::Uuid::new_v4()),
                client_secret: "secret".to_string(),
            })
        }

        async fn refund(&self, _charge_id: &str, _amount: i64) -> AppResult<RefundReceipt> {
            if self.fail_refunds {
                return Err(AppError::PaymentFailed("provider unavailable".to_string()));
            }
            if !self.refund_delay.is_zero() {
                tokio::time::sleep(self.refund_delay).await;
            }
            self.refunds.fetch_add(1, Ordering::SeqCst);
            Ok(RefundReceipt {
                id: format!("re_{}", uuid::Uuid::new_v4()),
            })
        }

        async fn confirmed(&self, _payment_id: &str) -> AppResult<bool> {
            Ok(self.confirm)
        }
    }

    async fn test_state(payments: Option<Arc<dyn PaymentProvider>>) -> (AppState, String, String) {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let location = LocationRepository::create(&pool, "org-1", "Main clinic", "UTC")
            .await
            .unwrap();
        let staff = StaffRepository::create(&pool, "org-1", "Dana Reyes")
            .await
            .unwrap();

        // Staff works Mondays 09:00-17:00; clinic open 09:00-18:00.
        AvailabilityRepository::create_window(
            &pool,
            CreateAvailabilityWindow {
                staff_id: staff.id.clone(),
                weekday: 1,
                start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                recurring: true,
            },
        )
        .await
        .unwrap();
        crate::db::BusinessHoursRepository::replace_for_location(
            &pool,
            &location.id,
            vec![SetBusinessHours {
                weekday: 1,
                open_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                close_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            }],
        )
        .await
        .unwrap();

        let state = AppState {
            db: pool,
            config: Config::default(),
            payments,
            notifier: None,
        };

        (state, staff.id, location.id)
    }

    fn actor(role: ActorRole) -> Actor {
        Actor {
            id: "actor-1".to_string(),
            role,
        }
    }

    fn booking(staff_id: &str, location_id: &str, hour: u32, minute: u32) -> BookAppointmentRequest {
        // 2025-06-02 is a Monday.
        let start = Utc.with_ymd_and_hms(2025, 6, 2, hour, minute, 0).unwrap();
        BookAppointmentRequest {
            organization_id: "org-1".to_string(),
            location_id: location_id.to_string(),
            client_id: "client-1".to_string(),
            staff_id: staff_id.to_string(),
            service_id: "svc-1".to_string(),
            start_time: start,
            end_time: start + chrono::Duration::minutes(30),
            total_amount: 5000,
            deposit_amount: 0,
            notes: None,
        }
    }

    #[tokio::test]
    async fn booking_without_payment_is_scheduled_immediately() {
        let (state, staff_id, location_id) = test_state(None).await;
        let outcome = LifecycleService::book(
            &state,
            &actor(ActorRole::Client),
            booking(&staff_id, &location_id, 10, 0),
        )
        .await
        .unwrap();

        assert_eq!(outcome.appointment.status, AppointmentStatus::Scheduled);
        assert!(outcome.payment.is_none());

        let audit = AuditLogRepository::find_for_appointment(&state.db, &outcome.appointment.id)
            .await
            .unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "book");
    }

    #[tokio::test]
    async fn double_booking_is_rejected_with_slot_unavailable() {
        let (state, staff_id, location_id) = test_state(None).await;
        LifecycleService::book(
            &state,
            &actor(ActorRole::Client),
            booking(&staff_id, &location_id, 10, 0),
        )
        .await
        .unwrap();

        let err = LifecycleService::book(
            &state,
            &actor(ActorRole::Client),
            booking(&staff_id, &location_id, 10, 0),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::SlotUnavailable));
    }

    #[tokio::test]
    async fn back_to_back_bookings_do_not_conflict() {
        let (state, staff_id, location_id) = test_state(None).await;
        LifecycleService::book(
            &state,
            &actor(ActorRole::Client),
            booking(&staff_id, &location_id, 10, 0),
        )
        .await
        .unwrap();

        // Ends at 10:30, next starts at 10:30: half-open intervals touch
        // without conflicting.
        LifecycleService::book(
            &state,
            &actor(ActorRole::Client),
            booking(&staff_id, &location_id, 10, 30),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn accepted_bookings_never_overlap_pairwise() {
        let (state, staff_id, location_id) = test_state(None).await;
        for (hour, minute) in [(9, 0), (9, 30), (10, 0), (10, 0), (9, 0), (11, 0)] {
            let _ = LifecycleService::book(
                &state,
                &actor(ActorRole::Client),
                booking(&staff_id, &location_id, hour, minute),
            )
            .await;
        }

        let accepted = AppointmentRepository::search(
            &state.db,
            &AppointmentSearchQuery {
                organization_id: Some("org-1".to_string()),
                staff_id: None,
                client_id: None,
                status: None,
                from: None,
                to: None,
                limit: None,
                offset: None,
            },
        )
        .await
        .unwrap();

        for a in &accepted {
            for b in &accepted {
                if a.id != b.id {
                    assert!(!overlaps(a.start_time, a.end_time, b.start_time, b.end_time));
                }
            }
        }
    }

    #[tokio::test]
    async fn out_of_hours_booking_is_rejected_before_conflict_check() {
        let (state, staff_id, location_id) = test_state(None).await;
        let mut request = booking(&staff_id, &location_id, 7, 0);
        request.end_time = Utc.with_ymd_and_hms(2025, 6, 2, 7, 30, 0).unwrap();

        let err = LifecycleService::book(&state, &actor(ActorRole::Client), request)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTimeRange(_)));
    }

    #[tokio::test]
    async fn booking_outside_staff_window_fails_with_staff_not_available() {
        let (state, staff_id, location_id) = test_state(None).await;
        // 17:00-17:30 is inside business hours but outside the staff
        // member's 09:00-17:00 window.
        let err = LifecycleService::book(
            &state,
            &actor(ActorRole::Client),
            booking(&staff_id, &location_id, 17, 0),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::StaffNotAvailable));
    }

    #[tokio::test]
    async fn deposit_booking_stays_pending_until_payment_confirms() {
        let provider = Arc::new(FakePaymentProvider::new(true));
        let (state, staff_id, location_id) = test_state(Some(provider)).await;

        let mut request = booking(&staff_id, &location_id, 10, 0);
        request.deposit_amount = 2000;

        let outcome = LifecycleService::book(&state, &actor(ActorRole::Client), request)
            .await
            .unwrap();
        assert_eq!(outcome.appointment.status, AppointmentStatus::Pending);
        assert!(outcome.payment.is_some());

        let confirmed = LifecycleService::confirm_payment(
            &state,
            &actor(ActorRole::System),
            &outcome.appointment.id,
        )
        .await
        .unwrap();
        assert_eq!(confirmed.appointment.status, AppointmentStatus::Scheduled);
        assert_eq!(confirmed.appointment.deposit_paid, 2000);
    }

    #[tokio::test]
    async fn unconfirmed_payment_keeps_appointment_pending() {
        let provider = Arc::new(FakePaymentProvider::new(false));
        let (state, staff_id, location_id) = test_state(Some(provider)).await;

        let mut request = booking(&staff_id, &location_id, 10, 0);
        request.deposit_amount = 2000;
        let outcome = LifecycleService::book(&state, &actor(ActorRole::Client), request)
            .await
            .unwrap();

        let err = LifecycleService::confirm_payment(
            &state,
            &actor(ActorRole::System),
            &outcome.appointment.id,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::PaymentRequired));

        let appointment = AppointmentRepository::find_by_id(&state.db, &outcome.appointment.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Pending);
    }

    #[tokio::test]
    async fn cancellation_request_keeps_slot_blocked_until_approved() {
        let (state, staff_id, location_id) = test_state(None).await;
        let outcome = LifecycleService::book(
            &state,
            &actor(ActorRole::Client),
            booking(&staff_id, &location_id, 10, 0),
        )
        .await
        .unwrap();

        let requested = LifecycleService::request_cancellation(
            &state,
            &actor(ActorRole::Client),
            &outcome.appointment.id,
        )
        .await
        .unwrap();
        assert_eq!(
            requested.appointment.status,
            AppointmentStatus::CancellationRequested
        );

        // The slot is still blocked.
        let err = LifecycleService::book(
            &state,
            &actor(ActorRole::Client),
            booking(&staff_id, &location_id, 10, 0),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::SlotUnavailable));

        // Approval frees the slot.
        let processed = LifecycleService::process_cancellation(
            &state,
            &actor(ActorRole::Admin),
            &outcome.appointment.id,
            ProcessCancellationRequest {
                approved: true,
                issue_refund: Some(false),
            },
        )
        .await
        .unwrap();
        assert_eq!(processed.appointment.status, AppointmentStatus::Canceled);

        LifecycleService::book(
            &state,
            &actor(ActorRole::Client),
            booking(&staff_id, &location_id, 10, 0),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn denied_cancellation_returns_to_scheduled() {
        let (state, staff_id, location_id) = test_state(None).await;
        let outcome = LifecycleService::book(
            &state,
            &actor(ActorRole::Client),
            booking(&staff_id, &location_id, 10, 0),
        )
        .await
        .unwrap();

        LifecycleService::request_cancellation(
            &state,
            &actor(ActorRole::Client),
            &outcome.appointment.id,
        )
        .await
        .unwrap();

        let denied = LifecycleService::process_cancellation(
            &state,
            &actor(ActorRole::Admin),
            &outcome.appointment.id,
            ProcessCancellationRequest {
                approved: false,
                issue_refund: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(denied.appointment.status, AppointmentStatus::Scheduled);
    }

    #[tokio::test]
    async fn cancel_without_retaining_deposit_refunds_exactly_once() {
        let provider = Arc::new(FakePaymentProvider::new(true));
        let (state, staff_id, location_id) = test_state(Some(provider.clone())).await;

        let mut request = booking(&staff_id, &location_id, 10, 0);
        request.deposit_amount = 2000;
        let outcome = LifecycleService::book(&state, &actor(ActorRole::Client), request)
            .await
            .unwrap();
        LifecycleService::confirm_payment(
            &state,
            &actor(ActorRole::System),
            &outcome.appointment.id,
        )
        .await
        .unwrap();

        LifecycleService::cancel(
            &state,
            &actor(ActorRole::Admin),
            &outcome.appointment.id,
            CancelAppointmentRequest {
                retain_deposit: Some(false),
                reason: Some("clinic closure".to_string()),
            },
        )
        .await
        .unwrap();

        assert_eq!(provider.refunds.load(Ordering::SeqCst), 1);
        let transactions =
            TransactionRepository::find_for_appointment(&state.db, &outcome.appointment.id)
                .await
                .unwrap();
        let refunds: Vec<_> = transactions
            .iter()
            .filter(|t| t.kind == TransactionKind::Refund)
            .collect();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].amount, 2000);
        assert_eq!(TransactionRepository::net_paid(&transactions), 0);
    }

    #[tokio::test]
    async fn cancel_retaining_deposit_creates_no_refund() {
        let provider = Arc::new(FakePaymentProvider::new(true));
        let (state, staff_id, location_id) = test_state(Some(provider.clone())).await;

        let mut request = booking(&staff_id, &location_id, 10, 0);
        request.deposit_amount = 2000;
        let outcome = LifecycleService::book(&state, &actor(ActorRole::Client), request)
            .await
            .unwrap();
        LifecycleService::confirm_payment(
            &state,
            &actor(ActorRole::System),
            &outcome.appointment.id,
        )
        .await
        .unwrap();

        LifecycleService::cancel(
            &state,
            &actor(ActorRole::Admin),
            &outcome.appointment.id,
            CancelAppointmentRequest {
                retain_deposit: Some(true),
                reason: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(provider.refunds.load(Ordering::SeqCst), 0);
        let transactions =
            TransactionRepository::find_for_appointment(&state.db, &outcome.appointment.id)
                .await
                .unwrap();
        assert!(transactions
            .iter()
            .all(|t| t.kind != TransactionKind::Refund));
    }

    #[tokio::test]
    async fn failed_refund_leaves_appointment_untouched() {
        let mut provider = FakePaymentProvider::new(true);
        provider.fail_refunds = true;
        let provider = Arc::new(provider);
        let (state, staff_id, location_id) = test_state(Some(provider)).await;

        let mut request = booking(&staff_id, &location_id, 10, 0);
        request.deposit_amount = 2000;
        let outcome = LifecycleService::book(&state, &actor(ActorRole::Client), request)
            .await
            .unwrap();
        LifecycleService::confirm_payment(
            &state,
            &actor(ActorRole::System),
            &outcome.appointment.id,
        )
        .await
        .unwrap();

        let err = LifecycleService::cancel(
            &state,
            &actor(ActorRole::Admin),
            &outcome.appointment.id,
            CancelAppointmentRequest {
                retain_deposit: Some(false),
                reason: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::PaymentFailed(_)));

        let appointment = AppointmentRepository::find_by_id(&state.db, &outcome.appointment.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Scheduled);

        // The released claim stays in the ledger as failed and never
        // counts as money moved.
        let transactions =
            TransactionRepository::find_for_appointment(&state.db, &outcome.appointment.id)
                .await
                .unwrap();
        assert!(transactions
            .iter()
            .filter(|t| t.kind == TransactionKind::Refund)
            .all(|t| t.status == TransactionStatus::Failed));
        assert_eq!(TransactionRepository::net_paid(&transactions), 2000);
    }

    #[tokio::test]
    async fn concurrent_cancellation_approvals_refund_once() {
        let mut provider = FakePaymentProvider::new(true);
        provider.refund_delay = Duration::from_millis(50);
        let provider = Arc::new(provider);
        let (state, staff_id, location_id) = test_state(Some(provider.clone())).await;

        let mut request = booking(&staff_id, &location_id, 10, 0);
        request.deposit_amount = 2000;
        let outcome = LifecycleService::book(&state, &actor(ActorRole::Client), request)
            .await
            .unwrap();
        let id = outcome.appointment.id.clone();
        LifecycleService::confirm_payment(&state, &actor(ActorRole::System), &id)
            .await
            .unwrap();
        LifecycleService::request_cancellation(&state, &actor(ActorRole::Client), &id)
            .await
            .unwrap();

        let approve = || ProcessCancellationRequest {
            approved: true,
            issue_refund: Some(true),
        };
        let admin_a = actor(ActorRole::Admin);
        let admin_b = actor(ActorRole::Admin);
        let (a, b) = tokio::join!(
            LifecycleService::process_cancellation(&state, &admin_a, &id, approve()),
            LifecycleService::process_cancellation(&state, &admin_b, &id, approve()),
        );

        // One approval wins; the other fails before it reaches the
        // provider. The deposit comes back exactly once.
        assert_eq!(a.is_ok() as usize + b.is_ok() as usize, 1);
        assert_eq!(provider.refunds.load(Ordering::SeqCst), 1);

        let transactions = TransactionRepository::find_for_appointment(&state.db, &id)
            .await
            .unwrap();
        let completed_refunds = transactions
            .iter()
            .filter(|t| {
                t.kind == TransactionKind::Refund && t.status == TransactionStatus::Completed
            })
            .count();
        assert_eq!(completed_refunds, 1);
        assert!(transactions
            .iter()
            .all(|t| t.status != TransactionStatus::Pending));
        assert_eq!(TransactionRepository::net_paid(&transactions), 0);

        let appointment = AppointmentRepository::find_by_id(&state.db, &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Canceled);
    }

    #[tokio::test]
    async fn rejected_booking_persists_no_rows() {
        let provider = Arc::new(FakePaymentProvider::new(true));
        let (state, staff_id, location_id) = test_state(Some(provider)).await;

        LifecycleService::book(
            &state,
            &actor(ActorRole::Client),
            booking(&staff_id, &location_id, 10, 0),
        )
        .await
        .unwrap();

        let mut request = booking(&staff_id, &location_id, 10, 0);
        request.deposit_amount = 2000;
        let err = LifecycleService::book(&state, &actor(ActorRole::Client), request)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SlotUnavailable));

        let appointments = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM appointments")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(appointments, 1);
        let transactions = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM transactions")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(transactions, 0);
    }

    #[tokio::test]
    async fn terminal_states_admit_no_transitions() {
        let (state, staff_id, location_id) = test_state(None).await;
        let outcome = LifecycleService::book(
            &state,
            &actor(ActorRole::Client),
            booking(&staff_id, &location_id, 10, 0),
        )
        .await
        .unwrap();
        LifecycleService::complete(
            &state,
            &actor(ActorRole::Staff),
            &outcome.appointment.id,
            CompleteAppointmentRequest { final_total: None },
        )
        .await
        .unwrap();

        let cancel_err = LifecycleService::cancel(
            &state,
            &actor(ActorRole::Admin),
            &outcome.appointment.id,
            CancelAppointmentRequest {
                retain_deposit: None,
                reason: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(cancel_err, AppError::InvalidTransition(_)));

        let request_err = LifecycleService::request_cancellation(
            &state,
            &actor(ActorRole::Client),
            &outcome.appointment.id,
        )
        .await
        .unwrap_err();
        assert!(matches!(request_err, AppError::InvalidTransition(_)));

        let complete_err = LifecycleService::complete(
            &state,
            &actor(ActorRole::Staff),
            &outcome.appointment.id,
            CompleteAppointmentRequest { final_total: None },
        )
        .await
        .unwrap_err();
        assert!(matches!(complete_err, AppError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn completion_charges_outstanding_balance() {
        let provider = Arc::new(FakePaymentProvider::new(true));
        let (state, staff_id, location_id) = test_state(Some(provider)).await;

        let mut request = booking(&staff_id, &location_id, 10, 0);
        request.deposit_amount = 2000;
        let outcome = LifecycleService::book(&state, &actor(ActorRole::Client), request)
            .await
            .unwrap();
        LifecycleService::confirm_payment(
            &state,
            &actor(ActorRole::System),
            &outcome.appointment.id,
        )
        .await
        .unwrap();

        let completed = LifecycleService::complete(
            &state,
            &actor(ActorRole::Staff),
            &outcome.appointment.id,
            CompleteAppointmentRequest {
                final_total: Some(5000),
            },
        )
        .await
        .unwrap();
        assert_eq!(completed.appointment.status, AppointmentStatus::Completed);
        assert_eq!(completed.appointment.total_amount, 5000);

        let transactions =
            TransactionRepository::find_for_appointment(&state.db, &outcome.appointment.id)
                .await
                .unwrap();
        // Deposit 2000 + balance 3000 = 5000 net paid.
        assert_eq!(TransactionRepository::net_paid(&transactions), 5000);
        assert!(transactions
            .iter()
            .any(|t| t.kind == TransactionKind::Balance && t.amount == 3000));
    }

    #[tokio::test]
    async fn completing_twice_awards_rewards_once() {
        let (state, staff_id, location_id) = test_state(None).await;
        let outcome = LifecycleService::book(
            &state,
            &actor(ActorRole::Client),
            booking(&staff_id, &location_id, 10, 0),
        )
        .await
        .unwrap();

        LifecycleService::complete(
            &state,
            &actor(ActorRole::Staff),
            &outcome.appointment.id,
            CompleteAppointmentRequest { final_total: None },
        )
        .await
        .unwrap();

        // Duplicate accrual attempt (e.g. replayed webhook) is a no-op.
        RewardService::award_for_appointment(
            &state.db,
            &state.config.rewards,
            &outcome.appointment.id,
            "client-1",
            5000,
        )
        .await
        .unwrap();

        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM reward_events WHERE reference_id = ?")
                .bind(&outcome.appointment.id)
                .fetch_one(&state.db)
                .await
                .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn reschedule_moves_times_and_checks_conflicts() {
        let (state, staff_id, location_id) = test_state(None).await;
        let first = LifecycleService::book(
            &state,
            &actor(ActorRole::Client),
            booking(&staff_id, &location_id, 10, 0),
        )
        .await
        .unwrap();
        let second = LifecycleService::book(
            &state,
            &actor(ActorRole::Client),
            booking(&staff_id, &location_id, 11, 0),
        )
        .await
        .unwrap();

        // Moving onto the other appointment conflicts.
        let err = LifecycleService::reschedule(
            &state,
            &actor(ActorRole::Staff),
            &first.appointment.id,
            second.appointment.start_time,
            second.appointment.end_time,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::SlotUnavailable));

        // Moving to a free slot succeeds; re-validating against itself
        // does not count as a conflict.
        let moved = LifecycleService::reschedule(
            &state,
            &actor(ActorRole::Staff),
            &first.appointment.id,
            Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 2, 12, 30, 0).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(
            moved.appointment.start_time,
            Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn every_transition_appends_an_audit_entry() {
        let (state, staff_id, location_id) = test_state(None).await;
        let outcome = LifecycleService::book(
            &state,
            &actor(ActorRole::Client),
            booking(&staff_id, &location_id, 10, 0),
        )
        .await
        .unwrap();
        LifecycleService::request_cancellation(
            &state,
            &actor(ActorRole::Client),
            &outcome.appointment.id,
        )
        .await
        .unwrap();
        LifecycleService::process_cancellation(
            &state,
            &actor(ActorRole::Admin),
            &outcome.appointment.id,
            ProcessCancellationRequest {
                approved: true,
                issue_refund: Some(false),
            },
        )
        .await
        .unwrap();

        let audit = AuditLogRepository::find_for_appointment(&state.db, &outcome.appointment.id)
            .await
            .unwrap();
        let actions: Vec<&str> = audit.iter().map(|entry| entry.action.as_str()).collect();
        assert_eq!(
            actions,
            vec!["book", "request_cancellation", "approve_cancellation"]
        );
        assert_eq!(audit[2].previous_status.as_deref(), Some("cancellation_requested"));
        assert_eq!(audit[2].new_status.as_deref(), Some("canceled"));
    }

    #[test]
    fn transition_table_matches_state_machine() {
        assert!(validate_transition(
            AppointmentStatus::Pending,
            AppointmentStatus::Scheduled
        )
        .is_ok());
        assert!(validate_transition(
            AppointmentStatus::Scheduled,
            AppointmentStatus::Completed
        )
        .is_ok());
        assert!(validate_transition(
            AppointmentStatus::CancellationRequested,
            AppointmentStatus::Scheduled
        )
        .is_ok());

        // pending can never jump straight to completed.
        assert!(validate_transition(
            AppointmentStatus::Pending,
            AppointmentStatus::Completed
        )
        .is_err());

        for terminal in [AppointmentStatus::Completed, AppointmentStatus::Canceled] {
            assert!(valid_transitions(terminal).is_empty());
        }
    }
}
