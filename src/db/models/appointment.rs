use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub organization_id: String,
    pub location_id: String,
    pub client_id: String,
    pub staff_id: String,
    pub service_id: String,
    /// Absolute UTC instants. Wall-clock interpretation happens at the
    /// calendar boundary, never here.
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    /// Money in minor currency units (cents).
    pub total_amount: i64,
    pub deposit_paid: i64,
    pub reminders_sent: i64,
    pub archived: bool,
    pub notes: Option<String>,
    pub private_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Scheduled,
    Completed,
    Canceled,
    CancellationRequested,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Canceled => write!(f, "canceled"),
            AppointmentStatus::CancellationRequested => write!(f, "cancellation_requested"),
        }
    }
}

impl AppointmentStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Canceled
        )
    }

    /// Every status except `canceled` occupies its slot. A
    /// cancellation-requested appointment keeps blocking until a clinic
    /// actor approves the cancellation.
    pub fn blocks_slot(&self) -> bool {
        !matches!(self, AppointmentStatus::Canceled)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookAppointmentRequest {
    pub organization_id: String,
    pub location_id: String,
    pub client_id: String,
    pub staff_id: String,
    pub service_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_amount: i64,
    /// Deposit to charge up front, in minor units. Zero means no payment
    /// is required and the appointment is created directly in `scheduled`.
    #[serde(default)]
    pub deposit_amount: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub notes: Option<String>,
    pub private_notes: Option<String>,
    pub archived: Option<bool>,
    pub reschedule_start: Option<DateTime<Utc>>,
    pub reschedule_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelAppointmentRequest {
    /// When omitted the configured default applies.
    pub retain_deposit: Option<bool>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessCancellationRequest {
    pub approved: bool,
    /// Whether to refund completed charges on approval. Defaults to the
    /// inverse of the configured deposit-retention policy.
    pub issue_refund: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompleteAppointmentRequest {
    /// Final amount for the rendered service. When it exceeds the total
    /// paid so far, the balance is charged through the payment provider.
    pub final_total: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppointmentSearchQuery {
    pub organization_id: Option<String>,
    pub staff_id: Option<String>,
    pub client_id: Option<String>,
    pub status: Option<AppointmentStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
