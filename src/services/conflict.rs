use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::SqlitePool;
use tracing::debug;

use crate::db::models::Appointment;
use crate::db::AppointmentRepository;
use crate::error::AppResult;

/// Half-open interval overlap: two ranges conflict iff each starts before
/// the other ends. Touching boundaries (one ends exactly when the other
/// starts) are not a conflict.
///
/// This predicate is the single source of truth for overlap semantics.
/// Slot generation, staff matching and booking validation all route
/// through it.
pub fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && a_end > b_start
}

/// True when the candidate range overlaps any appointment in `existing`
/// whose status still occupies its slot.
pub fn conflicts_with_any(
    existing: &[Appointment],
    candidate_start: DateTime<Utc>,
    candidate_end: DateTime<Utc>,
) -> bool {
    existing.iter().any(|appointment| {
        appointment.status.blocks_slot()
            && overlaps(
                candidate_start,
                candidate_end,
                appointment.start_time,
                appointment.end_time,
            )
    })
}

pub struct ConflictDetector;

impl ConflictDetector {
    /// Conflict check against stored appointments, on the caller's
    /// connection so booking can run it inside its write transaction.
    pub async fn check(
        conn: &mut SqliteConnection,
        staff_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_appointment_id: Option<&str>,
    ) -> AppResult<Vec<Appointment>> {
        let blocking = AppointmentRepository::find_blocking_in_range(
            conn,
            staff_id,
            start,
            end,
            exclude_appointment_id,
        )
        .await?;

        if !blocking.is_empty() {
            debug!(
                staff_id,
                conflicts = blocking.len(),
                "Conflict check found blocking appointments"
            );
        }

        Ok(blocking)
    }

    pub async fn is_free(
        pool: &SqlitePool,
        staff_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<bool> {
        let blocking =
            AppointmentRepository::find_blocking_in_range_pool(pool, staff_id, start, end).await?;

        Ok(!conflicts_with_any(&blocking, start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Appointment, AppointmentStatus};
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, hour, minute, 0).unwrap()
    }

    fn appointment(start: DateTime<Utc>, end: DateTime<Utc>, status: AppointmentStatus) -> Appointment {
        let now = Utc::now();
        Appointment {
            id: "a1".to_string(),
            organization_id: "org".to_string(),
            location_id: "loc".to_string(),
            client_id: "client".to_string(),
            staff_id: "staff".to_string(),
            service_id: "svc".to_string(),
            start_time: start,
            end_time: end,
            status,
            total_amount: 0,
            deposit_paid: 0,
            reminders_sent: 0,
            archived: false,
            notes: None,
            private_notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn overlapping_ranges_conflict() {
        assert!(overlaps(at(10, 0), at(11, 0), at(10, 30), at(11, 30)));
        assert!(overlaps(at(10, 0), at(11, 0), at(9, 30), at(10, 30)));
        // Containment in both directions.
        assert!(overlaps(at(10, 0), at(11, 0), at(10, 15), at(10, 45)));
        assert!(overlaps(at(10, 15), at(10, 45), at(10, 0), at(11, 0)));
    }

    #[test]
    fn touching_boundaries_do_not_conflict() {
        // One appointment ending at 10:00, another starting at 10:00.
        assert!(!overlaps(at(9, 0), at(10, 0), at(10, 0), at(11, 0)));
        assert!(!overlaps(at(10, 0), at(11, 0), at(9, 0), at(10, 0)));
    }

    #[test]
    fn disjoint_ranges_do_not_conflict() {
        assert!(!overlaps(at(9, 0), at(9, 30), at(10, 0), at(10, 30)));
    }

    #[test]
    fn overlap_is_symmetric() {
        let cases = [
            (at(10, 0), at(11, 0), at(10, 30), at(11, 30)),
            (at(9, 0), at(10, 0), at(10, 0), at(11, 0)),
            (at(8, 0), at(9, 0), at(12, 0), at(13, 0)),
        ];
        for (a_start, a_end, b_start, b_end) in cases {
            assert_eq!(
                overlaps(a_start, a_end, b_start, b_end),
                overlaps(b_start, b_end, a_start, a_end)
            );
        }
    }

    #[test]
    fn canceled_appointments_release_the_slot() {
        let existing = vec![appointment(at(10, 0), at(10, 30), AppointmentStatus::Canceled)];
        assert!(!conflicts_with_any(&existing, at(10, 0), at(10, 30)));
    }

    #[test]
    fn cancellation_requested_still_blocks() {
        let existing = vec![appointment(
            at(10, 0),
            at(10, 30),
            AppointmentStatus::CancellationRequested,
        )];
        assert!(conflicts_with_any(&existing, at(10, 0), at(10, 30)));
    }

    #[test]
    fn pending_and_scheduled_block() {
        for status in [
            AppointmentStatus::Pending,
            AppointmentStatus::Scheduled,
            AppointmentStatus::Completed,
        ] {
            let existing = vec![appointment(at(10, 0), at(10, 30), status)];
            assert!(conflicts_with_any(&existing, at(10, 15), at(10, 45)));
        }
    }
}
