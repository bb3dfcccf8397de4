use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::*;
use crate::error::AppResult;

// ============================================================================
// Appointment Repository
// ============================================================================

const APPOINTMENT_COLUMNS: &str = r#"
    id, organization_id, location_id, client_id, staff_id, service_id,
    start_time, end_time, status, total_amount, deposit_paid,
    reminders_sent, archived, notes, private_notes, created_at, updated_at
"#;

pub struct AppointmentRepository;

impl AppointmentRepository {
    /// Insert a new appointment row. Callers run this inside the same
    /// write transaction as the conflict check; see `LifecycleService`.
    pub async fn insert(
        conn: &mut SqliteConnection,
        appointment: &Appointment,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO appointments (
                id, organization_id, location_id, client_id, staff_id, service_id,
                start_time, end_time, status, total_amount, deposit_paid,
                reminders_sent, archived, notes, private_notes, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&appointment.id)
        .bind(&appointment.organization_id)
        .bind(&appointment.location_id)
        .bind(&appointment.client_id)
        .bind(&appointment.staff_id)
        .bind(&appointment.service_id)
        .bind(appointment.start_time)
        .bind(appointment.end_time)
        .bind(appointment.status)
        .bind(appointment.total_amount)
        .bind(appointment.deposit_paid)
        .bind(appointment.reminders_sent)
        .bind(appointment.archived)
        .bind(&appointment.notes)
        .bind(&appointment.private_notes)
        .bind(appointment.created_at)
        .bind(appointment.updated_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Appointment>> {
        let appointment = sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(appointment)
    }

    pub async fn find_by_id_tx(
        conn: &mut SqliteConnection,
        id: &str,
    ) -> AppResult<Option<Appointment>> {
        let appointment = sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(appointment)
    }

    /// Appointments for a staff member whose [start, end) range overlaps
    /// the given window and whose status still occupies the slot. This is
    /// the conflict set for the overlap predicate.
    pub async fn find_blocking_in_range(
        conn: &mut SqliteConnection,
        staff_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        exclude_id: Option<&str>,
    ) -> AppResult<Vec<Appointment>> {
        let exclude = exclude_id.unwrap_or("");
        let appointments = sqlx::query_as::<_, Appointment>(&format!(
            r#"
            SELECT {APPOINTMENT_COLUMNS}
            FROM appointments
            WHERE staff_id = ?
              AND status != 'canceled'
              AND start_time < ?
              AND end_time > ?
              AND id != ?
            ORDER BY start_time ASC
            "#
        ))
        .bind(staff_id)
        .bind(to)
        .bind(from)
        .bind(exclude)
        .fetch_all(conn)
        .await?;

        Ok(appointments)
    }

    /// Pool variant of `find_blocking_in_range` for read-only callers
    /// (slot generation, staff matching).
    pub async fn find_blocking_in_range_pool(
        pool: &SqlitePool,
        staff_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<Appointment>> {
        let mut conn = pool.acquire().await?;
        Self::find_blocking_in_range(&mut conn, staff_id, from, to, None).await
    }

    pub async fn update_status(
        conn: &mut SqliteConnection,
        id: &str,
        status: AppointmentStatus,
    ) -> AppResult<()> {
        sqlx::query("UPDATE appointments SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(conn)
            .await?;

        Ok(())
    }

    pub async fn update_times(
        conn: &mut SqliteConnection,
        id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE appointments SET start_time = ?, end_time = ?, updated_at = ? WHERE id = ?",
        )
        .bind(start)
        .bind(end)
        .bind(Utc::now())
        .bind(id)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn update_deposit_paid(
        conn: &mut SqliteConnection,
        id: &str,
        deposit_paid: i64,
    ) -> AppResult<()> {
        sqlx::query("UPDATE appointments SET deposit_paid = ?, updated_at = ? WHERE id = ?")
            .bind(deposit_paid)
            .bind(Utc::now())
            .bind(id)
            .execute(conn)
            .await?;

        Ok(())
    }

    pub async fn update_total_amount(
        conn: &mut SqliteConnection,
        id: &str,
        total_amount: i64,
    ) -> AppResult<()> {
        sqlx::query("UPDATE appointments SET total_amount = ?, updated_at = ? WHERE id = ?")
            .bind(total_amount)
            .bind(Utc::now())
            .bind(id)
            .execute(conn)
            .await?;

        Ok(())
    }

    pub async fn update_details(
        pool: &SqlitePool,
        id: &str,
        notes: Option<&str>,
        private_notes: Option<&str>,
        archived: Option<bool>,
    ) -> AppResult<Option<Appointment>> {
        let current = match Self::find_by_id(pool, id).await? {
            Some(a) => a,
            None => return Ok(None),
        };

        let notes = notes.map(str::to_string).or(current.notes);
        let private_notes = private_notes.map(str::to_string).or(current.private_notes);
        let archived = archived.unwrap_or(current.archived);

        sqlx::query(
            r#"
            UPDATE appointments
            SET notes = ?, private_notes = ?, archived = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&notes)
        .bind(&private_notes)
        .bind(archived)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

        Self::find_by_id(pool, id).await
    }

    pub async fn search(
        pool: &SqlitePool,
        query: &AppointmentSearchQuery,
    ) -> AppResult<Vec<Appointment>> {
        let limit = query.limit.unwrap_or(50).clamp(1, 200);
        let offset = query.offset.unwrap_or(0).max(0);

        let mut sql = format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE 1 = 1"
        );
        if query.organization_id.is_some() {
            sql.push_str(" AND organization_id = ?");
        }
        if query.staff_id.is_some() {
            sql.push_str(" AND staff_id = ?");
        }
        if query.client_id.is_some() {
            sql.push_str(" AND client_id = ?");
        }
        if query.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if query.from.is_some() {
            sql.push_str(" AND start_time >= ?");
        }
        if query.to.is_some() {
            sql.push_str(" AND start_time <= ?");
        }
        sql.push_str(" ORDER BY start_time ASC LIMIT ? OFFSET ?");

        let mut q = sqlx::query_as::<_, Appointment>(&sql);
        if let Some(ref v) = query.organization_id {
            q = q.bind(v);
        }
        if let Some(ref v) = query.staff_id {
            q = q.bind(v);
        }
        if let Some(ref v) = query.client_id {
            q = q.bind(v);
        }
        if let Some(v) = query.status {
            q = q.bind(v);
        }
        if let Some(v) = query.from {
            q = q.bind(v);
        }
        if let Some(v) = query.to {
            q = q.bind(v);
        }

        let appointments = q.bind(limit).bind(offset).fetch_all(pool).await?;
        Ok(appointments)
    }

    /// Scheduled appointments starting inside the reminder window that
    /// have not yet hit the per-appointment reminder cap.
    pub async fn find_due_reminders(
        pool: &SqlitePool,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
        max_reminders: i64,
    ) -> AppResult<Vec<Appointment>> {
        let appointments = sqlx::query_as::<_, Appointment>(&format!(
            r#"
            SELECT {APPOINTMENT_COLUMNS}
            FROM appointments
            WHERE status = 'scheduled'
              AND start_time > ?
              AND start_time <= ?
              AND reminders_sent < ?
            ORDER BY start_time ASC
            "#
        ))
        .bind(now)
        .bind(until)
        .bind(max_reminders)
        .fetch_all(pool)
        .await?;

        Ok(appointments)
    }

    pub async fn increment_reminders_sent(pool: &SqlitePool, id: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE appointments SET reminders_sent = reminders_sent + 1, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }
}

/// Build a new appointment row from a validated booking request.
pub fn new_appointment(request: &BookAppointmentRequest, status: AppointmentStatus) -> Appointment {
    let now = Utc::now();
    Appointment {
        id: Uuid::new_v4().to_string(),
        organization_id: request.organization_id.clone(),
        location_id: request.location_id.clone(),
        client_id: request.client_id.clone(),
        staff_id: request.staff_id.clone(),
        service_id: request.service_id.clone(),
        start_time: request.start_time,
        end_time: request.end_time,
        status,
        total_amount: request.total_amount,
        deposit_paid: 0,
        reminders_sent: 0,
        archived: false,
        notes: request.notes.clone(),
        private_notes: None,
        created_at: now,
        updated_at: now,
    }
}
