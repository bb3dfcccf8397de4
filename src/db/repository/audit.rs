use chrono::Utc;
use sqlx::sqlite::SqliteConnection;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::*;
use crate::error::AppResult;

// ============================================================================
// Audit Log Repository
// ============================================================================

pub struct AuditLogRepository;

impl AuditLogRepository {
    /// Append an audit entry. Runs on the caller's connection so the entry
    /// commits atomically with the transition it records.
    #[allow(clippy::too_many_arguments)]
    pub async fn append(
        conn: &mut SqliteConnection,
        appointment_id: &str,
        actor: &Actor,
        action: &str,
        previous_status: Option<AppointmentStatus>,
        new_status: Option<AppointmentStatus>,
        detail: Option<serde_json::Value>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log
                (id, appointment_id, actor_id, actor_role, action,
                 previous_status, new_status, detail, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(appointment_id)
        .bind(&actor.id)
        .bind(actor.role.as_str())
        .bind(action)
        .bind(previous_status.map(|s| s.to_string()))
        .bind(new_status.map(|s| s.to_string()))
        .bind(detail.map(|d| d.to_string()))
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn find_for_appointment(
        pool: &SqlitePool,
        appointment_id: &str,
    ) -> AppResult<Vec<AuditLogEntry>> {
        let entries = sqlx::query_as::<_, AuditLogEntry>(
            r#"
            SELECT id, appointment_id, actor_id, actor_role, action,
                   previous_status, new_status, detail, created_at
            FROM audit_log
            WHERE appointment_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(appointment_id)
        .fetch_all(pool)
        .await?;

        Ok(entries)
    }
}
