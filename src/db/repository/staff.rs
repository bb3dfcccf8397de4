use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::*;
use crate::error::AppResult;

// ============================================================================
// Staff Repository
// ============================================================================

pub struct StaffRepository;

impl StaffRepository {
    pub async fn create(
        pool: &SqlitePool,
        organization_id: &str,
        display_name: &str,
    ) -> AppResult<Staff> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO staff (id, organization_id, display_name, active, created_at, updated_at)
            VALUES (?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(organization_id)
        .bind(display_name)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Ok(Staff {
            id,
            organization_id: organization_id.to_string(),
            display_name: display_name.to_string(),
            active: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Staff>> {
        let staff = sqlx::query_as::<_, Staff>(
            r#"
            SELECT id, organization_id, display_name, active, created_at, updated_at
            FROM staff
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(staff)
    }

    pub async fn find_active_in_organization(
        pool: &SqlitePool,
        organization_id: &str,
    ) -> AppResult<Vec<Staff>> {
        let staff = sqlx::query_as::<_, Staff>(
            r#"
            SELECT id, organization_id, display_name, active, created_at, updated_at
            FROM staff
            WHERE organization_id = ? AND active = 1
            ORDER BY display_name ASC
            "#,
        )
        .bind(organization_id)
        .fetch_all(pool)
        .await?;

        Ok(staff)
    }
}
