use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::*;
use crate::error::AppResult;

// ============================================================================
// Location Repository
// ============================================================================

pub struct LocationRepository;

impl LocationRepository {
    pub async fn create(
        pool: &SqlitePool,
        organization_id: &str,
        name: &str,
        timezone: &str,
    ) -> AppResult<Location> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO locations (id, organization_id, name, timezone, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(organization_id)
        .bind(name)
        .bind(timezone)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Ok(Location {
            id,
            organization_id: organization_id.to_string(),
            name: name.to_string(),
            timezone: timezone.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Location>> {
        let location = sqlx::query_as::<_, Location>(
            r#"
            SELECT id, organization_id, name, timezone, created_at, updated_at
            FROM locations
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(location)
    }
}
