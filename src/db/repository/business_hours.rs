use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// Business Hours Repository
// ============================================================================

pub struct BusinessHoursRepository;

impl BusinessHoursRepository {
    pub async fn find_for_location(
        pool: &SqlitePool,
        location_id: &str,
    ) -> AppResult<Vec<BusinessHours>> {
        let hours = sqlx::query_as::<_, BusinessHours>(
            r#"
            SELECT id, location_id, weekday, open_time, close_time, created_at, updated_at
            FROM business_hours
            WHERE location_id = ?
            ORDER BY weekday ASC
            "#,
        )
        .bind(location_id)
        .fetch_all(pool)
        .await?;

        Ok(hours)
    }

    pub async fn find_for_weekday(
        pool: &SqlitePool,
        location_id: &str,
        weekday: i64,
    ) -> AppResult<Option<BusinessHours>> {
        let hours = sqlx::query_as::<_, BusinessHours>(
            r#"
            SELECT id, location_id, weekday, open_time, close_time, created_at, updated_at
            FROM business_hours
            WHERE location_id = ? AND weekday = ?
            "#,
        )
        .bind(location_id)
        .bind(weekday)
        .fetch_optional(pool)
        .await?;

        Ok(hours)
    }

    pub async fn count_for_location(pool: &SqlitePool, location_id: &str) -> AppResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM business_hours WHERE location_id = ?")
                .bind(location_id)
                .fetch_one(pool)
                .await?;

        Ok(count)
    }

    /// Replace the full weekly schedule for a location. Days absent from
    /// `entries` become closed days.
    pub async fn replace_for_location(
        pool: &SqlitePool,
        location_id: &str,
        entries: Vec<SetBusinessHours>,
    ) -> AppResult<Vec<BusinessHours>> {
        for entry in &entries {
            if entry.open_time >= entry.close_time {
                return Err(AppError::InvalidTimeRange(
                    "business hours open must be before close".to_string(),
                ));
            }
            if !(0..=6).contains(&entry.weekday) {
                return Err(AppError::Validation(
                    "weekday must be between 0 and 6".to_string(),
                ));
            }
        }

        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM business_hours WHERE location_id = ?")
            .bind(location_id)
            .execute(&mut *tx)
            .await?;

        let now = Utc::now();
        for entry in &entries {
            sqlx::query(
                r#"
                INSERT INTO business_hours
                    (id, location_id, weekday, open_time, close_time, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(location_id)
            .bind(entry.weekday)
            .bind(entry.open_time)
            .bind(entry.close_time)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Self::find_for_location(pool, location_id).await
    }
}
