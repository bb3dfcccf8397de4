use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// Availability Repository (recurring windows + time off)
// ============================================================================

pub struct AvailabilityRepository;

impl AvailabilityRepository {
    pub async fn create_window(
        pool: &SqlitePool,
        create: CreateAvailabilityWindow,
    ) -> AppResult<AvailabilityWindow> {
        if create.start_time >= create.end_time {
            return Err(AppError::InvalidTimeRange(
                "availability window start must be before end".to_string(),
            ));
        }
        if !(0..=6).contains(&create.weekday) {
            return Err(AppError::Validation(
                "weekday must be between 0 and 6".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO availability_windows
                (id, staff_id, weekday, start_time, end_time, recurring, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&create.staff_id)
        .bind(create.weekday)
        .bind(create.start_time)
        .bind(create.end_time)
        .bind(create.recurring)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Ok(AvailabilityWindow {
            id,
            staff_id: create.staff_id,
            weekday: create.weekday,
            start_time: create.start_time,
            end_time: create.end_time,
            recurring: create.recurring,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn find_windows_for_staff(
        pool: &SqlitePool,
        staff_id: &str,
    ) -> AppResult<Vec<AvailabilityWindow>> {
        let windows = sqlx::query_as::<_, AvailabilityWindow>(
            r#"
            SELECT id, staff_id, weekday, start_time, end_time, recurring, created_at, updated_at
            FROM availability_windows
            WHERE staff_id = ?
            ORDER BY weekday ASC, start_time ASC
            "#,
        )
        .bind(staff_id)
        .fetch_all(pool)
        .await?;

        Ok(windows)
    }

    pub async fn find_windows_for_weekday(
        pool: &SqlitePool,
        staff_id: &str,
        weekday: i64,
    ) -> AppResult<Vec<AvailabilityWindow>> {
        let windows = sqlx::query_as::<_, AvailabilityWindow>(
            r#"
            SELECT id, staff_id, weekday, start_time, end_time, recurring, created_at, updated_at
            FROM availability_windows
            WHERE staff_id = ? AND weekday = ?
            ORDER BY start_time ASC
            "#,
        )
        .bind(staff_id)
        .bind(weekday)
        .fetch_all(pool)
        .await?;

        Ok(windows)
    }

    /// Deleting a window never cascades to existing appointments.
    pub async fn delete_window(pool: &SqlitePool, id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM availability_windows WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn add_time_off(
        pool: &SqlitePool,
        staff_id: &str,
        date: NaiveDate,
    ) -> AppResult<TimeOff> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO time_off (id, staff_id, date, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (staff_id, date) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(staff_id)
        .bind(date)
        .bind(now)
        .execute(pool)
        .await?;

        Ok(TimeOff {
            id,
            staff_id: staff_id.to_string(),
            date,
            created_at: now,
        })
    }

    pub async fn remove_time_off(
        pool: &SqlitePool,
        staff_id: &str,
        date: NaiveDate,
    ) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM time_off WHERE staff_id = ? AND date = ?")
            .bind(staff_id)
            .bind(date)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn has_time_off(
        pool: &SqlitePool,
        staff_id: &str,
        date: NaiveDate,
    ) -> AppResult<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM time_off WHERE staff_id = ? AND date = ?")
                .bind(staff_id)
                .bind(date)
                .fetch_optional(pool)
                .await?;

        Ok(row.is_some())
    }

    pub async fn list_time_off(pool: &SqlitePool, staff_id: &str) -> AppResult<Vec<TimeOff>> {
        let entries = sqlx::query_as::<_, TimeOff>(
            "SELECT id, staff_id, date, created_at FROM time_off WHERE staff_id = ? ORDER BY date ASC",
        )
        .bind(staff_id)
        .fetch_all(pool)
        .await?;

        Ok(entries)
    }
}
