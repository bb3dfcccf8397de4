use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RewardConfig;
use crate::error::AppResult;

/// Reward accrual on completed, paid appointments. The event is keyed by
/// (appointment_id, "appointment") so repeated webhook delivery or a
/// retried completion cannot double-award points.
pub struct RewardService;

impl RewardService {
    pub async fn award_for_appointment(
        pool: &SqlitePool,
        config: &RewardConfig,
        appointment_id: &str,
        client_id: &str,
        amount_paid: i64,
    ) -> AppResult<()> {
        let points = (amount_paid / 100) * config.points_per_currency_unit;
        if points <= 0 {
            return Ok(());
        }

        let result = sqlx::query(
            r#"
            INSERT INTO reward_events
                (id, reference_id, reference_type, client_id, points, created_at)
            VALUES (?, ?, 'appointment', ?, ?, ?)
            ON CONFLICT (reference_id, reference_type) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(appointment_id)
        .bind(client_id)
        .bind(points)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(appointment_id, "Reward already recorded, skipping");
            return Ok(());
        }

        info!(appointment_id, client_id, points, "Recorded reward accrual");

        // Best-effort push to the external reward system; the durable row
        // above is the source of truth for idempotency.
        if let Some(ref base_url) = config.base_url {
            let response = reqwest::Client::new()
                .post(format!("{}/points", base_url.trim_end_matches('/')))
                .json(&serde_json::json!({
                    "reference_id": appointment_id,
                    "reference_type": "appointment",
                    "client_id": client_id,
                    "points": points,
                }))
                .send()
                .await;

            if let Err(e) = response {
                warn!(appointment_id, error = ?e, "Reward provider push failed");
            }
        }

        Ok(())
    }
}
