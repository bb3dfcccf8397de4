use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use sqlx::SqlitePool;
use tracing::debug;

use crate::config::SchedulingConfig;
use crate::db::models::{AvailabilityWindow, Staff};
use crate::db::{AvailabilityRepository, LocationRepository, StaffRepository};
use crate::error::{AppError, AppResult};
use crate::services::calendar::{location_tz, weekday_index};
use crate::services::conflict::ConflictDetector;

/// Staff matching: which active staff in an organization can take a given
/// time window. Availability qualifies only when the requested range is
/// fully contained in a single recurring window; partial overlap does not
/// count. Qualifying staff are then filtered through the conflict
/// detector. Results are ordered by display name for a deterministic UI.
pub struct StaffMatcher;

impl StaffMatcher {
    pub async fn find_available_staff(
        pool: &SqlitePool,
        config: &SchedulingConfig,
        organization_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        location_id: Option<&str>,
    ) -> AppResult<Vec<Staff>> {
        if start >= end {
            return Err(AppError::InvalidTimeRange(
                "start must be before end".to_string(),
            ));
        }

        // Recurring windows are wall-clock rules; resolve them in the
        // location's timezone when one is given, otherwise the configured
        // default.
        let tz: Tz = match location_id {
            Some(id) => {
                let location = LocationRepository::find_by_id(pool, id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("location {id}")))?;
                location_tz(&location, &config.default_timezone)
            }
            None => config
                .default_timezone
                .parse()
                .unwrap_or(chrono_tz::UTC),
        };

        let local_start = start.with_timezone(&tz);
        let local_end = end.with_timezone(&tz);
        if local_start.date_naive() != local_end.date_naive() {
            return Err(AppError::InvalidTimeRange(
                "requested range must fall within a single day".to_string(),
            ));
        }

        let date = local_start.date_naive();
        let weekday = weekday_index(date);
        let start_time = local_start.time();
        let end_time = local_end.time();

        let candidates = StaffRepository::find_active_in_organization(pool, organization_id).await?;
        let mut available = Vec::new();

        for staff in candidates {
            if AvailabilityRepository::has_time_off(pool, &staff.id, date).await? {
                continue;
            }

            let windows =
                AvailabilityRepository::find_windows_for_weekday(pool, &staff.id, weekday).await?;
            if !window_contains_range(&windows, start_time, end_time) {
                continue;
            }

            if ConflictDetector::is_free(pool, &staff.id, start, end).await? {
                available.push(staff);
            }
        }

        debug!(
            organization_id,
            matched = available.len(),
            "Staff matching completed"
        );

        Ok(available)
    }
}

/// The requested range must be fully contained in one window.
pub fn window_contains_range(
    windows: &[AvailabilityWindow],
    start: NaiveTime,
    end: NaiveTime,
) -> bool {
    windows
        .iter()
        .any(|w| w.start_time <= start && w.end_time >= end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn window(start: NaiveTime, end: NaiveTime) -> AvailabilityWindow {
        let now = Utc::now();
        AvailabilityWindow {
            id: "w".to_string(),
            staff_id: "s".to_string(),
            weekday: 1,
            start_time: start,
            end_time: end,
            recurring: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn fully_contained_range_qualifies() {
        let windows = vec![window(t(9, 0), t(17, 0))];
        assert!(window_contains_range(&windows, t(10, 0), t(11, 0)));
        // Exact fit counts as containment.
        assert!(window_contains_range(&windows, t(9, 0), t(17, 0)));
    }

    #[test]
    fn partial_overlap_does_not_qualify() {
        let windows = vec![window(t(9, 0), t(12, 0))];
        assert!(!window_contains_range(&windows, t(11, 0), t(13, 0)));
        assert!(!window_contains_range(&windows, t(8, 0), t(10, 0)));
    }

    #[test]
    fn containment_must_be_within_one_window() {
        // Adjacent split shifts do not merge: a range spanning the gap
        // boundary fails even though each half is covered.
        let windows = vec![window(t(9, 0), t(12, 0)), window(t(12, 0), t(17, 0))];
        assert!(!window_contains_range(&windows, t(11, 0), t(13, 0)));
        assert!(window_contains_range(&windows, t(13, 0), t(14, 0)));
    }

    #[test]
    fn no_windows_never_qualifies() {
        assert!(!window_contains_range(&[], t(10, 0), t(11, 0)));
    }

    #[tokio::test]
    async fn matcher_filters_time_off_and_conflicts_and_orders_by_name() {
        use crate::db::models::{AppointmentStatus, CreateAvailabilityWindow};
        use crate::db::repository::appointment::new_appointment;
        use crate::db::models::BookAppointmentRequest;
        use chrono::{NaiveDate, TimeZone};

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let config = crate::config::Config::default().scheduling;

        // Four staff, inserted out of name order. All work Mondays
        // 09:00-17:00.
        let mut ids = Vec::new();
        for name in ["Casey Fox", "Blake Om", "Drew Kim", "Avery Lin"] {
            let staff = StaffRepository::create(&pool, "org-1", name).await.unwrap();
            AvailabilityRepository::create_window(
                &pool,
                CreateAvailabilityWindow {
                    staff_id: staff.id.clone(),
                    weekday: 1,
                    start_time: t(9, 0),
                    end_time: t(17, 0),
                    recurring: true,
                },
            )
            .await
            .unwrap();
            ids.push(staff.id);
        }

        // 2025-06-02 is a Monday. Casey is off; Drew already has a
        // booking over the requested range.
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        AvailabilityRepository::add_time_off(&pool, &ids[0], date)
            .await
            .unwrap();

        let start = Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 6, 2, 10, 30, 0).unwrap();

        let location = crate::db::LocationRepository::create(&pool, "org-1", "Main clinic", "UTC")
            .await
            .unwrap();

        let blocking = new_appointment(
            &BookAppointmentRequest {
                organization_id: "org-1".to_string(),
                location_id: location.id.clone(),
                client_id: "client-1".to_string(),
                staff_id: ids[2].clone(),
                service_id: "svc-1".to_string(),
                start_time: start,
                end_time: end,
                total_amount: 0,
                deposit_amount: 0,
                notes: None,
            },
            AppointmentStatus::Scheduled,
        );
        let mut conn = pool.acquire().await.unwrap();
        crate::db::AppointmentRepository::insert(&mut conn, &blocking)
            .await
            .unwrap();
        drop(conn);

        let available =
            StaffMatcher::find_available_staff(&pool, &config, "org-1", start, end, None)
                .await
                .unwrap();

        // Blake and Avery both qualify; the result comes back ordered by
        // display name regardless of insertion order.
        let names: Vec<&str> = available.iter().map(|s| s.display_name.as_str()).collect();
        assert_eq!(names, vec!["Avery Lin", "Blake Om"]);
    }
}
