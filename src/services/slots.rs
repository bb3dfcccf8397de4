use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use crate::config::SchedulingConfig;
use crate::db::models::{Appointment, AvailabilityWindow};
use crate::db::{
    AppointmentRepository, AvailabilityRepository, LocationRepository,
};
use crate::error::{AppError, AppResult};
use crate::services::calendar::{local_to_utc, location_tz, weekday_index, CalendarService, DayHours};
use crate::services::conflict::conflicts_with_any;

/// A discrete candidate booking interval for one staff member on one day.
/// Unavailable slots are emitted too so callers can render a full-day grid
/// with gaps marked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slot {
    /// Wall-clock start in the location's timezone.
    pub time: NaiveTime,
    /// The same instant as an absolute UTC timestamp.
    pub datetime: DateTime<Utc>,
    pub available: bool,
}

pub struct SlotGenerator;

impl SlotGenerator {
    /// Generate the bookable slot grid for (staff, location, date).
    ///
    /// Candidates step from business open by the interval and must fit
    /// entirely inside both the business hours and one of the staff
    /// member's recurring windows for that weekday. A time-off date, a
    /// closed day, or a staff member with no windows all yield an empty
    /// grid.
    pub async fn generate(
        pool: &SqlitePool,
        config: &SchedulingConfig,
        staff_id: &str,
        location_id: &str,
        date: NaiveDate,
        interval_minutes: Option<i64>,
    ) -> AppResult<Vec<Slot>> {
        let interval = interval_minutes.unwrap_or(config.slot_interval_minutes);
        if interval <= 0 {
            return Err(AppError::Validation(
                "slot interval must be positive".to_string(),
            ));
        }

        let location = LocationRepository::find_by_id(pool, location_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("location {location_id}")))?;
        let tz = location_tz(&location, &config.default_timezone);
        let weekday = weekday_index(date);

        if AvailabilityRepository::has_time_off(pool, staff_id, date).await? {
            debug!(staff_id, %date, "Staff has time off, no slots");
            return Ok(Vec::new());
        }

        let hours = CalendarService::hours_for(pool, config, location_id, weekday).await?;
        let windows =
            AvailabilityRepository::find_windows_for_weekday(pool, staff_id, weekday).await?;

        let candidates = build_candidates(date, tz, hours, &windows, interval);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let range_start = candidates[0].0;
        let range_end = candidates[candidates.len() - 1].2;
        let existing = AppointmentRepository::find_blocking_in_range_pool(
            pool, staff_id, range_start, range_end,
        )
        .await?;

        Ok(mark_availability(candidates, &existing))
    }
}

/// Candidate (start_utc, local_time, end_utc) triples inside the
/// intersection of business hours and the staff member's windows.
fn build_candidates(
    date: NaiveDate,
    tz: Tz,
    hours: DayHours,
    windows: &[AvailabilityWindow],
    interval_minutes: i64,
) -> Vec<(DateTime<Utc>, NaiveTime, DateTime<Utc>)> {
    let (open, close) = match hours {
        DayHours::Open { open, close } => (open, close),
        DayHours::Closed => return Vec::new(),
    };
    if windows.is_empty() {
        return Vec::new();
    }

    // Work in minutes from midnight so the close boundary never wraps.
    let open_min = minutes_from_midnight(open);
    let close_min = minutes_from_midnight(close);

    let mut candidates = Vec::new();
    let mut start_min = open_min;
    while start_min + interval_minutes <= close_min {
        let end_min = start_min + interval_minutes;

        let inside_window = windows.iter().any(|w| {
            minutes_from_midnight(w.start_time) <= start_min
                && minutes_from_midnight(w.end_time) >= end_min
        });

        if inside_window {
            let start_local = time_from_minutes(start_min);
            // Skip wall-clock times that do not exist on this date (DST gap).
            if let (Some(start_utc), Some(end_utc)) = (
                local_to_utc(date, start_local, tz),
                local_end_utc(date, end_min, tz),
            ) {
                candidates.push((start_utc, start_local, end_utc));
            }
        }

        start_min += interval_minutes;
    }

    candidates
}

fn mark_availability(
    candidates: Vec<(DateTime<Utc>, NaiveTime, DateTime<Utc>)>,
    existing: &[Appointment],
) -> Vec<Slot> {
    candidates
        .into_iter()
        .map(|(start_utc, local_time, end_utc)| Slot {
            time: local_time,
            datetime: start_utc,
            available: !conflicts_with_any(existing, start_utc, end_utc),
        })
        .collect()
}

fn minutes_from_midnight(time: NaiveTime) -> i64 {
    use chrono::Timelike;
    time.hour() as i64 * 60 + time.minute() as i64
}

fn time_from_minutes(minutes: i64) -> NaiveTime {
    NaiveTime::from_hms_opt((minutes / 60) as u32, (minutes % 60) as u32, 0)
        .unwrap_or(NaiveTime::MIN)
}

/// Candidate ends may land on the next day's midnight (close at 24:00
/// minutes arithmetic); resolve through date + duration instead of a
/// wrapped NaiveTime.
fn local_end_utc(date: NaiveDate, end_min: i64, tz: Tz) -> Option<DateTime<Utc>> {
    if end_min >= 24 * 60 {
        let next = date.succ_opt()?;
        local_to_utc(next, time_from_minutes(end_min - 24 * 60), tz)
    } else {
        local_to_utc(date, time_from_minutes(end_min), tz)
            .or_else(|| {
                // End falls inside a DST gap: the instant still exists,
                // shifted forward. Derive it from the start of day plus
                // the offset in real minutes.
                local_to_utc(date, NaiveTime::MIN, tz)
                    .map(|midnight| midnight + Duration::minutes(end_min))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::AppointmentStatus;
    use chrono::TimeZone;

    fn monday() -> NaiveDate {
        // 2025-06-02 is a Monday.
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    fn t(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn window(start: NaiveTime, end: NaiveTime) -> AvailabilityWindow {
        let now = Utc::now();
        AvailabilityWindow {
            id: "w1".to_string(),
            staff_id: "staff".to_string(),
            weekday: 1,
            start_time: start,
            end_time: end,
            recurring: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn appointment(start: DateTime<Utc>, end: DateTime<Utc>) -> Appointment {
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
            status: AppointmentStatus::Scheduled,
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

    fn open_day() -> DayHours {
        DayHours::Open {
            open: t(9, 0),
            close: t(18, 0),
        }
    }

    #[test]
    fn full_day_with_no_bookings_is_all_available() {
        // Staff works 09:00-17:00, clinic open 09:00-18:00: the grid is
        // bounded by the staff window, 16 half-hour slots 09:00..16:30.
        let windows = vec![window(t(9, 0), t(17, 0))];
        let candidates = build_candidates(monday(), chrono_tz::UTC, open_day(), &windows, 30);
        let slots = mark_availability(candidates, &[]);

        assert_eq!(slots.len(), 16);
        assert_eq!(slots[0].time, t(9, 0));
        assert_eq!(slots[15].time, t(16, 30));
        assert!(slots.iter().all(|s| s.available));
    }

    #[test]
    fn existing_booking_marks_exactly_its_slot_unavailable() {
        let windows = vec![window(t(9, 0), t(17, 0))];
        let existing = vec![appointment(
            Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 2, 10, 30, 0).unwrap(),
        )];

        let candidates = build_candidates(monday(), chrono_tz::UTC, open_day(), &windows, 30);
        let slots = mark_availability(candidates, &existing);

        assert_eq!(slots.len(), 16);
        for slot in &slots {
            if slot.time == t(10, 0) {
                assert!(!slot.available);
            } else {
                assert!(slot.available, "slot {} should be free", slot.time);
            }
        }
    }

    #[test]
    fn identical_inputs_yield_identical_grids() {
        let windows = vec![window(t(9, 0), t(17, 0))];
        let existing = vec![appointment(
            Utc.with_ymd_and_hms(2025, 6, 2, 11, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 2, 11, 30, 0).unwrap(),
        )];

        let first = mark_availability(
            build_candidates(monday(), chrono_tz::UTC, open_day(), &windows, 30),
            &existing,
        );
        let second = mark_availability(
            build_candidates(monday(), chrono_tz::UTC, open_day(), &windows, 30),
            &existing,
        );

        assert_eq!(first, second);
    }

    #[test]
    fn closed_day_yields_no_slots() {
        let windows = vec![window(t(9, 0), t(17, 0))];
        let candidates = build_candidates(monday(), chrono_tz::UTC, DayHours::Closed, &windows, 30);
        assert!(candidates.is_empty());
    }

    #[test]
    fn staff_with_no_windows_gets_no_slots() {
        let candidates = build_candidates(monday(), chrono_tz::UTC, open_day(), &[], 30);
        assert!(candidates.is_empty());
    }

    #[test]
    fn split_shift_excludes_the_gap() {
        let windows = vec![window(t(9, 0), t(12, 0)), window(t(14, 0), t(17, 0))];
        let candidates = build_candidates(monday(), chrono_tz::UTC, open_day(), &windows, 30);
        let times: Vec<NaiveTime> = candidates.iter().map(|c| c.1).collect();

        assert!(times.contains(&t(11, 30)));
        assert!(!times.contains(&t(12, 0)));
        assert!(!times.contains(&t(13, 30)));
        assert!(times.contains(&t(14, 0)));
        assert_eq!(times.len(), 12);
    }

    #[test]
    fn slots_respect_location_timezone() {
        let tz: Tz = "Europe/Istanbul".parse().unwrap();
        let windows = vec![window(t(9, 0), t(10, 0))];
        let candidates = build_candidates(monday(), tz, open_day(), &windows, 30);

        assert_eq!(candidates.len(), 2);
        // 09:00 Istanbul is 06:00 UTC.
        assert_eq!(
            candidates[0].0,
            Utc.with_ymd_and_hms(2025, 6, 2, 6, 0, 0).unwrap()
        );
    }

    #[test]
    fn slots_are_chronological() {
        let windows = vec![window(t(9, 0), t(17, 0))];
        let candidates = build_candidates(monday(), chrono_tz::UTC, open_day(), &windows, 30);
        for pair in candidates.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
    }

    #[tokio::test]
    async fn time_off_empties_the_grid() {
        use crate::db::models::CreateAvailabilityWindow;
        use crate::db::{AvailabilityRepository, LocationRepository, StaffRepository};

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let config = crate::config::Config::default().scheduling;
        let location = LocationRepository::create(&pool, "org-1", "Main clinic", "UTC")
            .await
            .unwrap();
        let staff = StaffRepository::create(&pool, "org-1", "Dana Reyes")
            .await
            .unwrap();
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

        let slots = SlotGenerator::generate(&pool, &config, &staff.id, &location.id, monday(), None)
            .await
            .unwrap();
        assert!(!slots.is_empty());

        AvailabilityRepository::add_time_off(&pool, &staff.id, monday())
            .await
            .unwrap();
        let slots = SlotGenerator::generate(&pool, &config, &staff.id, &location.id, monday(), None)
            .await
            .unwrap();
        assert!(slots.is_empty());
    }
}
