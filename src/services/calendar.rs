use chrono::{offset::LocalResult, DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use sqlx::SqlitePool;
use tracing::warn;

use crate::config::SchedulingConfig;
use crate::db::models::Location;
use crate::db::BusinessHoursRepository;
use crate::error::AppResult;

/// Resolved hours for one weekday at one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayHours {
    Open { open: NaiveTime, close: NaiveTime },
    Closed,
}

/// Weekday index used across the schema: 0 = Sunday .. 6 = Saturday.
pub fn weekday_index(date: NaiveDate) -> i64 {
    date.weekday().num_days_from_sunday() as i64
}

/// Parse a location's timezone column, falling back to the configured
/// default when it does not name a known IANA zone.
pub fn location_tz(location: &Location, default_timezone: &str) -> Tz {
    location.timezone.parse::<Tz>().unwrap_or_else(|_| {
        warn!(
            location_id = %location.id,
            timezone = %location.timezone,
            "Unknown location timezone, using configured default"
        );
        default_timezone.parse::<Tz>().unwrap_or(chrono_tz::UTC)
    })
}

/// Convert a local calendar date + wall-clock time in `tz` to an absolute
/// UTC instant. Returns None for local times that do not exist (DST spring
/// gap); ambiguous times (DST fall back) resolve to the earlier instant.
pub fn local_to_utc(date: NaiveDate, time: NaiveTime, tz: Tz) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&date.and_time(time)) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earlier, _) => Some(earlier.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

pub struct CalendarService;

impl CalendarService {
    /// Resolve business hours for (location, weekday).
    ///
    /// A weekday row wins. With no row for that weekday, the day is closed
    /// when the location has any configured hours at all; a location with
    /// zero configured rows falls back to the explicit default hours from
    /// config so an unconfigured clinic is bookable rather than silently
    /// closed.
    pub async fn hours_for(
        pool: &SqlitePool,
        config: &SchedulingConfig,
        location_id: &str,
        weekday: i64,
    ) -> AppResult<DayHours> {
        if let Some(hours) =
            BusinessHoursRepository::find_for_weekday(pool, location_id, weekday).await?
        {
            return Ok(DayHours::Open {
                open: hours.open_time,
                close: hours.close_time,
            });
        }

        let configured = BusinessHoursRepository::count_for_location(pool, location_id).await?;
        if configured == 0 {
            return Ok(DayHours::Open {
                open: config.default_open,
                close: config.default_close,
            });
        }

        Ok(DayHours::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(timezone: &str) -> Location {
        let now = Utc::now();
        Location {
            id: "loc".to_string(),
            organization_id: "org".to_string(),
            name: "Main clinic".to_string(),
            timezone: timezone.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn weekday_index_starts_at_sunday() {
        // 2025-06-01 is a Sunday.
        assert_eq!(weekday_index(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()), 0);
        assert_eq!(weekday_index(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()), 1);
        assert_eq!(weekday_index(NaiveDate::from_ymd_opt(2025, 6, 7).unwrap()), 6);
    }

    #[test]
    fn local_conversion_uses_location_offset() {
        let tz = location_tz(&location("Europe/Istanbul"), "UTC");
        let instant = local_to_utc(
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            tz,
        )
        .unwrap();

        // Istanbul is UTC+3 year round.
        assert_eq!(
            instant,
            Utc.with_ymd_and_hms(2025, 6, 2, 6, 0, 0).unwrap()
        );
    }

    #[test]
    fn dst_gap_times_do_not_exist() {
        // US DST starts 2025-03-09; 02:30 local never happens in New York.
        let tz: Tz = "America/New_York".parse().unwrap();
        let gap = local_to_utc(
            NaiveDate::from_ymd_opt(2025, 3, 9).unwrap(),
            NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
            tz,
        );
        assert!(gap.is_none());

        // 03:00 exists again (EDT, UTC-4).
        let after = local_to_utc(
            NaiveDate::from_ymd_opt(2025, 3, 9).unwrap(),
            NaiveTime::from_hms_opt(3, 0, 0).unwrap(),
            tz,
        )
        .unwrap();
        assert_eq!(after, Utc.with_ymd_and_hms(2025, 3, 9, 7, 0, 0).unwrap());
    }

    #[test]
    fn unknown_timezone_falls_back_to_default() {
        let tz = location_tz(&location("Not/AZone"), "UTC");
        assert_eq!(tz, chrono_tz::UTC);
    }
}
