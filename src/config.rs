use std::env;

use chrono::NaiveTime;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub scheduling: SchedulingConfig,
    pub cancellation: CancellationConfig,
    pub payments: PaymentConfig,
    pub notifications: NotificationConfig,
    pub rewards: RewardConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulingConfig {
    /// Granularity of generated booking slots, in minutes.
    pub slot_interval_minutes: i64,
    /// Hours applied when a location has no business-hours rows configured
    /// at all. An explicit setting rather than a silent fallback so that a
    /// misconfigured location is visible in config instead of masked.
    pub default_open: NaiveTime,
    pub default_close: NaiveTime,
    /// Timezone applied to locations with an unparseable timezone column.
    pub default_timezone: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancellationConfig {
    /// Applied when a clinic cancellation does not state a deposit decision.
    /// Financially consequential, so it lives in config rather than code.
    pub retain_deposit_by_default: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Base URL of the payment provider. When absent the provider is
    /// disabled and bookings are created without a payment step.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Base URL of the notification provider. When absent notifications
    /// are skipped (and reported as not sent).
    pub base_url: Option<String>,
    /// Whether the background reminder worker runs.
    pub reminders_enabled: bool,
    /// How far ahead of an appointment start a reminder fires, in hours.
    pub reminder_lead_hours: i64,
    /// How often (seconds) the reminder worker polls for due appointments.
    pub reminder_poll_interval_seconds: u64,
    /// Cap on reminders per appointment.
    pub max_reminders: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RewardConfig {
    pub base_url: Option<String>,
    /// Points awarded per whole currency unit paid.
    pub points_per_currency_unit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for public booking endpoints.
    pub booking_per_second: u32,
    /// Burst size for public booking endpoints.
    pub booking_burst: u32,
}

fn parse_time(var: &str, default: &str) -> Result<NaiveTime, ConfigError> {
    let raw = env::var(var).unwrap_or_else(|_| default.to_string());
    NaiveTime::parse_from_str(&raw, "%H:%M")
        .map_err(|_| ConfigError::InvalidValue(var.to_string()))
}

fn parse_bool(var: &str, default: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/app.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            scheduling: SchedulingConfig {
                slot_interval_minutes: env::var("SLOT_INTERVAL_MINUTES")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
                default_open: parse_time("DEFAULT_OPEN_TIME", "00:00")?,
                default_close: parse_time("DEFAULT_CLOSE_TIME", "23:59")?,
                default_timezone: env::var("DEFAULT_TIMEZONE")
                    .unwrap_or_else(|_| "UTC".to_string()),
            },
            cancellation: CancellationConfig {
                retain_deposit_by_default: parse_bool("RETAIN_DEPOSIT_BY_DEFAULT", true),
            },
            payments: PaymentConfig {
                base_url: env::var("PAYMENT_PROVIDER_URL").ok(),
                api_key: env::var("PAYMENT_PROVIDER_API_KEY").ok(),
            },
            notifications: NotificationConfig {
                base_url: env::var("NOTIFICATION_PROVIDER_URL").ok(),
                reminders_enabled: parse_bool("REMINDERS_ENABLED", true),
                reminder_lead_hours: env::var("REMINDER_LEAD_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse()
                    .unwrap_or(24),
                reminder_poll_interval_seconds: env::var("REMINDER_POLL_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .unwrap_or(300u64),
                max_reminders: env::var("MAX_REMINDERS_PER_APPOINTMENT")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .unwrap_or(2),
            },
            rewards: RewardConfig {
                base_url: env::var("REWARD_PROVIDER_URL").ok(),
                points_per_currency_unit: env::var("REWARD_POINTS_PER_CURRENCY_UNIT")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()
                    .unwrap_or(1),
            },
            rate_limit: RateLimitConfig {
                booking_per_second: env::var("RATE_LIMIT_BOOKING_PER_SECOND")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                booking_burst: env::var("RATE_LIMIT_BOOKING_BURST")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .unwrap_or(20),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/app.db".to_string(),
                max_connections: 5,
            },
            scheduling: SchedulingConfig {
                slot_interval_minutes: 30,
                default_open: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
                default_close: NaiveTime::from_hms_opt(23, 59, 0).unwrap(),
                default_timezone: "UTC".to_string(),
            },
            cancellation: CancellationConfig {
                retain_deposit_by_default: true,
            },
            payments: PaymentConfig {
                base_url: None,
                api_key: None,
            },
            notifications: NotificationConfig {
                base_url: None,
                reminders_enabled: true,
                reminder_lead_hours: 24,
                reminder_poll_interval_seconds: 300,
                max_reminders: 2,
            },
            rewards: RewardConfig {
                base_url: None,
                points_per_currency_unit: 1,
            },
            rate_limit: RateLimitConfig {
                booking_per_second: 5,
                booking_burst: 20,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hours_are_fully_open() {
        let config = Config::default();
        assert_eq!(
            config.scheduling.default_open,
            NaiveTime::from_hms_opt(0, 0, 0).unwrap()
        );
        assert_eq!(
            config.scheduling.default_close,
            NaiveTime::from_hms_opt(23, 59, 0).unwrap()
        );
    }

    #[test]
    fn deposit_is_retained_by_default() {
        let config = Config::default();
        assert!(config.cancellation.retain_deposit_by_default);
    }
}
