use serde::Deserialize;

/// Upper bound for eligibility window settings (one year).
pub const MAX_WINDOW_SECS: i64 = 366 * 24 * 60 * 60;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Redis connection string. When set, sends are guarded by per-record claims.
    pub redis_url: Option<String>,

    /// Lifetime of a per-record send claim in seconds (default: 120)
    pub send_claim_ttl_secs: u64,

    /// Firebase project that owns the push credentials
    pub fcm_project_id: Option<String>,

    /// Path to a service-account JSON key for FCM
    pub fcm_credentials_path: Option<String>,

    /// Static bearer token for FCM (emulators, short-lived testing)
    pub fcm_access_token: Option<String>,

    /// FCM base endpoint (default: https://fcm.googleapis.com)
    pub fcm_endpoint: String,

    /// Interval between scans in seconds (default: 300)
    pub scan_interval_secs: u64,

    /// Watchdog timeout for a single scan in seconds (default: 240)
    pub scan_timeout_secs: u64,

    /// Number of recipients processed in parallel (default: 1 = sequential)
    pub scan_concurrency: usize,

    /// Recipients loaded per registry page (default: 500)
    pub recipient_page_size: u32,

    /// Half-width of the time-critical window in seconds (default: 300)
    pub time_critical_window_secs: i64,

    /// Lookback of the freshness window in seconds (default: 14400 = 4h)
    pub freshness_lookback_secs: i64,

    /// Whether to dispatch time-critical records as soon as they are created
    pub reactive_trigger_enabled: bool,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 20)?,
            redis_url: optional_var("REDIS_URL"),
            send_claim_ttl_secs: parse_var("SEND_CLAIM_TTL_SECS", 120)?,
            fcm_project_id: optional_var("FCM_PROJECT_ID"),
            fcm_credentials_path: optional_var("FCM_CREDENTIALS_PATH")
                .or_else(|| optional_var("GOOGLE_APPLICATION_CREDENTIALS")),
            fcm_access_token: optional_var("FCM_ACCESS_TOKEN"),
            fcm_endpoint: std::env::var("FCM_ENDPOINT")
                .unwrap_or_else(|_| "https://fcm.googleapis.com".to_string()),
            scan_interval_secs: parse_var("SCAN_INTERVAL_SECS", 300)?,
            scan_timeout_secs: parse_var("SCAN_TIMEOUT_SECS", 240)?,
            scan_concurrency: parse_var("SCAN_CONCURRENCY", 1)?,
            recipient_page_size: parse_var("RECIPIENT_PAGE_SIZE", 500)?,
            time_critical_window_secs: check_window(
                "TIME_CRITICAL_WINDOW_SECS",
                parse_var("TIME_CRITICAL_WINDOW_SECS", 300)?,
            )?,
            freshness_lookback_secs: check_window(
                "FRESHNESS_LOOKBACK_SECS",
                parse_var("FRESHNESS_LOOKBACK_SECS", 14_400)?,
            )?,
            reactive_trigger_enabled: parse_var("REACTIVE_TRIGGER_ENABLED", true)?,
        })
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                name,
                std::any::type_name::<T>()
            )
        }),
        Err(_) => Ok(default),
    }
}

/// Window settings must be positive and at most `MAX_WINDOW_SECS`.
fn check_window(name: &str, secs: i64) -> anyhow::Result<i64> {
    if secs <= 0 || secs > MAX_WINDOW_SECS {
        anyhow::bail!(
            "{} must be between 1 and {} seconds, got {}",
            name,
            MAX_WINDOW_SECS,
            secs
        );
    }
    Ok(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_uses_default_when_unset() {
        let value: u64 = parse_var("TIDINGS_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_optional_var_ignores_unset() {
        assert_eq!(optional_var("TIDINGS_TEST_UNSET_OPTIONAL"), None);
    }

    #[test]
    fn test_check_window_accepts_defaults() {
        assert_eq!(check_window("W", 300).unwrap(), 300);
        assert_eq!(check_window("W", 14_400).unwrap(), 14_400);
        assert_eq!(check_window("W", MAX_WINDOW_SECS).unwrap(), MAX_WINDOW_SECS);
    }

    #[test]
    fn test_check_window_rejects_out_of_range() {
        assert!(check_window("W", 0).is_err());
        assert!(check_window("W", -300).is_err());
        assert!(check_window("W", MAX_WINDOW_SECS + 1).is_err());
        assert!(check_window("W", 9_000_000_000_000_000).is_err());
    }
}
