use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: database.db
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "database.db".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: app.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "app.log".to_string()));

/// Bot token fallback
/// The primary source is the telegram_settings table; BOT_TOKEN (or the
/// conventional TELOXIDE_TOKEN) is used when no row exists yet.
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Network configuration
pub mod network {
    use super::{env, Duration, Lazy};

    /// Timeout for panel and gateway HTTP calls (in seconds).
    /// The original left these unbounded; a hung panel would wedge a whole
    /// reconciliation tick, so every client here carries this timeout.
    pub static REQUEST_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| {
        env::var("HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30)
    });

    /// Request timeout duration
    pub fn timeout() -> Duration {
        Duration::from_secs(*REQUEST_TIMEOUT_SECS)
    }
}

/// Scheduler configuration
pub mod scheduler {
    use super::Duration;

    /// Interval between pending-payment checks (in seconds)
    pub const PAYMENT_CHECK_INTERVAL_SECS: u64 = 60;

    /// Default interval between subscription-expiry checks when
    /// telegram_settings has no value (in minutes)
    pub const DEFAULT_SUBSCRIPTION_CHECK_MINUTES: u64 = 60;

    /// Payment check interval duration
    pub fn payment_check_interval() -> Duration {
        Duration::from_secs(PAYMENT_CHECK_INTERVAL_SECS)
    }
}

/// Renewal configuration
pub mod renewal {
    /// Duration of a renewal created from a notification or bot callback (days).
    /// The admin surface can issue arbitrary durations; the automatic paths
    /// always use this fixed period.
    pub const STANDARD_PERIOD_DAYS: i64 = 30;

    /// Age after which sent-notification records are purged (hours).
    /// Purging re-arms notification for the same expiry value, which is an
    /// accepted imprecision of the dedup ledger.
    pub const NOTIFICATION_PURGE_HOURS: i64 = 24;
}

/// Payment gateway configuration
pub mod gateway {
    use super::env;

    /// Base URL of the YooMoney API
    /// Read from YOOMONEY_API_URL on every call, not cached: integration
    /// tests point this at a local mock server per test
    pub fn base_url() -> String {
        env::var("YOOMONEY_API_URL").unwrap_or_else(|_| "https://yoomoney.ru".to_string())
    }
}

/// Trial account configuration
pub mod trial {
    use super::{env, Lazy};

    /// Domain for generated trial-account e-mails ("<tgid>@<domain>")
    /// Read from TRIAL_EMAIL_DOMAIN environment variable
    pub static EMAIL_DOMAIN: Lazy<String> =
        Lazy::new(|| env::var("TRIAL_EMAIL_DOMAIN").unwrap_or_else(|_| "vpn.syslab.space".to_string()));
}

/// Retry configuration for the bot dispatcher
pub mod retry {
    use super::Duration;

    /// Maximum number of consecutive restarts for the polling loop
    pub const MAX_DISPATCHER_RETRIES: u32 = 5;

    /// Pause between polling restarts (in seconds)
    pub const DISPATCHER_RETRY_DELAY_SECS: u64 = 5;

    /// Dispatcher retry delay duration
    pub fn dispatcher_delay() -> Duration {
        Duration::from_secs(DISPATCHER_RETRY_DELAY_SECS)
    }
}
