use anyhow::Context;
use chrono::FixedOffset;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub webapp_url: Option<String>,
    pub scheduler_api_url: String,
    pub scheduler_api_token: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub payment_currency: String,
    /// Fixed online deposit; the balance is settled at the venue.
    pub deposit_amount: i64,
    pub payment_window: chrono::Duration,
    pub webhook_tolerance_secs: i64,
    pub venue_offset: FixedOffset,
    pub opening_hour: u32,
    pub closing_hour: u32,
    pub sweep_interval: Duration,
    pub price_sync_max_attempts: u32,
    pub price_sync_base_delay: Duration,
    pub line_channel_token: String,
    pub ops_line_target: String,
    pub admin_token: String,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed<T>(key: &str, default: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var_or(key, default)
        .parse::<T>()
        .with_context(|| format!("{} must be a number", key))
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let offset_hours: i32 = parsed("VENUE_UTC_OFFSET_HOURS", "7")?;
        let venue_offset = FixedOffset::east_opt(offset_hours * 3600)
            .context("VENUE_UTC_OFFSET_HOURS out of range")?;

        let opening_hour: u32 = parsed("OPENING_HOUR", "8")?;
        let closing_hour: u32 = parsed("CLOSING_HOUR", "24")?;
        if opening_hour >= closing_hour || closing_hour > 24 {
            anyhow::bail!("OPENING_HOUR must be before CLOSING_HOUR (max 24)");
        }

        Ok(Self {
            database_url: var_or("DATABASE_URL", "sqlite:fieldbook.db?mode=rwc"),
            host: var_or("HOST", "0.0.0.0"),
            port: parsed("PORT", "3000")?,
            webapp_url: env::var("WEBAPP_URL").ok().filter(|s| !s.is_empty()),
            scheduler_api_url: var_or("SCHEDULER_API_URL", "http://localhost:8081/api/"),
            scheduler_api_token: var_or("SCHEDULER_API_TOKEN", ""),
            stripe_secret_key: var_or("STRIPE_SECRET_KEY", ""),
            stripe_webhook_secret: var_or("STRIPE_WEBHOOK_SECRET", ""),
            payment_currency: var_or("PAYMENT_CURRENCY", "thb"),
            deposit_amount: parsed("DEPOSIT_AMOUNT", "500")?,
            payment_window: chrono::Duration::minutes(parsed("PAYMENT_WINDOW_MINS", "10")?),
            webhook_tolerance_secs: parsed("WEBHOOK_TOLERANCE_SECS", "300")?,
            venue_offset,
            opening_hour,
            closing_hour,
            sweep_interval: Duration::from_secs(parsed("SWEEP_INTERVAL_SECS", "60")?),
            price_sync_max_attempts: parsed("PRICE_SYNC_MAX_ATTEMPTS", "5")?,
            price_sync_base_delay: Duration::from_millis(parsed("PRICE_SYNC_BASE_DELAY_MS", "2000")?),
            line_channel_token: var_or("LINE_CHANNEL_TOKEN", ""),
            ops_line_target: var_or("OPS_LINE_TARGET", ""),
            admin_token: var_or("ADMIN_TOKEN", ""),
        })
    }

    /// Startup warnings for credentials left unset. Call once tracing is up.
    pub fn warn_missing(&self) {
        if self.scheduler_api_token.is_empty() {
            tracing::warn!("SCHEDULER_API_TOKEN not set, reservations will fail");
        }
        if self.stripe_secret_key.is_empty() {
            tracing::warn!("STRIPE_SECRET_KEY not set, deposits will fail");
        }
        if self.stripe_webhook_secret.is_empty() {
            tracing::warn!("STRIPE_WEBHOOK_SECRET not set, every webhook will be rejected");
        }
        if self.admin_token.is_empty() {
            tracing::warn!("ADMIN_TOKEN not set, staff endpoints are locked");
        }
        if self.line_channel_token.is_empty() {
            tracing::warn!("LINE_CHANNEL_TOKEN not set, customer notices and ops alerts are off");
        }
    }

    pub fn opening_minute(&self) -> i64 {
        self.opening_hour as i64 * 60
    }

    pub fn closing_minute(&self) -> i64 {
        self.closing_hour as i64 * 60
    }

    /// Baseline used by tests; mirrors the defaults of `from_env`.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database_url: "sqlite::memory:".into(),
            host: "127.0.0.1".into(),
            port: 0,
            webapp_url: None,
            scheduler_api_url: "http://scheduler.test/api/".into(),
            scheduler_api_token: "sched-token".into(),
            stripe_secret_key: "sk_test".into(),
            stripe_webhook_secret: "whsec_test".into(),
            payment_currency: "thb".into(),
            deposit_amount: 500,
            payment_window: chrono::Duration::minutes(10),
            webhook_tolerance_secs: 300,
            venue_offset: FixedOffset::east_opt(7 * 3600).unwrap(),
            opening_hour: 8,
            closing_hour: 24,
            sweep_interval: Duration::from_secs(60),
            price_sync_max_attempts: 3,
            price_sync_base_delay: Duration::from_millis(1),
            line_channel_token: String::new(),
            ops_line_target: String::new(),
            admin_token: "staff-secret".into(),
        }
    }
}
