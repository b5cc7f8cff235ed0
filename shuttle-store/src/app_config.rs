use chrono::Weekday;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub kafka: Option<KafkaConfig>,
    pub auth: AuthConfig,
    #[serde(default)]
    pub calendar: Option<CalendarConfig>,
    pub booking: BookingConfig,
    #[serde(default)]
    pub pricing: PricingSettings,
    #[serde(default)]
    pub credits: CreditsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Upper bound on any single row-lock wait inside a transaction.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_max_connections() -> u32 { 10 }
fn default_acquire_timeout_ms() -> u64 { 3000 }
fn default_lock_timeout_ms() -> u64 { 2000 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_topic() -> String { "shuttle.notifications".to_string() }

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CalendarConfig {
    pub base_url: String,
    #[serde(default = "default_calendar_timeout_ms")]
    pub timeout_ms: u64,
    /// Busy windows are cached in Redis for this long when Redis is configured.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    /// Calendar for destinations without one of their own.
    #[serde(default)]
    pub default_calendar_id: Option<String>,
}

fn default_calendar_timeout_ms() -> u64 { 2000 }
fn default_cache_ttl() -> u64 { 60 }

#[derive(Debug, Deserialize, Clone)]
pub struct BookingConfig {
    /// IANA name, e.g. `Africa/Johannesburg`.
    pub time_zone: String,
    #[serde(default = "default_non_service_days")]
    pub non_service_days: Vec<String>,
    pub start_hour: u32,
    pub end_hour: u32,
    pub interval_minutes: u32,
    pub cutoff_minutes: u32,
}

fn default_non_service_days() -> Vec<String> {
    vec!["Sat".to_string(), "Sun".to_string()]
}

impl BookingConfig {
    pub fn weekdays(&self) -> Result<Vec<Weekday>, config::ConfigError> {
        self.non_service_days
            .iter()
            .map(|d| {
                d.parse::<Weekday>().map_err(|_| {
                    config::ConfigError::Message(format!("Unknown weekday in booking.non_service_days: {}", d))
                })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PricingSettings {
    #[serde(default = "default_flat_rate")]
    pub flat_rate_credits: i64,
    #[serde(default)]
    pub reject_non_monotonic_tiers: bool,
}

fn default_flat_rate() -> i64 { 1 }

impl Default for PricingSettings {
    fn default() -> Self {
        Self {
            flat_rate_credits: default_flat_rate(),
            reject_non_monotonic_tiers: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CreditsConfig {
    /// Display-only conversion for purchase screens.
    #[serde(default = "default_rand_per_credit")]
    pub rand_per_credit: i64,
}

fn default_rand_per_credit() -> i64 { 100 }

impl Default for CreditsConfig {
    fn default() -> Self {
        Self { rand_per_credit: default_rand_per_credit() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests")]
    pub requests_per_window: i64,
    #[serde(default = "default_window")]
    pub window_seconds: i64,
}

fn default_requests() -> i64 { 120 }
fn default_window() -> i64 { 60 }

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: default_requests(),
            window_seconds: default_window(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `SHUTTLE__DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("SHUTTLE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
