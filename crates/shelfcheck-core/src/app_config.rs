use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub log_level: String,
    pub storefronts_path: PathBuf,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// Requests in flight across all storefronts.
    pub global_max_in_flight: usize,
    /// Requests in flight against any one storefront.
    pub host_max_in_flight: usize,
    /// Minimum gap between two consecutive requests to the same storefront.
    pub min_request_interval_ms: u64,
    /// Total protocol attempts per task, first try included.
    pub max_attempts: u32,
    pub retry_backoff_base_ms: u64,
    /// Pause inserted between two storefronts of the same sweep.
    pub storefront_cooldown_ms: u64,
    /// Items staged into one session per fulfillment point.
    pub batch_size: usize,
    pub diagnostic_max_bytes: usize,
    pub watch_cron: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("storefronts_path", &self.storefronts_path)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("global_max_in_flight", &self.global_max_in_flight)
            .field("host_max_in_flight", &self.host_max_in_flight)
            .field("min_request_interval_ms", &self.min_request_interval_ms)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_base_ms", &self.retry_backoff_base_ms)
            .field("storefront_cooldown_ms", &self.storefront_cooldown_ms)
            .field("batch_size", &self.batch_size)
            .field("diagnostic_max_bytes", &self.diagnostic_max_bytes)
            .field("watch_cron", &self.watch_cron)
            .finish()
    }
}
