use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// The parsing and validation logic is decoupled from the real environment so
/// it can be tested with a plain `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u32>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<usize>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };

    let non_zero = |var: &str, value: usize| -> Result<usize, ConfigError> {
        if value == 0 {
            return Err(ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(value)
    };

    let database_url = require("DATABASE_URL")?;
    let env = parse_environment(&or_default("SHELFCHECK_ENV", "development"))?;
    let log_level = or_default("SHELFCHECK_LOG_LEVEL", "info");
    let storefronts_path = PathBuf::from(or_default(
        "SHELFCHECK_STOREFRONTS_PATH",
        "./config/storefronts.yaml",
    ));

    let db_max_connections = parse_u32("SHELFCHECK_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("SHELFCHECK_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("SHELFCHECK_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let request_timeout_secs = parse_u64("SHELFCHECK_REQUEST_TIMEOUT_SECS", "30")?;
    let user_agent = or_default(
        "SHELFCHECK_USER_AGENT",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    );
    let global_max_in_flight = non_zero(
        "SHELFCHECK_GLOBAL_MAX_IN_FLIGHT",
        parse_usize("SHELFCHECK_GLOBAL_MAX_IN_FLIGHT", "10")?,
    )?;
    let host_max_in_flight = non_zero(
        "SHELFCHECK_HOST_MAX_IN_FLIGHT",
        parse_usize("SHELFCHECK_HOST_MAX_IN_FLIGHT", "4")?,
    )?;
    let min_request_interval_ms = parse_u64("SHELFCHECK_MIN_REQUEST_INTERVAL_MS", "250")?;
    let max_attempts = parse_u32("SHELFCHECK_MAX_ATTEMPTS", "3")?;
    if max_attempts == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "SHELFCHECK_MAX_ATTEMPTS".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    let retry_backoff_base_ms = parse_u64("SHELFCHECK_RETRY_BACKOFF_BASE_MS", "1000")?;
    let storefront_cooldown_ms = parse_u64("SHELFCHECK_STOREFRONT_COOLDOWN_MS", "5000")?;
    let batch_size = non_zero(
        "SHELFCHECK_BATCH_SIZE",
        parse_usize("SHELFCHECK_BATCH_SIZE", "1")?,
    )?;
    let diagnostic_max_bytes = parse_usize("SHELFCHECK_DIAGNOSTIC_MAX_BYTES", "4096")?;
    let watch_cron = or_default("SHELFCHECK_WATCH_CRON", "0 0 */6 * * *");

    Ok(AppConfig {
        database_url,
        env,
        log_level,
        storefronts_path,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        request_timeout_secs,
        user_agent,
        global_max_in_flight,
        host_max_in_flight,
        min_request_interval_ms,
        max_attempts,
        retry_backoff_base_ms,
        storefront_cooldown_ms,
        batch_size,
        diagnostic_max_bytes,
        watch_cron,
    })
}

/// Parse a string into an `Environment` variant.
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnvVar` for unrecognized values.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "SHELFCHECK_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
