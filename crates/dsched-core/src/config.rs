use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but invalid.
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
/// Returns `ConfigError` if a value is present but invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the process environment so it can be tested with a
/// `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let optional = |var: &str| -> Option<String> {
        lookup(var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
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

    let database_url = optional("DATABASE_URL");
    let env = parse_environment(&or_default("DSCHED_ENV", "development"))?;

    let bind_addr = or_default("DSCHED_BIND_ADDR", "0.0.0.0:3000")
        .parse::<SocketAddr>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: "DSCHED_BIND_ADDR".to_string(),
            reason: e.to_string(),
        })?;
    let log_level = or_default("DSCHED_LOG_LEVEL", "info");
    let jobs_path = PathBuf::from(or_default("DSCHED_JOBS_PATH", "./config/jobs.yaml"));
    let timezone = parse_timezone(&or_default("DSCHED_TIMEZONE", "Asia/Seoul"))?;

    let misfire_grace_secs = parse_u64("DSCHED_MISFIRE_GRACE_SECS", "60")?;
    let history_memory_limit = parse_usize("DSCHED_HISTORY_MEMORY_LIMIT", "1000")?;
    let notify_webhook_url = optional("DSCHED_NOTIFY_WEBHOOK_URL");
    let notify_timeout_secs = parse_u64("DSCHED_NOTIFY_TIMEOUT_SECS", "10")?;

    let db_max_connections = parse_u32("DSCHED_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("DSCHED_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("DSCHED_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        jobs_path,
        timezone,
        misfire_grace_secs,
        history_memory_limit,
        notify_webhook_url,
        notify_timeout_secs,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
    })
}

fn parse_environment(raw: &str) -> Result<Environment, ConfigError> {
    match raw {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "DSCHED_ENV".to_string(),
            reason: format!("unknown environment \"{other}\""),
        }),
    }
}

fn parse_timezone(raw: &str) -> Result<chrono_tz::Tz, ConfigError> {
    raw.parse::<chrono_tz::Tz>()
        .map_err(|_| ConfigError::InvalidEnvVar {
            var: "DSCHED_TIMEZONE".to_string(),
            reason: format!("\"{raw}\" is not an IANA timezone"),
        })
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
