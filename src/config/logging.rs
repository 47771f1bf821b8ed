//! Logging configuration.

use super::parse::{env_opt, env_or};
use super::ConfigError;

const DEFAULT_FILTER: &str = "request_tracker=info";
const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// `tracing` filter directive.
    pub filter: String,
    /// Reported in the `ctx.service` field of every log line.
    pub service_name: String,
}

impl LoggingConfig {
    /// Priority: `LOG_LEVEL` > `RUST_LOG` > `request_tracker=info`.
    ///
    /// `LOG_LEVEL` takes a bare level and applies it to this crate;
    /// `RUST_LOG` takes full filter syntax, e.g.
    /// `request_tracker=debug,hyper=warn`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let filter = resolve_filter(
            env_opt("LOG_LEVEL").as_deref(),
            env_opt("RUST_LOG").as_deref(),
        )?;

        Ok(Self {
            filter,
            service_name: env_or("SERVICE_NAME", "request_tracker"),
        })
    }
}

fn resolve_filter(log_level: Option<&str>, rust_log: Option<&str>) -> Result<String, ConfigError> {
    if let Some(level) = log_level {
        let level = level.trim().to_ascii_lowercase();
        if !LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Invalid {
                key: "LOG_LEVEL".into(),
                message: format!("'{}', expected one of {}", level, LEVELS.join(", ")),
            });
        }
        return Ok(format!("request_tracker={}", level));
    }

    Ok(rust_log.unwrap_or(DEFAULT_FILTER).to_string())
}
