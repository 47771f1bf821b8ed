//! Environment variable parsing helpers.
//!
//! Empty values are treated exactly like missing ones.

use std::str::FromStr;
use std::time::Duration;

use super::ConfigError;

/// Variable value, or `default` when missing or empty.
pub fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

/// Variable value, `None` when missing or empty.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

/// "1" and "true" (any case) are true, anything else false.
pub fn env_bool(key: &str, default: bool) -> bool {
    match env_opt(key) {
        Some(v) => v == "1" || v.eq_ignore_ascii_case("true"),
        None => default,
    }
}

/// Parse a variable with `FromStr`, reporting the key on failure.
pub fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::Parse {
            key: key.into(),
            value: v,
            error: e.to_string(),
        }),
        None => Ok(default),
    }
}

const UNITS: &[(char, u64)] = &[('s', 1), ('m', 60), ('h', 3_600), ('d', 86_400)];

/// Parse "30s", "10m", "1h", "1d" or bare seconds.
///
/// "off", "0" and the empty string mean disabled and yield `None`.
pub fn parse_duration(s: &str) -> Result<Option<Duration>, String> {
    let s = s.trim().to_ascii_lowercase();
    if s.is_empty() || s == "off" || s == "0" {
        return Ok(None);
    }

    let (digits, multiplier) = match s.chars().last().and_then(|c| {
        UNITS
            .iter()
            .find(|(unit, _)| *unit == c)
            .map(|(_, m)| (&s[..s.len() - 1], *m))
    }) {
        Some(split) => split,
        None => (s.as_str(), 1),
    };

    let num: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration: {}", s))?;
    let secs = num
        .checked_mul(multiplier)
        .ok_or_else(|| format!("duration too large: {}", s))?;

    Ok(Some(Duration::from_secs(secs)))
}

/// Parse a duration variable, falling back to `default` when unset.
pub fn env_duration(key: &str, default: &str) -> Result<Option<Duration>, ConfigError> {
    let value = env_or(key, default);
    parse_duration(&value).map_err(|error| ConfigError::Parse {
        key: key.into(),
        value,
        error,
    })
}
