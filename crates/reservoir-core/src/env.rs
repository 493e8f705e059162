//! Typed environment variable readers used by the configuration builders.
//!
//! Every reader returns `Ok(None)` when the variable is unset and a
//! [`ConfigError::InvalidEnvVar`] when it is set but cannot be parsed, so
//! a typo in deployment configuration fails loudly instead of silently
//! falling back to a default.

use std::env;
use std::str::FromStr;

use crate::error::ConfigError;

/// Read a string variable.
pub fn get_env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Read a boolean variable (`true/false/1/0/yes/no/on/off`).
pub fn get_env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(val) => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!(
                    "invalid boolean value '{val}', expected true/false/1/0/yes/no/on/off"
                ),
            }),
        },
        Err(_) => Ok(None),
    }
}

pub fn get_env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    get_env_parsed(key, "u64")
}

pub fn get_env_u32(key: &str) -> Result<Option<u32>, ConfigError> {
    get_env_parsed(key, "u32")
}

pub fn get_env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    get_env_parsed(key, "usize")
}

pub fn get_env_f64(key: &str) -> Result<Option<f64>, ConfigError> {
    get_env_parsed(key, "f64")
}

fn get_env_parsed<T>(key: &str, type_name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid {type_name} value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

/// Build an environment key such as `RESERVOIR_POOL_DATABASE_MAX_SIZE`.
pub fn scoped_key(prefix: &str, scope: &str, field: &str) -> String {
    let scope: String = scope
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{prefix}_{scope}_{field}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_key_normalizes_pool_names() {
        assert_eq!(
            scoped_key("RESERVOIR_POOL", "tws-http", "MAX_SIZE"),
            "RESERVOIR_POOL_TWS_HTTP_MAX_SIZE"
        );
        assert_eq!(
            scoped_key("RESERVOIR_POOL", "database", "MIN_SIZE"),
            "RESERVOIR_POOL_DATABASE_MIN_SIZE"
        );
    }

    #[test]
    fn test_missing_variables_are_none() {
        assert_eq!(
            get_env_u64("RESERVOIR_TEST_SURELY_UNSET_VARIABLE").unwrap(),
            None
        );
        assert_eq!(
            get_env_bool("RESERVOIR_TEST_SURELY_UNSET_VARIABLE").unwrap(),
            None
        );
        assert!(get_env_string("RESERVOIR_TEST_SURELY_UNSET_VARIABLE").is_none());
    }
}
