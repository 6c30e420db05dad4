//! Environment variable loading utilities

use crate::{Result, ToolingError};
use std::env;
use std::str::FromStr;

/// Load an environment variable as a string
///
/// * `Ok(Some(value))` if the variable exists
/// * `Ok(None)` if it doesn't
/// * `Err` if it exists but is not valid UTF-8
pub fn get_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ToolingError::General(format!(
            "Environment variable {} contains invalid UTF-8",
            key
        ))),
    }
}

/// Load and parse an environment variable
///
/// ```rust,ignore
/// let port: Option<u16> = get_env_parse("RELAY_PORT")?;
/// ```
pub fn get_env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key)?
        .map(|val| {
            val.trim().parse::<T>().map_err(|e| {
                ToolingError::General(format!(
                    "Failed to parse environment variable {}: {}",
                    key, e
                ))
            })
        })
        .transpose()
}

/// Load a boolean environment variable
///
/// Accepts `true/1/yes/on` and `false/0/no/off`, case-insensitively.
pub fn get_env_bool(key: &str) -> Result<Option<bool>> {
    let Some(val) = get_env(key)? else {
        return Ok(None);
    };

    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        _ => Err(ToolingError::General(format!(
            "Invalid boolean value for {}: {}",
            key, val
        ))),
    }
}

/// Overwrite `target` with the parsed value of `key`, if the variable is set.
///
/// Returns whether the target was changed.
///
/// ```rust,ignore
/// let mut port = 8080u16;
/// override_from_env(&mut port, "RELAY_SERVER_PORT")?;
/// ```
pub fn override_from_env<T>(target: &mut T, key: &str) -> Result<bool>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_env_parse(key)? {
        Some(value) => {
            *target = value;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Build a prefixed environment variable name
///
/// `build_env_key("RELAY_", "server_port")` is `"RELAY_SERVER_PORT"`.
pub fn build_env_key(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name.to_uppercase())
}
