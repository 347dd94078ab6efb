//! Environment variable parsing helpers shared by the service configs
//!
//! Missing or unparsable values fall back to defaults instead of panicking;
//! only genuinely required settings surface an error.

use std::str::FromStr;
use std::time::Duration;

/// Parse an environment variable with a default fallback
///
/// # Example
/// ```ignore
/// let port: u16 = parse_env_with_default("PORT", 8081);
/// ```
pub fn parse_env_with_default<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read the first non-blank variable among `keys`
///
/// Lets a service accept a legacy name next to the current one, e.g.
/// `DATABASE_URL` with `DB_URL` as fallback.
pub fn first_env_var(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// Read a required variable (or one of its aliases)
pub fn required_env_var(keys: &[&str]) -> Result<String, String> {
    first_env_var(keys)
        .ok_or_else(|| format!("{} environment variable not set", keys.join(" / ")))
}

/// Parse a boolean flag; accepts `true/false`, `1/0`, `yes/no`, `on/off`
pub fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Parse a millisecond count into a `Duration`
pub fn parse_env_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(parse_env_with_default(key, default_ms))
}
