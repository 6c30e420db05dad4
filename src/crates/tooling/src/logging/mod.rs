//! Logging utilities
//!
//! Helpers that keep credentials out of log lines and format durations
//! for structured fields.

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

fn secret_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"(?i)(authorization|auth)\s*:\s*bearer\s+\S+", "$1: Bearer [REDACTED]"),
            (r"(?i)([?&](?:token|access_token|api_key|key)=)[^&\s]+", "${1}[REDACTED]"),
            (r"(?i)\b(api[\s_-]?key|apikey|password|secret)\s*[:=]\s*\S+", "$1: [REDACTED]"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
    })
}

/// Sanitize a string for logging
///
/// Replaces bearer headers, credential query parameters and `key: value`
/// secrets with redacted markers.
///
/// # Example
///
/// ```rust
/// use tooling::logging::redact_secrets;
///
/// let url = "http://localhost:8080/stream?session_id=abc&token=s3cr3t";
/// let redacted = redact_secrets(url);
/// assert!(redacted.contains("token=[REDACTED]"));
/// assert!(redacted.contains("session_id=abc"));
/// ```
pub fn redact_secrets(input: &str) -> String {
    secret_patterns()
        .iter()
        .fold(input.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}

/// Format duration in human-readable form
///
/// ```rust
/// use tooling::logging::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
/// assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let micros = duration.as_micros();

    if micros < 1000 {
        format!("{}μs", micros)
    } else if micros < 1_000_000 {
        format!("{}ms", micros / 1000)
    } else if micros < 60_000_000 {
        format!("{:.2}s", micros as f64 / 1_000_000.0)
    } else {
        let seconds = micros / 1_000_000;
        format!("{}m{}s", seconds / 60, seconds % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_bearer_header() {
        let sanitized = redact_secrets("Authorization: Bearer abc123xyz");
        assert!(sanitized.contains("[REDACTED]"));
        assert!(!sanitized.contains("abc123xyz"));
    }

    #[test]
    fn test_redact_query_token_keeps_other_params() {
        let sanitized = redact_secrets("/stream?token=xyz789&session_id=s-1");
        assert_eq!(sanitized, "/stream?token=[REDACTED]&session_id=s-1");
    }

    #[test]
    fn test_redact_api_key() {
        let sanitized = redact_secrets("api_key=sk-abc123");
        assert!(!sanitized.contains("sk-abc123"));
    }

    #[test]
    fn test_safe_data_untouched() {
        let input = "session s-1 opened from 127.0.0.1";
        assert_eq!(redact_secrets(input), input);
    }

    #[test]
    fn test_format_duration_ranges() {
        assert_eq!(format_duration(Duration::from_micros(500)), "500μs");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m5s");
    }
}
