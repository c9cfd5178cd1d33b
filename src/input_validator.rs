//! Allow-list validation of all externally supplied identifiers
//!
//! Service names end up in filesystem paths and subprocess argument
//! vectors, so validation rejects anything outside the allow-list
//! instead of stripping characters: a name that needed stripping was
//! never a real service name.

use lazy_static::lazy_static;
use regex::Regex;

use crate::errors::{HubError, HubResult};

lazy_static! {
    static ref SERVICE_NAME_PATTERN: Regex = Regex::new(r"^[a-zA-Z0-9_-]{1,64}$").unwrap();
    static ref API_KEY_PATTERN: Regex = Regex::new(r"^[a-zA-Z0-9]{16,128}$").unwrap();
    static ref STRATEGY_PATTERN: Regex = Regex::new(r"^[a-zA-Z0-9]{1,32}$").unwrap();
}

/// Validate a service name against the allow-list. Idempotent: a valid
/// name is returned unchanged.
pub fn sanitize_service_name(name: &str) -> Option<&str> {
    if SERVICE_NAME_PATTERN.is_match(name) {
        Some(name)
    } else {
        None
    }
}

/// Error-typed variant for request handlers.
pub fn require_service_name(name: &str) -> HubResult<String> {
    sanitize_service_name(name)
        .map(str::to_string)
        .ok_or_else(|| HubError::validation("service", "invalid service name"))
}

/// Reduce a rotated API key to its alphanumeric characters. The result
/// must still be at least 16 characters long or the key is rejected.
pub fn sanitize_api_key(key: &str) -> HubResult<String> {
    let cleaned: String = key.chars().filter(char::is_ascii_alphanumeric).collect();
    if API_KEY_PATTERN.is_match(&cleaned) {
        Ok(cleaned)
    } else {
        Err(HubError::validation(
            "new_key",
            "key does not meet security requirements",
        ))
    }
}

/// Validate an update strategy label; falls back to `stable` when the
/// supplied value is unusable.
pub fn sanitize_strategy(strategy: &str) -> String {
    if STRATEGY_PATTERN.is_match(strategy) {
        strategy.to_string()
    } else {
        "stable".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names_pass_unchanged() {
        assert_eq!(sanitize_service_name("my-service_1"), Some("my-service_1"));
        assert_eq!(sanitize_service_name("wikiless"), Some("wikiless"));
    }

    #[test]
    fn traversal_and_empty_names_are_rejected() {
        assert_eq!(sanitize_service_name("ab/../c"), None);
        assert_eq!(sanitize_service_name(""), None);
        assert_eq!(sanitize_service_name("a b"), None);
        assert_eq!(sanitize_service_name("svc;rm"), None);
    }

    #[test]
    fn sanitization_is_idempotent() {
        let once = sanitize_service_name("redlib").unwrap();
        assert_eq!(sanitize_service_name(once), Some("redlib"));
    }

    #[test]
    fn api_keys_are_stripped_then_length_checked() {
        assert!(sanitize_api_key("short").is_err());
        assert!(sanitize_api_key("---!!!---").is_err());
        assert_eq!(
            sanitize_api_key("has-dashes-but-long-enough").unwrap(),
            "hasdashesbutlongenough"
        );
        assert_eq!(
            sanitize_api_key("abcdef0123456789").unwrap(),
            "abcdef0123456789"
        );
    }

    #[test]
    fn unusable_strategy_falls_back_to_stable() {
        assert_eq!(sanitize_strategy("nightly"), "nightly");
        assert_eq!(sanitize_strategy("no good"), "stable");
        assert_eq!(sanitize_strategy(""), "stable");
    }
}
