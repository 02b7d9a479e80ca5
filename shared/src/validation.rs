//! # Shared Validators
//!
//! Validation helpers used by every component of the data plane. Three
//! string-shaped validators cover almost all inputs (`identifier`, `id`,
//! `namespace`); email normalization and hash validation round out the set.
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use shared::validation::{validate_identifier, normalize_email};
//!
//! let relation = validate_identifier("relation", "member")?;
//! let email = normalize_email("  Alice@Example.com ")?;
//! assert_eq!(email, "alice@example.com");
//! ```

use crate::errors::CoreError;
use serde::de::DeserializeOwned;
use validator::Validate;

const MAX_STRING_LEN: usize = 1024;

/// Validates a request DTO that implements `Validate`.
pub fn validate_request<T: Validate>(data: &T) -> Result<(), CoreError> {
    data.validate().map_err(CoreError::ValidationError)
}

/// Parses a JSON string and validates the result in one step.
pub fn parse_and_validate<T: DeserializeOwned + Validate>(json: &str) -> Result<T, CoreError> {
    let data: T = serde_json::from_str(json)
        .map_err(|e| CoreError::invalid_input("body", e.to_string()))?;
    validate_request(&data)?;
    Ok(data)
}

/// Validates an *identifier*: lowercase `[a-z][a-z0-9_-]*`, at most 1024
/// characters. Used for relation names, resource types, subject types and
/// similar engine-internal vocabulary.
pub fn validate_identifier(field: &str, value: &str) -> Result<(), CoreError> {
    if value.is_empty() || value.len() > MAX_STRING_LEN {
        return Err(CoreError::invalid_input(field, "must be 1..=1024 characters"));
    }

    let mut chars = value.chars();
    let first = chars.next().unwrap();
    if !first.is_ascii_lowercase() {
        return Err(CoreError::invalid_input(field, "must start with a lowercase letter"));
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-') {
        return Err(CoreError::invalid_input(
            field,
            "must contain only lowercase letters, digits, '_' or '-'",
        ));
    }

    Ok(())
}

/// Validates an opaque *id*: any non-empty string up to 1024 bytes without
/// control characters or leading/trailing whitespace. Used for subject ids,
/// resource ids and similar caller-supplied opaque values.
pub fn validate_opaque_id(field: &str, value: &str) -> Result<(), CoreError> {
    if value.is_empty() || value.len() > MAX_STRING_LEN {
        return Err(CoreError::invalid_input(field, "must be 1..=1024 characters"));
    }
    if value.chars().any(|c| c.is_control()) {
        return Err(CoreError::invalid_input(field, "must not contain control characters"));
    }
    if value != value.trim() {
        return Err(CoreError::invalid_input(field, "must not have leading or trailing whitespace"));
    }

    Ok(())
}

/// Validates a *namespace*: alphanumeric with `_`/`-`, starting alphanumeric.
/// An empty namespace is rejected here; tenant binding treats an empty
/// namespace as fail-closed at a higher layer.
pub fn validate_namespace(field: &str, value: &str) -> Result<(), CoreError> {
    if value.is_empty() || value.len() > MAX_STRING_LEN {
        return Err(CoreError::invalid_input(field, "must be 1..=1024 characters"));
    }

    let mut chars = value.chars();
    let first = chars.next().unwrap();
    if !first.is_ascii_alphanumeric() {
        return Err(CoreError::invalid_input(field, "must start with an alphanumeric character"));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(CoreError::invalid_input(
            field,
            "must contain only alphanumeric characters, '_' or '-'",
        ));
    }

    Ok(())
}

/// Normalizes an email address: trims whitespace, lowercases, and requires
/// the shape `non-space@non-space` with no control characters.
pub fn normalize_email(value: &str) -> Result<String, CoreError> {
    let trimmed = value.trim().to_lowercase();

    if trimmed.chars().any(|c| c.is_control()) {
        return Err(CoreError::invalid_input("email", "must not contain control characters"));
    }

    let Some((local, domain)) = trimmed.split_once('@') else {
        return Err(CoreError::invalid_input("email", "must contain '@'"));
    };
    if local.is_empty() || domain.is_empty() || local.contains(' ') || domain.contains(' ') {
        return Err(CoreError::invalid_input("email", "must be shaped like non-space@non-space"));
    }

    Ok(trimmed)
}

/// Validates an opaque hash string (password hash, token hash, key hash):
/// non-empty, at most 1024 characters, no control characters. Callers that
/// permit SSO-only users without a password hash should skip this validator
/// for `None` values rather than passing an empty string.
pub fn validate_hash(field: &str, value: &str) -> Result<(), CoreError> {
    if value.is_empty() || value.len() > MAX_STRING_LEN {
        return Err(CoreError::invalid_input(field, "must be 1..=1024 characters"));
    }
    if value.chars().any(|c| c.is_control()) {
        return Err(CoreError::invalid_input(field, "must not contain control characters"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_accepts_lowercase_snake_and_kebab() {
        assert!(validate_identifier("relation", "member").is_ok());
        assert!(validate_identifier("relation", "can_write").is_ok());
        assert!(validate_identifier("relation", "can-write").is_ok());
        assert!(validate_identifier("relation", "a1").is_ok());
    }

    #[test]
    fn identifier_rejects_uppercase_leading_digit_and_overflow() {
        assert!(validate_identifier("relation", "Member").is_err());
        assert!(validate_identifier("relation", "1member").is_err());
        assert!(validate_identifier("relation", "").is_err());
        assert!(validate_identifier("relation", &"a".repeat(1025)).is_err());
    }

    #[test]
    fn opaque_id_rejects_control_chars_and_padding() {
        assert!(validate_opaque_id("subject_id", "user-123").is_ok());
        assert!(validate_opaque_id("subject_id", "user\t123").is_err());
        assert!(validate_opaque_id("subject_id", " user-123").is_err());
        assert!(validate_opaque_id("subject_id", "user-123 ").is_err());
        assert!(validate_opaque_id("subject_id", "").is_err());
    }

    #[test]
    fn namespace_requires_alphanumeric_start() {
        assert!(validate_namespace("namespace", "acme").is_ok());
        assert!(validate_namespace("namespace", "acme-prod_1").is_ok());
        assert!(validate_namespace("namespace", "_acme").is_err());
        assert!(validate_namespace("namespace", "-acme").is_err());
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email("  Alice@Example.com ").unwrap(), "alice@example.com");
    }

    #[test]
    fn normalize_email_rejects_malformed_shape() {
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("@example.com").is_err());
        assert!(normalize_email("alice@").is_err());
        assert!(normalize_email("ali ce@example.com").is_err());
    }

    #[test]
    fn validate_hash_rejects_empty_and_control_chars() {
        assert!(validate_hash("password_hash", "$argon2id$v=19$...").is_ok());
        assert!(validate_hash("password_hash", "").is_err());
        assert!(validate_hash("password_hash", "bad\0hash").is_err());
    }
}
