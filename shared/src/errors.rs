//! # Core Error Types
//!
//! Unified error handling for the data plane crate.
//!
//! ## Design Philosophy
//!
//! This module follows the "make illegal states unrepresentable" principle.
//! Each variant maps to one of the error kinds named in the operation
//! contract, so callers (an HTTP layer, a gRPC layer, a CLI) can translate
//! `CoreError` into whatever transport-level status makes sense for them.
//! This crate never binds a socket and therefore never implements a
//! framework's response trait directly.
//!
//! ## Error Categories
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         CoreError Categories                            │
//! ├────────────────────┬────────────────────┬───────────────────────────────┤
//! │ InvalidInput        │ InvalidParameter   │ CycleDetected                │
//! │ shape violation     │ semantic violation │ member/parent cycle          │
//! ├────────────────────┼────────────────────┼───────────────────────────────┤
//! │ NotFound            │ Conflict           │ FeatureNotSupported          │
//! ├────────────────────┴────────────────────┴───────────────────────────────┤
//! │ InternalInvariant (reconcile only)   │ Database (wraps sqlx::Error)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation Policy
//!
//! All errors abort the enclosing transaction. Read paths never raise for
//! "not permitted / not found" — they return empty result sets instead.
//! Validation errors are raised before any mutation and before audit
//! emission, so a rolled-back transaction never leaves a half-written audit
//! trail.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::ValidationErrors;

/// Result type alias used throughout the crate.
pub type CoreResult<T> = Result<T, CoreError>;

/// Data-plane error taxonomy.
///
/// Variants carry enough context to build a human-readable message naming
/// the offending field and value, without leaking secrets (token hashes,
/// passwords, raw credentials never appear in a `CoreError`).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Shape violation: null where required, length overflow, bad identifier
    /// pattern, control characters, malformed email, bad UUID, unknown enum
    /// value.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Name of the offending field.
        field: String,
        /// Human-readable description of what's wrong.
        message: String,
    },

    /// Semantic violation: expiration in the past, self-reference in
    /// `member`/`parent`, impersonation of self, duration exceeds maximum,
    /// reason empty/whitespace, operator chaining, deleting the active
    /// config version.
    #[error("invalid parameter {parameter}: {message}")]
    InvalidParameter {
        /// Name of the offending parameter.
        parameter: String,
        /// Human-readable description of what's wrong.
        message: String,
    },

    /// Adding the edge would close a `member` or `parent` cycle.
    #[error("cycle detected: adding this edge would close a membership/parent cycle")]
    CycleDetected,

    /// Wraps `validator` field-level failures for DTOs that derive
    /// `Validate`.
    #[error("validation error")]
    ValidationError(#[from] ValidationErrors),

    /// Grant to extend expiration does not exist, reservation not active,
    /// or any other referenced entity is absent.
    #[error("not found: {resource}")]
    NotFound {
        /// Resource identifier (e.g. "session:abc", "reservation:xyz").
        resource: String,
    },

    /// Unique-constraint violation on a path that is not idempotent by
    /// design.
    #[error("conflict: {resource}")]
    Conflict {
        /// Description of the conflict (e.g. "tuple already exists").
        resource: String,
    },

    /// Bulk writes requesting `member`/`parent` relations, or any other
    /// operation explicitly scoped out of this crate.
    #[error("feature not supported: {feature}")]
    FeatureNotSupported {
        /// Name of the unsupported feature.
        feature: String,
    },

    /// Raised only by `reconcile` output. Never raised by writes, since
    /// writes preserve invariants by construction.
    #[error("internal invariant violated: {invariant}")]
    InternalInvariant {
        /// Description of the violated invariant.
        invariant: String,
    },

    /// PostgreSQL query failed. Details are logged; the message surfaced to
    /// callers stays generic.
    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl CoreError {
    /// Convenience constructor for [`CoreError::InvalidInput`].
    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput { field: field.into(), message: message.into() }
    }

    /// Convenience constructor for [`CoreError::InvalidParameter`].
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter { parameter: parameter.into(), message: message.into() }
    }

    /// Convenience constructor for [`CoreError::NotFound`].
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound { resource: resource.into() }
    }

    /// Returns a stable, machine-readable error code in SCREAMING_SNAKE_CASE.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::InvalidParameter { .. } => "INVALID_PARAMETER",
            Self::CycleDetected => "CYCLE_DETECTED",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::FeatureNotSupported { .. } => "FEATURE_NOT_SUPPORTED",
            Self::InternalInvariant { .. } => "INTERNAL_INVARIANT",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Returns `true` if this error should be logged and monitored as a
    /// server-side failure rather than a caller mistake.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Database(_) | Self::InternalInvariant { .. })
    }
}

/// Structured representation of a [`CoreError`], suitable for serializing
/// into whatever wire format a caller's transport layer uses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message naming the offending field/value.
    pub message: String,
    /// Request id for correlating against audit and log entries, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorDetail {
    /// Builds a detail record from a `CoreError`.
    pub fn new(error: &CoreError) -> Self {
        Self { code: error.error_code().to_string(), message: error.to_string(), request_id: None }
    }

    /// Attaches a request id for tracing.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_screaming_snake_case() {
        assert_eq!(CoreError::invalid_input("email", "bad").error_code(), "INVALID_INPUT");
        assert_eq!(CoreError::not_found("session:1").error_code(), "NOT_FOUND");
        assert_eq!(CoreError::CycleDetected.error_code(), "CYCLE_DETECTED");
    }

    #[test]
    fn database_and_invariant_errors_are_internal() {
        assert!(CoreError::InternalInvariant { invariant: "balance".into() }.is_internal());
        assert!(!CoreError::CycleDetected.is_internal());
        assert!(!CoreError::not_found("x").is_internal());
    }

    #[test]
    fn error_detail_carries_code_and_message() {
        let err = CoreError::invalid_parameter("expires_at", "must be in the future");
        let detail = ErrorDetail::new(&err);
        assert_eq!(detail.code, "INVALID_PARAMETER");
        assert!(detail.message.contains("expires_at"));
        assert!(detail.request_id.is_none());
    }

    #[test]
    fn error_detail_with_request_id() {
        let detail = ErrorDetail::new(&CoreError::CycleDetected).with_request_id("req-1");
        assert_eq!(detail.request_id.as_deref(), Some("req-1"));
    }
}
